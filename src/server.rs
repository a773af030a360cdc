//! HTTP server assembly and lifecycle.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::{signal, spawn};
use tracing::info;

use crate::{
    app_context::AppContext,
    core::health,
    middleware::{self, AuthConfig},
};

async fn v1_models(State(context): State<Arc<AppContext>>) -> Response {
    let data: Vec<_> = context
        .pool
        .all()
        .iter()
        .map(|u| {
            json!({
                "id": u.name(),
                "object": "model",
                "owned_by": u.id().kind.as_str(),
                "available": u.is_enabled() && u.breaker().peek_available(),
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data})).into_response()
}

async fn health(State(context): State<Arc<AppContext>>) -> Response {
    let now = tokio::time::Instant::now();
    let upstreams: Vec<_> = context
        .pool
        .all()
        .iter()
        .map(|u| {
            let metrics = u.metrics().snapshot();
            let breaker = u.breaker().snapshot();
            let score = health::health_score(&metrics, breaker.state, u.priority_bonus(), now);
            json!({
                "name": u.name(),
                "provider": u.id().kind.as_str(),
                "enabled": u.is_enabled(),
                "circuit": breaker.state.as_str(),
                "healthScore": (score * 100.0).round() as u8,
                "total_requests": metrics.total_requests,
                "success_count": metrics.success_count,
                "fail_count": metrics.fail_count,
                "avg_latency_ms": metrics.avg_latency_ms().round() as u64,
                "last_error": metrics.last_error.as_ref().map(|e| e.message.clone()),
            })
        })
        .collect();

    let status = if context.lifecycle.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "uptime_seconds": context.uptime_seconds(),
        "in_flight": context.lifecycle.in_flight(),
        "upstreams": upstreams,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    provider: String,
    enabled: bool,
}

async fn toggle_provider(
    State(context): State<Arc<AppContext>>,
    Json(body): Json<ToggleRequest>,
) -> Response {
    match context.pool.find_by_name(&body.provider) {
        Some(upstream) => {
            upstream.set_enabled(body.enabled);
            info!(
                upstream = %upstream.name(),
                enabled = body.enabled,
                "upstream toggled"
            );
            Json(json!({"provider": upstream.name(), "enabled": body.enabled})).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "message": format!("unknown upstream: {}", body.provider),
                    "type": "not_found_error"
                }
            })),
        )
            .into_response(),
    }
}

pub fn build_app(context: Arc<AppContext>) -> Router {
    let auth_config = AuthConfig {
        master_key: context.config.master_key.clone(),
    };

    let protected_routes = Router::new()
        .route(
            "/v1/chat/completions",
            post(crate::routers::chat::chat_completions),
        )
        .route("/v1/models", get(v1_models))
        .route("/v1/providers/toggle", post(toggle_provider))
        .route_layer(axum::middleware::from_fn_with_state(
            auth_config,
            middleware::auth_middleware,
        ));

    // The health check stays reachable without the master key.
    let public_routes = Router::new().route("/health", get(health));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(axum::extract::DefaultBodyLimit::max(
            context.config.max_payload_size,
        ))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            context.config.max_payload_size,
        ))
        .layer(create_cors_layer(
            context.config.cors_allowed_origins.clone(),
        ))
        .with_state(context)
}

pub async fn startup(context: Arc<AppContext>) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = format!("{}:{}", context.config.host, context.config.port);
    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind address {bind_addr}: {e}"))?;

    info!(
        "starting gateway on {} | upstreams: {:?}",
        bind_addr,
        context
            .pool
            .all()
            .iter()
            .map(|u| u.name())
            .collect::<Vec<_>>()
    );

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let lifecycle = Arc::clone(&context.lifecycle);
    let grace = context.config.shutdown_timeout();
    spawn(async move {
        shutdown_signal().await;
        // Latch first so new chat requests get 503 while in-flight ones
        // drain, then stop the listener with the same grace period.
        lifecycle.begin_shutdown();
        shutdown_handle.graceful_shutdown(Some(grace));
        let drained = lifecycle.wait_for_drain(grace).await;
        if drained {
            info!("all in-flight requests drained");
        } else {
            info!(
                in_flight = lifecycle.in_flight(),
                "shutdown grace period elapsed with requests still in flight"
            );
        }
        shutdown_handle.shutdown();
    });

    let app = build_app(context);
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("received terminate signal, starting graceful shutdown");
        },
    }
}

fn create_cors_layer(allowed_origins: Vec<String>) -> tower_http::cors::CorsLayer {
    use tower_http::cors::Any;

    let cors = if allowed_origins.is_empty() {
        tower_http::cors::CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<http::HeaderValue> = allowed_origins
            .into_iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        tower_http::cors::CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
            .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
    };

    cors.max_age(Duration::from_secs(3600))
}
