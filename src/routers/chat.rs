//! HTTP semantics of `POST /v1/chat/completions`.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    app_context::AppContext,
    core::error::GatewayError,
    policies::RoutingMode,
    protocols::chat::{unix_timestamp, ChatCompletionRequest},
    routers::failover::ChatRequestContext,
};

const ROUTING_MODE_HEADER: &str = "x-routing-mode";

pub async fn chat_completions(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Shutdown takes precedence over everything, including body parsing.
    let Some(guard) = context.lifecycle.try_begin() else {
        return shutdown_rejection();
    };

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(message) => return invalid_request(&message),
    };

    let routing_mode = RoutingMode::from_header_value(
        headers
            .get(ROUTING_MODE_HEADER)
            .and_then(|v| v.to_str().ok()),
    );

    let ctx = ChatRequestContext {
        request_id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
        created: unix_timestamp(),
        options: request.options(),
        messages: request.messages,
        routing_mode,
    };

    if request.stream {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let engine = Arc::clone(&context.engine);
        // The guard moves into the task: in-flight covers the whole stream,
        // not just the handler, and drops on client disconnect too.
        tokio::spawn(async move {
            let _guard = guard;
            engine.stream_chat(ctx, tx).await;
        });

        let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        let result = context.engine.complete_chat(ctx).await;
        drop(guard);
        match result {
            Ok(payload) => Json(payload).into_response(),
            Err(GatewayError::Exhausted(message)) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": {
                        "message": format!("all upstreams failed: {message}"),
                        "type": "gateway_error"
                    }
                })),
            )
                .into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": {"message": err.to_string(), "type": "gateway_error"}
                })),
            )
                .into_response(),
        }
    }
}

fn parse_request(body: &Bytes) -> Result<ChatCompletionRequest, String> {
    let request: ChatCompletionRequest =
        serde_json::from_slice(body).map_err(|e| e.to_string())?;
    request.validate()?;
    Ok(request)
}

fn invalid_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "message": format!("invalid request: {message}"),
                "type": "invalid_request_error"
            }
        })),
    )
        .into_response()
}

fn shutdown_rejection() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "30")],
        Json(json!({
            "error": {
                "message": "gateway is shutting down",
                "type": "service_unavailable"
            }
        })),
    )
        .into_response()
}
