//! HTTP middleware.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct AuthConfig {
    pub master_key: Option<String>,
}

/// Validate the Bearer token against the configured master key.
/// Only active when a master key is configured.
pub async fn auth_middleware(
    State(auth_config): State<AuthConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &auth_config.master_key {
        let token = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        let authorized = match token {
            Some(token) => {
                let token = token.as_bytes();
                let expected = expected.as_bytes();
                // Length check is not constant-time but unavoidable; the
                // value comparison is.
                token.len() == expected.len() && token.ct_eq(expected).unwrap_u8() == 1
            }
            None => false,
        };

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": {
                        "message": "missing or invalid master key",
                        "type": "authentication_error"
                    }
                })),
            )
                .into_response();
        }
    }

    next.run(request).await
}
