//! Error types for the gateway core.

/// Request-level errors surfaced to clients.
///
/// Upstream-attempt errors are not represented here: they are recorded on the
/// failing upstream's metrics and breaker and consumed by the failover loop.
/// Only outcomes that end a request reach this enum.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing or invalid master key")]
    Unauthorized,

    #[error("unknown upstream: {0}")]
    UnknownUpstream(String),

    #[error("all upstreams failed: {0}")]
    Exhausted(String),

    #[error("gateway is shutting down")]
    ShuttingDown,
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
