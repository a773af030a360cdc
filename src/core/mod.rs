//! Core routing and resilience primitives.
//!
//! Everything in here is independent of HTTP framing: the per-upstream
//! circuit breaker and metrics record, the tracked-upstream pool, the
//! health scorer, and the backoff calculator.

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod health;
pub mod metrics;
pub mod upstream;

pub use backoff::BackoffCalculator;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use error::{GatewayError, GatewayResult};
pub use metrics::{MetricsSnapshot, UpstreamMetrics};
pub use upstream::{ProviderKind, TrackedUpstream, UpstreamId, UpstreamPool};
