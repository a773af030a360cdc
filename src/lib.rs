//! Nexus Gateway
//!
//! An HTTP gateway that fronts several remote chat-completion upstreams
//! behind a single OpenAI-compatible surface. Each request is routed to one
//! upstream by a health-aware selector; on failure before the first token
//! the gateway transparently fails over to another upstream, gated by
//! per-upstream circuit breakers and exponential backoff.

pub mod adapters;
pub mod app_context;
pub mod config;
pub mod core;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod policies;
pub mod protocols;
pub mod routers;
pub mod server;

pub use app_context::AppContext;
pub use config::GatewayConfig;
