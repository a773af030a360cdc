//! Gateway configuration.

pub mod env;
pub mod types;

pub use env::{discover_upstreams, DiscoveredKey};
pub use types::{
    BackoffConfig, CircuitBreakerConfig, FailoverConfig, GatewayConfig, PriorityTable,
};
