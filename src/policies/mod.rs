//! Upstream selection policies.
//!
//! A policy picks the next upstream for one failover attempt, given the pool
//! and the indices already tried in this request. Candidate filtering is
//! shared: an upstream qualifies when it has not been tried, is enabled, and
//! its breaker reports available (which may move an OPEN breaker to
//! HALF_OPEN as a side effect of the check).

use std::{collections::HashSet, fmt::Debug, sync::Arc};

use crate::core::upstream::TrackedUpstream;

mod fastest;
mod round_robin;
mod smart;

pub use fastest::FastestPolicy;
pub use round_robin::RoundRobinPolicy;
pub use smart::SmartPolicy;

/// Routing mode requested by the client, from the `X-Routing-Mode` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    #[default]
    Smart,
    Fastest,
    RoundRobin,
}

impl RoutingMode {
    /// Any unrecognized value falls back to smart.
    pub fn from_header_value(value: Option<&str>) -> Self {
        match value {
            Some("fastest") => RoutingMode::Fastest,
            Some("round-robin") => RoutingMode::RoundRobin,
            _ => RoutingMode::Smart,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Smart => "smart",
            RoutingMode::Fastest => "fastest",
            RoutingMode::RoundRobin => "round_robin",
        }
    }
}

/// Core trait for selection policies.
pub trait SelectionPolicy: Send + Sync + Debug {
    /// Select an upstream index from the pool, or `None` when no candidate
    /// qualifies.
    fn select(&self, upstreams: &[Arc<TrackedUpstream>], excluded: &HashSet<usize>)
        -> Option<usize>;

    /// Policy name for logging
    fn name(&self) -> &'static str;
}

/// Indices of upstreams eligible for selection, in pool order.
pub(crate) fn candidate_indices(
    upstreams: &[Arc<TrackedUpstream>],
    excluded: &HashSet<usize>,
) -> Vec<usize> {
    upstreams
        .iter()
        .enumerate()
        .filter(|(idx, u)| !excluded.contains(idx) && u.is_enabled() && u.breaker().is_available())
        .map(|(idx, _)| idx)
        .collect()
}

/// One instance of each policy, shared process-wide so round-robin keeps its
/// cursor across requests.
#[derive(Debug)]
pub struct PolicyRegistry {
    smart: SmartPolicy,
    fastest: FastestPolicy,
    round_robin: RoundRobinPolicy,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            smart: SmartPolicy::new(),
            fastest: FastestPolicy::new(),
            round_robin: RoundRobinPolicy::new(),
        }
    }

    pub fn get(&self, mode: RoutingMode) -> &dyn SelectionPolicy {
        match mode {
            RoutingMode::Smart => &self.smart,
            RoutingMode::Fastest => &self.fastest,
            RoutingMode::RoundRobin => &self.round_robin,
        }
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
