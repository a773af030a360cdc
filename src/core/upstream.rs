//! Tracked upstreams and the process-wide pool.

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use super::{circuit_breaker::CircuitBreaker, metrics::UpstreamMetrics};
use crate::{adapters::ChatAdapter, config::CircuitBreakerConfig};

/// The fixed set of supported provider kinds.
///
/// Kind is carried explicitly everywhere (priority table, env discovery,
/// reporting) rather than inferred from display names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Gemini,
    Openrouter,
    Cerebras,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Groq,
        ProviderKind::Gemini,
        ProviderKind::Openrouter,
        ProviderKind::Cerebras,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Openrouter => "openrouter",
            ProviderKind::Cerebras => "cerebras",
        }
    }

    /// Environment-variable prefix for key discovery.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "GROQ",
            ProviderKind::Gemini => "GEMINI",
            ProviderKind::Openrouter => "OPENROUTER",
            ProviderKind::Cerebras => "CEREBRAS",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "groq" => Ok(ProviderKind::Groq),
            "gemini" => Ok(ProviderKind::Gemini),
            "openrouter" => Ok(ProviderKind::Openrouter),
            "cerebras" => Ok(ProviderKind::Cerebras),
            _ => Err(()),
        }
    }
}

/// Stable identity of one upstream: provider kind plus instance number.
///
/// Induces the display name (`groq-1`) used by the toggle API and in
/// observability output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamId {
    pub kind: ProviderKind,
    pub instance: u32,
}

impl UpstreamId {
    pub fn new(kind: ProviderKind, instance: u32) -> Self {
        Self { kind, instance }
    }
}

impl fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.instance)
    }
}

impl FromStr for UpstreamId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, instance) = s.rsplit_once('-').ok_or(())?;
        Ok(Self {
            kind: kind.parse()?,
            instance: instance.parse().map_err(|_| ())?,
        })
    }
}

/// One upstream under management: adapter plus metrics, breaker and the
/// runtime enabled flag.
#[derive(Debug)]
pub struct TrackedUpstream {
    id: UpstreamId,
    adapter: Arc<dyn ChatAdapter>,
    metrics: UpstreamMetrics,
    breaker: CircuitBreaker,
    enabled: AtomicBool,
    priority_bonus: f64,
}

impl TrackedUpstream {
    pub fn new(
        id: UpstreamId,
        adapter: Arc<dyn ChatAdapter>,
        breaker_config: CircuitBreakerConfig,
        priority_bonus: f64,
    ) -> Self {
        Self {
            id,
            adapter,
            metrics: UpstreamMetrics::new(),
            breaker: CircuitBreaker::new(breaker_config),
            enabled: AtomicBool::new(true),
            priority_bonus,
        }
    }

    pub fn id(&self) -> UpstreamId {
        self.id
    }

    pub fn name(&self) -> String {
        self.id.to_string()
    }

    pub fn adapter(&self) -> &Arc<dyn ChatAdapter> {
        &self.adapter
    }

    pub fn metrics(&self) -> &UpstreamMetrics {
        &self.metrics
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn priority_bonus(&self) -> f64 {
        self.priority_bonus
    }
}

/// The ordered, immutable set of tracked upstreams.
///
/// Built once at startup, sorted by descending priority bonus then ascending
/// instance id; the order anchors round-robin and deterministic tie-breaks.
#[derive(Debug)]
pub struct UpstreamPool {
    upstreams: Vec<Arc<TrackedUpstream>>,
}

impl UpstreamPool {
    pub fn new(mut upstreams: Vec<Arc<TrackedUpstream>>) -> Self {
        upstreams.sort_by(|a, b| {
            b.priority_bonus()
                .total_cmp(&a.priority_bonus())
                .then_with(|| a.id().kind.as_str().cmp(b.id().kind.as_str()))
                .then_with(|| a.id().instance.cmp(&b.id().instance))
        });
        Self { upstreams }
    }

    pub fn all(&self) -> &[Arc<TrackedUpstream>] {
        &self.upstreams
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<TrackedUpstream>> {
        self.upstreams.get(index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Arc<TrackedUpstream>> {
        let id: UpstreamId = name.parse().ok()?;
        self.upstreams.iter().find(|u| u.id() == id)
    }
}
