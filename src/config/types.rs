//! Configuration types with serde support and sane defaults.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::upstream::ProviderKind;

/// Circuit breaker configuration, applied to every tracked upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (in CLOSED) that open the circuit
    pub failure_threshold: u32,
    /// Time an OPEN circuit waits before allowing a HALF_OPEN probe
    pub reset_timeout_ms: u64,
    /// Probes allowed while HALF_OPEN before an outcome is recorded
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            half_open_max_attempts: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Exponential backoff between failover attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2_000,
        }
    }
}

/// Per-attempt failover settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Time budget for an upstream to produce its first chunk. Once a chunk
    /// has been forwarded the request is committed and no deadline applies.
    pub first_token_timeout_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            first_token_timeout_ms: 8_000,
        }
    }
}

impl FailoverConfig {
    pub fn first_token_timeout(&self) -> Duration {
        Duration::from_millis(self.first_token_timeout_ms)
    }
}

/// Static per-provider priority bonuses, keyed on provider kind.
///
/// Encodes operator knowledge that does not belong in per-request
/// measurement. Bonuses are expected to stay within `[0, 0.15]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityTable {
    bonuses: HashMap<ProviderKind, f64>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        let mut bonuses = HashMap::new();
        bonuses.insert(ProviderKind::Cerebras, 0.15);
        bonuses.insert(ProviderKind::Groq, 0.10);
        bonuses.insert(ProviderKind::Openrouter, 0.05);
        bonuses.insert(ProviderKind::Gemini, 0.0);
        Self { bonuses }
    }
}

impl PriorityTable {
    pub fn bonus(&self, kind: ProviderKind) -> f64 {
        self.bonuses.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn set_bonus(&mut self, kind: ProviderKind, bonus: f64) {
        self.bonuses.insert(kind, bonus);
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Bearer key required on protected routes when set
    pub master_key: Option<String>,
    /// Allowed CORS origins; empty allows any origin
    pub cors_allowed_origins: Vec<String>,
    pub max_payload_size: usize,
    pub shutdown_timeout_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
    pub backoff: BackoffConfig,
    pub failover: FailoverConfig,
    pub priorities: PriorityTable,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            master_key: None,
            cors_allowed_origins: Vec::new(),
            max_payload_size: 10 * 1024 * 1024,
            shutdown_timeout_ms: 10_000,
            circuit_breaker: CircuitBreakerConfig::default(),
            backoff: BackoffConfig::default(),
            failover: FailoverConfig::default(),
            priorities: PriorityTable::default(),
        }
    }
}

impl GatewayConfig {
    /// Build a configuration from process environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("NEXUS_HOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("NEXUS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.port = port;
        }
        if let Ok(key) = std::env::var("NEXUS_MASTER_KEY") {
            if !key.is_empty() {
                config.master_key = Some(key);
            }
        }
        if let Ok(origins) = std::env::var("NEXUS_CORS_ORIGINS") {
            config.cors_allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        config
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
