//! Exponential backoff between failover attempts.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Computes capped exponential backoff delays.
#[derive(Debug, Clone)]
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Delay before attempt `k` (1-based): `initial * multiplier^(k-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay(config: &BackoffConfig, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let raw = config.initial_delay_ms as f64 * config.multiplier.powi(exp as i32);
        let delay_ms = if raw.is_finite() {
            (raw as u64).min(config.max_delay_ms)
        } else {
            config.max_delay_ms
        };
        Duration::from_millis(delay_ms)
    }
}
