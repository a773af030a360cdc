//! Health scoring for upstream selection.
//!
//! The score is a pure function of a metrics snapshot, the breaker state and
//! the static priority bonus. It is recomputed on every selection and never
//! persisted. The weights below are policy constants and part of the
//! selection contract, not tunables.

use std::time::Duration;

use tokio::time::Instant;

use super::{circuit_breaker::CircuitState, metrics::MetricsSnapshot, upstream::TrackedUpstream};

/// Weight of the success rate in the composite score.
pub const SUCCESS_WEIGHT: f64 = 0.5;
/// Weight of the latency score in the composite score.
pub const LATENCY_WEIGHT: f64 = 0.3;
/// Maximum penalty applied immediately after an error, decaying linearly.
pub const ERROR_PENALTY_WEIGHT: f64 = 0.3;
/// How long a recent error keeps penalizing the score.
pub const ERROR_PENALTY_DURATION: Duration = Duration::from_millis(30_000);
/// Attempts required before measured metrics replace the neutral score.
pub const MIN_REQUESTS_FOR_SCORING: u64 = 3;
/// Average latency (ms) at which the latency score reaches zero.
pub const LATENCY_FLOOR_MS: f64 = 5_000.0;
/// Fixed score of a HALF_OPEN upstream: explorable, never preferred.
pub const HALF_OPEN_SCORE: f64 = 0.1;

/// Composite health score in `[0, 1]`.
pub fn health_score(
    metrics: &MetricsSnapshot,
    breaker_state: CircuitState,
    priority_bonus: f64,
    now: Instant,
) -> f64 {
    match breaker_state {
        CircuitState::Open => return 0.0,
        CircuitState::HalfOpen => return HALF_OPEN_SCORE,
        CircuitState::Closed => {}
    }

    if metrics.total_requests < MIN_REQUESTS_FOR_SCORING {
        // Unmeasured upstreams start near the middle, tinted by priority.
        return (0.5 + priority_bonus).clamp(0.0, 1.0);
    }

    let latency_score = (1.0 - metrics.avg_latency_ms() / LATENCY_FLOOR_MS).max(0.0);

    let recent_error_penalty = match &metrics.last_error {
        Some(err) => {
            let age = now.saturating_duration_since(err.at);
            if age < ERROR_PENALTY_DURATION {
                let decay = 1.0 - age.as_millis() as f64 / ERROR_PENALTY_DURATION.as_millis() as f64;
                ERROR_PENALTY_WEIGHT * decay
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    (SUCCESS_WEIGHT * metrics.success_rate() + LATENCY_WEIGHT * latency_score + priority_bonus
        - recent_error_penalty)
        .clamp(0.0, 1.0)
}

/// Score a tracked upstream from its current snapshots.
pub fn score_upstream(upstream: &TrackedUpstream, now: Instant) -> f64 {
    health_score(
        &upstream.metrics().snapshot(),
        upstream.breaker().state(),
        upstream.priority_bonus(),
        now,
    )
}
