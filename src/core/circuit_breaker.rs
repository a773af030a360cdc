//! Per-upstream circuit breaker.

use std::sync::Mutex;

use tokio::time::Instant;
use tracing::info;

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, attempts are allowed
    Closed,
    /// Attempts are rejected until the reset timeout elapses
    Open,
    /// Probing recovery, a bounded number of attempts allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    half_open_attempts: u32,
    last_failure: Option<Instant>,
}

/// Three-state machine gating attempts to one upstream.
///
/// The whole record lives under one mutex so a state transition and the
/// timestamp that justifies it are always observed together. All operations
/// are O(1) and hold the lock only briefly.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                half_open_attempts: 0,
                last_failure: None,
            }),
            config,
        }
    }

    /// Availability check used by the selector.
    ///
    /// In OPEN, an elapsed reset timeout transitions the breaker to HALF_OPEN
    /// as a side effect. In HALF_OPEN, availability is bounded by the probe
    /// cap so a recovering upstream cannot absorb traffic.
    pub fn is_available(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_timeout())
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_attempts = 0;
                    info!("circuit breaker transition: open -> half_open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => inner.half_open_attempts < self.config.half_open_max_attempts,
        }
    }

    /// Count a dispatched HALF_OPEN probe, before the call is made, so the
    /// cap holds even while the call is in flight. No-op in other states.
    pub fn note_dispatch(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_attempts += 1;
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                // Decrement rather than reset: isolated failures are forgiven
                // as long as successes outnumber them.
                inner.failures = inner.failures.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.half_open_attempts = 0;
                info!("circuit breaker transition: half_open -> closed");
            }
            CircuitState::Open => {
                tracing::warn!("success recorded while circuit is open");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    info!("circuit breaker transition: closed -> open");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_attempts = 0;
                info!("circuit breaker transition: half_open -> open");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, without the OPEN -> HALF_OPEN side effect of
    /// [`is_available`]. Used for reporting and health scoring.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Availability computed from the current record without mutating it.
    /// Reporting endpoints use this so a GET never moves the state machine.
    pub fn peek_available(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.reset_timeout())
                .unwrap_or(true),
            CircuitState::HalfOpen => inner.half_open_attempts < self.config.half_open_max_attempts,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failures,
            half_open_attempts: inner.half_open_attempts,
            last_failure: inner.last_failure,
        }
    }
}

/// Point-in-time view of a breaker record.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub half_open_attempts: u32,
    pub last_failure: Option<Instant>,
}
