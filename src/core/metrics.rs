//! Per-upstream request metrics.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use std::time::Duration;

use tokio::time::Instant;

/// Counters and latency accumulator for one upstream.
///
/// Counters are monotonic atomics; the last-error memory sits behind a mutex
/// so message and timestamp are always read as a pair. A request is counted
/// as attempted (`total_requests`) before it is classified, so
/// `success_count + fail_count <= total_requests` at all times.
#[derive(Debug, Default)]
pub struct UpstreamMetrics {
    total_requests: AtomicU64,
    success_count: AtomicU64,
    fail_count: AtomicU64,
    total_latency_ms: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

#[derive(Debug, Clone)]
pub struct LastError {
    pub message: String,
    pub at: Instant,
}

impl UpstreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt_start(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, latency: Duration, message: &str) {
        self.fail_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        let mut last = self.last_error.lock().unwrap();
        *last = Some(LastError {
            message: message.to_string(),
            at: Instant::now(),
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            fail_count: self.fail_count.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }
}

/// Point-in-time view of one upstream's metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub total_latency_ms: u64,
    pub last_error: Option<LastError>,
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_requests as f64
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.total_requests as f64
    }
}
