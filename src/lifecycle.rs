//! Process lifecycle: in-flight accounting and graceful shutdown.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::{sync::Notify, time::Instant};
use tracing::info;

/// Tracks in-flight chat requests and the shutdown latch.
///
/// Each accepted chat request holds a [`RequestGuard`]; the guard's `Drop`
/// gives the exactly-once decrement on every exit path, including panics and
/// client disconnects.
#[derive(Debug, Default)]
pub struct LifecycleController {
    in_flight: AtomicUsize,
    shutting_down: AtomicBool,
    drained: Notify,
}

impl LifecycleController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admit a new chat request, or `None` once shutdown has begun.
    pub fn try_begin(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.shutting_down.load(Ordering::Acquire) {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(RequestGuard {
            controller: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Latch the shutdown flag; new chat requests are rejected from here on.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(
                in_flight = self.in_flight(),
                "shutdown latched, draining in-flight requests"
            );
        }
        if self.in_flight() == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until all in-flight requests finish or the timeout elapses.
    /// Returns true when fully drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking, so a decrement between the check and
            // the await cannot be missed.
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }
}

/// Held for the lifetime of one admitted chat request.
#[derive(Debug)]
pub struct RequestGuard {
    controller: Arc<LifecycleController>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.controller.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.controller.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_balances_counter() {
        let ctl = LifecycleController::new();
        let a = ctl.try_begin().unwrap();
        let b = ctl.try_begin().unwrap();
        assert_eq!(ctl.in_flight(), 2);
        drop(a);
        assert_eq!(ctl.in_flight(), 1);
        drop(b);
        assert_eq!(ctl.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let ctl = LifecycleController::new();
        let guard = ctl.try_begin().unwrap();
        ctl.begin_shutdown();
        assert!(ctl.is_shutting_down());
        assert!(ctl.try_begin().is_none());
        // The already-admitted request is unaffected.
        assert_eq!(ctl.in_flight(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn test_drain_completes_when_guards_drop() {
        let ctl = LifecycleController::new();
        let guard = ctl.try_begin().unwrap();
        ctl.begin_shutdown();

        let waiter = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.wait_for_drain(Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_with_stuck_request() {
        let ctl = LifecycleController::new();
        let _guard = ctl.try_begin().unwrap();
        ctl.begin_shutdown();

        // A stuck request never drops its guard; the wait still terminates.
        let drained = ctl.wait_for_drain(Duration::from_millis(10_000)).await;
        assert!(!drained);
        assert_eq!(ctl.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_drain_immediate_when_idle() {
        let ctl = LifecycleController::new();
        ctl.begin_shutdown();
        assert!(ctl.wait_for_drain(Duration::from_millis(1)).await);
    }
}
