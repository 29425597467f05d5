//! Cooperative control signals for a running dispatch loop.
//!
//! The control path (API handlers, signal handlers) only flips flags here.
//! The loop polls [`RunControl::stop_reason`] at its checkpoints, and every
//! wait it performs is interrupted as soon as a pause or cancel arrives.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Cancellation flag shared between the loop and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

/// Why the loop stopped before exhausting its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Paused,
    Cancelled,
}

/// How a [`RunControl::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Interrupted,
}

/// Signals for one run of the dispatch loop.
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: CancelToken,
    pause_requested: AtomicBool,
    pause_requested_at: AtomicI64,
    /// Fires on pause or cancel to cut short any pending wait.
    interrupt: CancellationToken,
    /// Fires once the loop has exited and persisted its final snapshot.
    finished: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to pause. The first request's time becomes the pause time.
    pub fn request_pause(&self, now_ms: i64) {
        if self
            .pause_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.pause_requested_at.store(now_ms, Ordering::SeqCst);
        }
        self.interrupt.cancel();
    }

    pub fn request_cancel(&self) {
        self.cancel.request_cancel();
        self.interrupt.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Cancellation wins over a pause requested in the same window.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.pause_requested.load(Ordering::SeqCst) {
            Some(StopReason::Paused)
        } else {
            None
        }
    }

    pub fn pause_requested_at(&self) -> Option<i64> {
        self.pause_requested
            .load(Ordering::SeqCst)
            .then(|| self.pause_requested_at.load(Ordering::SeqCst))
    }

    /// Sleep for `duration` unless a pause or cancel arrives first.
    pub async fn wait(&self, duration: Duration) -> WaitOutcome {
        if duration.is_zero() {
            return if self.interrupt.is_cancelled() {
                WaitOutcome::Interrupted
            } else {
                WaitOutcome::Elapsed
            };
        }

        tokio::select! {
            _ = self.interrupt.cancelled() => WaitOutcome::Interrupted,
            _ = sleep(duration) => WaitOutcome::Elapsed,
        }
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the loop has exited.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.request_cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_wins_over_pause() {
        let control = RunControl::new();
        assert_eq!(control.stop_reason(), None);

        control.request_pause(100);
        assert_eq!(control.stop_reason(), Some(StopReason::Paused));
        assert_eq!(control.pause_requested_at(), Some(100));

        control.request_pause(200);
        assert_eq!(control.pause_requested_at(), Some(100));

        control.request_cancel();
        assert_eq!(control.stop_reason(), Some(StopReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses_without_signal() {
        let control = RunControl::new();
        let started = Instant::now();
        assert_eq!(control.wait(Duration::from_secs(2)).await, WaitOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupts_long_wait() {
        let control = Arc::new(RunControl::new());
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move {
                let started = Instant::now();
                let outcome = control.wait(Duration::from_secs(3_600)).await;
                (outcome, started.elapsed())
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        control.request_pause(0);

        let (outcome, elapsed) = waiter.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted);
        assert!(elapsed < Duration::from_secs(3_600));
    }

    #[tokio::test]
    async fn test_finished_latch() {
        let control = RunControl::new();
        assert!(!control.is_finished());
        control.mark_finished();
        control.finished().await;
        assert!(control.is_finished());
    }
}
