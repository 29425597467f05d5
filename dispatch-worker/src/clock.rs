//! Time sources.
//!
//! All engine timestamps are epoch milliseconds read through [`Clock`] so that
//! rate-limit windows and pause durations can be driven by a simulated clock
//! in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock anchored at construction, advanced by the tokio monotonic clock.
///
/// Never goes backwards, and follows tokio's paused time in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin_ms: i64,
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin_ms: Utc::now().timestamp_millis(),
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        let elapsed = Instant::now().duration_since(self.origin);
        self.origin_ms + elapsed.as_millis() as i64
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
