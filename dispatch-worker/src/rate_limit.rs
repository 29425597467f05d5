//! Client-side sliding-window rate limiter.
//!
//! Keeps the timestamps of recent successful sends in four windows (second,
//! minute, hour, day) and decides whether another send may go out now. This
//! is an advisory guard in front of the transport; the transport may enforce
//! its own limits independently.
//!
//! # Example
//!
//! ```text
//! perMinute = 3
//! t=0s  send    t=1s  send    t=2s  send
//! t=3s  check → blocked, wait 57s ("Limit of 3 emails/minute reached")
//! t=60s check → allowed (the t=0s send has left the window)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::campaign::RateLimitConfig;
use crate::clock::Clock;

/// A sliding window, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Second,
    Minute,
    Hour,
    Day,
}

impl Window {
    pub const ALL: [Window; 4] = [Window::Second, Window::Minute, Window::Hour, Window::Day];

    pub const fn span_ms(self) -> i64 {
        match self {
            Window::Second => 1_000,
            Window::Minute => 60_000,
            Window::Hour => 3_600_000,
            Window::Day => 86_400_000,
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Window::Second => "second",
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    fn cap(self, config: &RateLimitConfig) -> u32 {
        match self {
            Window::Second => config.per_second,
            Window::Minute => config.per_minute,
            Window::Hour => config.per_hour,
            Window::Day => config.per_day,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Result of [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub can_send: bool,
    /// Longest wait across all violated windows.
    pub wait_ms: i64,
    /// Description of the last violated window in evaluation order.
    pub reason: String,
    /// The window `reason` describes.
    pub window: Option<Window>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            can_send: true,
            wait_ms: 0,
            reason: String::new(),
            window: None,
        }
    }
}

/// Send-timestamp history across the four windows.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: [VecDeque<i64>; 4],
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Default::default(),
        }
    }

    /// Decide whether a send may proceed now.
    ///
    /// Windows are pruned and evaluated second → minute → hour → day. When
    /// several windows are violated the wait is the maximum of their waits
    /// while the reason is that of the coarsest violated window.
    pub fn check(&mut self, config: &RateLimitConfig) -> RateDecision {
        let now = self.clock.now_ms();
        self.prune(now);

        if !config.enabled || !config.has_caps() {
            return RateDecision::allowed();
        }

        let mut decision = RateDecision::allowed();

        for window in Window::ALL {
            let cap = window.cap(config);
            if cap == 0 {
                continue;
            }

            let sent = &self.windows[window.index()];
            if sent.len() < cap as usize {
                continue;
            }

            let Some(&oldest) = sent.front() else {
                continue;
            };

            let wait_ms = window.span_ms() - (now - oldest);
            if wait_ms > 0 {
                decision.can_send = false;
                decision.wait_ms = decision.wait_ms.max(wait_ms);
                decision.reason = format!("Limit of {cap} emails/{} reached", window.unit());
                decision.window = Some(window);
            }
        }

        if !decision.can_send {
            debug!(
                wait_ms = decision.wait_ms,
                reason = %decision.reason,
                per_second = self.windows[0].len(),
                per_minute = self.windows[1].len(),
                per_hour = self.windows[2].len(),
                per_day = self.windows[3].len(),
                "rate_limit_blocked"
            );
        }

        decision
    }

    /// Record a successful send in every window. Pruning waits for `check`.
    pub fn record(&mut self) {
        let now = self.clock.now_ms();
        for sent in &mut self.windows {
            sent.push_back(now);
        }
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        for sent in &mut self.windows {
            sent.clear();
        }
    }

    /// Number of sends currently held for `window`.
    pub fn recorded(&self, window: Window) -> usize {
        self.windows[window.index()].len()
    }

    fn prune(&mut self, now: i64) {
        for window in Window::ALL {
            let horizon = now - window.span_ms();
            let sent = &mut self.windows[window.index()];
            while sent.front().is_some_and(|&t| t <= horizon) {
                sent.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (RateLimiter::new(Arc::new(clock.clone())), clock)
    }

    fn per_minute(cap: u32) -> RateLimitConfig {
        RateLimitConfig {
            per_minute: cap,
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_config_always_allows() {
        let (mut limiter, _clock) = limiter();
        for _ in 0..50 {
            limiter.record();
        }

        let config = RateLimitConfig {
            per_second: 1,
            enabled: false,
            ..Default::default()
        };
        assert!(limiter.check(&config).can_send);

        let no_caps = RateLimitConfig {
            enabled: true,
            ..Default::default()
        };
        assert_eq!(limiter.check(&no_caps), RateDecision::allowed());
    }

    #[test]
    fn test_cap_blocks_until_oldest_leaves_window() {
        let (mut limiter, clock) = limiter();
        let config = per_minute(3);

        for _ in 0..3 {
            assert!(limiter.check(&config).can_send);
            limiter.record();
            clock.advance(1_000);
        }

        let decision = limiter.check(&config);
        assert!(!decision.can_send);
        assert_eq!(decision.wait_ms, 57_000);
        assert_eq!(decision.window, Some(Window::Minute));
        assert_eq!(decision.reason, "Limit of 3 emails/minute reached");

        clock.advance(decision.wait_ms);
        assert!(limiter.check(&config).can_send);
        assert_eq!(limiter.recorded(Window::Minute), 2);
    }

    #[test]
    fn test_every_window_enforces_its_cap() {
        for window in Window::ALL {
            let (mut limiter, clock) = limiter();
            let mut config = RateLimitConfig {
                enabled: true,
                ..Default::default()
            };
            match window {
                Window::Second => config.per_second = 2,
                Window::Minute => config.per_minute = 2,
                Window::Hour => config.per_hour = 2,
                Window::Day => config.per_day = 2,
            }

            limiter.record();
            limiter.record();

            let decision = limiter.check(&config);
            assert!(!decision.can_send, "{window:?} should block");
            assert_eq!(decision.wait_ms, window.span_ms());

            clock.advance(decision.wait_ms);
            assert!(limiter.check(&config).can_send, "{window:?} should reopen");
        }
    }

    #[test]
    fn test_check_is_idempotent_without_record() {
        let (mut limiter, clock) = limiter();
        let config = per_minute(2);
        limiter.record();
        clock.advance(10_000);
        limiter.record();
        clock.advance(5_000);

        let first = limiter.check(&config);
        let second = limiter.check(&config);
        assert_eq!(first, second);
        assert_eq!(first.wait_ms, 45_000);
    }

    #[test]
    fn test_reason_from_coarsest_wait_from_longest() {
        let (mut limiter, clock) = limiter();
        let config = RateLimitConfig {
            per_second: 1,
            per_minute: 2,
            enabled: true,
            ..Default::default()
        };

        limiter.record();
        clock.advance(500);
        limiter.record();

        let decision = limiter.check(&config);
        assert!(!decision.can_send);
        // Both windows hold the t=0 send: 500ms left on the second, 59_500ms on the minute.
        assert_eq!(decision.wait_ms, 59_500);
        assert_eq!(decision.window, Some(Window::Minute));
        assert!(decision.reason.contains("minute"));
    }

    #[test]
    fn test_coarser_reason_overwrites_even_with_shorter_wait() {
        let (mut limiter, clock) = limiter();
        let config = RateLimitConfig {
            per_minute: 1,
            per_hour: 3,
            enabled: true,
            ..Default::default()
        };

        limiter.record();
        clock.advance(3_599_000);
        limiter.record();
        limiter.record();
        clock.advance(500);

        let decision = limiter.check(&config);
        assert!(!decision.can_send);
        // Minute: 59_500ms left. Hour: the t=0 send leaves in 500ms.
        assert_eq!(decision.wait_ms, 59_500);
        assert_eq!(decision.window, Some(Window::Hour));
        assert_eq!(decision.reason, "Limit of 3 emails/hour reached");

        clock.advance(decision.wait_ms);
        assert!(limiter.check(&config).can_send);
    }

    #[test]
    fn test_reset_clears_history() {
        let (mut limiter, _clock) = limiter();
        let config = per_minute(1);
        limiter.record();
        assert!(!limiter.check(&config).can_send);

        limiter.reset();
        assert!(limiter.check(&config).can_send);
        for window in Window::ALL {
            assert_eq!(limiter.recorded(window), 0);
        }
    }
}
