//! Sliding-window request accounting.
//!
//! [`UsageTracker`] records request timestamps and answers two questions:
//! how many requests happened in the last minute and in the burst window,
//! and how long a caller should wait to stay under a usage threshold.
//!
//! Every query has an `_at` variant taking the current time in unix
//! milliseconds, which keeps the window arithmetic deterministic in tests.

use std::collections::VecDeque;
use std::time::Duration;

/// Length of the short window, in milliseconds.
pub const MINUTE_WINDOW_MS: i64 = 60_000;

/// Default length of the burst window, in milliseconds.
pub const DEFAULT_BURST_WINDOW_MS: i64 = 300_000;

/// Request counts over both windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageStats {
    /// Requests recorded within the last 60 seconds.
    pub minute_usage: usize,
    /// Requests recorded within the burst window.
    pub burst_usage: usize,
}

/// Limits the tracker compares usage against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UsageLimits {
    /// Requests allowed per minute.
    pub requests_per_minute: u32,
    /// Requests allowed per burst window.
    pub burst_limit: u32,
    /// Fraction of each limit at which throttling starts.
    pub throttle_threshold: f64,
}

/// Ordered log of request timestamps, pruned lazily.
///
/// # Example
///
/// ```rust
/// use crm_api::middleware::UsageTracker;
///
/// let mut tracker = UsageTracker::new(300_000);
/// tracker.record_request_at(1_000);
/// tracker.record_request_at(2_000);
///
/// let usage = tracker.usage_at(2_000);
/// assert_eq!(usage.minute_usage, 2);
/// assert_eq!(usage.burst_usage, 2);
/// ```
#[derive(Clone, Debug)]
pub struct UsageTracker {
    timestamps: VecDeque<i64>,
    burst_window_ms: i64,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_BURST_WINDOW_MS)
    }
}

impl UsageTracker {
    /// Creates a tracker with the given burst window length.
    #[must_use]
    pub const fn new(burst_window_ms: i64) -> Self {
        Self {
            timestamps: VecDeque::new(),
            burst_window_ms,
        }
    }

    /// Returns the burst window length in milliseconds.
    #[must_use]
    pub const fn burst_window_ms(&self) -> i64 {
        self.burst_window_ms
    }

    /// Records a request at the current wall-clock time.
    pub fn record_request(&mut self) {
        self.record_request_at(now_ms());
    }

    /// Records a request at `now_ms`.
    pub fn record_request_at(&mut self, now_ms: i64) {
        self.timestamps.push_back(now_ms);
    }

    /// Returns usage at the current wall-clock time.
    pub fn usage(&mut self) -> UsageStats {
        self.usage_at(now_ms())
    }

    /// Prunes entries older than the burst window, then counts both windows.
    pub fn usage_at(&mut self, now_ms: i64) -> UsageStats {
        self.prune(now_ms);
        let minute_start = now_ms - MINUTE_WINDOW_MS;
        UsageStats {
            minute_usage: self.timestamps.iter().filter(|&&t| t > minute_start).count(),
            burst_usage: self.timestamps.len(),
        }
    }

    /// Returns the throttle delay at the current wall-clock time.
    pub fn delay(&mut self, limits: &UsageLimits) -> Duration {
        self.delay_at(limits, now_ms())
    }

    /// Returns how long to wait before the next request stays under both
    /// thresholds. The minute window is checked first; the burst window is
    /// checked when the minute window yields no wait.
    pub fn delay_at(&mut self, limits: &UsageLimits, now_ms: i64) -> Duration {
        let usage = self.usage_at(now_ms);
        let minute_threshold = threshold(limits.requests_per_minute, limits.throttle_threshold);
        let burst_threshold = threshold(limits.burst_limit, limits.throttle_threshold);

        if usage.minute_usage >= minute_threshold {
            let minute_start = now_ms - MINUTE_WINDOW_MS;
            if let Some(oldest) = self.timestamps.iter().find(|&&t| t > minute_start) {
                let wait = oldest + MINUTE_WINDOW_MS - now_ms;
                if wait > 0 {
                    return millis(wait);
                }
            }
        }
        if usage.burst_usage >= burst_threshold {
            if let Some(oldest) = self.timestamps.front() {
                let wait = oldest + self.burst_window_ms - now_ms;
                if wait > 0 {
                    return millis(wait);
                }
            }
        }

        Duration::ZERO
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.burst_window_ms;
        while self.timestamps.front().is_some_and(|&t| t < cutoff) {
            self.timestamps.pop_front();
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn threshold(limit: u32, fraction: f64) -> usize {
    (f64::from(limit) * fraction).floor().max(0.0) as usize
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn limits(requests_per_minute: u32) -> UsageLimits {
        UsageLimits {
            requests_per_minute,
            burst_limit: 5000,
            throttle_threshold: 0.9,
        }
    }

    #[test]
    fn test_usage_within_same_millisecond() {
        let mut tracker = UsageTracker::default();
        for _ in 0..3 {
            tracker.record_request_at(T0);
        }

        assert_eq!(
            tracker.usage_at(T0),
            UsageStats {
                minute_usage: 3,
                burst_usage: 3
            }
        );
    }

    #[test]
    fn test_minute_window_expires_before_burst_window() {
        let mut tracker = UsageTracker::default();
        for _ in 0..3 {
            tracker.record_request_at(T0);
        }

        let later = T0 + 61_000;
        tracker.record_request_at(later);
        assert_eq!(
            tracker.usage_at(later),
            UsageStats {
                minute_usage: 1,
                burst_usage: 4
            }
        );

        let much_later = later + DEFAULT_BURST_WINDOW_MS + 1;
        tracker.record_request_at(much_later);
        assert_eq!(tracker.usage_at(much_later).burst_usage, 1);
    }

    #[test]
    fn test_delay_starts_at_threshold() {
        let mut tracker = UsageTracker::default();
        let limits = limits(10);

        for i in 0..8 {
            tracker.record_request_at(T0 + i);
        }
        assert_eq!(tracker.delay_at(&limits, T0 + 10), Duration::ZERO);

        tracker.record_request_at(T0 + 8);
        let delay = tracker.delay_at(&limits, T0 + 10);
        assert!(delay > Duration::ZERO);
        assert!(delay <= Duration::from_millis(60_000));
        // oldest entry at T0 leaves the window at T0 + 60s
        assert_eq!(delay, Duration::from_millis(59_990));
    }

    #[test]
    fn test_burst_delay_when_minute_window_is_clear() {
        let mut tracker = UsageTracker::new(300_000);
        let limits = UsageLimits {
            requests_per_minute: 1000,
            burst_limit: 10,
            throttle_threshold: 0.9,
        };
        for i in 0..9 {
            tracker.record_request_at(T0 + i);
        }

        let now = T0 + 120_000;
        let usage = tracker.usage_at(now);
        assert_eq!(usage.minute_usage, 0);
        assert_eq!(usage.burst_usage, 9);
        assert_eq!(
            tracker.delay_at(&limits, now),
            Duration::from_millis(180_000)
        );
    }

    #[test]
    fn test_minute_check_takes_precedence() {
        let mut tracker = UsageTracker::new(300_000);
        let limits = UsageLimits {
            requests_per_minute: 2,
            burst_limit: 2,
            throttle_threshold: 1.0,
        };
        tracker.record_request_at(T0);
        tracker.record_request_at(T0 + 30_000);

        // both thresholds hit; minute window answer wins
        assert_eq!(
            tracker.delay_at(&limits, T0 + 40_000),
            Duration::from_millis(20_000)
        );
    }

    #[test]
    fn test_zero_minute_threshold_falls_through_to_burst() {
        let mut tracker = UsageTracker::new(300_000);
        let limits = UsageLimits {
            requests_per_minute: 1,
            burst_limit: 2,
            throttle_threshold: 0.5,
        };
        tracker.record_request_at(T0);

        let now = T0 + 120_000;
        assert_eq!(
            tracker.usage_at(now),
            UsageStats {
                minute_usage: 0,
                burst_usage: 1
            }
        );
        assert_eq!(
            tracker.delay_at(&limits, now),
            Duration::from_millis(180_000)
        );
    }

    #[test]
    fn test_entries_older_than_burst_window_are_pruned() {
        let mut tracker = UsageTracker::new(1_000);
        tracker.record_request_at(T0);
        tracker.record_request_at(T0 + 500);

        assert_eq!(tracker.usage_at(T0 + 1_200).burst_usage, 1);
        assert_eq!(tracker.usage_at(T0 + 1_500).burst_usage, 1);
        assert_eq!(tracker.usage_at(T0 + 1_501).burst_usage, 0);
    }
}
