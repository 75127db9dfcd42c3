//! Retry delay calculation.

use std::time::Duration;

use rand::Rng;

/// Inputs to [`calculate_retry_delay`] besides the hint and attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDelayOptions {
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Double the delay on every attempt.
    pub exponential_backoff: bool,
    /// Scale the computed delay by a random factor in `[0.75, 1.25]`.
    pub jitter: bool,
}

impl Default for RetryDelayOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            exponential_backoff: true,
            jitter: true,
        }
    }
}

/// Computes how long to wait before retry number `attempt` (zero-based).
///
/// A `retry_after` hint that parses to a positive whole number of seconds
/// is honored exactly and never jittered. Otherwise the delay is
/// `base_delay`, doubled per attempt when exponential backoff is on, then
/// jittered if enabled.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use crm_api::middleware::{calculate_retry_delay, RetryDelayOptions};
///
/// let options = RetryDelayOptions::default();
/// assert_eq!(
///     calculate_retry_delay(Some("5"), 3, &options),
///     Duration::from_secs(5)
/// );
/// ```
#[must_use]
pub fn calculate_retry_delay(
    retry_after: Option<&str>,
    attempt: u32,
    options: &RetryDelayOptions,
) -> Duration {
    if let Some(seconds) = retry_after
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|&seconds| seconds > 0)
    {
        return Duration::from_secs(seconds);
    }

    let base_ms = u64::try_from(options.base_delay.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = if options.exponential_backoff {
        base_ms.saturating_mul(2_u64.saturating_pow(attempt))
    } else {
        base_ms
    };

    if options.jitter {
        let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis(apply_factor(delay_ms, factor))
    } else {
        Duration::from_millis(delay_ms)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn apply_factor(delay_ms: u64, factor: f64) -> u64 {
    (delay_ms as f64 * factor).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryDelayOptions {
        RetryDelayOptions {
            base_delay: Duration::from_millis(1000),
            exponential_backoff: true,
            jitter: false,
        }
    }

    #[test]
    fn test_server_hint_is_never_jittered() {
        let options = RetryDelayOptions::default();
        for attempt in 0..50 {
            assert_eq!(
                calculate_retry_delay(Some("5"), attempt % 4, &options),
                Duration::from_millis(5000)
            );
        }
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let options = no_jitter();
        assert_eq!(
            calculate_retry_delay(None, 0, &options),
            Duration::from_millis(1000)
        );
        assert_eq!(
            calculate_retry_delay(None, 1, &options),
            Duration::from_millis(2000)
        );
        assert_eq!(
            calculate_retry_delay(None, 3, &options),
            Duration::from_millis(8000)
        );
    }

    #[test]
    fn test_fixed_delay_without_backoff() {
        let options = RetryDelayOptions {
            exponential_backoff: false,
            ..no_jitter()
        };
        assert_eq!(
            calculate_retry_delay(None, 4, &options),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_invalid_hints_fall_back_to_backoff() {
        let options = no_jitter();
        for hint in ["0", "-3", "soon", "", "1.5"] {
            assert_eq!(
                calculate_retry_delay(Some(hint), 1, &options),
                Duration::from_millis(2000),
                "hint {hint:?}"
            );
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let options = RetryDelayOptions::default();
        for _ in 0..200 {
            let delay = calculate_retry_delay(None, 1, &options);
            assert!(delay >= Duration::from_millis(1500), "{delay:?}");
            assert!(delay <= Duration::from_millis(2500), "{delay:?}");
        }
    }

    #[test]
    fn test_large_attempts_saturate() {
        let delay = calculate_retry_delay(None, 200, &no_jitter());
        assert_eq!(delay, Duration::from_millis(u64::MAX));
    }
}
