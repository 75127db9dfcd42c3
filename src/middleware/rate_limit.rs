//! Client-side throttling and 429 retry policy.
//!
//! [`RateLimitMiddleware`] combines a [`UsageTracker`] with
//! [`calculate_retry_delay`]:
//!
//! - **Throttle** (before the request): sleep until usage drops under
//!   `throttle_threshold` of the per-minute and burst limits.
//! - **Retry** (after the request): when the server answers 429, back off
//!   and resubmit the same request straight through the transport,
//!   without re-entering the middleware chain.
//!
//! The tracker and retry counter belong to the middleware instance, so
//! every request routed through one instance shares them.
//!
//! # Example
//!
//! ```rust
//! use crm_api::middleware::{
//!     MiddlewareManager, MiddlewareOptions, RateLimitMiddleware, RateLimitOptions,
//! };
//!
//! let mut manager = MiddlewareManager::new();
//! manager.register(
//!     RateLimitMiddleware::new(RateLimitOptions {
//!         requests_per_minute: 100,
//!         ..RateLimitOptions::default()
//!     }),
//!     MiddlewareOptions::new().name("rate-limit").priority(10),
//! );
//! assert_eq!(manager.list(), vec!["rate-limit"]);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::clients::ApiError;
use crate::middleware::context::MiddlewareContext;
use crate::middleware::manager::{Middleware, Next};
use crate::middleware::retry::{calculate_retry_delay, RetryDelayOptions};
use crate::middleware::usage_tracker::{UsageLimits, UsageStats, UsageTracker};

/// Configuration for [`RateLimitMiddleware`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitOptions {
    /// Resubmit requests the server rejected with 429.
    pub enable_retry: bool,
    /// Delay requests preemptively as usage nears the limits.
    pub enable_throttle: bool,
    /// Resubmissions allowed per rate-limit cycle.
    pub max_retries: u32,
    /// Backoff delay for the first resubmission.
    pub base_delay: Duration,
    /// Double the backoff delay on each resubmission.
    pub exponential_backoff: bool,
    /// Randomize backoff delays by ±25%.
    pub jitter: bool,
    /// Requests allowed per minute.
    pub requests_per_minute: u32,
    /// Requests allowed per burst window.
    pub burst_limit: u32,
    /// Length of the burst window.
    pub burst_window: Duration,
    /// Fraction of a limit at which throttling starts.
    pub throttle_threshold: f64,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            enable_retry: true,
            enable_throttle: true,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            exponential_backoff: true,
            jitter: true,
            requests_per_minute: 1000,
            burst_limit: 5000,
            burst_window: Duration::from_millis(300_000),
            throttle_threshold: 0.9,
        }
    }
}

impl RateLimitOptions {
    const fn retry_delay_options(&self) -> RetryDelayOptions {
        RetryDelayOptions {
            base_delay: self.base_delay,
            exponential_backoff: self.exponential_backoff,
            jitter: self.jitter,
        }
    }

    const fn usage_limits(&self) -> UsageLimits {
        UsageLimits {
            requests_per_minute: self.requests_per_minute,
            burst_limit: self.burst_limit,
            throttle_threshold: self.throttle_threshold,
        }
    }
}

/// Interceptor that throttles requests and retries rate-limited ones.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    options: RateLimitOptions,
    tracker: Mutex<UsageTracker>,
    retry_count: AtomicU32,
}

impl RateLimitMiddleware {
    /// Creates a rate-limit interceptor.
    #[must_use]
    pub fn new(options: RateLimitOptions) -> Self {
        let burst_window_ms = i64::try_from(options.burst_window.as_millis()).unwrap_or(i64::MAX);
        Self {
            options,
            tracker: Mutex::new(UsageTracker::new(burst_window_ms)),
            retry_count: AtomicU32::new(0),
        }
    }

    /// Returns the configured options.
    #[must_use]
    pub const fn options(&self) -> &RateLimitOptions {
        &self.options
    }

    /// Returns current usage over both windows.
    #[must_use]
    pub fn usage(&self) -> UsageStats {
        self.tracker().usage()
    }

    /// Returns how long the next request would be throttled.
    #[must_use]
    pub fn throttle_delay(&self) -> Duration {
        self.tracker().delay(&self.options.usage_limits())
    }

    /// Returns the resubmissions made in the current rate-limit cycle.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, UsageTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_request(&self) {
        if self.options.enable_throttle {
            self.tracker().record_request();
        }
    }

    async fn retry_rate_limited(
        &self,
        ctx: &mut MiddlewareContext,
        next: &Next<'_>,
        mut error: ApiError,
    ) -> Result<(), ApiError> {
        loop {
            let attempt = self.retry_count.load(Ordering::SeqCst);
            if attempt >= self.options.max_retries {
                self.retry_count.store(0, Ordering::SeqCst);
                tracing::warn!(
                    attempts = attempt,
                    url = %ctx.request.url,
                    "rate limit retries exhausted"
                );
                return Err(error);
            }

            let retry_after = match &error {
                ApiError::RateLimitExceeded { retry_after, .. } => retry_after.clone(),
                _ => None,
            };
            let delay = calculate_retry_delay(
                retry_after.as_deref(),
                attempt,
                &self.options.retry_delay_options(),
            );
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                url = %ctx.request.url,
                "rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            self.retry_count.fetch_add(1, Ordering::SeqCst);

            let outcome = next.resubmit(ctx.request.clone()).await;
            self.record_request();

            match outcome {
                Ok(response) => {
                    self.retry_count.store(0, Ordering::SeqCst);
                    ctx.error = None;
                    ctx.response = Some(response);
                    return Ok(());
                }
                Err(next_error) if next_error.is_rate_limited() => {
                    ctx.error = Some(next_error.clone());
                    error = next_error;
                }
                Err(next_error) => {
                    self.retry_count.store(0, Ordering::SeqCst);
                    ctx.error = Some(next_error.clone());
                    return Err(next_error);
                }
            }
        }
    }
}

impl Default for RateLimitMiddleware {
    fn default() -> Self {
        Self::new(RateLimitOptions::default())
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), ApiError> {
        if self.options.enable_throttle {
            let delay = self.throttle_delay();
            if !delay.is_zero() {
                tracing::debug!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "throttling request"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let result = next.run(ctx).await;
        self.record_request();

        match result {
            Err(error) if self.options.enable_retry && error.is_rate_limited() => {
                self.retry_rate_limited(ctx, &next, error).await
            }
            other => other,
        }
    }
}
