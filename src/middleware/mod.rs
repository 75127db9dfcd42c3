//! Request interceptors.
//!
//! Every request sent through an [`ApiClient`](crate::ApiClient) with
//! registered middleware runs through a [`MiddlewareManager`]: interceptors
//! wrap each other in priority order (lowest first, outermost) around the
//! transport, and any of them may ask for the whole chain to be run again.
//!
//! # Built-in interceptors
//!
//! - [`RateLimitMiddleware`]: client-side throttling over a sliding window,
//!   plus backoff and resubmission of requests rejected with 429
//! - [`AuthRefreshMiddleware`]: refreshes the access token after a 401 and
//!   retries the request with the new credentials
//!
//! Custom interceptors implement [`Middleware`] or wrap a closure with
//! [`from_fn`].
//!
//! # Example
//!
//! ```rust
//! use crm_api::middleware::{
//!     from_fn, MiddlewareManager, MiddlewareOptions, RateLimitMiddleware,
//! };
//!
//! let mut manager = MiddlewareManager::new();
//! manager
//!     .register(
//!         RateLimitMiddleware::default(),
//!         MiddlewareOptions::new().name("rate-limit").priority(10),
//!     )
//!     .register(
//!         from_fn(|ctx, next| {
//!             Box::pin(async move {
//!                 ctx.request.set_header("X-Request-Source", "sync-job");
//!                 next.run(ctx).await
//!             })
//!         }),
//!         MiddlewareOptions::new().name("source"),
//!     );
//!
//! assert_eq!(manager.list(), vec!["rate-limit", "source"]);
//! ```

mod auth_refresh;
mod context;
mod errors;
mod manager;
mod rate_limit;
mod retry;
mod usage_tracker;

pub use auth_refresh::{
    AuthRefreshMiddleware, AuthRefreshOptions, RefreshError, REFRESH_FAILED_MESSAGE,
};
pub use context::{CredentialUpdater, MiddlewareContext};
pub use errors::MiddlewareError;
pub use manager::{
    from_fn, CoreExecutor, FromFn, Middleware, MiddlewareManager, MiddlewareOptions, Next,
    DEFAULT_PRIORITY,
};
pub use rate_limit::{RateLimitMiddleware, RateLimitOptions};
pub use retry::{calculate_retry_delay, RetryDelayOptions};
pub use usage_tracker::{
    UsageLimits, UsageStats, UsageTracker, DEFAULT_BURST_WINDOW_MS, MINUTE_WINDOW_MS,
};
