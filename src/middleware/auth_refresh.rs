//! Recovery from expired credentials.
//!
//! [`AuthRefreshMiddleware`] watches for authentication failures. On one,
//! it asks the caller-supplied refresh callback for a new access token,
//! patches the `Authorization` header of the pending request and flags the
//! context for retry so the manager runs the whole chain again.
//!
//! # Example
//!
//! ```rust
//! use crm_api::middleware::{AuthRefreshMiddleware, AuthRefreshOptions, RefreshError};
//!
//! let options = AuthRefreshOptions::new(
//!     || async { Ok::<_, RefreshError>("fresh-token".to_string()) },
//!     |token| println!("new token: {token}"),
//! )
//! .on_refresh_failure(|error| eprintln!("refresh failed: {error}"));
//!
//! let middleware = AuthRefreshMiddleware::new(options);
//! assert_eq!(middleware.max_refresh_attempts(), 1);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::auth::CredentialUpdate;
use crate::clients::ApiError;
use crate::middleware::context::MiddlewareContext;
use crate::middleware::manager::{Middleware, Next};

/// Error type returned by refresh callbacks.
pub type RefreshError = Box<dyn std::error::Error + Send + Sync>;

type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String, RefreshError>> + Send + Sync>;
type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;
type FailureCallback = Arc<dyn Fn(&(dyn std::error::Error + Send + Sync)) + Send + Sync>;

/// Message of the error returned when the refresh callback fails.
pub const REFRESH_FAILED_MESSAGE: &str = "Token refresh failed. Please re-authenticate.";

/// Callbacks and limits for [`AuthRefreshMiddleware`].
#[derive(Clone)]
pub struct AuthRefreshOptions {
    refresh_token: RefreshFn,
    on_token_refreshed: TokenCallback,
    on_refresh_success: Option<TokenCallback>,
    on_refresh_failure: Option<FailureCallback>,
    max_refresh_attempts: u32,
}

impl AuthRefreshOptions {
    /// Creates options from the refresh callback and the callback that
    /// stores the new token.
    pub fn new<R, Fut, C>(refresh_token: R, on_token_refreshed: C) -> Self
    where
        R: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, RefreshError>> + Send + 'static,
        C: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            refresh_token: Arc::new(move || -> BoxFuture<'static, Result<String, RefreshError>> {
                Box::pin(refresh_token())
            }),
            on_token_refreshed: Arc::new(on_token_refreshed),
            on_refresh_success: None,
            on_refresh_failure: None,
            max_refresh_attempts: 1,
        }
    }

    /// Sets a callback run after every successful refresh.
    #[must_use]
    pub fn on_refresh_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_refresh_success = Some(Arc::new(callback));
        self
    }

    /// Sets a callback run when the refresh callback fails.
    #[must_use]
    pub fn on_refresh_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + Send + Sync)) + Send + Sync + 'static,
    {
        self.on_refresh_failure = Some(Arc::new(callback));
        self
    }

    /// Sets how many refreshes may be attempted before giving up.
    #[must_use]
    pub const fn max_refresh_attempts(mut self, attempts: u32) -> Self {
        self.max_refresh_attempts = attempts;
        self
    }
}

impl fmt::Debug for AuthRefreshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRefreshOptions")
            .field("on_refresh_success", &self.on_refresh_success.is_some())
            .field("on_refresh_failure", &self.on_refresh_failure.is_some())
            .field("max_refresh_attempts", &self.max_refresh_attempts)
            .finish_non_exhaustive()
    }
}

/// Interceptor that refreshes the access token after a 401 and asks for
/// the request to be retried.
///
/// The refresh counter belongs to the instance and is shared by every
/// request passing through it.
#[derive(Debug)]
pub struct AuthRefreshMiddleware {
    options: AuthRefreshOptions,
    refresh_attempts: AtomicU32,
}

// Verify AuthRefreshMiddleware is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AuthRefreshMiddleware>();
};

impl AuthRefreshMiddleware {
    /// Creates an auth-refresh interceptor.
    #[must_use]
    pub const fn new(options: AuthRefreshOptions) -> Self {
        Self {
            options,
            refresh_attempts: AtomicU32::new(0),
        }
    }

    /// Returns the configured refresh limit.
    #[must_use]
    pub const fn max_refresh_attempts(&self) -> u32 {
        self.options.max_refresh_attempts
    }

    /// Returns refreshes attempted since the counter was last reset.
    #[must_use]
    pub fn refresh_attempts(&self) -> u32 {
        self.refresh_attempts.load(Ordering::SeqCst)
    }

    async fn refresh(&self, ctx: &mut MiddlewareContext, error: ApiError) -> Result<(), ApiError> {
        let attempts = self.refresh_attempts.load(Ordering::SeqCst);
        if attempts >= self.options.max_refresh_attempts {
            self.refresh_attempts.store(0, Ordering::SeqCst);
            tracing::warn!(attempts, "token refresh limit reached");
            return Err(error);
        }
        self.refresh_attempts.fetch_add(1, Ordering::SeqCst);

        match (self.options.refresh_token)().await {
            Ok(token) => {
                (self.options.on_token_refreshed)(&token);
                if let Some(on_success) = &self.options.on_refresh_success {
                    on_success(&token);
                }
                self.refresh_attempts.store(0, Ordering::SeqCst);

                ctx.request.set_header("Authorization", format!("Bearer {token}"));
                ctx.update_credentials(CredentialUpdate::access_token(token));
                ctx.retry = true;
                tracing::info!(url = %ctx.request.url, "access token refreshed, retrying request");
                Ok(())
            }
            Err(refresh_error) => {
                self.refresh_attempts.store(0, Ordering::SeqCst);
                tracing::warn!(error = %refresh_error, "token refresh failed");
                if let Some(on_failure) = &self.options.on_refresh_failure {
                    on_failure(refresh_error.as_ref());
                }
                Err(ApiError::Authentication {
                    message: REFRESH_FAILED_MESSAGE.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Middleware for AuthRefreshMiddleware {
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), ApiError> {
        match next.run(ctx).await {
            Err(error) if error.is_authentication() => self.refresh(ctx, error).await,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{HttpMethod, HttpRequest, HttpResponse};
    use crate::middleware::manager::{MiddlewareManager, MiddlewareOptions};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn context(max_retries: u32) -> MiddlewareContext {
        let request = HttpRequest::builder(HttpMethod::Get, "contacts")
            .header("Authorization", "Bearer old-token")
            .build()
            .unwrap();
        MiddlewareContext::new(request, max_retries)
    }

    fn unauthorized() -> ApiError {
        ApiError::Authentication {
            message: "token expired".to_string(),
        }
    }

    /// Fails with 401 until the request carries `Bearer new-token`.
    async fn token_checking_core(request: HttpRequest) -> Result<HttpResponse, ApiError> {
        if request.header("authorization") == Some("Bearer new-token") {
            Ok(HttpResponse::new(200, HashMap::new(), "ok".to_string()))
        } else {
            Err(unauthorized())
        }
    }

    fn counting_options(calls: &Arc<AtomicU32>, token: Option<&'static str>) -> AuthRefreshOptions {
        let counter = Arc::clone(calls);
        AuthRefreshOptions::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { token.map(String::from).ok_or_else(|| RefreshError::from("revoked")) }
            },
            |_token| {},
        )
    }

    fn manager_with(middleware: AuthRefreshMiddleware) -> MiddlewareManager {
        let mut manager = MiddlewareManager::new();
        manager.register(middleware, MiddlewareOptions::new().name("auth-refresh"));
        manager
    }

    #[tokio::test]
    async fn test_refresh_patches_header_and_retries() {
        let refreshed = Arc::new(Mutex::new(Vec::new()));
        let successes = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&refreshed);
        let success_counter = Arc::clone(&successes);
        let options = AuthRefreshOptions::new(
            || async { Ok::<_, RefreshError>("new-token".to_string()) },
            move |token| sink.lock().unwrap().push(token.to_string()),
        )
        .on_refresh_success(move |_| {
            success_counter.fetch_add(1, Ordering::SeqCst);
        });
        let updates = Arc::new(Mutex::new(Vec::new()));
        let update_sink = Arc::clone(&updates);
        let mut ctx = context(1).with_credential_updater(Arc::new(move |update: CredentialUpdate| {
            update_sink.lock().unwrap().push(update);
        }));

        let response = manager_with(AuthRefreshMiddleware::new(options))
            .execute(&mut ctx, &token_checking_core)
            .await
            .unwrap();

        assert_eq!(response.code, 200);
        assert_eq!(ctx.request.header("Authorization"), Some("Bearer new-token"));
        assert_eq!(refreshed.lock().unwrap().as_slice(), &["new-token"]);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(
            updates.lock().unwrap().as_slice(),
            &[CredentialUpdate::access_token("new-token")]
        );
    }

    #[tokio::test]
    async fn test_refresh_sets_retry_flag_without_sending() {
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = AuthRefreshMiddleware::new(counting_options(&calls, Some("new-token")));
        let mut ctx = context(0);

        let result = middleware.refresh(&mut ctx, unauthorized()).await;

        assert_eq!(result, Ok(()));
        assert!(ctx.retry);
        assert!(ctx.response.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(middleware.refresh_attempts(), 0);
    }

    #[tokio::test]
    async fn test_non_auth_errors_never_refresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = manager_with(AuthRefreshMiddleware::new(counting_options(
            &calls,
            Some("new-token"),
        )));
        let core = |_req: HttpRequest| async {
            Err::<HttpResponse, _>(ApiError::Permission {
                message: "forbidden".to_string(),
            })
        };

        let result = manager.execute(&mut context(2), &core).await;

        assert_eq!(
            result,
            Err(ApiError::Permission {
                message: "forbidden".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_and_cancellation_never_refresh() {
        for error in [ApiError::Timeout { timeout_ms: 50 }, ApiError::Cancelled] {
            let calls = Arc::new(AtomicU32::new(0));
            let options = counting_options(&calls, Some("new-token"));
            let manager = manager_with(AuthRefreshMiddleware::new(options));
            let returned = error.clone();
            let core = move |_req: HttpRequest| {
                let returned = returned.clone();
                async move { Err::<HttpResponse, _>(returned) }
            };
            let mut ctx = context(2);

            let result = manager.execute(&mut ctx, &core).await;

            assert_eq!(result, Err(error));
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(ctx.retry_count, 0);
            assert_eq!(ctx.request.header("Authorization"), Some("Bearer old-token"));
        }
    }

    #[tokio::test]
    async fn test_refresh_failure_reports_reauthentication() {
        let calls = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let options = counting_options(&calls, None)
            .on_refresh_failure(move |error| sink.lock().unwrap().push(error.to_string()));
        let middleware = AuthRefreshMiddleware::new(options);

        let result = manager_with(middleware)
            .execute(&mut context(2), &token_checking_core)
            .await;

        assert_eq!(
            result,
            Err(ApiError::Authentication {
                message: REFRESH_FAILED_MESSAGE.to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.lock().unwrap().as_slice(), &["revoked"]);
    }

    #[tokio::test]
    async fn test_last_attempt_surfaces_original_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = manager_with(AuthRefreshMiddleware::new(counting_options(
            &calls,
            Some("still-wrong"),
        )));

        let result = manager.execute(&mut context(1), &token_checking_core).await;

        assert_eq!(result, Err(unauthorized()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_refresh_attempts_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = counting_options(&calls, Some("new-token")).max_refresh_attempts(0);
        let manager = manager_with(AuthRefreshMiddleware::new(options));

        let result = manager.execute(&mut context(3), &token_checking_core).await;

        assert_eq!(result, Err(unauthorized()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
