//! Interceptor registration and onion-order execution.
//!
//! [`MiddlewareManager`] keeps interceptors sorted by priority and runs
//! them around a [`CoreExecutor`]. Each interceptor receives the shared
//! [`MiddlewareContext`] and a [`Next`] continuation; code before
//! `next.run(ctx)` runs on the way in, code after it on the way out.
//!
//! # Example
//!
//! ```rust,ignore
//! use crm_api::middleware::{from_fn, MiddlewareManager, MiddlewareOptions};
//!
//! let mut manager = MiddlewareManager::new();
//! manager.register(
//!     from_fn(|ctx, next| {
//!         Box::pin(async move {
//!             ctx.request.set_header("X-Trace", "on");
//!             next.run(ctx).await
//!         })
//!     }),
//!     MiddlewareOptions::new().name("trace").priority(10),
//! );
//!
//! let response = manager.execute(&mut ctx, &core).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::clients::{ApiError, HttpRequest, HttpResponse};
use crate::middleware::context::MiddlewareContext;
use crate::middleware::errors::MiddlewareError;

/// Priority given to interceptors registered without one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// An interceptor wrapping downstream execution.
///
/// Implementations call `next.run(ctx)` at most once per attempt. A second
/// call fails with [`MiddlewareError::NextCalledMultipleTimes`].
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handles one attempt of a request.
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), ApiError>;
}

/// The operation that actually performs a request.
///
/// Implemented for any `Fn(HttpRequest) -> impl Future<Output = Result<HttpResponse, ApiError>>`.
pub trait CoreExecutor: Send + Sync {
    /// Sends `request` and returns the response.
    fn call(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>>;
}

impl<F, Fut> CoreExecutor for F
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse, ApiError>> + Send + 'static,
{
    fn call(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        Box::pin(self(request))
    }
}

/// Wraps a closure as a [`Middleware`].
///
/// The closure must return a boxed future borrowing its arguments, which
/// `Box::pin(async move { ... })` produces.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Next<'a>) -> BoxFuture<'a, Result<(), ApiError>>
        + Send
        + Sync,
{
    FromFn(f)
}

/// A closure-backed [`Middleware`] created by [`from_fn`].
pub struct FromFn<F>(F);

#[async_trait]
impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Next<'a>) -> BoxFuture<'a, Result<(), ApiError>>
        + Send
        + Sync,
{
    async fn handle(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> Result<(), ApiError> {
        (self.0)(ctx, next).await
    }
}

/// Per-attempt dispatch state.
struct Chain<'a> {
    middlewares: &'a [Registration],
    core: &'a dyn CoreExecutor,
    // One past the highest index dispatched so far; zero before the first dispatch.
    dispatched: AtomicUsize,
}

impl<'a> Chain<'a> {
    fn new(middlewares: &'a [Registration], core: &'a dyn CoreExecutor) -> Self {
        Self {
            middlewares,
            core,
            dispatched: AtomicUsize::new(0),
        }
    }

    fn dispatch<'b>(
        &'b self,
        index: usize,
        ctx: &'b mut MiddlewareContext,
    ) -> BoxFuture<'b, Result<(), ApiError>> {
        Box::pin(async move {
            let previous = self.dispatched.fetch_max(index + 1, Ordering::SeqCst);
            if index < previous {
                return Err(MiddlewareError::NextCalledMultipleTimes.into());
            }

            if let Some(registration) = self.middlewares.get(index) {
                let next = Next {
                    chain: self,
                    index: index + 1,
                };
                return registration.middleware.handle(ctx, next).await;
            }

            match self.core.call(ctx.request.clone()).await {
                Ok(response) => {
                    ctx.response = Some(response);
                    Ok(())
                }
                Err(error) => {
                    ctx.error = Some(error.clone());
                    Err(error)
                }
            }
        })
    }
}

/// Continuation handed to each interceptor.
pub struct Next<'a> {
    chain: &'a Chain<'a>,
    index: usize,
}

impl Next<'_> {
    /// Runs the rest of the chain, ending in the core executor.
    ///
    /// # Errors
    ///
    /// Returns whatever downstream returns, or
    /// [`MiddlewareError::NextCalledMultipleTimes`] when called twice.
    pub async fn run(&self, ctx: &mut MiddlewareContext) -> Result<(), ApiError> {
        self.chain.dispatch(self.index, ctx).await
    }

    /// Sends `request` straight through the core executor, bypassing the
    /// remaining interceptors and the multiple-call guard.
    ///
    /// # Errors
    ///
    /// Returns the core executor's error.
    pub async fn resubmit(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.chain.core.call(request).await
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

/// Options for [`MiddlewareManager::register`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MiddlewareOptions {
    name: Option<String>,
    priority: Option<i32>,
}

impl MiddlewareOptions {
    /// Creates empty options: generated name, default priority.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the registration name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the priority. Lower values run first (outermost).
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

struct Registration {
    name: String,
    priority: i32,
    middleware: Arc<dyn Middleware>,
}

/// Ordered interceptor chain with a bounded retry loop.
///
/// # Thread Safety
///
/// `MiddlewareManager` is `Send + Sync`; `execute` takes `&self` so many
/// requests can run through one manager concurrently.
#[derive(Default)]
pub struct MiddlewareManager {
    middlewares: Vec<Registration>,
}

// Verify MiddlewareManager is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<MiddlewareManager>();
};

impl MiddlewareManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interceptor.
    ///
    /// Interceptors are kept sorted by ascending priority; equal priorities
    /// keep registration order. Registering an existing name replaces the
    /// earlier registration.
    pub fn register<M>(&mut self, middleware: M, options: MiddlewareOptions) -> &mut Self
    where
        M: Middleware + 'static,
    {
        let name = options.name.unwrap_or_else(Self::generate_name);
        self.middlewares.retain(|r| r.name != name);
        self.middlewares.push(Registration {
            name,
            priority: options.priority.unwrap_or(DEFAULT_PRIORITY),
            middleware: Arc::new(middleware),
        });
        // stable: ties keep insertion order
        self.middlewares.sort_by_key(|r| r.priority);
        self
    }

    /// Removes the interceptor registered under `name`.
    ///
    /// Returns `true` if one was found.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.middlewares.len();
        self.middlewares.retain(|r| r.name != name);
        self.middlewares.len() != before
    }

    /// Returns registered names in execution order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.middlewares.iter().map(|r| r.name.clone()).collect()
    }

    /// Returns the number of registered interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` when no interceptor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs the chain around `core`, retrying while interceptors ask to.
    ///
    /// At most `ctx.max_retries + 1` attempts are made. Before each attempt
    /// `retry_count` is set to the attempt number and `retry`, `error` and
    /// `response` are cleared.
    ///
    /// # Errors
    ///
    /// - the error of the final attempt when no retry was requested or no
    ///   attempts remain
    /// - the last recorded error, or [`MiddlewareError::MaxRetriesExceeded`],
    ///   when every attempt asked for a retry
    /// - [`MiddlewareError::NoResponse`] when the chain succeeds without a response
    pub async fn execute<E>(
        &self,
        ctx: &mut MiddlewareContext,
        core: &E,
    ) -> Result<HttpResponse, ApiError>
    where
        E: CoreExecutor,
    {
        let max_attempts = ctx.max_retries.saturating_add(1);
        let mut attempts: u32 = 0;

        while attempts < max_attempts {
            ctx.begin_attempt(attempts);
            let chain = Chain::new(&self.middlewares, core);

            let outcome = chain.dispatch(0, ctx).await;

            match outcome {
                Ok(()) if !ctx.retry => {
                    return ctx
                        .response
                        .clone()
                        .ok_or_else(|| MiddlewareError::NoResponse.into());
                }
                Ok(()) => {
                    tracing::debug!(attempt = attempts, "middleware requested retry");
                }
                Err(error) => {
                    if !ctx.retry || attempts + 1 >= max_attempts {
                        return Err(error);
                    }
                    tracing::debug!(attempt = attempts, error = %error, "retrying failed attempt");
                }
            }
            attempts += 1;
        }

        tracing::warn!(attempts = max_attempts, "max retries exceeded");
        Err(ctx.error.clone().unwrap_or_else(|| {
            MiddlewareError::MaxRetriesExceeded {
                attempts: max_attempts,
            }
            .into()
        }))
    }

    fn generate_name() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!(
            "middleware_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            suffix.to_lowercase()
        )
    }
}

impl fmt::Debug for MiddlewareManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareManager")
            .field("middlewares", &self.list())
            .finish()
    }
}
