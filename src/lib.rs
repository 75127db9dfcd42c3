//! # CRM API Rust SDK
//!
//! A Rust SDK for a REST-style CRM API, providing type-safe configuration,
//! credential handling, and an HTTP client whose requests run through a
//! pluggable middleware chain.
//!
//! ## Overview
//!
//! This SDK provides:
//! - Type-safe configuration via [`ClientConfig`] and [`ClientConfigBuilder`]
//! - Validated newtypes for the base URL and API credentials
//! - An [`ApiClient`] with `get`/`post`/`put`/`patch`/`delete` helpers
//! - Onion-style request middleware with priority ordering and bounded retries
//! - Client-side throttling and 429 backoff via [`RateLimitMiddleware`]
//! - Access token refresh after 401 responses via [`AuthRefreshMiddleware`]
//!
//! ## Quick Start
//!
//! ```rust
//! use crm_api::{AccessToken, BaseUrl, ClientConfig};
//!
//! // Create configuration using the builder pattern
//! let config = ClientConfig::builder()
//!     .base_url(BaseUrl::new("https://api.example.com/v1").unwrap())
//!     .access_token(AccessToken::new("your-access-token").unwrap())
//!     .max_retries(2)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.max_retries(), 2);
//! ```
//!
//! ## Middleware
//!
//! Middleware wraps every request. Lower priorities run first on the way
//! in and last on the way out:
//!
//! ```rust,ignore
//! use crm_api::{ApiClient, AuthRefreshMiddleware, AuthRefreshOptions, RateLimitMiddleware};
//! use crm_api::middleware::MiddlewareOptions;
//!
//! let mut client = ApiClient::new(config)?;
//! client
//!     .use_middleware(
//!         RateLimitMiddleware::default(),
//!         MiddlewareOptions::new().name("rate-limit").priority(10),
//!     )
//!     .use_middleware(
//!         AuthRefreshMiddleware::new(AuthRefreshOptions::new(
//!             || async { oauth::refresh().await.map_err(Into::into) },
//!             |token| println!("store {token} somewhere durable"),
//!         )),
//!         MiddlewareOptions::new().name("auth-refresh").priority(20),
//!     );
//!
//! let contacts = client.get("contacts", None).await?;
//! ```
//!
//! Custom middleware implements [`Middleware`] or wraps a closure:
//!
//! ```rust,ignore
//! use crm_api::middleware::{from_fn, MiddlewareOptions};
//!
//! client.use_middleware(
//!     from_fn(|ctx, next| {
//!         Box::pin(async move {
//!             let started = std::time::Instant::now();
//!             let result = next.run(ctx).await;
//!             tracing::info!(elapsed = ?started.elapsed(), url = %ctx.request.url, "request finished");
//!             result
//!         })
//!     }),
//!     MiddlewareOptions::new().name("timing"),
//! );
//! ```
//!
//! ## Design Principles
//!
//! - **No global state**: Configuration is instance-based and passed explicitly
//! - **Fail-fast validation**: All newtypes validate on construction
//! - **Thread-safe**: All types are `Send + Sync`
//! - **Async-first**: Designed for use with Tokio async runtime
//! - **No hidden retries**: The transport sends once; retry policy is middleware

pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod middleware;

// Re-export public types at crate root for convenience
pub use auth::{CredentialStore, CredentialUpdate, Credentials};
pub use config::{AccessToken, ApiKey, BaseUrl, ClientConfig, ClientConfigBuilder};
pub use error::ConfigError;

// Re-export HTTP client types
pub use clients::{
    ApiClient, ApiError, DataType, HttpClient, HttpMethod, HttpRequest, HttpRequestBuilder,
    HttpResponse, InvalidHttpRequestError, RateLimitInfo,
};

// Re-export middleware types
pub use middleware::{
    AuthRefreshMiddleware, AuthRefreshOptions, Middleware, MiddlewareContext, MiddlewareError,
    MiddlewareManager, MiddlewareOptions, RateLimitMiddleware, RateLimitOptions,
};
