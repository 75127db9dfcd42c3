//! The request surface callers interact with.
//!
//! [`ApiClient`] owns the transport, the credential store and the
//! middleware chain. Every request picks up the current credentials and,
//! when any middleware is registered, runs through the chain with the
//! transport as its core executor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{CredentialStore, CredentialUpdate, Credentials};
use crate::clients::{ApiError, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::config::ClientConfig;
use crate::middleware::{Middleware, MiddlewareContext, MiddlewareManager, MiddlewareOptions};

/// API client with pluggable request middleware.
///
/// # Thread Safety
///
/// `ApiClient` is `Send + Sync`. Requests take `&self`, so one client can
/// serve many concurrent tasks behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use crm_api::{ApiClient, AccessToken, BaseUrl, ClientConfig};
/// use crm_api::middleware::{MiddlewareOptions, RateLimitMiddleware};
///
/// let config = ClientConfig::builder()
///     .base_url(BaseUrl::new("https://api.example.com/v1")?)
///     .access_token(AccessToken::new("token")?)
///     .build()?;
///
/// let mut client = ApiClient::new(config)?;
/// client.use_middleware(
///     RateLimitMiddleware::default(),
///     MiddlewareOptions::new().name("rate-limit").priority(10),
/// );
///
/// let response = client.get("contacts", None).await?;
/// let body = serde_json::json!({"contact": {"email": "ada@example.com"}});
/// let created = client.post("contacts", body, None).await?;
/// ```
#[derive(Debug)]
pub struct ApiClient {
    http: HttpClient,
    config: ClientConfig,
    credentials: CredentialStore,
    middleware: MiddlewareManager,
}

// Verify ApiClient is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ApiClient>();
};

impl ApiClient {
    /// Creates a client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = HttpClient::new(&config)?;
        let credentials = CredentialStore::new(Credentials::from_config(&config));
        Ok(Self {
            http,
            config,
            credentials,
            middleware: MiddlewareManager::new(),
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns a handle to the client's credentials.
    ///
    /// Updates through the handle apply to subsequent requests.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Registers a middleware. See [`MiddlewareManager::register`].
    pub fn use_middleware<M>(&mut self, middleware: M, options: MiddlewareOptions) -> &mut Self
    where
        M: Middleware + 'static,
    {
        self.middleware.register(middleware, options);
        self
    }

    /// Removes the middleware registered under `name`.
    ///
    /// Returns `true` if one was found.
    pub fn remove_middleware(&mut self, name: &str) -> bool {
        self.middleware.remove(name)
    }

    /// Returns registered middleware names in execution order.
    #[must_use]
    pub fn list_middleware(&self) -> Vec<String> {
        self.middleware.list()
    }

    /// Returns `true` if a middleware is registered under `name`.
    #[must_use]
    pub fn has_middleware(&self, name: &str) -> bool {
        self.middleware.list().iter().any(|n| n == name)
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] describing the failure.
    pub async fn get(
        &self,
        path: &str,
        query: Option<HashMap<String, String>>,
    ) -> Result<HttpResponse, ApiError> {
        self.make_request(HttpMethod::Get, path, None, query).await
    }

    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] describing the failure.
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        query: Option<HashMap<String, String>>,
    ) -> Result<HttpResponse, ApiError> {
        self.make_request(HttpMethod::Post, path, Some(body), query).await
    }

    /// Sends a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] describing the failure.
    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
        query: Option<HashMap<String, String>>,
    ) -> Result<HttpResponse, ApiError> {
        self.make_request(HttpMethod::Put, path, Some(body), query).await
    }

    /// Sends a PATCH request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] describing the failure.
    pub async fn patch(
        &self,
        path: &str,
        body: serde_json::Value,
        query: Option<HashMap<String, String>>,
    ) -> Result<HttpResponse, ApiError> {
        self.make_request(HttpMethod::Patch, path, Some(body), query).await
    }

    /// Sends a DELETE request.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] describing the failure.
    pub async fn delete(
        &self,
        path: &str,
        query: Option<HashMap<String, String>>,
    ) -> Result<HttpResponse, ApiError> {
        self.make_request(HttpMethod::Delete, path, None, query).await
    }

    /// Sends a prepared request through the middleware chain.
    ///
    /// Credentials from the store are added unless the request already
    /// carries the corresponding header. With no middleware registered the
    /// request goes straight to the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or whatever the middleware chain
    /// surfaces after its retries.
    pub async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiError> {
        apply_credentials(&mut request, &self.credentials.snapshot());

        if self.middleware.is_empty() {
            return self.http.send(&request).await;
        }

        let store = self.credentials.clone();
        let mut ctx = MiddlewareContext::new(request, self.config.max_retries())
            .with_credential_updater(Arc::new(move |update: CredentialUpdate| store.apply(update)));

        let http = self.http.clone();
        let core = move |request: HttpRequest| {
            let http = http.clone();
            async move { http.send(&request).await }
        };

        self.middleware.execute(&mut ctx, &core).await
    }

    async fn make_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        query: Option<HashMap<String, String>>,
    ) -> Result<HttpResponse, ApiError> {
        let mut builder = HttpRequest::builder(method, path);
        if let Some(body) = &body {
            builder = builder.json(body);
        }
        for (key, value) in query.unwrap_or_default() {
            builder = builder.query_param(key, value);
        }
        self.request(builder.build()?).await
    }
}

fn apply_credentials(request: &mut HttpRequest, credentials: &Credentials) {
    if let Some(token) = &credentials.access_token {
        if request.header("Authorization").is_none() {
            request.set_header("Authorization", format!("Bearer {token}"));
        }
    }
    if let Some(key) = &credentials.api_key {
        if request.header("X-API-Key").is_none() {
            request.set_header("X-API-Key", key.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessToken, ApiKey, BaseUrl};
    use crate::middleware::from_fn;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .base_url(BaseUrl::new("https://api.example.com/v1").unwrap())
            .access_token(AccessToken::new("token-1").unwrap())
            .api_key(ApiKey::new("key-1").unwrap())
            .build()
            .unwrap()
    }

    fn passthrough() -> impl Middleware {
        from_fn(|ctx, next| Box::pin(async move { next.run(ctx).await }))
    }

    #[test]
    fn test_apply_credentials_sets_both_headers() {
        let mut request = HttpRequest::builder(HttpMethod::Get, "deals").build().unwrap();
        let credentials = Credentials {
            api_key: Some("key-1".to_string()),
            access_token: Some("token-1".to_string()),
        };

        apply_credentials(&mut request, &credentials);

        assert_eq!(request.header("authorization"), Some("Bearer token-1"));
        assert_eq!(request.header("x-api-key"), Some("key-1"));
    }

    #[test]
    fn test_apply_credentials_keeps_explicit_header() {
        let mut request = HttpRequest::builder(HttpMethod::Get, "deals")
            .header("authorization", "Bearer explicit")
            .build()
            .unwrap();
        let credentials = Credentials {
            api_key: None,
            access_token: Some("token-1".to_string()),
        };

        apply_credentials(&mut request, &credentials);

        assert_eq!(request.header("Authorization"), Some("Bearer explicit"));
        assert_eq!(request.header("X-API-Key"), None);
    }

    #[test]
    fn test_middleware_registration_api() {
        let mut client = ApiClient::new(config()).unwrap();
        client
            .use_middleware(passthrough(), MiddlewareOptions::new().name("logging").priority(200))
            .use_middleware(passthrough(), MiddlewareOptions::new().name("auth").priority(20));

        assert_eq!(client.list_middleware(), vec!["auth", "logging"]);
        assert!(client.has_middleware("auth"));
        assert!(client.remove_middleware("auth"));
        assert!(!client.has_middleware("auth"));
        assert!(!client.remove_middleware("auth"));
    }

    #[test]
    fn test_credentials_seeded_from_config() {
        let client = ApiClient::new(config()).unwrap();
        let credentials = client.credentials().snapshot();

        assert_eq!(credentials.access_token.as_deref(), Some("token-1"));
        assert_eq!(credentials.api_key.as_deref(), Some("key-1"));
    }
}
