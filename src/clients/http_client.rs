//! HTTP transport for API communication.
//!
//! [`HttpClient`] is the transport primitive behind the core executor: it
//! sends exactly one request, enforces the deadline and cancellation
//! signal, and maps non-2xx responses onto [`ApiError`]. It never retries;
//! retry policy lives in the [`middleware`](crate::middleware) layer.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::clients::errors::{ApiError, InvalidHttpRequestError};
use crate::clients::http_request::HttpRequest;
use crate::clients::http_response::HttpResponse;
use crate::config::{BaseUrl, ClientConfig};

/// SDK version from Cargo.toml.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// HTTP client for making requests to the API.
///
/// The client handles:
/// - URL construction from the configured base URL
/// - Default headers including User-Agent and Accept
/// - Per-request deadlines and cancellation
/// - Status code to [`ApiError`] mapping
///
/// Cloning is cheap; clones share the underlying connection pool.
///
/// # Example
///
/// ```rust,ignore
/// use crm_api::{ClientConfig, BaseUrl};
/// use crm_api::clients::{HttpClient, HttpRequest, HttpMethod};
///
/// let config = ClientConfig::builder()
///     .base_url(BaseUrl::new("https://api.example.com/v1").unwrap())
///     .build()
///     .unwrap();
/// let client = HttpClient::new(&config)?;
///
/// let request = HttpRequest::builder(HttpMethod::Get, "customers").build()?;
/// let response = client.send(&request).await?;
/// ```
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: BaseUrl,
    default_headers: HashMap<String, String>,
    timeout: Duration,
}

// Verify HttpClient is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<HttpClient>();
};

impl HttpClient {
    /// Creates a new HTTP client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the underlying reqwest client
    /// cannot be created (e.g., TLS initialization failure).
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let user_agent_prefix = config
            .user_agent_prefix()
            .map_or(String::new(), |prefix| format!("{prefix} | "));
        let rust_version = env!("CARGO_PKG_RUST_VERSION");
        let user_agent =
            format!("{user_agent_prefix}CRM API Library v{SDK_VERSION} | Rust {rust_version}");

        let mut default_headers = HashMap::new();
        default_headers.insert("User-Agent".to_string(), user_agent);
        default_headers.insert("Accept".to_string(), "application/json".to_string());

        let client = reqwest::Client::builder().use_rustls_tls().build()?;

        Ok(Self {
            client,
            base_url: config.base_url().clone(),
            default_headers,
            timeout: config.timeout(),
        })
    }

    /// Returns the base URL for this client.
    #[must_use]
    pub const fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }

    /// Returns the default headers for this client.
    #[must_use]
    pub const fn default_headers(&self) -> &HashMap<String, String> {
        &self.default_headers
    }

    /// Returns the default request deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a single request.
    ///
    /// Relative URLs are joined onto the base URL. Request headers override
    /// default headers with the same (case-insensitive) name.
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidRequest`] if validation fails
    /// - [`ApiError::Timeout`] if the deadline expires
    /// - [`ApiError::Cancelled`] if the request's cancellation token fires
    /// - [`ApiError::Transport`] on network or body read failure
    /// - a status-specific variant for any non-2xx response
    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        request.verify()?;

        let url = self.base_url.join(&request.url);
        let headers = self.build_headers(request)?;

        let mut builder = self
            .client
            .request(request.http_method.into(), &url)
            .headers(headers);
        if let Some(query) = &request.query {
            builder = builder.query(query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let timeout = request.timeout.unwrap_or(self.timeout);
        let exchange = async {
            let res = builder.send().await?;
            let code = res.status().as_u16();
            let res_headers = Self::parse_response_headers(res.headers());
            let body = res.text().await?;
            Ok::<_, ApiError>(HttpResponse::new(code, res_headers, body))
        };
        let deadline = async {
            tokio::time::timeout(timeout, exchange)
                .await
                .unwrap_or_else(|_| {
                    Err(ApiError::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                })
        };

        let response = match &request.cancellation {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(ApiError::Cancelled),
                result = deadline => result,
            },
            None => deadline.await,
        }?;

        tracing::debug!(
            method = %request.http_method,
            url = %url,
            status = response.code,
            "request completed"
        );

        if response.is_ok() {
            Ok(response)
        } else {
            Err(ApiError::from_response(&response))
        }
    }

    fn build_headers(&self, request: &HttpRequest) -> Result<HeaderMap, InvalidHttpRequestError> {
        let mut merged: Vec<(&str, &str)> = self
            .default_headers
            .iter()
            .filter(|(key, _)| request.header(key).is_none())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(body_type) = &request.body_type {
            if request.header("Content-Type").is_none() {
                merged.push(("Content-Type", body_type.as_content_type()));
            }
        }
        merged.extend(request.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut headers = HeaderMap::new();
        for (key, value) in merged {
            let invalid = || InvalidHttpRequestError::InvalidHeader {
                name: key.to_string(),
            };
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Parses response headers into a `HashMap` keyed by lowercase name.
    fn parse_response_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            let key = name.as_str().to_lowercase();
            let value = value.to_str().unwrap_or_default().to_string();
            result.entry(key).or_default().push(value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::http_request::{DataType, HttpMethod};

    fn create_test_config() -> ClientConfig {
        ClientConfig::builder()
            .base_url(BaseUrl::new("https://api.example.com/v1").unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_client_construction() {
        let client = HttpClient::new(&create_test_config()).unwrap();

        assert_eq!(client.base_url().as_ref(), "https://api.example.com/v1");
        assert_eq!(client.timeout(), crate::config::DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_user_agent_header_format() {
        let client = HttpClient::new(&create_test_config()).unwrap();

        let user_agent = client.default_headers().get("User-Agent").unwrap();
        assert!(user_agent.contains("CRM API Library v"));
        assert!(user_agent.contains("Rust"));
    }

    #[test]
    fn test_user_agent_with_prefix() {
        let config = ClientConfig::builder()
            .base_url(BaseUrl::new("https://api.example.com").unwrap())
            .user_agent_prefix("MyApp/1.0")
            .build()
            .unwrap();
        let client = HttpClient::new(&config).unwrap();

        let user_agent = client.default_headers().get("User-Agent").unwrap();
        assert!(user_agent.starts_with("MyApp/1.0 | "));
    }

    #[test]
    fn test_request_headers_override_defaults() {
        let client = HttpClient::new(&create_test_config()).unwrap();
        let request = HttpRequest::builder(HttpMethod::Post, "deals")
            .body("{}")
            .body_type(DataType::Json)
            .header("accept", "text/csv")
            .build()
            .unwrap();

        let headers = client.build_headers(&request).unwrap();

        assert_eq!(headers.get("accept").unwrap(), "text/csv");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(headers.get_all("accept").iter().count(), 1);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let client = HttpClient::new(&create_test_config()).unwrap();
        let request = HttpRequest::builder(HttpMethod::Get, "deals")
            .header("bad header", "x")
            .build()
            .unwrap();

        assert!(matches!(
            client.build_headers(&request),
            Err(InvalidHttpRequestError::InvalidHeader { name }) if name == "bad header"
        ));
    }

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpClient>();
    }
}
