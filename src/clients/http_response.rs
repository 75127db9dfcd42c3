//! HTTP response types for the CRM API SDK.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::clients::errors::ApiError;

/// Rate limit information parsed from the `X-RateLimit-*` headers.
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
/// use crm_api::clients::{HttpResponse, RateLimitInfo};
///
/// let mut headers = HashMap::new();
/// headers.insert("x-ratelimit-limit".to_string(), vec!["100".to_string()]);
/// headers.insert("x-ratelimit-remaining".to_string(), vec!["42".to_string()]);
///
/// let response = HttpResponse::new(200, headers, String::new());
/// let info = response.rate_limit.unwrap();
/// assert_eq!(info.limit, 100);
/// assert_eq!(info.remaining, 42);
/// assert_eq!(info.reset, None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed in the current window.
    pub limit: u32,
    /// Requests remaining in the current window.
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets, if sent.
    pub reset: Option<i64>,
}

/// An HTTP response from the API.
///
/// The body is kept as raw text; use [`HttpResponse::json`] to decode it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub code: u16,
    /// Response headers, keyed by lowercase name (headers may repeat).
    pub headers: HashMap<String, Vec<String>>,
    /// The raw response body.
    pub body: String,
    /// Rate limit information, when the server sends it.
    pub rate_limit: Option<RateLimitInfo>,
}

impl HttpResponse {
    /// Creates a new `HttpResponse`, parsing the rate limit headers.
    ///
    /// Header names are lowercased; values of names that differ only in case
    /// are merged.
    #[must_use]
    pub fn new(code: u16, headers: HashMap<String, Vec<String>>, body: String) -> Self {
        let mut normalized: HashMap<String, Vec<String>> = HashMap::with_capacity(headers.len());
        for (name, values) in headers {
            normalized
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values);
        }
        let headers = normalized;
        let first = |name: &str| headers.get(name).and_then(|values| values.first());

        let rate_limit = match (
            first("x-ratelimit-limit").and_then(|v| v.trim().parse().ok()),
            first("x-ratelimit-remaining").and_then(|v| v.trim().parse().ok()),
        ) {
            (Some(limit), Some(remaining)) => Some(RateLimitInfo {
                limit,
                remaining,
                reset: first("x-ratelimit-reset").and_then(|v| v.trim().parse().ok()),
            }),
            _ => None,
        };

        Self {
            code,
            headers,
            body,
            rate_limit,
        }
    }

    /// Returns `true` if the response status code is in the 2xx range.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code >= 200 && self.code <= 299
    }

    /// Returns the first value of a header, matching the name case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns the raw `Retry-After` header value, if present.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        self.header("retry-after")
    }

    /// Returns the `X-Request-Id` header value, if present.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.header("x-request-id")
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Transport {
            message: format!("failed to decode response body: {e}"),
        })
    }
}
