//! Error types for API requests.
//!
//! Every failure a caller can observe is an [`ApiError`]. Transport faults,
//! deadlines, and non-2xx responses are all mapped onto the same taxonomy so
//! callers never handle a raw transport exception.
//!
//! # Example
//!
//! ```rust,ignore
//! use crm_api::clients::ApiError;
//!
//! match client.get("customers/42", None).await {
//!     Ok(response) => println!("Customer: {}", response.body),
//!     Err(ApiError::NotFound { .. }) => println!("No such customer"),
//!     Err(ApiError::RateLimitExceeded { retry_after, .. }) => {
//!         println!("Slow down, retry after {retry_after:?}s");
//!     }
//!     Err(e) => println!("Request failed: {e}"),
//! }
//! ```

use thiserror::Error;

use crate::clients::http_response::HttpResponse;
use crate::middleware::MiddlewareError;

/// Error returned when an HTTP request fails validation before it is sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidHttpRequestError {
    /// A request body was provided without specifying the body type.
    #[error("Cannot set a body without also setting body_type.")]
    MissingBodyType,

    /// A POST, PUT, or PATCH request was made without a body.
    #[error("Cannot use {method} without specifying data.")]
    MissingBody {
        /// The HTTP method that requires a body.
        method: String,
    },

    /// A header name or value cannot be sent on the wire.
    #[error("Invalid header '{name}'.")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },
}

/// Unified error type for every request-level failure.
///
/// The enum is `Clone` so the middleware context can keep a copy of the
/// last failure while the same error propagates through the chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Network or response decoding failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the underlying failure.
        message: String,
    },

    /// The request did not complete before its deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The request was cancelled by its caller.
    #[error("Request was cancelled")]
    Cancelled,

    /// The server rejected the credentials (401).
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Server or SDK supplied message.
        message: String,
    },

    /// The credentials lack permission for the resource (403).
    #[error("Permission denied: {message}")]
    Permission {
        /// Server supplied message.
        message: String,
    },

    /// The resource does not exist (404).
    #[error("Not found: {message}")]
    NotFound {
        /// Server supplied message.
        message: String,
    },

    /// The request payload was rejected (422).
    #[error("Validation failed: {message}")]
    Validation {
        /// Server supplied message.
        message: String,
        /// Raw validation details, if the server returned any.
        details: Option<String>,
    },

    /// The server signalled a rate limit (429).
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        /// Server supplied message.
        message: String,
        /// Raw `Retry-After` header value, in seconds.
        retry_after: Option<String>,
    },

    /// Any other non-2xx response.
    #[error("API error {status}: {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// Server supplied message.
        message: String,
        /// Raw response body, if any.
        details: Option<String>,
    },

    /// Request validation failed before sending.
    #[error(transparent)]
    InvalidRequest(#[from] InvalidHttpRequestError),

    /// The middleware pipeline itself failed.
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
}

impl ApiError {
    /// Maps a non-2xx response onto the error taxonomy.
    ///
    /// The message is taken from the JSON body's `message` or `error` field
    /// when present, falling back to a generic description of the status.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        let message = Self::extract_message(response);
        let details = if response.body.is_empty() {
            None
        } else {
            Some(response.body.clone())
        };

        match response.code {
            401 => Self::Authentication { message },
            403 => Self::Permission { message },
            404 => Self::NotFound { message },
            422 => Self::Validation { message, details },
            429 => Self::RateLimitExceeded {
                message,
                retry_after: response.retry_after().map(String::from),
            },
            status => Self::Api {
                status,
                message,
                details,
            },
        }
    }

    /// Returns the HTTP status this error corresponds to, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::Permission { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Validation { .. } => Some(422),
            Self::RateLimitExceeded { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for authentication failures.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` for server-signalled rate limits.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    fn extract_message(response: &HttpResponse) -> String {
        let parsed = serde_json::from_str::<serde_json::Value>(&response.body).ok();
        parsed
            .as_ref()
            .and_then(|body| {
                ["message", "error", "error_description"]
                    .iter()
                    .find_map(|key| body.get(key).and_then(serde_json::Value::as_str))
            })
            .map_or_else(
                || format!("request failed with status {}", response.code),
                String::from,
            )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response(code: u16, body: &str, headers: &[(&str, &str)]) -> HttpResponse {
        let headers: HashMap<String, Vec<String>> = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), vec![(*v).to_string()]))
            .collect();
        HttpResponse::new(code, headers, body.to_string())
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_response(&response(401, "", &[])),
            ApiError::Authentication { .. }
        ));
        assert!(matches!(
            ApiError::from_response(&response(403, "", &[])),
            ApiError::Permission { .. }
        ));
        assert!(matches!(
            ApiError::from_response(&response(404, "", &[])),
            ApiError::NotFound { .. }
        ));
        assert!(matches!(
            ApiError::from_response(&response(500, "", &[])),
            ApiError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_validation_error_carries_details() {
        let body = r#"{"message":"invalid email","fields":["email"]}"#;
        let error = ApiError::from_response(&response(422, body, &[]));

        match error {
            ApiError::Validation { message, details } => {
                assert_eq!(message, "invalid email");
                assert_eq!(details.as_deref(), Some(body));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_error_carries_retry_after() {
        let error = ApiError::from_response(&response(429, "", &[("retry-after", "7")]));

        assert_eq!(
            error,
            ApiError::RateLimitExceeded {
                message: "request failed with status 429".to_string(),
                retry_after: Some("7".to_string()),
            }
        );
        assert!(error.is_rate_limited());
        assert_eq!(error.status(), Some(429));
    }

    #[test]
    fn test_message_falls_back_to_error_field() {
        let error = ApiError::from_response(&response(401, r#"{"error":"bad token"}"#, &[]));
        assert_eq!(error.to_string(), "Authentication failed: bad token");
        assert!(error.is_authentication());
    }

    #[test]
    fn test_timeout_is_distinct_from_transport() {
        let timeout = ApiError::Timeout { timeout_ms: 100 };
        assert!(!timeout.is_authentication());
        assert_eq!(timeout.status(), None);
        assert!(timeout.to_string().contains("100ms"));
    }

    #[test]
    fn test_invalid_request_error_missing_body() {
        let error = InvalidHttpRequestError::MissingBody {
            method: "post".to_string(),
        };
        assert_eq!(error.to_string(), "Cannot use post without specifying data.");
    }
}
