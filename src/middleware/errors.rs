//! Failures of the middleware pipeline itself.

use thiserror::Error;

/// Error raised by the middleware engine rather than by the remote API.
///
/// # Example
///
/// ```rust
/// use crm_api::middleware::MiddlewareError;
///
/// let error = MiddlewareError::MaxRetriesExceeded { attempts: 3 };
/// assert_eq!(error.to_string(), "Max retries exceeded after 3 attempts");
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiddlewareError {
    /// An interceptor invoked its continuation more than once in one attempt.
    #[error("next() called multiple times")]
    NextCalledMultipleTimes,

    /// Every allowed attempt requested a retry and no error was recorded.
    #[error("Max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The chain completed without error but nothing produced a response.
    #[error("Middleware chain completed without producing a response")]
    NoResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ApiError;

    #[test]
    fn test_converts_into_api_error() {
        let error: ApiError = MiddlewareError::NextCalledMultipleTimes.into();
        assert_eq!(error.to_string(), "next() called multiple times");
        assert!(matches!(
            error,
            ApiError::Middleware(MiddlewareError::NextCalledMultipleTimes)
        ));
    }
}
