//! Per-request state shared across the middleware chain.

use std::fmt;
use std::sync::Arc;

use crate::auth::CredentialUpdate;
use crate::clients::{ApiError, HttpRequest, HttpResponse};

/// Callback used by interceptors to write new credentials back to the client.
pub type CredentialUpdater = Arc<dyn Fn(CredentialUpdate) + Send + Sync>;

/// State for one logical request, shared by every interceptor and every
/// retry of that request.
///
/// The manager resets `retry`, `error` and `response` and sets
/// `retry_count` at the start of each attempt. Interceptors may edit
/// `request.headers` in place; edits persist into later attempts.
pub struct MiddlewareContext {
    /// The outgoing request.
    pub request: HttpRequest,
    /// Set once the core executor succeeds.
    pub response: Option<HttpResponse>,
    /// Set when the core executor fails.
    pub error: Option<ApiError>,
    /// Set by an interceptor to ask the manager for another attempt.
    pub retry: bool,
    /// Zero-based number of the current attempt.
    pub retry_count: u32,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    credential_updater: Option<CredentialUpdater>,
}

impl MiddlewareContext {
    /// Creates a context for `request` allowing up to `max_retries` retries.
    #[must_use]
    pub fn new(request: HttpRequest, max_retries: u32) -> Self {
        Self {
            request,
            response: None,
            error: None,
            retry: false,
            retry_count: 0,
            max_retries,
            credential_updater: None,
        }
    }

    /// Attaches the callback behind [`update_credentials`](Self::update_credentials).
    #[must_use]
    pub fn with_credential_updater(mut self, updater: CredentialUpdater) -> Self {
        self.credential_updater = Some(updater);
        self
    }

    /// Writes new credentials back to the owning client's store.
    ///
    /// Does nothing when the context was built without an updater.
    pub fn update_credentials(&self, update: CredentialUpdate) {
        if let Some(updater) = &self.credential_updater {
            updater(update);
        }
    }

    pub(crate) fn begin_attempt(&mut self, attempt: u32) {
        self.retry_count = attempt;
        self.retry = false;
        self.error = None;
        self.response = None;
    }
}

impl fmt::Debug for MiddlewareContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareContext")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("error", &self.error)
            .field("retry", &self.retry)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("credential_updater", &self.credential_updater.is_some())
            .finish()
    }
}
