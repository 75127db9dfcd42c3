//! Credential storage shared between the client and its middleware.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// The credentials used to authenticate API requests.
///
/// Either field may be absent. When both are present the bearer token
/// takes precedence for the `Authorization` header and the API key is
/// still sent as `X-API-Key`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API key sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub access_token: Option<String>,
}

impl Credentials {
    /// Builds credentials from the values in a [`ClientConfig`].
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            api_key: config.api_key().map(|k| k.as_ref().to_string()),
            access_token: config.access_token().map(|t| t.as_ref().to_string()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "*****");
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("access_token", &mask(&self.access_token))
            .finish()
    }
}

/// A partial credential update.
///
/// Fields left as `None` keep their stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialUpdate {
    /// Replacement API key.
    pub api_key: Option<String>,
    /// Replacement access token.
    pub access_token: Option<String>,
}

impl CredentialUpdate {
    /// An update that only replaces the access token.
    #[must_use]
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            api_key: None,
            access_token: Some(token.into()),
        }
    }

    /// An update that only replaces the API key.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            access_token: None,
        }
    }
}

/// Shared, mutable credential holder.
///
/// Cloning a `CredentialStore` yields another handle to the same
/// credentials.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Credentials>>,
}

impl CredentialStore {
    /// Creates a store holding the given credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Returns a copy of the current credentials.
    #[must_use]
    pub fn snapshot(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies a partial update to the stored credentials.
    pub fn apply(&self, update: CredentialUpdate) {
        let mut credentials = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(api_key) = update.api_key {
            credentials.api_key = Some(api_key);
        }
        if let Some(access_token) = update.access_token {
            credentials.access_token = Some(access_token);
        }
    }
}
