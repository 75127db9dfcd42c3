//! Authentication state for the CRM API SDK.
//!
//! # Overview
//!
//! - [`Credentials`]: The API key and/or bearer token used to authenticate requests
//! - [`CredentialUpdate`]: A partial update applied to stored credentials
//! - [`CredentialStore`]: A shared, mutable holder for the current credentials
//!
//! The middleware layer never reads credentials. It only writes through
//! the updater carried by [`MiddlewareContext`](crate::middleware::MiddlewareContext),
//! which the [`ApiClient`](crate::clients::ApiClient) wires to its store.
//!
//! # Example
//!
//! ```rust
//! use crm_api::auth::{CredentialStore, CredentialUpdate, Credentials};
//!
//! let store = CredentialStore::new(Credentials::default());
//! store.apply(CredentialUpdate::access_token("new-token"));
//! assert_eq!(store.snapshot().access_token.as_deref(), Some("new-token"));
//! ```

mod credentials;

pub use credentials::{CredentialStore, CredentialUpdate, Credentials};
