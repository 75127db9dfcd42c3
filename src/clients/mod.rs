//! HTTP client types for CRM API communication.
//!
//! This module provides the request surface and the transport layer
//! beneath the middleware chain.
//!
//! # Overview
//!
//! The main types in this module are:
//!
//! - [`ApiClient`]: The client callers use, with middleware registration and verb helpers
//! - [`HttpClient`]: The async transport that sends exactly one request
//! - [`HttpRequest`]: A request to be sent to the API
//! - [`HttpResponse`]: A parsed response from the API
//! - [`HttpMethod`]: Supported HTTP methods (GET, POST, PUT, PATCH, DELETE)
//! - [`DataType`]: Content types for request bodies
//! - [`ApiError`]: Every failure a request can end in
//!
//! # Example
//!
//! ```rust
//! use crm_api::clients::{DataType, HttpMethod, HttpRequest};
//!
//! let request = HttpRequest::builder(HttpMethod::Post, "contacts")
//!     .body(r#"{"email":"ada@example.com"}"#)
//!     .body_type(DataType::Json)
//!     .query_param("notify", "false")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(request.url, "contacts");
//! ```
//!
//! # Retry Behavior
//!
//! The transport never retries. Rate-limit backoff and credential refresh
//! are opt-in middleware; see [`crate::middleware`].

mod api_client;
mod errors;
mod http_client;
mod http_request;
mod http_response;

pub use api_client::ApiClient;
pub use errors::{ApiError, InvalidHttpRequestError};
pub use http_client::{HttpClient, SDK_VERSION};
pub use http_request::{DataType, HttpMethod, HttpRequest, HttpRequestBuilder};
pub use http_response::{HttpResponse, RateLimitInfo};
