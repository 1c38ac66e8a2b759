//! REST API client module for the storefront backend.
//!
//! This module provides the `ApiClient` for talking to the storefront API.
//! Requests carry the stored access token as a bearer credential; expired
//! tokens are renewed through the refresh endpoint with at most one renewal
//! in flight at a time.

pub mod client;
pub mod error;
pub mod refresh;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::{RefreshCoordinator, RefreshFailure};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
