//! acu-core - client library for the ACU construction-materials storefront API.
//!
//! The storefront backend owns accounts, passwords and tokens; this crate
//! is everything a front end needs to talk to it:
//!
//! - `api`: bearer-authenticated client with single-flight token refresh
//! - `auth`: credential store, persistence backends, session state
//! - `services`: register/login/logout, contact form, reCAPTCHA check
//! - `validation`: form field checks
//! - `config`: API location, timeouts and credential backend selection

pub mod api;
pub mod auth;
pub mod config;
pub mod services;
pub mod validation;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthEvent, CredentialStore, Route, SessionState, SessionWatcher, User};
pub use config::Config;
