//! Storefront endpoints built on top of `ApiClient`.
//!
//! - `auth`: register, login, current user, logout
//! - `contact`: the contact form
//! - `recaptcha`: server-side reCAPTCHA token verification

pub mod auth;
pub mod contact;
pub mod recaptcha;

pub use auth::{AuthFailure, LoginPayload, RegisterPayload};
pub use contact::{ContactError, ContactForm, ContactResponse};
