//! Authentication module for managing credentials and session state.
//!
//! This module provides:
//! - `CredentialStore`: in-memory token pair mirrored to a durable backend,
//!   with broadcast notifications on update and sign-out
//! - `FileBackend` / `KeyringBackend` / `MemoryBackend`: persistence options
//! - `SessionState` / `SessionWatcher`: the view of the session the front end
//!   renders from

pub mod backend;
pub mod credentials;
pub mod session;
pub mod store;

pub use backend::{CredentialBackend, FileBackend, KeyringBackend, MemoryBackend};
pub use credentials::{Credentials, User};
pub use session::{Route, SessionState, SessionWatcher};
pub use store::{AuthEvent, CredentialStore};
