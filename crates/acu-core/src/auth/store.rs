use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::backend::CredentialBackend;
use super::credentials::{Credentials, User};

/// Capacity of the notification channel; slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Notifications sent to everything subscribed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// Credentials or the cached user were written.
    Updated,
    /// Credentials were cleared; the session is over.
    SignedOut,
}

/// Process-wide credential store: an in-memory mirror over a durable backend.
///
/// Reads never touch the backend. Backend failures are logged and swallowed,
/// the in-memory copy stays authoritative for the running process.
///
/// Writers hold `persist` across the memory update and the backend call, so
/// the backend always ends up holding the last write made in memory.
pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    persist: Mutex<()>,
    current: RwLock<Option<Credentials>>,
    events: broadcast::Sender<AuthEvent>,
}

impl CredentialStore {
    /// Open the store, restoring whatever the backend has persisted.
    pub fn open(backend: Box<dyn CredentialBackend>) -> Self {
        let restored = match backend.load() {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Failed to load stored credentials");
                None
            }
        };
        debug!(restored = restored.is_some(), "Credential store opened");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            persist: Mutex::new(()),
            current: RwLock::new(restored),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Credentials>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Credentials>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_lock(&self) -> MutexGuard<'_, ()> {
        self.persist.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|c| c.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|c| c.refresh_token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.read().as_ref().and_then(|c| c.user.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.read().is_some()
    }

    /// Replace the credential pair. A `None` user keeps the one already cached.
    pub fn set(&self, access_token: String, refresh_token: String, user: Option<User>) {
        let _persist = self.persist_lock();
        let credentials = {
            let mut current = self.write();
            let user = user.or_else(|| current.as_ref().and_then(|c| c.user.clone()));
            let credentials = Credentials::new(access_token, refresh_token, user);
            *current = Some(credentials.clone());
            credentials
        };

        if let Err(e) = self.backend.save(&credentials) {
            warn!(error = %e, "Failed to persist credentials");
        }
        self.notify(AuthEvent::Updated);
    }

    /// Attach the user profile to the stored pair. No-op when signed out.
    pub fn set_user(&self, user: User) {
        let _persist = self.persist_lock();
        let credentials = {
            let mut current = self.write();
            match current.as_mut() {
                Some(c) => {
                    c.user = Some(user);
                    c.clone()
                }
                None => return,
            }
        };

        if let Err(e) = self.backend.save(&credentials) {
            warn!(error = %e, "Failed to persist user profile");
        }
        self.notify(AuthEvent::Updated);
    }

    /// Forget everything and broadcast `SignedOut`.
    pub fn clear(&self) {
        let _persist = self.persist_lock();
        *self.write() = None;
        if let Err(e) = self.backend.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        self.notify(AuthEvent::SignedOut);
    }

    /// Register for credential notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: AuthEvent) {
        // No subscribers is not an error.
        let receivers = self.events.send(event).unwrap_or(0);
        debug!(?event, receivers, "Auth event emitted");
    }
}
