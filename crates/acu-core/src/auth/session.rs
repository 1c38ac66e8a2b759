use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::credentials::User;
use super::store::{AuthEvent, CredentialStore};

/// Where the front end should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Route {
    #[default]
    Home,
    SignIn,
}

/// Session as seen by the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub route: Route,
}

impl SessionState {
    pub fn restore(store: &CredentialStore) -> Self {
        let mut state = Self::default();
        state.reload(store);
        state
    }

    fn reload(&mut self, store: &CredentialStore) {
        self.access_token = store.access_token();
        self.user = store.user();
        self.is_authenticated = self.access_token.is_some();
    }

    /// React to a store notification. A sign-out sends the user to the sign-in screen.
    pub fn apply(&mut self, event: AuthEvent, store: &CredentialStore) {
        match event {
            AuthEvent::Updated => {
                self.reload(store);
                if self.is_authenticated {
                    self.route = Route::Home;
                }
            }
            AuthEvent::SignedOut => {
                self.access_token = None;
                self.user = None;
                self.is_authenticated = false;
                self.route = Route::SignIn;
            }
        }
    }
}

/// Background task that keeps a [`SessionState`] in sync with the store.
pub struct SessionWatcher {
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionWatcher {
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<CredentialStore>) -> Self {
        let mut events = store.subscribe();
        let (tx, rx) = watch::channel(SessionState::restore(&store));

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event == AuthEvent::SignedOut {
                            info!("Signed out, redirecting to sign-in");
                        }
                        tx.send_modify(|state| state.apply(event, &store));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session watcher lagged, resyncing from store");
                        let event = if store.is_signed_in() {
                            AuthEvent::Updated
                        } else {
                            AuthEvent::SignedOut
                        };
                        tx.send_modify(|state| state.apply(event, &store));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if tx.is_closed() {
                    break;
                }
            }
            debug!("Session watcher stopped");
        });

        Self { state: rx, task }
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
