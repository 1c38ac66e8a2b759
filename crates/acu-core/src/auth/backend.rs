//! Durable persistence for the credential pair.
//!
//! The store keeps an in-memory mirror; backends only make it survive a
//! restart. Three flavours exist: a JSON session file in the cache
//! directory, the OS keychain, and a process-local map for tests.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;

use super::credentials::{Credentials, User};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "acu-storefront";

const ACCESS_TOKEN_KEY: &str = "acu_access_token";
const REFRESH_TOKEN_KEY: &str = "acu_refresh_token";
const USER_KEY: &str = "acu_auth_user";

pub trait CredentialBackend: Send + Sync {
    /// Load persisted credentials, `None` when nothing (or only half a pair) is stored.
    fn load(&self) -> Result<Option<Credentials>>;

    fn save(&self, credentials: &Credentials) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

pub struct FileBackend {
    cache_dir: PathBuf,
}

impl FileBackend {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<Credentials>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let credentials: Credentials =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        if credentials.access_token.is_empty() || credentials.refresh_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(credentials))
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credentials)?;
        std::fs::write(path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// OS keychain storage, one entry per key.
pub struct KeyringBackend;

impl KeyringBackend {
    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key).context("Failed to create keyring entry")
    }

    fn read(key: &str) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn delete(key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<Credentials>> {
        let (Some(access), Some(refresh)) = (Self::read(ACCESS_TOKEN_KEY)?, Self::read(REFRESH_TOKEN_KEY)?)
        else {
            return Ok(None);
        };
        let user = match Self::read(USER_KEY)? {
            Some(raw) => Some(
                serde_json::from_str::<User>(&raw).context("Failed to parse stored user")?,
            ),
            None => None,
        };
        Ok(Some(Credentials::new(access, refresh, user)))
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        Self::entry(ACCESS_TOKEN_KEY)?
            .set_password(&credentials.access_token)
            .context("Failed to store access token in keychain")?;
        Self::entry(REFRESH_TOKEN_KEY)?
            .set_password(&credentials.refresh_token)
            .context("Failed to store refresh token in keychain")?;
        match credentials.user {
            Some(ref user) => Self::entry(USER_KEY)?
                .set_password(&serde_json::to_string(user)?)
                .context("Failed to store user in keychain")?,
            None => Self::delete(USER_KEY)?,
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Self::delete(ACCESS_TOKEN_KEY)?;
        Self::delete(REFRESH_TOKEN_KEY)?;
        Self::delete(USER_KEY)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Credentials>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            slot: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Credentials>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
