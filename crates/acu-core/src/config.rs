//! Application configuration management.
//!
//! Configuration covers the API location, the optional storefront API key,
//! the request timeout and where credentials are kept. It is read from
//! `~/.config/acu/config.json` when present and then overridden by
//! `ACU_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{CredentialBackend, FileBackend, KeyringBackend, MemoryBackend};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "acu";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend the storefront API runs on during development
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

/// HTTP request timeout in seconds, the refresh call included.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown credential backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub credential_backend: BackendKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: BackendKind::default(),
        }
    }
}

impl Config {
    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        debug!(api_base_url = %config.api_base_url, backend = ?config.credential_backend, "Config loaded");
        Ok(config)
    }

    /// Override fields from `ACU_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("ACU_API_BASE_URL").filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(key) = var("ACU_API_KEY") {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(secs) = var("ACU_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid ACU_REQUEST_TIMEOUT_SECS: {}", secs))?;
        }
        if let Some(kind) = var("ACU_CREDENTIAL_BACKEND") {
            self.credential_backend = kind.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Build the credential backend this config selects.
    pub fn credential_backend(&self) -> Result<Box<dyn CredentialBackend>> {
        Ok(match self.credential_backend {
            BackendKind::File => Box::new(FileBackend::new(self.cache_dir()?)),
            BackendKind::Keyring => Box::new(KeyringBackend),
            BackendKind::Memory => Box::new(MemoryBackend::new()),
        })
    }
}
