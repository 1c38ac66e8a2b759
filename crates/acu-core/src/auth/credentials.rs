use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signed-in customer as returned by `GET /api/auth/me`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("(unknown)")
    }
}

/// Access/refresh token pair plus the cached user profile.
///
/// Created on login or refresh, replaced wholesale on refresh, destroyed on
/// logout or when a refresh can no longer succeed.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(rename = "storedAt")]
    pub stored_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(access_token: String, refresh_token: String, user: Option<User>) -> Self {
        Self {
            access_token,
            refresh_token,
            user,
            stored_at: Utc::now(),
        }
    }
}

// Tokens stay out of Debug output so they never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .field("stored_at", &self.stored_at)
            .finish()
    }
}
