use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::jwt;

/// The live credential pair of one authenticated browser.
///
/// Serialized into the private session cookie between requests and rehydrated
/// by [`TokenManager::load`](crate::lifecycle::TokenManager::load).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds, from the access token's `exp` claim.
    pub expires_at: i64,
    /// Backend session cookie (`name=value`) when propagating cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_cookie: Option<String>,
}

impl Session {
    /// Builds a session from a freshly issued token pair.
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if the access token carries no readable `exp`.
    pub fn from_tokens(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Result<Self, Error> {
        let access_token = access_token.into();
        let expires_at = jwt::decode_expiry(&access_token)?;
        Ok(Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            backend_cookie: None,
        })
    }

    /// Usable only while `now < expires_at - leeway`.
    #[must_use]
    pub fn is_usable(&self, now_unix: i64, leeway_secs: i64) -> bool {
        now_unix < self.expires_at.saturating_sub(leeway_secs.max(0))
    }
}

/// Shortens a token for log output.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.len() < token.len() {
        format!("{prefix}…")
    } else {
        "***".to_string()
    }
}
