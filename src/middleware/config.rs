use std::time::Duration;

use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::backend::{AuthBackend, BackendClient, BackendConfig};
use crate::lifecycle::RefreshRotation;
use crate::oauth::OAuthConfig;
use crate::propagate::{CredentialMode, Propagator};

/// Shared auth settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) session_ttl_days: i64,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) error_redirect: String,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "democrasite_session".into(),
            session_ttl_days: 30,
            secure_cookies: true,
            auth_path: "/api/auth".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: "/login".into(),
        }
    }
}

/// Democrasite authentication configuration.
///
/// Required pieces (provider settings and the backing API client) are
/// constructor parameters. Use [`from_env()`](AuthConfig::from_env) for
/// convention-based setup, or [`new()`](AuthConfig::new) with `with_*` methods.
pub struct AuthConfig<B = BackendClient> {
    pub(super) provider: OAuthConfig,
    pub(super) backend: B,
    pub(super) propagator: Propagator,
    pub(super) rotation: RefreshRotation,
    pub(super) settings: AuthSettings,
}

impl<B: AuthBackend> AuthConfig<B> {
    /// Create config with the provider settings and backing API.
    ///
    /// Credentials are forwarded the way the backend's propagator says
    /// ([`AuthBackend::credential_propagator`]); refresh tokens are not
    /// rotated unless overridden.
    #[must_use]
    pub fn new(provider: OAuthConfig, backend: B) -> Self {
        Self {
            provider,
            propagator: backend.credential_propagator(),
            backend,
            rotation: RefreshRotation::default(),
            settings: AuthSettings::defaults(),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: RefreshRotation) -> Self {
        self.rotation = rotation;
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl_days(mut self, days: i64) -> Self {
        self.settings.session_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }
}

impl AuthConfig<BackendClient> {
    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `GITHUB_CLIENT_ID`: OAuth client ID
    /// - `BACKEND_URL`: Base URL of the backing API
    ///
    /// # Optional env vars
    /// - `OAUTH_AUTHORIZE_URL`: Override the provider authorize endpoint
    /// - `OAUTH_REDIRECT_URI`: Explicit callback URI
    /// - `OAUTH_SCOPES`: Comma-separated scopes
    /// - `BACKEND_EXCHANGE_PATH`, `BACKEND_REFRESH_PATH`, `BACKEND_LOGOUT_PATH`
    /// - `BACKEND_AUTH_NAMESPACE`: Path prefix whose cookies are captured
    /// - `BACKEND_TIMEOUT_SECS`: Per-call timeout (default 10)
    /// - `CREDENTIAL_MODE`: `bearer` (default) or `cookie`
    /// - `BACKEND_SESSION_COOKIE`: Cookie name in cookie mode (default `sessionid`)
    /// - `REFRESH_ROTATION`: `"1"` or `"true"` if the backing API rotates refresh tokens
    /// - `APP_ENV`: `production` enables secure cookies
    /// - `COOKIE_KEY`: Cookie encryption key bytes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = std::env::var("GITHUB_CLIENT_ID")
            .map_err(|_| AuthError::Config("GITHUB_CLIENT_ID is required".into()))?;
        let mut provider = OAuthConfig::new(client_id);

        if let Some(url) = env_url("OAUTH_AUTHORIZE_URL")? {
            provider = provider.with_authorize_url(url);
        }
        if let Some(url) = env_url("OAUTH_REDIRECT_URI")? {
            provider = provider.with_redirect_uri(url);
        }
        if let Ok(scopes) = std::env::var("OAUTH_SCOPES") {
            provider =
                provider.with_scopes(scopes.split(',').map(|s| s.trim().to_string()).collect());
        }

        let base_url = env_url("BACKEND_URL")?
            .ok_or_else(|| AuthError::Config("BACKEND_URL is required".into()))?;
        let mut backend = BackendConfig::new(base_url);
        if let Ok(path) = std::env::var("BACKEND_EXCHANGE_PATH") {
            backend = backend.with_exchange_path(path);
        }
        if let Ok(path) = std::env::var("BACKEND_REFRESH_PATH") {
            backend = backend.with_refresh_path(path);
        }
        if let Ok(path) = std::env::var("BACKEND_LOGOUT_PATH") {
            backend = backend.with_logout_path(path);
        }
        if let Ok(secs) = std::env::var("BACKEND_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| AuthError::Config(format!("BACKEND_TIMEOUT_SECS: {e}")))?;
            backend = backend.with_timeout(Duration::from_secs(secs));
        }

        let namespace =
            std::env::var("BACKEND_AUTH_NAMESPACE").unwrap_or_else(|_| backend.auth_namespace());
        let mode = match std::env::var("CREDENTIAL_MODE").as_deref() {
            Err(_) | Ok("bearer") => CredentialMode::Bearer,
            Ok("cookie") => CredentialMode::SessionCookie {
                name: std::env::var("BACKEND_SESSION_COOKIE")
                    .unwrap_or_else(|_| "sessionid".into()),
            },
            Ok(other) => {
                return Err(AuthError::Config(format!(
                    "CREDENTIAL_MODE must be \"bearer\" or \"cookie\", got {other:?}"
                )));
            }
        };
        let propagator = Propagator::new(mode).with_auth_namespace(namespace);

        let rotation = if env_flag("REFRESH_ROTATION") {
            RefreshRotation::Enabled
        } else {
            RefreshRotation::Disabled
        };
        let production = std::env::var("APP_ENV").is_ok_and(|v| v == "production");

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => {
                tracing::warn!("COOKIE_KEY not set; sessions will not survive a restart");
                Key::generate()
            }
        };

        let client = BackendClient::new(backend).with_propagator(propagator);
        Ok(Self::new(provider, client)
            .with_rotation(rotation)
            .with_cookie_key(cookie_key)
            .with_secure_cookies(production))
    }
}

fn env_url(name: &str) -> Result<Option<Url>, AuthError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| AuthError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> bool {
    matches!(std::env::var(name).as_deref(), Ok("1") | Ok("true"))
}
