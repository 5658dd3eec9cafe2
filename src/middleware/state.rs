use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::{AuthConfig, AuthSettings};
use crate::backend::AuthBackend;
use crate::lifecycle::TokenManager;
use crate::oauth::ProviderClient;
use crate::propagate::Propagator;

/// Shared state for auth route handlers and the [`AuthSession`](super::AuthSession) extractor.
///
/// Embed it in an application state and implement `FromRef` to use the
/// extractor from application handlers.
pub struct AuthState<B> {
    pub(super) provider: Arc<ProviderClient>,
    pub(super) tokens: TokenManager<B>,
    pub(super) propagator: Propagator,
    pub(super) settings: AuthSettings,
}

impl<B: AuthBackend> AuthState<B> {
    #[must_use]
    pub fn new(config: AuthConfig<B>) -> Self {
        Self {
            provider: Arc::new(ProviderClient::new(config.provider)),
            tokens: TokenManager::new(config.backend).with_rotation(config.rotation),
            propagator: config.propagator,
            settings: config.settings,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenManager<B> {
        &self.tokens
    }
}

// Manual Clone: avoid derive adding a `B: Clone` bound.
impl<B> Clone for AuthState<B> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            tokens: self.tokens.clone(),
            propagator: self.propagator.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<B> FromRef<AuthState<B>> for Key {
    fn from_ref(state: &AuthState<B>) -> Self {
        state.settings.cookie_key.clone()
    }
}
