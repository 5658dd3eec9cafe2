use url::Url;

use crate::csrf::PendingLogin;

/// Identity provider (`OAuth2` authorization server) configuration.
///
/// The client ID is a constructor parameter, so there is no runtime "missing field" error.
///
/// ```rust,ignore
/// use democrasite_auth::OAuthConfig;
///
/// let config = OAuthConfig::new("my-client-id")
///     .with_redirect_uri("https://democrasite.example/api/auth/callback".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) authorize_url: Url,
    pub(crate) redirect_uri: Option<Url>,
    pub(crate) scopes: Vec<String>,
}

impl OAuthConfig {
    /// Create a new configuration for the GitHub authorization endpoint.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authorize_url: "https://github.com/login/oauth/authorize"
                .parse()
                .expect("valid default URL"),
            redirect_uri: None,
            scopes: vec!["user:email".into()],
        }
    }

    /// Override the provider authorization endpoint.
    #[must_use]
    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = url;
        self
    }

    /// Send an explicit `redirect_uri` (otherwise the provider uses the
    /// callback registered for the client).
    #[must_use]
    pub fn with_redirect_uri(mut self, url: Url) -> Self {
        self.redirect_uri = Some(url);
        self
    }

    /// Override the requested scopes (default: `["user:email"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// `OAuth2` client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Authorization endpoint URL.
    #[must_use]
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&Url> {
        self.redirect_uri.as_ref()
    }

    /// Requested `OAuth2` scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Builds the browser redirect to the identity provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    config: OAuthConfig,
}

/// Authorization URL plus the pending login to remember in the browser.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub pending: PendingLogin,
}

impl ProviderClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Generate an authorization URL bound to a fresh CSRF state.
    #[must_use]
    pub fn authorization_url(&self) -> AuthorizationRequest {
        let pending = PendingLogin::issue();
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("state", pending.state())
                .append_pair("scope", &scope);
            if let Some(redirect_uri) = &self.config.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri.as_str());
            }
        }

        AuthorizationRequest {
            url: url.into(),
            pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig::new("test-client")
    }

    #[test]
    fn test_authorization_url_contains_state() {
        let client = ProviderClient::new(test_config());
        let req = client.authorization_url();

        assert!(req.url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(req.url.contains("client_id=test-client"));
        assert!(req.url.contains(&format!("state={}", req.pending.state())));
        assert!(req.url.contains("scope=user%3Aemail"));
        assert!(!req.url.contains("redirect_uri="));
    }

    #[test]
    fn test_authorization_url_unique_per_call() {
        let client = ProviderClient::new(test_config());
        let req1 = client.authorization_url();
        let req2 = client.authorization_url();

        assert_ne!(req1.pending, req2.pending);
    }

    #[test]
    fn test_config_with_overrides() {
        let config = OAuthConfig::new("my-app")
            .with_authorize_url("https://idp.example.com/authorize".parse().unwrap())
            .with_redirect_uri("https://my-app.com/callback".parse().unwrap())
            .with_scopes(vec!["read:user".into(), "user:email".into()]);

        assert_eq!(config.client_id(), "my-app");
        assert_eq!(
            config.authorize_url().as_str(),
            "https://idp.example.com/authorize"
        );

        let req = ProviderClient::new(config).authorization_url();
        assert!(req.url.starts_with("https://idp.example.com/authorize?"));
        assert!(req.url.contains("scope=read%3Auser+user%3Aemail"));
        assert!(req.url.contains("redirect_uri=https%3A%2F%2Fmy-app.com%2Fcallback"));
    }
}
