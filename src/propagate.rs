//! Credential forwarding for outbound backing-API calls.
//!
//! A deployment forwards either the access token as a bearer header or the
//! backend's own session cookie. The credential is always an explicit value
//! passed to each call, and a cookie captured from a response only becomes
//! the input of the *next* call through the per-browser [`Session`](crate::Session).

use reqwest::RequestBuilder;
use reqwest::header::{COOKIE, HeaderMap, SET_COOKIE};
use url::Url;

/// Which credential representation this deployment forwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialMode {
    /// `Authorization: Bearer <access token>`.
    #[default]
    Bearer,
    /// `Cookie: <name>=<value>` captured from the backing API.
    SessionCookie { name: String },
}

/// The value attached to one outbound request.
#[derive(Clone, PartialEq, Eq)]
pub enum OutboundCredential {
    Bearer(String),
    /// Full `name=value` pair.
    Cookie(String),
}

impl std::fmt::Debug for OutboundCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(token) => f
                .debug_tuple("Bearer")
                .field(&crate::session::mask_token(token))
                .finish(),
            Self::Cookie(cookie) => f
                .debug_tuple("Cookie")
                .field(&crate::session::mask_token(cookie))
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Propagator {
    mode: CredentialMode,
    auth_namespace: String,
}

impl Propagator {
    /// Create a propagator capturing cookies only below `/auth/`.
    #[must_use]
    pub fn new(mode: CredentialMode) -> Self {
        Self {
            mode,
            auth_namespace: "/auth/".into(),
        }
    }

    /// Override the URL path prefix of the backend's authentication endpoints.
    #[must_use]
    pub fn with_auth_namespace(mut self, prefix: impl Into<String>) -> Self {
        self.auth_namespace = prefix.into();
        self
    }

    #[must_use]
    pub fn mode(&self) -> &CredentialMode {
        &self.mode
    }

    #[must_use]
    pub fn auth_namespace(&self) -> &str {
        &self.auth_namespace
    }

    /// Adds the credential to an outbound request.
    #[must_use]
    pub fn attach(&self, request: RequestBuilder, credential: &OutboundCredential) -> RequestBuilder {
        match credential {
            OutboundCredential::Bearer(token) => request.bearer_auth(token),
            OutboundCredential::Cookie(cookie) => request.header(COOKIE, cookie.as_str()),
        }
    }

    /// Picks the session cookie out of a backing-API response.
    ///
    /// Returns `None` in bearer mode, for responses outside the auth namespace,
    /// and when no `Set-Cookie` header names the configured session cookie.
    /// Every other cookie is ignored.
    #[must_use]
    pub fn capture(&self, url: &Url, headers: &HeaderMap) -> Option<OutboundCredential> {
        let CredentialMode::SessionCookie { name } = &self.mode else {
            return None;
        };
        if !url.path().starts_with(&self.auth_namespace) {
            return None;
        }

        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| cookie::Cookie::parse(raw).ok())
            .filter(|c| c.name() == name && !c.value().is_empty())
            .last()
            .map(|c| OutboundCredential::Cookie(format!("{}={}", c.name(), c.value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, HeaderValue};

    fn cookie_mode() -> Propagator {
        Propagator::new(CredentialMode::SessionCookie {
            name: "sessionid".into(),
        })
    }

    fn set_cookies(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(SET_COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_attach_bearer() {
        let propagator = Propagator::new(CredentialMode::Bearer);
        let request = propagator
            .attach(
                reqwest::Client::new().get("http://backend.test/bills/"),
                &OutboundCredential::Bearer("tok".into()),
            )
            .build()
            .unwrap();

        assert_eq!(request.headers()[AUTHORIZATION], "Bearer tok");
        assert!(request.headers().get(COOKIE).is_none());
    }

    #[test]
    fn test_attach_cookie() {
        let propagator = cookie_mode();
        let request = propagator
            .attach(
                reqwest::Client::new().get("http://backend.test/bills/"),
                &OutboundCredential::Cookie("sessionid=abc".into()),
            )
            .build()
            .unwrap();

        assert_eq!(request.headers()[COOKIE], "sessionid=abc");
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_capture_keeps_only_session_cookie() {
        let url: Url = "http://backend.test/auth/exchange".parse().unwrap();
        let headers = set_cookies(&[
            "csrftoken=zzz; Path=/",
            "sessionid=abc123; HttpOnly; Path=/; SameSite=Lax",
        ]);

        assert_eq!(
            cookie_mode().capture(&url, &headers),
            Some(OutboundCredential::Cookie("sessionid=abc123".into()))
        );
    }

    #[test]
    fn test_capture_ignores_paths_outside_namespace() {
        let url: Url = "http://backend.test/bills/1/vote/".parse().unwrap();
        let headers = set_cookies(&["sessionid=abc123; Path=/"]);

        assert_eq!(cookie_mode().capture(&url, &headers), None);
    }

    #[test]
    fn test_capture_disabled_in_bearer_mode() {
        let url: Url = "http://backend.test/auth/exchange".parse().unwrap();
        let headers = set_cookies(&["sessionid=abc123; Path=/"]);

        assert_eq!(Propagator::new(CredentialMode::Bearer).capture(&url, &headers), None);
    }

    #[test]
    fn test_capture_custom_namespace() {
        let propagator = cookie_mode().with_auth_namespace("/api/auth/");
        let headers = set_cookies(&["sessionid=abc123"]);

        let inside: Url = "http://backend.test/api/auth/github/".parse().unwrap();
        let outside: Url = "http://backend.test/auth/github/".parse().unwrap();
        assert!(propagator.capture(&inside, &headers).is_some());
        assert!(propagator.capture(&outside, &headers).is_none());
    }

    #[test]
    fn test_debug_masks_secrets() {
        let rendered = format!("{:?}", OutboundCredential::Bearer("supersecrettoken".into()));
        assert!(!rendered.contains("supersecrettoken"));
    }
}
