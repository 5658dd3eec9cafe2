use std::future::Future;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::jwt;
use crate::propagate::{OutboundCredential, Propagator};
use crate::session::Session;

/// Default bound on every call to the backing API.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backing API location and auth endpoint paths.
///
/// Paths are resolved relative to `base_url`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BackendConfig {
    pub(crate) base_url: Url,
    pub(crate) exchange_path: String,
    pub(crate) refresh_path: String,
    pub(crate) logout_path: String,
    pub(crate) timeout: Duration,
}

impl BackendConfig {
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            exchange_path: "auth/exchange".into(),
            refresh_path: "auth/refresh".into(),
            logout_path: "auth/logout".into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_exchange_path(mut self, path: impl Into<String>) -> Self {
        self.exchange_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// Bound for exchange, refresh and logout calls (default 10s).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL path prefix shared by the auth endpoints, e.g. `/api/auth/`.
    #[must_use]
    pub fn auth_namespace(&self) -> String {
        format!("{}auth/", self.base_url.path())
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("invalid backend path {path:?}: {e}")))
    }
}

/// Grant handed to the backing API's exchange endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExchangeGrant {
    /// Authorization code from the provider callback.
    #[serde(rename = "code")]
    Code(String),
    /// Provider access token, when the browser finished the handshake itself.
    #[serde(rename = "access_token")]
    ProviderToken(String),
}

/// Tokens returned by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub expires_at: i64,
    /// Present only when the backing API rotated the refresh token.
    pub refresh_token: Option<String>,
}

/// Result of trading a refresh token for a new access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(RefreshedTokens),
    /// The refresh token itself was rejected (revoked, expired, blacklisted).
    Invalid(String),
    /// The backing API could not be reached or answered with a server error.
    Transient(String),
}

impl RefreshOutcome {
    /// Converts to a `Result`, keeping the permanent/transient distinction in the error.
    ///
    /// # Errors
    ///
    /// [`Error::RefreshInvalid`] for a rejected token, [`Error::RefreshTransient`] otherwise.
    pub fn into_result(self) -> Result<RefreshedTokens, Error> {
        match self {
            Self::Refreshed(tokens) => Ok(tokens),
            Self::Invalid(reason) => Err(Error::RefreshInvalid(reason)),
            Self::Transient(reason) => Err(Error::RefreshTransient(reason)),
        }
    }
}

/// The backing API's authentication endpoints.
///
/// Implemented by [`BackendClient`]; tests substitute in-memory fakes.
pub trait AuthBackend: Send + Sync + 'static {
    /// Exchange a provider grant for the initial session.
    fn exchange(&self, grant: ExchangeGrant) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Trade a refresh token for a new access token.
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = RefreshOutcome> + Send;

    /// Blacklist a refresh token.
    fn logout(&self, refresh_token: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// How this backend expects credentials to be forwarded.
    ///
    /// Session handles must use the same propagator as the backend, or cookies
    /// captured during exchange would never be forwarded.
    fn credential_propagator(&self) -> Propagator {
        Propagator::new(crate::propagate::CredentialMode::Bearer)
    }
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct TokenPair {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// HTTP client for the backing API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    config: BackendConfig,
    propagator: Propagator,
    http: reqwest::Client,
}

impl BackendClient {
    /// Create a client forwarding bearer tokens.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        let propagator = Propagator::new(crate::propagate::CredentialMode::Bearer)
            .with_auth_namespace(config.auth_namespace());
        Self {
            config,
            propagator,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Use the deployment's credential propagation settings.
    #[must_use]
    pub fn with_propagator(mut self, propagator: Propagator) -> Self {
        self.propagator = propagator;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    #[must_use]
    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Start a request to a business endpoint with the credential attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `path` cannot be joined to the base URL.
    pub fn authorized(
        &self,
        method: Method,
        path: &str,
        credential: &OutboundCredential,
    ) -> Result<RequestBuilder, Error> {
        let url = self.config.endpoint(path)?;
        let request = self.http.request(method, url).timeout(self.config.timeout);
        Ok(self.propagator.attach(request, credential))
    }

    fn post_json<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> RequestBuilder {
        self.http
            .post(url)
            .timeout(self.config.timeout)
            .json(body)
    }

    /// Checks HTTP response status; returns the response on success or a description of the failure.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, String> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(240).collect();
        Err(format!("{operation} returned status={status} body={detail}"))
    }
}

impl AuthBackend for BackendClient {
    fn credential_propagator(&self) -> Propagator {
        self.propagator.clone()
    }

    async fn exchange(&self, grant: ExchangeGrant) -> Result<Session, Error> {
        let url = self.config.endpoint(&self.config.exchange_path)?;
        let response = self
            .post_json(url, &grant)
            .send()
            .await
            .map_err(|e| Error::Exchange(e.to_string()))?;

        let response = Self::ensure_success(response, "code exchange")
            .await
            .map_err(Error::Exchange)?;
        let captured = self.propagator.capture(response.url(), response.headers());

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| Error::Exchange(format!("invalid exchange response: {e}")))?;
        let mut session = Session::from_tokens(pair.access, pair.refresh)
            .map_err(|e| Error::Exchange(e.to_string()))?;
        if let Some(OutboundCredential::Cookie(cookie)) = captured {
            session.backend_cookie = Some(cookie);
        }
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> RefreshOutcome {
        let url = match self.config.endpoint(&self.config.refresh_path) {
            Ok(url) => url,
            Err(e) => return RefreshOutcome::Transient(e.to_string()),
        };
        let response = match self
            .post_json(url, &RefreshBody {
                refresh: refresh_token,
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RefreshOutcome::Transient(e.to_string()),
        };

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return RefreshOutcome::Invalid(format!("refresh rejected with status={status}"));
        }
        let response = match Self::ensure_success(response, "token refresh").await {
            Ok(response) => response,
            Err(detail) => return RefreshOutcome::Transient(detail),
        };

        let pair: TokenPair = match response.json().await {
            Ok(pair) => pair,
            Err(e) => return RefreshOutcome::Transient(format!("invalid refresh response: {e}")),
        };
        match jwt::decode_expiry(&pair.access) {
            Ok(expires_at) => RefreshOutcome::Refreshed(RefreshedTokens {
                access_token: pair.access,
                expires_at,
                refresh_token: pair.refresh.filter(|t| !t.is_empty()),
            }),
            Err(e) => RefreshOutcome::Transient(e.to_string()),
        }
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), Error> {
        let url = self.config.endpoint(&self.config.logout_path)?;
        let response = self
            .post_json(url, &RefreshBody {
                refresh: refresh_token,
            })
            .send()
            .await
            .map_err(|e| Error::LogoutRemote(e.to_string()))?;

        Self::ensure_success(response, "logout")
            .await
            .map(|_| ())
            .map_err(Error::LogoutRemote)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use serde_json::{Value, json};

    use super::*;
    use crate::propagate::CredentialMode;
    use crate::test_support::serve;

    fn client_for(base: Url) -> BackendClient {
        BackendClient::new(BackendConfig::new(base).with_timeout(Duration::from_secs(2)))
    }

    #[test]
    fn test_config_normalizes_base_path() {
        let config = BackendConfig::new("http://backend.test/api".parse().unwrap());
        assert_eq!(config.base_url().as_str(), "http://backend.test/api/");
        assert_eq!(config.auth_namespace(), "/api/auth/");
        assert_eq!(
            config.endpoint("/auth/refresh").unwrap().as_str(),
            "http://backend.test/api/auth/refresh"
        );
    }

    #[test]
    fn test_grant_bodies() {
        assert_eq!(
            serde_json::to_value(ExchangeGrant::Code("abc123".into())).unwrap(),
            json!({"code": "abc123"})
        );
        assert_eq!(
            serde_json::to_value(ExchangeGrant::ProviderToken("gho_x".into())).unwrap(),
            json!({"access_token": "gho_x"})
        );
    }

    #[tokio::test]
    async fn test_exchange_builds_session() {
        let access = jwt::encode_for_tests(&json!({"exp": 2_000_000_000}));
        let seen = Arc::new(Mutex::new(None::<Value>));
        let router = {
            let access = access.clone();
            let seen = seen.clone();
            axum::Router::new().route(
                "/auth/exchange",
                post(move |Json(body): Json<Value>| {
                    let access = access.clone();
                    *seen.lock().unwrap() = Some(body);
                    async move { Json(json!({"access": access, "refresh": "r1"})) }
                }),
            )
        };
        let client = client_for(serve(router).await);

        let session = client
            .exchange(ExchangeGrant::Code("abc123".into()))
            .await
            .unwrap();

        assert_eq!(session.access_token, access);
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(session.expires_at, 2_000_000_000);
        assert_eq!(session.backend_cookie, None);
        assert_eq!(*seen.lock().unwrap(), Some(json!({"code": "abc123"})));
    }

    #[tokio::test]
    async fn test_exchange_captures_session_cookie_in_cookie_mode() {
        let access = jwt::encode_for_tests(&json!({"exp": 2_000_000_000}));
        let router = axum::Router::new().route(
            "/auth/exchange",
            post(move || {
                let access = access.clone();
                async move {
                    let mut headers = AxumHeaders::new();
                    headers.append("set-cookie", "csrftoken=c; Path=/".parse().unwrap());
                    headers.append("set-cookie", "sessionid=s1; HttpOnly; Path=/".parse().unwrap());
                    (headers, Json(json!({"access": access, "refresh": "r1"})))
                }
            }),
        );
        let base = serve(router).await;
        let propagator = Propagator::new(CredentialMode::SessionCookie {
            name: "sessionid".into(),
        });
        let client = client_for(base).with_propagator(propagator);

        let session = client
            .exchange(ExchangeGrant::Code("abc123".into()))
            .await
            .unwrap();

        assert_eq!(session.backend_cookie.as_deref(), Some("sessionid=s1"));
    }

    #[tokio::test]
    async fn test_exchange_rejected_code() {
        let router = axum::Router::new().route(
            "/auth/exchange",
            post(|| async { (AxumStatus::BAD_REQUEST, "bad code").into_response() }),
        );
        let client = client_for(serve(router).await);

        let err = client
            .exchange(ExchangeGrant::Code("expired".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));
    }

    #[tokio::test]
    async fn test_exchange_network_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client_for(format!("http://{addr}/").parse().unwrap());

        let err = client
            .exchange(ExchangeGrant::Code("abc123".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));
    }

    #[tokio::test]
    async fn test_refresh_outcomes() {
        let access = jwt::encode_for_tests(&json!({"exp": 2_000_000_600}));
        let router = {
            let access = access.clone();
            axum::Router::new().route(
                "/auth/refresh",
                post(move |Json(body): Json<Value>| {
                    let access = access.clone();
                    async move {
                        match body["refresh"].as_str() {
                            Some("good") => Json(json!({"access": access})).into_response(),
                            Some("rotating") => {
                                Json(json!({"access": access, "refresh": "r2"})).into_response()
                            }
                            Some("down") => AxumStatus::SERVICE_UNAVAILABLE.into_response(),
                            Some("garbled") => Json(json!({"access": "opaque"})).into_response(),
                            _ => (
                                AxumStatus::UNAUTHORIZED,
                                Json(json!({"code": "token_not_valid"})),
                            )
                                .into_response(),
                        }
                    }
                }),
            )
        };
        let client = client_for(serve(router).await);

        assert_eq!(
            client.refresh("good").await,
            RefreshOutcome::Refreshed(RefreshedTokens {
                access_token: access.clone(),
                expires_at: 2_000_000_600,
                refresh_token: None,
            })
        );
        assert!(matches!(
            client.refresh("rotating").await,
            RefreshOutcome::Refreshed(RefreshedTokens { refresh_token: Some(ref r), .. }) if r == "r2"
        ));
        assert!(matches!(client.refresh("revoked").await, RefreshOutcome::Invalid(_)));
        assert!(matches!(client.refresh("down").await, RefreshOutcome::Transient(_)));
        assert!(matches!(client.refresh("garbled").await, RefreshOutcome::Transient(_)));
    }

    #[tokio::test]
    async fn test_refresh_timeout_is_transient() {
        let router = axum::Router::new().route(
            "/auth/refresh",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                AxumStatus::OK
            }),
        );
        let base = serve(router).await;
        let client = BackendClient::new(
            BackendConfig::new(base).with_timeout(Duration::from_millis(200)),
        );

        assert!(matches!(client.refresh("r1").await, RefreshOutcome::Transient(_)));
    }

    #[tokio::test]
    async fn test_logout_reports_remote_failure() {
        let router = axum::Router::new()
            .route("/ok/auth/logout", post(|| async { AxumStatus::OK }))
            .route(
                "/broken/auth/logout",
                post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
            );
        let base = serve(router).await;

        let ok = client_for(base.join("ok/").unwrap());
        assert!(ok.logout("r1").await.is_ok());

        let broken = client_for(base.join("broken/").unwrap());
        assert!(matches!(
            broken.logout("r1").await,
            Err(Error::LogoutRemote(_))
        ));
    }

    #[tokio::test]
    async fn test_authorized_request_carries_credential() {
        let router = axum::Router::new().route(
            "/bills/",
            get(|headers: AxumHeaders| async move {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let client = client_for(serve(router).await);

        let body = client
            .authorized(Method::GET, "bills/", &OutboundCredential::Bearer("tok".into()))
            .unwrap()
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "Bearer tok");
    }
}
