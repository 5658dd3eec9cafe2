use std::convert::Infallible;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::PrivateCookieJar;
use reqwest::header::HeaderMap;
use url::Url;

use super::config::AuthSettings;
use super::cookies;
use super::state::AuthState;
use crate::backend::AuthBackend;
use crate::lifecycle::{SessionEnded, SessionHandle, SessionState};
use crate::propagate::{OutboundCredential, Propagator};
use crate::session::Session;

/// The browser's session, rehydrated from the private session cookie.
///
/// Never rejects: a request without a session yields an unauthenticated
/// handle. Return it as part of the response so a refreshed or cleared
/// session is written back.
///
/// # Example
///
/// ```rust,ignore
/// async fn bills(mut auth: AuthSession<BackendClient>) -> impl IntoResponse {
///     match auth.credential().await {
///         Ok(credential) => {
///             // call the backing API with `credential`, then:
///             // auth.record_response(response.url(), response.headers());
///             (auth, StatusCode::OK).into_response()
///         }
///         Err(e) => (auth, AuthError::from(e)).into_response(),
///     }
/// }
/// ```
pub struct AuthSession<B> {
    handle: SessionHandle<B>,
    jar: PrivateCookieJar,
    propagator: Propagator,
    settings: AuthSettings,
}

impl<B: AuthBackend> AuthSession<B> {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.handle.session()
    }

    /// See [`SessionHandle::get_access_token`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionEnded`] when the user must be treated as logged out.
    pub async fn get_access_token(&mut self) -> Result<String, SessionEnded> {
        self.handle.get_access_token().await
    }

    /// The credential for one outbound backing-API call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionEnded`] when no credential is available.
    pub async fn credential(&mut self) -> Result<OutboundCredential, SessionEnded> {
        self.handle.credential(&self.propagator).await
    }

    /// Remember a session cookie set by a backing-API response.
    pub fn record_response(&mut self, url: &Url, headers: &HeaderMap) {
        self.handle.record_response(&self.propagator, url, headers);
    }

    pub async fn logout(&mut self) {
        self.handle.logout().await;
    }

    pub(super) fn establish(&mut self, session: Session) {
        self.handle.establish(session);
    }
}

impl<S, B> FromRequestParts<S> for AuthSession<B>
where
    S: Send + Sync,
    B: AuthBackend,
    AuthState<B>: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::<B>::from_ref(state);
        let jar: PrivateCookieJar =
            PrivateCookieJar::from_headers(&parts.headers, auth.settings.cookie_key.clone());
        let session = cookies::read_session(&jar, &auth.settings.session_cookie_name);

        Ok(Self {
            handle: auth.tokens.load(session),
            jar,
            propagator: auth.propagator,
            settings: auth.settings,
        })
    }
}

impl<B: AuthBackend> IntoResponseParts for AuthSession<B> {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let update = self.handle.into_update();
        cookies::apply_update(self.jar, &self.settings, update).into_response_parts(res)
    }
}
