use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};

use super::cookies;
use super::error::AuthError;
use super::extractor::AuthSession;
use super::state::AuthState;
use crate::backend::{AuthBackend, ExchangeGrant};
use crate::csrf;

/// Create the authentication router, mounted under the configured auth path.
pub fn auth_routes<B, S>(state: AuthState<B>) -> Router<S>
where
    B: AuthBackend,
    S: Clone + Send + Sync + 'static,
{
    let auth_path = state.settings.auth_path.clone();

    Router::new()
        .route(&format!("{auth_path}/login"), get(login::<B>).post(login::<B>))
        .route(&format!("{auth_path}/callback"), get(callback::<B>))
        .route(&format!("{auth_path}/token"), post(token::<B>))
        .route(&format!("{auth_path}/session"), get(session::<B>))
        .route(
            &format!("{auth_path}/logout"),
            get(logout::<B>).post(logout::<B>),
        )
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

async fn login<B: AuthBackend>(
    State(state): State<AuthState<B>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let auth_req = state.provider.authorization_url();

    let state_cookie = cookies::state_cookie(
        auth_req.pending.state(),
        state.settings.secure_cookies,
        &state.settings.auth_path,
    );

    (jar.add(state_cookie), Redirect::to(&auth_req.url))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback<B: AuthBackend>(
    State(state): State<AuthState<B>>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> (PrivateCookieJar, Response) {
    let error_redirect = &state.settings.error_redirect;
    // Consumed whatever happens next.
    let (jar, mut pending) = cookies::take_state(jar, &state.settings.auth_path);

    if let Some(error) = &params.error {
        let desc = params.error_description.as_deref().unwrap_or("Unknown error");
        tracing::warn!(error = %error, description = %desc, "OAuth error from provider");
        return (jar, login_error(error_redirect, desc));
    }

    if let Err(e) = csrf::verify_state(params.state.as_deref(), &mut pending) {
        tracing::warn!(error = %e, "Rejecting OAuth callback");
        return (jar, login_error(error_redirect, "state_mismatch"));
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (jar, login_error(error_redirect, "missing_code"));
    };

    let session = match state.tokens.backend().exchange(ExchangeGrant::Code(code)).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Code exchange failed");
            return (jar, login_error(error_redirect, "token_exchange_failed"));
        }
    };

    let mut handle = state.tokens.load(None);
    handle.establish(session);
    let jar = cookies::apply_update(jar, &state.settings, handle.into_update());

    tracing::info!("OAuth login successful");

    (jar, Redirect::to(&state.settings.login_redirect).into_response())
}

// ── Token handshake ────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
}

/// Client-side variant of the callback: the browser already holds a provider
/// access token and hands it over for exchange.
async fn token<B: AuthBackend>(
    State(state): State<AuthState<B>>,
    mut auth: AuthSession<B>,
    Json(grant): Json<TokenGrant>,
) -> Response {
    if grant.access_token.is_empty() {
        return (StatusCode::BAD_REQUEST, "access_token is required").into_response();
    }

    let exchanged = state
        .tokens
        .backend()
        .exchange(ExchangeGrant::ProviderToken(grant.access_token))
        .await;
    match exchanged {
        Ok(session) => {
            auth.establish(session);
            let view = SessionView::of(&auth);
            (auth, Json(view)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Provider token exchange failed");
            (auth, AuthError::Unauthenticated).into_response()
        }
    }
}

// ── Session ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SessionView {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl SessionView {
    fn of<B: AuthBackend>(auth: &AuthSession<B>) -> Self {
        match auth.session() {
            Some(session) => Self {
                authenticated: true,
                access_token: Some(session.access_token.clone()),
                expires_at: Some(session.expires_at),
            },
            None => Self {
                authenticated: false,
                access_token: None,
                expires_at: None,
            },
        }
    }
}

/// Current session as seen by the browser, refreshed first if expired.
async fn session<B: AuthBackend>(mut auth: AuthSession<B>) -> (AuthSession<B>, Json<SessionView>) {
    let view = match auth.get_access_token().await {
        Ok(_) => SessionView::of(&auth),
        Err(e) => {
            tracing::debug!(error = %e, "No usable session");
            SessionView {
                authenticated: false,
                access_token: None,
                expires_at: None,
            }
        }
    };
    (auth, Json(view))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout<B: AuthBackend>(
    State(state): State<AuthState<B>>,
    mut auth: AuthSession<B>,
) -> (AuthSession<B>, Redirect) {
    auth.logout().await;
    (auth, Redirect::to(&state.settings.logout_redirect))
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(error_redirect: &str, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{error_redirect}?error={encoded}")).into_response()
}
