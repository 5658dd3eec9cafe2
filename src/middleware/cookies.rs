use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use super::config::AuthSettings;
use crate::csrf::PendingLogin;
use crate::lifecycle::SessionUpdate;
use crate::session::Session;

const STATE_COOKIE_NAME: &str = "github-oauth-state";

/// Create the CSRF state cookie for the authorization request.
///
/// No `Max-Age`: it lives for the browser session or until the callback.
pub(super) fn state_cookie(state: &str, secure: bool, auth_path: &str) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, state.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(auth_path.to_string())
        .build()
}

fn clear_state_cookie(auth_path: &str) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, ""))
        .path(auth_path.to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Read the pending login and schedule its cookie for removal in one step.
pub(super) fn take_state(
    jar: PrivateCookieJar,
    auth_path: &str,
) -> (PrivateCookieJar, Option<PendingLogin>) {
    let pending = jar
        .get(STATE_COOKIE_NAME)
        .map(|c| PendingLogin::from_stored(c.value()));
    (jar.remove(clear_state_cookie(auth_path)), pending)
}

/// Create the session cookie holding the serialized token pair.
pub(super) fn session_cookie(
    name: &str,
    value: String,
    ttl_days: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::days(ttl_days))
        .build()
}

/// Create removal cookie for session.
pub(super) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Rehydrate the session; an unreadable cookie counts as no session.
pub(super) fn read_session(jar: &PrivateCookieJar, name: &str) -> Option<Session> {
    let cookie = jar.get(name)?;
    match serde_json::from_str(cookie.value()) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::debug!(error = %e, "Discarding unreadable session cookie");
            None
        }
    }
}

/// Apply the lifecycle's verdict to the outgoing cookies.
pub(super) fn apply_update(
    jar: PrivateCookieJar,
    settings: &AuthSettings,
    update: SessionUpdate,
) -> PrivateCookieJar {
    match update {
        SessionUpdate::Unchanged => jar,
        SessionUpdate::Store(session) => match serde_json::to_string(&session) {
            Ok(value) => jar.add(session_cookie(
                &settings.session_cookie_name,
                value,
                settings.session_ttl_days,
                settings.secure_cookies,
            )),
            Err(e) => {
                tracing::error!(error = %e, "Session serialization failed; clearing session");
                jar.remove(clear_session_cookie(&settings.session_cookie_name))
            }
        },
        SessionUpdate::Clear => jar.remove(clear_session_cookie(&settings.session_cookie_name)),
    }
}
