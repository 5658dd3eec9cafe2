//! Access-token lifecycle for one browser session.
//!
//! [`TokenManager`] is the app-wide part (backend, clock, rotation policy,
//! in-flight refreshes). Each request rehydrates its own [`SessionHandle`] from
//! the persisted [`Session`], asks it for credentials, and finally reads back a
//! [`SessionUpdate`] telling it whether the persisted form must change.
//!
//! ```text
//! Unauthenticated --establish--> Valid --(now >= exp)--> Expired
//! Expired --refresh ok--> Valid
//! Expired --refresh rejected / no refresh token--> Invalidated
//! Expired --backend unavailable--> Expired (this call fails only)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::header::HeaderMap;
use url::Url;

use crate::backend::{AuthBackend, RefreshOutcome, RefreshedTokens};
use crate::error::Error;
use crate::propagate::{CredentialMode, OutboundCredential, Propagator};
use crate::session::{Session, mask_token};

/// Source of the current unix time.
pub trait Clock: Send + Sync + 'static {
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now_unix: i64) -> Self {
        Self {
            now: AtomicI64::new(now_unix),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now_unix: i64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now_unix(&self) -> i64 {
        (**self).now_unix()
    }
}

/// Whether the backing API rotates refresh tokens on use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshRotation {
    /// Keep the original refresh token; ignore any returned one.
    #[default]
    Disabled,
    /// Store the returned refresh token together with the new access token.
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Valid,
    Expired,
    Refreshing,
    Invalidated,
}

/// Why no credential could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// No session was ever established (or it was logged out).
    NoSession,
    /// The refresh token is gone or was rejected; the session is destroyed.
    Revoked,
    /// Refreshing failed transiently; the session is kept for the next request.
    Unavailable,
}

/// "Treat as logged out" signal from [`SessionHandle::get_access_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session ended ({reason:?})")]
pub struct SessionEnded {
    pub reason: EndReason,
}

impl SessionEnded {
    fn new(reason: EndReason) -> Self {
        Self { reason }
    }

    /// Whether the session is gone for good (as opposed to this request only).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self.reason, EndReason::Unavailable)
    }
}

/// What the caller must do with the persisted session after the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Unchanged,
    Store(Session),
    Clear,
}

/// App-wide token lifecycle settings and shared refresh state.
pub struct TokenManager<B> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    rotation: RefreshRotation,
    leeway_secs: i64,
    inflight: Arc<RefreshCoalescer>,
}

// Manual Clone: avoid derive adding a `B: Clone` bound.
impl<B> Clone for TokenManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            clock: self.clock.clone(),
            rotation: self.rotation,
            leeway_secs: self.leeway_secs,
            inflight: self.inflight.clone(),
        }
    }
}

impl<B: AuthBackend> TokenManager<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            clock: Arc::new(SystemClock),
            rotation: RefreshRotation::default(),
            leeway_secs: 0,
            inflight: Arc::new(RefreshCoalescer::default()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: RefreshRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Treat tokens as expired this many seconds before their `exp`.
    #[must_use]
    pub fn with_leeway_secs(mut self, secs: i64) -> Self {
        self.leeway_secs = secs.max(0);
        self
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn rotation(&self) -> RefreshRotation {
        self.rotation
    }

    /// Rehydrates one request's view of a persisted session.
    #[must_use]
    pub fn load(&self, session: Option<Session>) -> SessionHandle<B> {
        SessionHandle {
            manager: self.clone(),
            session,
            invalidated: false,
            refreshing: false,
            dirty: false,
        }
    }
}

/// One request's session, owned exclusively by that request.
pub struct SessionHandle<B> {
    manager: TokenManager<B>,
    session: Option<Session>,
    invalidated: bool,
    refreshing: bool,
    dirty: bool,
}

impl<B: AuthBackend> SessionHandle<B> {
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.invalidated {
            return SessionState::Invalidated;
        }
        if self.refreshing {
            return SessionState::Refreshing;
        }
        match &self.session {
            None => SessionState::Unauthenticated,
            Some(s) if s.is_usable(self.manager.clock.now_unix(), self.manager.leeway_secs) => {
                SessionState::Valid
            }
            Some(_) => SessionState::Expired,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Stores the session produced by a successful code exchange.
    pub fn establish(&mut self, session: Session) {
        tracing::debug!(expires_at = session.expires_at, "Session established");
        self.session = Some(session);
        self.invalidated = false;
        self.dirty = true;
    }

    /// Returns a usable access token, refreshing it first if it has expired.
    ///
    /// At most one refresh is attempted per call. The returned token must not
    /// be kept beyond the outbound call it was requested for.
    ///
    /// # Errors
    ///
    /// Returns [`SessionEnded`] when the caller must treat the user as logged
    /// out for this request; [`SessionEnded::is_terminal`] tells whether the
    /// session was destroyed.
    pub async fn get_access_token(&mut self) -> Result<String, SessionEnded> {
        if self.invalidated {
            return Err(SessionEnded::new(EndReason::Revoked));
        }
        let Some(session) = &self.session else {
            return Err(SessionEnded::new(EndReason::NoSession));
        };

        let now = self.manager.clock.now_unix();
        if session.is_usable(now, self.manager.leeway_secs) {
            return Ok(session.access_token.clone());
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            tracing::info!("Access token expired and no refresh token is present");
            self.invalidate();
            return Err(SessionEnded::new(EndReason::Revoked));
        };

        tracing::debug!(
            expires_at = session.expires_at,
            now,
            refresh_token = %mask_token(&refresh_token),
            "Access token expired, refreshing"
        );
        self.refreshing = true;
        let outcome = self
            .manager
            .inflight
            .run(&self.manager.backend, &refresh_token)
            .await;
        self.refreshing = false;

        match outcome.into_result() {
            Ok(tokens) => Ok(self.apply_refresh(tokens)),
            Err(e @ Error::RefreshInvalid(_)) => {
                tracing::warn!(error = %e, "Ending session");
                self.invalidate();
                Err(SessionEnded::new(EndReason::Revoked))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Keeping expired session for retry");
                Err(SessionEnded::new(EndReason::Unavailable))
            }
        }
    }

    /// The credential to attach to one outbound call, per the deployment's mode.
    ///
    /// # Errors
    ///
    /// Returns [`SessionEnded`] under the same conditions as
    /// [`get_access_token`](Self::get_access_token); in cookie mode also when no
    /// backend cookie has been captured yet.
    pub async fn credential(
        &mut self,
        propagator: &Propagator,
    ) -> Result<OutboundCredential, SessionEnded> {
        match propagator.mode() {
            CredentialMode::Bearer => self.get_access_token().await.map(OutboundCredential::Bearer),
            CredentialMode::SessionCookie { .. } => {
                if self.invalidated {
                    return Err(SessionEnded::new(EndReason::Revoked));
                }
                self.session
                    .as_ref()
                    .and_then(|s| s.backend_cookie.clone())
                    .map(OutboundCredential::Cookie)
                    .ok_or(SessionEnded::new(EndReason::NoSession))
            }
        }
    }

    /// Keeps a session cookie set by the backing API for this session's next call.
    pub fn record_response(&mut self, propagator: &Propagator, url: &Url, headers: &HeaderMap) {
        let Some(OutboundCredential::Cookie(cookie)) = propagator.capture(url, headers) else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            if session.backend_cookie.as_deref() != Some(cookie.as_str()) {
                session.backend_cookie = Some(cookie);
                self.dirty = true;
            }
        }
    }

    /// Blacklists the refresh token remotely, then clears the session locally.
    ///
    /// The local part always happens, even when the backing API call fails.
    pub async fn logout(&mut self) {
        let refresh_token = self.session.as_ref().and_then(|s| s.refresh_token.clone());
        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.manager.backend.logout(&refresh_token).await {
                tracing::warn!(error = %e, "Remote logout failed; clearing local session anyway");
            }
        }
        self.session = None;
        self.invalidated = false;
        self.dirty = true;
        tracing::info!("Session logged out");
    }

    /// Consumes the handle, reporting how the persisted session must change.
    #[must_use]
    pub fn into_update(self) -> SessionUpdate {
        if !self.dirty {
            return SessionUpdate::Unchanged;
        }
        match self.session {
            Some(session) => SessionUpdate::Store(session),
            None => SessionUpdate::Clear,
        }
    }

    fn invalidate(&mut self) {
        self.session = None;
        self.invalidated = true;
        self.dirty = true;
    }

    fn apply_refresh(&mut self, tokens: RefreshedTokens) -> String {
        let Some(current) = self.session.as_mut() else {
            return tokens.access_token;
        };
        let rotated = match self.manager.rotation {
            RefreshRotation::Enabled => tokens.refresh_token,
            RefreshRotation::Disabled => None,
        };
        // Single assignment so the access and refresh tokens change together.
        *current = Session {
            access_token: tokens.access_token,
            refresh_token: rotated.or_else(|| current.refresh_token.take()),
            expires_at: tokens.expires_at,
            backend_cookie: current.backend_cookie.take(),
        };
        self.dirty = true;
        tracing::debug!(expires_at = current.expires_at, "Access token refreshed");
        current.access_token.clone()
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Best-effort single-flight for refreshes of the same refresh token.
///
/// Each refresh runs on its own task, so it completes even if every caller
/// waiting on it is dropped. The map lock is never held across an await.
#[derive(Default)]
pub struct RefreshCoalescer {
    inflight: Arc<Mutex<HashMap<String, (u64, SharedRefresh)>>>,
    next_id: AtomicU64,
}

impl RefreshCoalescer {
    pub async fn run<B: AuthBackend>(&self, backend: &Arc<B>, refresh_token: &str) -> RefreshOutcome {
        let refresh = {
            let mut inflight = lock_inflight(&self.inflight);
            match inflight.get(refresh_token) {
                Some((_, shared)) => {
                    tracing::debug!("Joining in-flight token refresh");
                    shared.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = self.spawn(id, backend.clone(), refresh_token.to_owned());
                    inflight.insert(refresh_token.to_owned(), (id, shared.clone()));
                    shared
                }
            }
        };
        refresh.await
    }

    /// Number of refreshes currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock_inflight(&self.inflight).len()
    }

    fn spawn<B: AuthBackend>(&self, id: u64, backend: Arc<B>, refresh_token: String) -> SharedRefresh {
        let inflight = self.inflight.clone();
        let handle = tokio::spawn(async move {
            // Dropped on every exit, panics included.
            let _entry = InflightEntry {
                inflight,
                refresh_token: refresh_token.clone(),
                id,
            };
            backend.refresh(&refresh_token).await
        });
        async move {
            handle
                .await
                .unwrap_or_else(|e| RefreshOutcome::Transient(format!("refresh task failed: {e}")))
        }
        .boxed()
        .shared()
    }
}

/// Removes its own map entry when the refresh task ends.
struct InflightEntry {
    inflight: Arc<Mutex<HashMap<String, (u64, SharedRefresh)>>>,
    refresh_token: String,
    id: u64,
}

impl Drop for InflightEntry {
    fn drop(&mut self) {
        let mut map = lock_inflight(&self.inflight);
        if map
            .get(&self.refresh_token)
            .is_some_and(|(current, _)| *current == self.id)
        {
            map.remove(&self.refresh_token);
        }
    }
}

fn lock_inflight(
    inflight: &Mutex<HashMap<String, (u64, SharedRefresh)>>,
) -> MutexGuard<'_, HashMap<String, (u64, SharedRefresh)>> {
    inflight.lock().unwrap_or_else(|poisoned| {
        tracing::error!("Refresh map mutex poisoned; recovering");
        poisoned.into_inner()
    })
}
