//! Plug-and-play Democrasite authentication for Axum.
//!
//! Mounts the browser-facing login, callback, session and logout routes, and
//! provides the [`AuthSession`] extractor that hands application handlers a
//! fresh credential for each backing-API call.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use democrasite_auth::middleware::{AuthConfig, AuthState, auth_routes};
//!
//! // 1. Configure from environment
//! let state = AuthState::new(AuthConfig::from_env()?);
//!
//! // 2. Mount auth routes
//! let app = axum::Router::new().merge(auth_routes(state.clone()));
//!
//! // 3. Take `AuthSession<BackendClient>` in handlers and return it with the response
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;

pub use config::AuthConfig;
pub use error::AuthError;
pub use extractor::AuthSession;
pub use routes::auth_routes;
pub use state::AuthState;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
