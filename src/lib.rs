#![doc = include_str!("../README.md")]

pub mod backend;
pub mod csrf;
pub mod error;
pub mod jwt;
pub mod lifecycle;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod oauth;
pub mod propagate;
pub mod session;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use backend::{
    AuthBackend, BackendClient, BackendConfig, ExchangeGrant, RefreshOutcome, RefreshedTokens,
};
pub use csrf::{PendingLogin, consume_and_validate, generate_state, verify_state};
pub use error::Error;
pub use lifecycle::{
    Clock, EndReason, ManualClock, RefreshRotation, SessionEnded, SessionHandle, SessionState,
    SessionUpdate, SystemClock, TokenManager,
};
pub use oauth::{AuthorizationRequest, OAuthConfig, ProviderClient};
pub use propagate::{CredentialMode, OutboundCredential, Propagator};
pub use session::Session;
