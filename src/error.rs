#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Callback `state` missing or not equal to the stored one.
    #[error("CSRF state mismatch")]
    CsrfMismatch,
    #[error("code exchange failed: {0}")]
    Exchange(String),
    #[error("token refresh unavailable: {0}")]
    RefreshTransient(String),
    #[error("refresh token rejected: {0}")]
    RefreshInvalid(String),
    #[error("remote logout failed: {0}")]
    LogoutRemote(String),
    #[error("Token decoding error: {0}")]
    Token(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
