use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::lifecycle::{EndReason, SessionEnded};

/// Authentication errors for the middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session found.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session existed but its refresh token is gone or was rejected.
    #[error("Session expired")]
    SessionExpired,

    /// Session kept, but the backing API could not refresh it right now.
    #[error("Authentication service unavailable")]
    BackendUnavailable,

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated | Self::SessionExpired => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            Self::BackendUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
            }
            Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<SessionEnded> for AuthError {
    fn from(e: SessionEnded) -> Self {
        match e.reason {
            EndReason::NoSession => Self::Unauthenticated,
            EndReason::Revoked => Self::SessionExpired,
            EndReason::Unavailable => Self::BackendUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_for(reason: EndReason) -> StatusCode {
        AuthError::from(SessionEnded { reason }).into_response().status()
    }

    #[test]
    fn test_session_end_statuses() {
        assert_eq!(status_for(EndReason::NoSession), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(EndReason::Revoked), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(EndReason::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
    }
}
