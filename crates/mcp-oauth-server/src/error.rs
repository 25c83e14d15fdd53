//! Error types for the OAuth authority and the session transport layer.
//!
//! Uses `thiserror` for structured error handling. Every variant here is
//! recoverable at the HTTP boundary and maps to a structured error response;
//! only listener bind failures abort startup (as `anyhow` in `main`).

/// Errors from the OAuth grant protocol.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// Unknown client id, or a redirect URI not registered for the client.
    #[error("invalid client: {reason}")]
    InvalidClient {
        /// What made the client invalid.
        reason: String,
    },

    /// Unknown, expired, or already-consumed authorization code.
    #[error("invalid, expired, or already used authorization code")]
    InvalidGrant,

    /// The authorization code was issued to a different client.
    #[error("authorization code was not issued to this client")]
    ClientMismatch,

    /// Unknown or expired access token.
    #[error("invalid or expired access token")]
    InvalidToken,

    /// Refresh-token exchange is deliberately unsupported by this authority.
    #[error("refresh tokens are not supported")]
    NotImplemented,
}

impl AuthError {
    /// Create an invalid-client error.
    #[must_use]
    pub fn invalid_client(reason: impl Into<String>) -> Self {
        Self::InvalidClient { reason: reason.into() }
    }

    /// The OAuth 2.0 error code string for the token/introspection endpoints
    /// (RFC 6749 §5.2).
    #[must_use]
    pub const fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant | Self::ClientMismatch => "invalid_grant",
            Self::InvalidToken => "invalid_token",
            Self::NotImplemented => "unsupported_grant_type",
        }
    }

    /// HTTP status for the error at the token endpoint boundary.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidClient { .. } => 401,
            Self::InvalidToken => 401,
            Self::InvalidGrant | Self::ClientMismatch | Self::NotImplemented => 400,
        }
    }
}

/// A per-entry failure reported by the session registry's bulk shutdown.
///
/// Best-effort: the entry is removed from the registry regardless, the sweep
/// continues, and the failure is logged and returned to the caller.
#[derive(thiserror::Error, Debug)]
#[error("failed to close transport for session {session_id}: {reason}")]
pub struct CloseFailure {
    /// The session whose transport failed to close.
    pub session_id: String,
    /// Close error or timeout description.
    pub reason: String,
}

/// Result type alias for grant-protocol operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(AuthError::InvalidGrant.oauth_error_code(), "invalid_grant");
        assert_eq!(AuthError::ClientMismatch.oauth_error_code(), "invalid_grant");
        assert_eq!(AuthError::NotImplemented.oauth_error_code(), "unsupported_grant_type");
        assert_eq!(AuthError::invalid_client("unknown").oauth_error_code(), "invalid_client");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidToken.status_code(), 401);
        assert_eq!(AuthError::InvalidGrant.status_code(), 400);
        assert_eq!(AuthError::NotImplemented.status_code(), 400);
    }
}
