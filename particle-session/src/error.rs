//! Error types for session management

use cloud_transport::TransportError;

/// A credential that violates the credential invariants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The access token is empty
    #[error("Access token must not be empty")]
    EmptyAccessToken,

    /// A refresh token was supplied without an expiry date
    #[error("A refresh token requires an expiry date")]
    RefreshTokenWithoutExpiry,
}

/// Errors returned by session operations
///
/// Cloneable so that every waiter on a shared token refresh observes the
/// same failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Username/password exchange was refused
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Signup data was rejected locally or by the server
    #[error("Invalid account info: {0}")]
    InvalidAccountInfo(String),

    /// The server refused a non-token request such as signup or password reset
    #[error("Request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The refresh-token exchange was refused
    #[error("Token refresh rejected with HTTP {status}: {message}")]
    RefreshRejected { status: u16, message: String },

    /// Too many consecutive refresh failures; a new login or injection is required
    #[error("Token refresh failed {failures} consecutive times")]
    RefreshExhausted { failures: u32 },

    /// No credential is held
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The credential expired and cannot be refreshed
    #[error("Access token expired")]
    TokenExpired,

    /// The server answered 401 for an authenticated request
    #[error("Access token rejected: {0}")]
    TokenRejected(String),

    /// The session was logged out or replaced while the operation was pending
    #[error("Session was invalidated while the operation was in flight")]
    SessionInvalidated,

    /// A token response could not be understood
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    /// Invalid session configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure talking to the cloud
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A background refresh task failed unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for session results.
pub type Result<T> = std::result::Result<T, AuthError>;
