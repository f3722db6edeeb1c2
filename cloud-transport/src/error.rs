//! Error types for the cloud transport

use thiserror::Error;

/// Errors that can occur while talking to the cloud API
///
/// The variants carry rendered messages rather than the underlying
/// `reqwest` errors so that results can be cloned and shared between
/// concurrent waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection, DNS or TLS failure
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The server answered a stream request with a non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The base URL or request path could not be turned into a URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The event stream failed after it was opened
    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
