//! Error types for the particle-stream crate.

use cloud_transport::TransportError;

/// Errors surfaced on an event stream
///
/// These reach listeners inside [`StreamNotification::Error`](crate::StreamNotification)
/// and never fail the registry as a whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// A frame could not be turned into an event; the stream keeps going
    #[error("Malformed event frame: {0}")]
    Parse(String),

    /// The server ended the stream
    #[error("Event stream terminated by the server")]
    Terminated,

    /// The session could not authorize the stream; never retried
    #[error("Stream authentication failed: {0}")]
    Authentication(String),

    /// The source could not open the stream right now; retried
    #[error("Event stream unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from registry construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Router tasks need a tokio runtime to run on
    #[error("Subscription registry must be created inside a tokio runtime")]
    NoRuntime,
}

/// Error returned by a listener that failed to handle a notification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
