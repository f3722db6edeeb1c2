use thiserror::Error;

use cloud_transport::TransportError;
use particle_session::AuthError;
use particle_stream::RegistryError;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Subscription registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cloud API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, SdkError>;
