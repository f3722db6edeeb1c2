//! Top-level configuration for [`ParticleCloud`](crate::ParticleCloud)

use std::time::Duration;

use cloud_transport::DEFAULT_REQUEST_TIMEOUT;
use particle_session::SessionConfig;
use particle_stream::StreamConfig;

use crate::error::SdkError;

/// Production API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.particle.io";

#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Base URL every API path is resolved against
    /// Default: https://api.particle.io
    pub api_base_url: String,

    /// Timeout for request/response calls; event streams have none
    /// Default: 30 seconds
    pub request_timeout: Duration,

    pub session: SessionConfig,

    pub stream: StreamConfig,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session: SessionConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl CloudConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), SdkError> {
        let url = url::Url::parse(&self.api_base_url).map_err(|e| {
            SdkError::Configuration(format!("Invalid API base URL {:?}: {e}", self.api_base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SdkError::Configuration(format!(
                "API base URL must be http or https, got {:?}",
                url.scheme()
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(SdkError::Configuration(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        self.session.validate()?;
        self.stream.validate()?;
        Ok(())
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CloudConfig::default();
        assert_eq!(config.api_base_url, "https://api.particle.io");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(CloudConfig::new().with_api_base_url("not a url").validate().is_err());
        assert!(CloudConfig::new().with_api_base_url("ftp://example.com").validate().is_err());
        assert!(CloudConfig::new().with_request_timeout(Duration::ZERO).validate().is_err());
        assert!(CloudConfig::new()
            .with_session(SessionConfig::default().with_max_refresh_failures(0))
            .validate()
            .is_err());
        assert!(CloudConfig::new()
            .with_stream(StreamConfig::default().with_max_attempts(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CloudConfig::new()
            .with_api_base_url("http://localhost:8080")
            .with_request_timeout(Duration::from_secs(5))
            .with_stream(StreamConfig::no_reconnect());

        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(!config.stream.reconnect.enabled);
        assert!(config.validate().is_ok());
    }
}
