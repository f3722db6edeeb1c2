//! Session configuration

use std::time::Duration;

use crate::error::AuthError;

/// Configuration for the [`SessionManager`](crate::SessionManager)
#[derive(Clone)]
pub struct SessionConfig {
    /// OAuth client id sent with token exchanges
    /// Default: "particle"
    pub oauth_client_id: String,

    /// OAuth client secret sent with token exchanges
    /// Default: "particle"
    pub oauth_client_secret: String,

    /// How long before expiry a refreshable token is renewed
    /// Default: 60 seconds
    pub refresh_skew: Duration,

    /// Consecutive refresh failures tolerated before the session is
    /// considered unusable until the next login or injection
    /// Default: 3
    pub max_refresh_failures: u32,

    /// Token lifetime requested at login; the server default when `None`
    /// Default: None
    pub token_lifetime: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            oauth_client_id: "particle".to_string(),
            oauth_client_secret: "particle".to_string(),
            refresh_skew: Duration::from_secs(60),
            max_refresh_failures: 3,
            token_lifetime: None,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &"<redacted>")
            .field("refresh_skew", &self.refresh_skew)
            .field("max_refresh_failures", &self.max_refresh_failures)
            .field("token_lifetime", &self.token_lifetime)
            .finish()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.oauth_client_id.is_empty() {
            return Err(AuthError::Configuration(
                "OAuth client id must not be empty".to_string(),
            ));
        }

        if self.max_refresh_failures == 0 {
            return Err(AuthError::Configuration(
                "Max refresh failures must be greater than 0".to_string(),
            ));
        }

        if self.token_lifetime == Some(Duration::ZERO) {
            return Err(AuthError::Configuration(
                "Token lifetime must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_oauth_client(mut self, id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.oauth_client_id = id.into();
        self.oauth_client_secret = secret.into();
        self
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn with_max_refresh_failures(mut self, failures: u32) -> Self {
        self.max_refresh_failures = failures;
        self
    }

    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = Some(lifetime);
        self
    }
}
