//! Configuration types for the particle-stream crate
//!
//! Controls how the registry's connections recover from a lost stream.

use std::time::Duration;

use crate::error::RegistryError;

/// Reconnect behaviour after a stream is lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect at all
    /// Default: true
    pub enabled: bool,

    /// Delay before the first reconnect attempt
    /// Default: 1 second
    pub initial_backoff: Duration,

    /// Upper bound for the doubling delay
    /// Default: 30 seconds
    pub max_backoff: Duration,

    /// Consecutive failed attempts before the connection gives up
    /// Default: 5
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Close the connection as soon as the stream is lost
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    ///
    /// `initial_backoff * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if !self.enabled {
            return Ok(());
        }

        if self.max_attempts == 0 {
            return Err(RegistryError::Configuration(
                "Reconnect max attempts must be greater than 0".to_string(),
            ));
        }

        if self.initial_backoff.is_zero() {
            return Err(RegistryError::Configuration(
                "Reconnect initial backoff must be greater than 0".to_string(),
            ));
        }

        if self.initial_backoff > self.max_backoff {
            return Err(RegistryError::Configuration(
                "Reconnect initial backoff must not exceed max backoff".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for the [`SubscriptionRegistry`](crate::SubscriptionRegistry)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    pub reconnect: ReconnectPolicy,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections close on the first lost stream
    pub fn no_reconnect() -> Self {
        Self {
            reconnect: ReconnectPolicy::disabled(),
        }
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        self.reconnect.validate()
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect.initial_backoff = initial;
        self.reconnect.max_backoff = max;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_backoff, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_config_validation() {
        assert_err!(StreamConfig::new().with_max_attempts(0).validate());
        assert_err!(StreamConfig::new()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate());
        assert_err!(StreamConfig::new()
            .with_backoff(Duration::ZERO, Duration::from_secs(1))
            .validate());

        // Nothing to validate when reconnecting is off
        assert_ok!(StreamConfig::no_reconnect().with_max_attempts(0).validate());
    }

    proptest! {
        #[test]
        fn prop_backoff_is_capped_and_monotonic(
            initial_ms in 1u64..5_000,
            max_ms in 5_000u64..120_000,
            attempt in 1u32..200,
        ) {
            let policy = ReconnectPolicy {
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
                ..Default::default()
            };

            let delay = policy.backoff(attempt);
            prop_assert!(delay <= policy.max_backoff);
            prop_assert!(delay >= policy.initial_backoff);
            prop_assert!(policy.backoff(attempt + 1) >= delay);
        }
    }
}
