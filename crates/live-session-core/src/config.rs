//! Session master configuration.

use std::time::Duration;

use thiserror::Error;

/// Default time between dispatch ticks.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(6);

/// Fixed wait between failed acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// How often waiting loops re-check the running flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Invalid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Timing and labelling for one session master.
///
/// The retry and poll intervals are fixed in production but can be
/// shortened for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    /// Time between two dispatched events.
    pub dispatch_interval: Duration,
    /// Wait after a failed acquisition attempt.
    pub retry_interval: Duration,
    /// Granularity at which a shutdown request is observed.
    pub poll_interval: Duration,
    /// Prefix of the generated event text (`"<prefix> #<n>"`).
    pub label_prefix: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            label_prefix: "Question".to_string(),
        }
    }
}

impl MasterConfig {
    /// Create a config with the given dispatch interval and default timings.
    #[must_use]
    pub fn new(dispatch_interval: Duration) -> Self {
        Self {
            dispatch_interval,
            ..Self::default()
        }
    }

    /// Override the retry interval.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Override the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the label prefix.
    #[must_use]
    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    /// Check that every interval is non-zero.
    ///
    /// # Errors
    /// Returns the name of the first zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("dispatch_interval"));
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("retry_interval"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll_interval"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_defaults() {
        let config = MasterConfig::default();
        assert_eq!(config.retry_interval, Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = MasterConfig::new(Duration::ZERO);
        let err = assert_err!(config.validate());
        assert_eq!(err, ConfigError::ZeroInterval("dispatch_interval"));

        let config = MasterConfig::default().with_poll_interval(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("poll_interval"))
        );
    }
}
