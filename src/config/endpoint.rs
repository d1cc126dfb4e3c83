//! Endpoint pool configuration.

use std::time::Duration;

use crate::core::endpoint_pool::PoolPolicy;

/// Selection and quarantine settings for an [`EndpointPool`](crate::core::EndpointPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPoolConfig {
    /// Selection policy.
    pub policy: PoolPolicy,
    /// Errors after which an endpoint is quarantined.
    pub retry_limit: u32,
    /// How long a quarantine lasts, measured from the last failure.
    pub retry_interval: Duration,
    /// How many times `get` waits for a quarantine to lapse before giving up.
    pub wait_attempts: u32,
    /// Remove an endpoint entirely after this many consecutive errors.
    pub remove_after_errors: Option<u32>,
}

impl Default for EndpointPoolConfig {
    fn default() -> Self {
        Self {
            policy: PoolPolicy::RoundRobin,
            retry_limit: 3,
            retry_interval: Duration::from_secs(60),
            wait_attempts: 3,
            remove_after_errors: None,
        }
    }
}

impl EndpointPoolConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the selection policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: PoolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the quarantine threshold.
    #[must_use]
    pub const fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set the quarantine length.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Set how many waits `get` performs before reporting exhaustion.
    #[must_use]
    pub const fn with_wait_attempts(mut self, wait_attempts: u32) -> Self {
        self.wait_attempts = wait_attempts;
        self
    }

    /// Remove endpoints after `errors` consecutive failures.
    #[must_use]
    pub const fn with_remove_after_errors(mut self, errors: u32) -> Self {
        self.remove_after_errors = Some(errors);
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.remove_after_errors == Some(0) {
            return Err("remove_after_errors must be greater than 0".into());
        }
        Ok(())
    }
}
