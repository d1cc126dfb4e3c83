//! Job configuration and layered resolution.
//!
//! A [`JobConfig`] is resolved once at startup and is immutable afterwards.
//! Values come from key/value layers with the precedence
//! explicit > environment > command file > defaults; see [`ConfigLayers`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::command::{normalize_key, parse_properties};
use crate::config::{EndpointPoolConfig, WorkerPoolConfig};
use crate::core::dispatch::RetryPolicy;
use crate::core::endpoint_pool::PoolPolicy;
use crate::core::error::JobError;

/// Every key understood by [`JobConfig::apply`].
pub const KNOWN_KEYS: &[&str] = &[
    "THREAD-COUNT",
    "BATCH-SIZE",
    "BATCH-DELIMITER",
    "FAIL-ON-ERROR",
    "QUEUE-SIZE",
    "IN-FLIGHT-LIMIT",
    "SPILL-TO-DISK",
    "SPILL-MAX-IN-MEMORY",
    "SPILL-DIR",
    "ENDPOINT-POLICY",
    "ENDPOINT-RETRY-LIMIT",
    "ENDPOINT-RETRY-INTERVAL",
    "ENDPOINT-WAIT-ATTEMPTS",
    "ENDPOINT-REMOVE-AFTER",
    "UNIT-RETRY-LIMIT",
    "UNIT-RETRY-INTERVAL",
    "UNIT-RETRY-MESSAGES",
    "COMMAND-FILE",
    "COMMAND-POLL-INTERVAL-MS",
    "MONITOR-INTERVAL-MS",
    "RATE-SAMPLES",
    "SLOWEST-UNITS",
    "DRAIN-TIMEOUT",
    "HOOKS-WHEN-EMPTY",
];

/// Settings for one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Worker threads.
    pub thread_count: usize,
    /// Identifiers per unit of work.
    pub batch_size: usize,
    /// Separator used to join a batch into one identifier string.
    pub batch_delimiter: String,
    /// Abort the run on the first failed unit.
    pub fail_on_error: bool,
    /// Worker pool backlog depth.
    pub queue_size: usize,
    /// Units allowed in flight on top of the thread count.
    pub in_flight_limit: usize,
    /// Stage identifiers in a disk-backed queue.
    pub spill_to_disk: bool,
    /// Identifiers staged in memory (the ring capacity, or the spill threshold).
    pub spill_max_in_memory: usize,
    /// Directory for spill files; the system temp dir when unset.
    pub spill_dir: Option<PathBuf>,
    /// Endpoint selection policy.
    pub endpoint_policy: PoolPolicy,
    /// Errors after which an endpoint is quarantined.
    pub endpoint_retry_limit: u32,
    /// Quarantine length in seconds.
    pub endpoint_retry_interval_secs: u64,
    /// Waits for a quarantine to lapse before the pool is exhausted.
    pub endpoint_wait_attempts: u32,
    /// Remove an endpoint after this many consecutive errors.
    pub endpoint_remove_after: Option<u32>,
    /// Retries for retryable unit failures.
    pub unit_retry_limit: u32,
    /// Seconds between unit retries.
    pub unit_retry_interval_secs: u64,
    /// Failure detail fragments that make a unit failure retryable.
    pub unit_retry_messages: Vec<String>,
    /// Command file polled for live directives.
    pub command_file: Option<PathBuf>,
    /// Command file poll interval in milliseconds.
    pub command_poll_interval_ms: u64,
    /// Progress report interval in milliseconds.
    pub monitor_interval_ms: u64,
    /// Current-rate samples averaged for the ETA.
    pub rate_samples: usize,
    /// Slowest units kept for the final report.
    pub slowest_units: usize,
    /// Seconds to wait for in-flight units at shutdown.
    pub drain_timeout_secs: u64,
    /// Run pre/post-batch hooks even when there is nothing to process.
    pub hooks_when_empty: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            batch_size: 1,
            batch_delimiter: ";".into(),
            fail_on_error: true,
            queue_size: 100_000,
            in_flight_limit: 1_000,
            spill_to_disk: false,
            spill_max_in_memory: 1_000,
            spill_dir: None,
            endpoint_policy: PoolPolicy::RoundRobin,
            endpoint_retry_limit: 3,
            endpoint_retry_interval_secs: 60,
            endpoint_wait_attempts: 3,
            endpoint_remove_after: None,
            unit_retry_limit: 2,
            unit_retry_interval_secs: 20,
            unit_retry_messages: Vec::new(),
            command_file: None,
            command_poll_interval_ms: 1_000,
            monitor_interval_ms: 60_000,
            rate_samples: 10,
            slowest_units: 5,
            drain_timeout_secs: 60,
            hooks_when_empty: false,
        }
    }
}

impl JobConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.thread_count == 0 {
            return Err("thread_count must be greater than 0".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.batch_size > 1 && self.batch_delimiter.is_empty() {
            return Err("batch_delimiter must not be empty when batch_size > 1".into());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be greater than 0".into());
        }
        if self.spill_max_in_memory == 0 {
            return Err("spill_max_in_memory must be greater than 0".into());
        }
        if self.command_poll_interval_ms == 0 {
            return Err("command_poll_interval_ms must be greater than 0".into());
        }
        if self.monitor_interval_ms == 0 {
            return Err("monitor_interval_ms must be greater than 0".into());
        }
        if self.rate_samples == 0 {
            return Err("rate_samples must be greater than 0".into());
        }
        if self.endpoint_remove_after == Some(0) {
            return Err("endpoint_remove_after must be greater than 0".into());
        }
        if self.spill_to_disk {
            let dir = self.spill_directory();
            if !dir.is_dir() {
                return Err(format!("spill directory {} does not exist", dir.display()));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve configuration from layers on top of the defaults and validate.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for unparseable values or invalid settings.
    pub fn resolve(layers: &ConfigLayers) -> Result<Self, JobError> {
        let mut cfg = Self::default();
        for (name, layer) in layers.lowest_first() {
            for (key, value) in layer {
                if cfg.apply(key, value)? {
                    debug!(layer = name, key = key.as_str(), "Configuration value applied");
                }
            }
        }
        cfg.validate().map_err(JobError::Configuration)?;
        Ok(cfg)
    }

    /// Set the field named by `key` from its text form.
    ///
    /// Returns `false` for keys this configuration does not know.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` if `value` cannot be parsed for `key`.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<bool, JobError> {
        let key = normalize_key(key);
        let value = value.trim();
        match key.as_str() {
            "THREAD-COUNT" => self.thread_count = parse(&key, value)?,
            "BATCH-SIZE" => self.batch_size = parse(&key, value)?,
            "BATCH-DELIMITER" => self.batch_delimiter = value.to_string(),
            "FAIL-ON-ERROR" => self.fail_on_error = parse_bool(&key, value)?,
            "QUEUE-SIZE" => self.queue_size = parse(&key, value)?,
            "IN-FLIGHT-LIMIT" => self.in_flight_limit = parse(&key, value)?,
            "SPILL-TO-DISK" => self.spill_to_disk = parse_bool(&key, value)?,
            "SPILL-MAX-IN-MEMORY" => self.spill_max_in_memory = parse(&key, value)?,
            "SPILL-DIR" => self.spill_dir = non_empty(value).map(PathBuf::from),
            "ENDPOINT-POLICY" => self.endpoint_policy = value.parse()?,
            "ENDPOINT-RETRY-LIMIT" => self.endpoint_retry_limit = parse(&key, value)?,
            "ENDPOINT-RETRY-INTERVAL" => self.endpoint_retry_interval_secs = parse(&key, value)?,
            "ENDPOINT-WAIT-ATTEMPTS" => self.endpoint_wait_attempts = parse(&key, value)?,
            "ENDPOINT-REMOVE-AFTER" => {
                self.endpoint_remove_after = match non_empty(value) {
                    Some(v) => Some(parse(&key, v)?),
                    None => None,
                };
            }
            "UNIT-RETRY-LIMIT" => self.unit_retry_limit = parse(&key, value)?,
            "UNIT-RETRY-INTERVAL" => self.unit_retry_interval_secs = parse(&key, value)?,
            "UNIT-RETRY-MESSAGES" => {
                self.unit_retry_messages = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "COMMAND-FILE" => self.command_file = non_empty(value).map(PathBuf::from),
            "COMMAND-POLL-INTERVAL-MS" => self.command_poll_interval_ms = parse(&key, value)?,
            "MONITOR-INTERVAL-MS" => self.monitor_interval_ms = parse(&key, value)?,
            "RATE-SAMPLES" => self.rate_samples = parse(&key, value)?,
            "SLOWEST-UNITS" => self.slowest_units = parse(&key, value)?,
            "DRAIN-TIMEOUT" => self.drain_timeout_secs = parse(&key, value)?,
            "HOOKS-WHEN-EMPTY" => self.hooks_when_empty = parse_bool(&key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Directory used for spill files.
    #[must_use]
    pub fn spill_directory(&self) -> PathBuf {
        self.spill_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Quarantine length.
    #[must_use]
    pub const fn endpoint_retry_interval(&self) -> Duration {
        Duration::from_secs(self.endpoint_retry_interval_secs)
    }

    /// Pause between unit retries.
    #[must_use]
    pub const fn unit_retry_interval(&self) -> Duration {
        Duration::from_secs(self.unit_retry_interval_secs)
    }

    /// Command file poll interval.
    #[must_use]
    pub const fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.command_poll_interval_ms)
    }

    /// Progress report interval.
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Shutdown drain timeout.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Worker pool settings derived from this configuration.
    #[must_use]
    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_count(self.thread_count)
            .with_max_queue_depth(self.queue_size)
            .with_slowest_capacity(self.slowest_units)
    }

    /// Endpoint pool settings derived from this configuration.
    #[must_use]
    pub fn endpoint_pool_config(&self) -> EndpointPoolConfig {
        let config = EndpointPoolConfig::new()
            .with_policy(self.endpoint_policy)
            .with_retry_limit(self.endpoint_retry_limit)
            .with_retry_interval(self.endpoint_retry_interval())
            .with_wait_attempts(self.endpoint_wait_attempts);
        match self.endpoint_remove_after {
            Some(errors) => config.with_remove_after_errors(errors),
            None => config,
        }
    }

    /// Retry policy derived from this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            endpoint_retry_limit: self.endpoint_retry_limit,
            unit_retry_limit: self.unit_retry_limit,
            unit_retry_interval: self.unit_retry_interval(),
            retryable_messages: self.unit_retry_messages.clone(),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, JobError> {
    value
        .parse()
        .map_err(|_| JobError::Configuration(format!("invalid value `{value}` for {key}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, JobError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(JobError::Configuration(format!("invalid value `{value}` for {key}"))),
    }
}

/// Key/value sources for [`JobConfig::resolve`].
///
/// Keys are normalized (upper case, `_` as `-`), so `THREAD_COUNT`,
/// `thread-count` and `THREAD-COUNT` are the same key.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    explicit: HashMap<String, String>,
    environment: HashMap<String, String>,
    command_file: HashMap<String, String>,
}

impl ConfigLayers {
    /// No layers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers seeded from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Only known keys are kept.
    #[must_use]
    pub fn from_environment() -> Self {
        let _ = dotenvy::dotenv();
        Self::new().with_environment(std::env::vars())
    }

    /// Add an explicit setting (highest precedence).
    #[must_use]
    pub fn with_explicit(mut self, key: &str, value: impl Into<String>) -> Self {
        self.explicit.insert(normalize_key(key), value.into());
        self
    }

    /// Replace the environment layer; unknown keys are dropped.
    #[must_use]
    pub fn with_environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.environment = vars
            .into_iter()
            .map(|(k, v)| (normalize_key(k.as_ref()), v.into()))
            .filter(|(k, _)| KNOWN_KEYS.contains(&k.as_str()))
            .collect();
        self
    }

    /// Use properties-style text as the command file layer.
    #[must_use]
    pub fn with_command_file_text(mut self, text: &str) -> Self {
        self.command_file = parse_properties(text);
        self
    }

    /// Read the command file layer from `path`. A missing file is an empty layer.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` if the file exists but cannot be read.
    pub fn with_command_file(self, path: &Path) -> Result<Self, JobError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(self.with_command_file_text(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self),
            Err(e) => Err(JobError::Configuration(format!(
                "cannot read command file {}: {e}",
                path.display()
            ))),
        }
    }

    fn lowest_first(&self) -> [(&'static str, &HashMap<String, String>); 3] {
        [
            ("command-file", &self.command_file),
            ("environment", &self.environment),
            ("explicit", &self.explicit),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(JobConfig::default().validate().is_ok());
    }

    #[test]
    fn explicit_beats_environment_beats_command_file() {
        let layers = ConfigLayers::new()
            .with_command_file_text("THREAD-COUNT=2\nBATCH-SIZE=5\nSLOWEST-UNITS=9\nCOMMAND=PAUSE")
            .with_environment([("THREAD_COUNT", "4"), ("BATCH_SIZE", "7"), ("HOME", "/root")])
            .with_explicit("thread-count", "8");

        let cfg = JobConfig::resolve(&layers).unwrap();
        assert_eq!(cfg.thread_count, 8);
        assert_eq!(cfg.batch_size, 7);
        assert_eq!(cfg.slowest_units, 9);
        assert_eq!(cfg.in_flight_limit, JobConfig::default().in_flight_limit);
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        let layers = ConfigLayers::new().with_explicit("THREAD-COUNT", "lots");
        assert!(matches!(JobConfig::resolve(&layers), Err(JobError::Configuration(_))));

        let layers = ConfigLayers::new().with_explicit("ENDPOINT-POLICY", "FASTEST");
        assert!(matches!(JobConfig::resolve(&layers), Err(JobError::Configuration(_))));

        let layers = ConfigLayers::new().with_explicit("THREAD-COUNT", "0");
        assert!(matches!(JobConfig::resolve(&layers), Err(JobError::Configuration(_))));
    }

    #[test]
    fn list_and_optional_values() {
        let mut cfg = JobConfig::default();
        assert!(cfg.apply("UNIT-RETRY-MESSAGES", "DEADLOCK, timeout ,").unwrap());
        assert_eq!(cfg.unit_retry_messages, vec!["DEADLOCK", "timeout"]);
        assert!(cfg.apply("endpoint_remove_after", "4").unwrap());
        assert_eq!(cfg.endpoint_remove_after, Some(4));
        assert!(!cfg.apply("UNRELATED", "x").unwrap());
    }

    #[test]
    fn derived_configs_follow_fields() {
        let cfg = JobConfig {
            thread_count: 3,
            endpoint_policy: PoolPolicy::Load,
            endpoint_remove_after: Some(2),
            ..JobConfig::default()
        };
        assert_eq!(cfg.worker_pool_config().worker_count, 3);
        let endpoints = cfg.endpoint_pool_config();
        assert_eq!(endpoints.policy, PoolPolicy::Load);
        assert_eq!(endpoints.remove_after_errors, Some(2));
        assert_eq!(cfg.retry_policy().unit_retry_limit, 2);
    }
}
