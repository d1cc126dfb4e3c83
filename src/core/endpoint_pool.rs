//! Endpoint selection with failure quarantine.
//!
//! The pool hands out remote endpoints according to a [`PoolPolicy`] and keeps
//! per-endpoint health: consecutive error count, time of the last failure and
//! active lease count. An endpoint whose error count has reached the retry
//! limit is quarantined until `retry_interval` has passed since its last
//! failure, or until a success resets it.
//!
//! All health state lives behind one `parking_lot::Mutex`; `get` never sleeps
//! while holding it.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EndpointPoolConfig;
use crate::util::clock::SharedClock;

use super::error::JobError;

// Floor for the wait between selection attempts.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// A remote execution target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    index: usize,
    address: String,
    user: Option<String>,
}

impl Endpoint {
    /// Endpoint at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            index: 0,
            address: address.into(),
            user: None,
        }
    }

    /// Attach the user name to connect as.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Position in registration order, assigned by the pool.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Address of the endpoint.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// User name, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{user}@{}", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// How the pool picks among healthy endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum PoolPolicy {
    /// Cycle in registration order.
    #[default]
    RoundRobin,
    /// Uniformly at random.
    Random,
    /// Fewest active leases, earliest registration on ties.
    Load,
}

impl FromStr for PoolPolicy {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "ROUND-ROBIN" => Ok(Self::RoundRobin),
            "RANDOM" => Ok(Self::Random),
            "LOAD" => Ok(Self::Load),
            other => Err(JobError::Configuration(format!(
                "unknown endpoint policy `{other}` (expected ROUND-ROBIN, RANDOM or LOAD)"
            ))),
        }
    }
}

impl fmt::Display for PoolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "ROUND-ROBIN"),
            Self::Random => write!(f, "RANDOM"),
            Self::Load => write!(f, "LOAD"),
        }
    }
}

#[derive(Debug)]
struct Health {
    endpoint: Arc<Endpoint>,
    error_count: u32,
    last_failure: Option<Instant>,
    leases: u32,
}

impl Health {
    fn quarantine_remaining(&self, now: Instant, config: &EndpointPoolConfig) -> Option<Duration> {
        if self.error_count == 0 || self.error_count < config.retry_limit {
            return None;
        }
        let since = now.saturating_duration_since(self.last_failure?);
        config.retry_interval.checked_sub(since).filter(|left| !left.is_zero())
    }
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<Health>,
    cursor: usize,
}

impl PoolState {
    /// Entry registered for `endpoint`, matched by address and user.
    ///
    /// A caller-built `Endpoint` carries no registration index, so the index
    /// only breaks ties between duplicate registrations of one address.
    fn position(&self, endpoint: &Endpoint) -> Option<usize> {
        let same_target =
            |h: &Health| h.endpoint.address == endpoint.address && h.endpoint.user == endpoint.user;
        self.entries
            .iter()
            .position(|h| same_target(h) && h.endpoint.index == endpoint.index)
            .or_else(|| self.entries.iter().position(same_target))
    }

    fn earliest_release(&self, now: Instant, config: &EndpointPoolConfig) -> Option<Duration> {
        self.entries
            .iter()
            .filter_map(|h| h.quarantine_remaining(now, config))
            .min()
    }

    fn remove_at(&mut self, pos: usize) -> Health {
        let removed = self.entries.remove(pos);
        if pos < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
        removed
    }
}

/// Health-aware pool of remote endpoints.
#[derive(Debug)]
pub struct EndpointPool {
    config: EndpointPoolConfig,
    clock: SharedClock,
    state: Mutex<PoolState>,
    closed: AtomicBool,
}

impl EndpointPool {
    /// Register `endpoints` in the given order.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` if the configuration is invalid or no
    /// endpoint was given.
    pub fn new(
        endpoints: impl IntoIterator<Item = Endpoint>,
        config: EndpointPoolConfig,
        clock: SharedClock,
    ) -> Result<Self, JobError> {
        config.validate().map_err(JobError::Configuration)?;
        let entries: Vec<Health> = endpoints
            .into_iter()
            .enumerate()
            .map(|(index, mut endpoint)| {
                endpoint.index = index;
                Health {
                    endpoint: Arc::new(endpoint),
                    error_count: 0,
                    last_failure: None,
                    leases: 0,
                }
            })
            .collect();
        if entries.is_empty() {
            return Err(JobError::Configuration(
                "at least one endpoint must be configured".into(),
            ));
        }

        info!(
            endpoints = entries.len(),
            policy = %config.policy,
            retry_limit = config.retry_limit,
            retry_interval_secs = config.retry_interval.as_secs(),
            "Endpoint pool initialized"
        );

        Ok(Self {
            config,
            clock,
            state: Mutex::new(PoolState { entries, cursor: 0 }),
            closed: AtomicBool::new(false),
        })
    }

    /// Selection policy.
    #[must_use]
    pub const fn policy(&self) -> PoolPolicy {
        self.config.policy
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &EndpointPoolConfig {
        &self.config
    }

    /// Select a healthy endpoint.
    ///
    /// When every endpoint is quarantined, sleeps until the earliest
    /// quarantine lapses, up to `wait_attempts` times.
    ///
    /// # Errors
    ///
    /// `JobError::PoolExhausted` when the pool is empty or the wait budget is
    /// spent; `JobError::EndpointPoolClosed` after [`close`](Self::close).
    pub fn get(&self) -> Result<Arc<Endpoint>, JobError> {
        let mut attempts = 0;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(JobError::EndpointPoolClosed);
            }
            let wait = {
                let mut state = self.state.lock();
                if state.entries.is_empty() {
                    warn!("No endpoints remain in the pool");
                    return Err(JobError::PoolExhausted { attempts });
                }
                let now = self.clock.now();
                if let Some(endpoint) = self.select(&mut state, now) {
                    return Ok(endpoint);
                }
                state
                    .earliest_release(now, &self.config)
                    .unwrap_or(MIN_WAIT)
                    .max(MIN_WAIT)
            };

            if attempts >= self.config.wait_attempts {
                warn!(attempts, "Every endpoint is quarantined; giving up");
                return Err(JobError::PoolExhausted { attempts });
            }
            attempts += 1;
            debug!(
                attempt = attempts,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Every endpoint is quarantined; waiting"
            );
            self.clock.sleep(wait);
        }
    }

    fn select(&self, state: &mut PoolState, now: Instant) -> Option<Arc<Endpoint>> {
        let eligible = |h: &Health| h.quarantine_remaining(now, &self.config).is_none();
        let len = state.entries.len();
        let pos = match self.config.policy {
            PoolPolicy::RoundRobin => {
                let start = state.cursor;
                let pos = (0..len)
                    .map(|step| (start + step) % len)
                    .find(|&i| eligible(&state.entries[i]))?;
                state.cursor = (pos + 1) % len;
                pos
            }
            PoolPolicy::Random => {
                let candidates: Vec<usize> = (0..len).filter(|&i| eligible(&state.entries[i])).collect();
                if candidates.is_empty() {
                    return None;
                }
                candidates[rand::rng().random_range(0..candidates.len())]
            }
            PoolPolicy::Load => (0..len)
                .filter(|&i| eligible(&state.entries[i]))
                .min_by_key(|&i| state.entries[i].leases)?,
        };
        Some(Arc::clone(&state.entries[pos].endpoint))
    }

    /// Record a failure on `endpoint`.
    pub fn error(&self, endpoint: &Endpoint) {
        self.record_error(endpoint, None);
    }

    /// Record a failure on a lease allocated at `allocated_at`.
    ///
    /// The error is ignored when the endpoint already failed after the lease
    /// was handed out, so one outage is not counted once per in-flight lease.
    pub fn error_since(&self, endpoint: &Endpoint, allocated_at: Instant) {
        self.record_error(endpoint, Some(allocated_at));
    }

    fn record_error(&self, endpoint: &Endpoint, allocated_at: Option<Instant>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(pos) = state.position(endpoint) else {
            return;
        };
        let health = &mut state.entries[pos];
        if let (Some(allocated), Some(last)) = (allocated_at, health.last_failure) {
            if last > allocated {
                debug!(endpoint = %endpoint, "Error on a lease older than the last failure; not counted");
                return;
            }
        }
        health.error_count += 1;
        health.last_failure = Some(now);
        let errors = health.error_count;
        if errors >= self.config.retry_limit {
            warn!(
                endpoint = %endpoint,
                errors,
                retry_interval_secs = self.config.retry_interval.as_secs(),
                "Endpoint quarantined"
            );
        } else {
            warn!(endpoint = %endpoint, errors, "Endpoint error recorded");
        }

        if let Some(limit) = self.config.remove_after_errors {
            if errors >= limit {
                if state.entries.len() > 1 {
                    state.remove_at(pos);
                    warn!(endpoint = %endpoint, errors, "Endpoint removed after repeated errors");
                } else {
                    warn!(endpoint = %endpoint, errors, "Not removing the last remaining endpoint");
                }
            }
        }
    }

    /// Record a success, clearing the error count and any quarantine.
    pub fn success(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(pos) = state.position(endpoint) {
            let health = &mut state.entries[pos];
            if health.error_count > 0 {
                debug!(endpoint = %endpoint, "Endpoint recovered");
            }
            health.error_count = 0;
            health.last_failure = None;
        }
    }

    /// Remove `endpoint` from the pool. Returns whether it was present.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.position(endpoint) else {
            return false;
        };
        state.remove_at(pos);
        info!(endpoint = %endpoint, remaining = state.entries.len(), "Endpoint removed");
        true
    }

    /// Whether `get` would currently succeed without waiting.
    #[must_use]
    pub fn available(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .iter()
            .any(|h| h.quarantine_remaining(now, &self.config).is_none())
    }

    /// Every registered endpoint, quarantined or not.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Endpoint>> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|h| Arc::clone(&h.endpoint))
            .collect()
    }

    /// Take a lease on `endpoint` (LOAD policy accounting).
    pub fn hold(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(pos) = state.position(endpoint) {
            state.entries[pos].leases += 1;
        }
    }

    /// Return a lease taken with [`hold`](Self::hold).
    pub fn release(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(pos) = state.position(endpoint) {
            let leases = &mut state.entries[pos].leases;
            *leases = leases.saturating_sub(1);
        }
    }

    /// Consecutive errors recorded for `endpoint`.
    #[must_use]
    pub fn error_count(&self, endpoint: &Endpoint) -> Option<u32> {
        let state = self.state.lock();
        state.position(endpoint).map(|pos| state.entries[pos].error_count)
    }

    /// Active leases on `endpoint`.
    #[must_use]
    pub fn active_leases(&self, endpoint: &Endpoint) -> Option<u32> {
        let state = self.state.lock();
        state.position(endpoint).map(|pos| state.entries[pos].leases)
    }

    /// Whether `endpoint` is currently excluded from selection.
    #[must_use]
    pub fn is_quarantined(&self, endpoint: &Endpoint) -> bool {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .position(endpoint)
            .is_some_and(|pos| state.entries[pos].quarantine_remaining(now, &self.config).is_some())
    }

    /// Stop handing out endpoints. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.state.lock();
            for health in &mut state.entries {
                health.leases = 0;
            }
            info!(endpoints = state.entries.len(), "Endpoint pool closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::{Clock, ManualClock};
    use std::collections::HashSet;

    fn pool_with(
        names: &[&str],
        config: EndpointPoolConfig,
    ) -> (EndpointPool, Arc<ManualClock>, Vec<Arc<Endpoint>>) {
        let clock = Arc::new(ManualClock::new());
        let pool = EndpointPool::new(
            names.iter().map(|n| Endpoint::new(*n)),
            config,
            clock.clone(),
        )
        .unwrap();
        let all = pool.all();
        (pool, clock, all)
    }

    fn addresses(pool: &EndpointPool, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| pool.get().unwrap().address().to_string())
            .collect()
    }

    #[test]
    fn round_robin_cycles_in_registration_order() {
        let (pool, _, _) = pool_with(&["a", "b", "c"], EndpointPoolConfig::new());
        assert_eq!(addresses(&pool, 6), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn round_robin_skips_quarantined_endpoint() {
        let config = EndpointPoolConfig::new().with_retry_limit(1);
        let (pool, _, all) = pool_with(&["a", "b", "c"], config);
        pool.error(&all[1]);
        assert_eq!(addresses(&pool, 4), vec!["a", "c", "a", "c"]);
    }

    #[test]
    fn quarantine_lasts_until_interval_elapses() {
        let config = EndpointPoolConfig::new()
            .with_retry_limit(2)
            .with_retry_interval(Duration::from_secs(30))
            .with_wait_attempts(0);
        let (pool, clock, all) = pool_with(&["a"], config);
        let a = &all[0];

        pool.error(a);
        assert!(!pool.is_quarantined(a), "one error is below the limit");
        pool.error(a);
        assert!(pool.is_quarantined(a));
        assert!(!pool.available());
        assert!(matches!(pool.get(), Err(JobError::PoolExhausted { attempts: 0 })));

        clock.advance(Duration::from_secs(29));
        assert!(pool.is_quarantined(a));
        clock.advance(Duration::from_secs(1));
        assert!(!pool.is_quarantined(a));
        assert_eq!(pool.get().unwrap().address(), "a");
    }

    #[test]
    fn success_lifts_quarantine_immediately() {
        let config = EndpointPoolConfig::new().with_retry_limit(1);
        let (pool, _, all) = pool_with(&["a", "b"], config);
        pool.error(&all[0]);
        assert!(pool.is_quarantined(&all[0]));
        pool.success(&all[0]);
        assert!(!pool.is_quarantined(&all[0]));
        assert_eq!(pool.error_count(&all[0]), Some(0));
    }

    #[test]
    fn get_waits_for_the_earliest_quarantine_to_lapse() {
        let config = EndpointPoolConfig::new()
            .with_retry_limit(1)
            .with_retry_interval(Duration::from_secs(10))
            .with_wait_attempts(3);
        let (pool, clock, all) = pool_with(&["a", "b"], config);
        pool.error(&all[0]);
        clock.advance(Duration::from_secs(4));
        pool.error(&all[1]);

        let chosen = pool.get().unwrap();
        assert_eq!(chosen.address(), "a");
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn load_prefers_fewest_leases_then_registration_order() {
        let config = EndpointPoolConfig::new().with_policy(PoolPolicy::Load);
        let (pool, _, all) = pool_with(&["a", "b"], config);
        let (a, b) = (&all[0], &all[1]);

        pool.hold(a);
        pool.hold(a);
        pool.hold(b);
        assert_eq!(pool.get().unwrap().address(), "b");

        pool.release(a);
        assert_eq!(pool.active_leases(a), Some(1));
        assert_eq!(pool.get().unwrap().address(), "a");
    }

    #[test]
    fn random_never_returns_quarantined_endpoint() {
        let config = EndpointPoolConfig::new()
            .with_policy(PoolPolicy::Random)
            .with_retry_limit(1);
        let (pool, _, all) = pool_with(&["a", "b", "c"], config);
        pool.error(&all[0]);

        let seen: HashSet<String> = addresses(&pool, 200).into_iter().collect();
        assert!(!seen.contains("a"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn removal_limit_never_drops_last_endpoint() {
        let config = EndpointPoolConfig::new()
            .with_retry_limit(5)
            .with_remove_after_errors(2);
        let (pool, _, all) = pool_with(&["a", "b"], config);

        pool.error(&all[0]);
        pool.error(&all[0]);
        assert_eq!(pool.all().len(), 1);

        pool.error(&all[1]);
        pool.error(&all[1]);
        pool.error(&all[1]);
        assert_eq!(pool.all().len(), 1);
        assert_eq!(pool.get().unwrap().address(), "b");
    }

    #[test]
    fn stale_lease_errors_are_not_counted() {
        let config = EndpointPoolConfig::new().with_retry_limit(3);
        let (pool, clock, all) = pool_with(&["a"], config);
        let allocated = clock.now();
        clock.advance(Duration::from_secs(1));
        pool.error(&all[0]);
        pool.error_since(&all[0], allocated);
        assert_eq!(pool.error_count(&all[0]), Some(1));
    }

    #[test]
    fn empty_or_closed_pool_fails() {
        let (pool, _, all) = pool_with(&["a"], EndpointPoolConfig::new());
        assert!(pool.remove(&all[0]));
        assert!(!pool.remove(&all[0]));
        assert!(matches!(pool.get(), Err(JobError::PoolExhausted { .. })));

        let (pool, _, _) = pool_with(&["a"], EndpointPoolConfig::new());
        pool.close();
        assert!(matches!(pool.get(), Err(JobError::EndpointPoolClosed)));
        assert!(!pool.available());
    }

    #[test]
    fn caller_built_endpoints_resolve_by_address() {
        let config = EndpointPoolConfig::new().with_retry_limit(1);
        let (pool, _, all) = pool_with(&["a", "b", "c"], config);

        pool.error(&Endpoint::new("c"));
        assert!(pool.is_quarantined(&all[2]));
        assert!(!pool.is_quarantined(&all[0]));
        assert_eq!(pool.error_count(&Endpoint::new("c")), Some(1));

        pool.hold(&Endpoint::new("b"));
        assert_eq!(pool.active_leases(&all[1]), Some(1));
        assert_eq!(pool.active_leases(&all[0]), Some(0));

        assert!(!pool.remove(&Endpoint::new("zzz")));
        assert_eq!(pool.all().len(), 3);
        assert!(!pool.remove(&Endpoint::new("c").with_user("admin")));

        assert!(pool.remove(&Endpoint::new("c")));
        let left: Vec<_> = pool.all().iter().map(|e| e.address().to_string()).collect();
        assert_eq!(left, vec!["a", "b"]);
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("round-robin".parse::<PoolPolicy>().unwrap(), PoolPolicy::RoundRobin);
        assert_eq!("RANDOM".parse::<PoolPolicy>().unwrap(), PoolPolicy::Random);
        assert_eq!("Load".parse::<PoolPolicy>().unwrap(), PoolPolicy::Load);
        assert!(matches!(
            "fastest".parse::<PoolPolicy>(),
            Err(JobError::Configuration(_))
        ));
    }

    #[test]
    fn empty_endpoint_list_is_a_configuration_error() {
        let result = EndpointPool::new(
            Vec::new(),
            EndpointPoolConfig::new(),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(JobError::Configuration(_))));
    }
}
