//! Binds units to endpoints and applies the retry policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::util::clock::SharedClock;

use super::endpoint_pool::{EndpointPool, PoolPolicy};
use super::error::JobError;
use super::executor::{FailureKind, Outcome, OutcomeStatus, UnitExecutor, UnitOfWork, WorkerExecutor};

/// Retry limits for endpoint and unit failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra endpoints tried after an endpoint failure.
    pub endpoint_retry_limit: u32,
    /// Retries of a unit failure whose detail matches `retryable_messages`.
    pub unit_retry_limit: u32,
    /// Pause before retrying a unit failure.
    pub unit_retry_interval: Duration,
    /// Fragments that mark a unit failure as retryable.
    pub retryable_messages: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            endpoint_retry_limit: 3,
            unit_retry_limit: 2,
            unit_retry_interval: Duration::from_secs(20),
            retryable_messages: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Whether a unit failure with `detail` may be retried.
    #[must_use]
    pub fn is_retryable(&self, detail: Option<&str>) -> bool {
        let Some(detail) = detail else {
            return false;
        };
        self.retryable_messages
            .iter()
            .any(|fragment| !fragment.is_empty() && detail.contains(fragment.as_str()))
    }
}

/// [`WorkerExecutor`] that leases an endpoint for every attempt.
///
/// Endpoint failures are recorded against the endpoint and retried on the
/// next selection; unit failures are retried only when their detail matches
/// the retry policy. Pool exhaustion ends the unit immediately.
#[derive(Clone)]
pub struct EndpointDispatcher {
    endpoints: Arc<EndpointPool>,
    executor: Arc<dyn UnitExecutor>,
    policy: RetryPolicy,
    clock: SharedClock,
}

impl fmt::Debug for EndpointDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDispatcher")
            .field("endpoints", &self.endpoints)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EndpointDispatcher {
    /// Dispatcher over `endpoints` running `executor`.
    #[must_use]
    pub fn new(
        endpoints: Arc<EndpointPool>,
        executor: Arc<dyn UnitExecutor>,
        policy: RetryPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            endpoints,
            executor,
            policy,
            clock,
        }
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl WorkerExecutor for EndpointDispatcher {
    async fn execute(&self, unit: &UnitOfWork) -> Outcome {
        let started = self.clock.now();
        let track_load = self.endpoints.policy() == PoolPolicy::Load;
        let mut endpoint_failures = 0u32;
        let mut unit_retries = 0u32;

        loop {
            let endpoint = match self.endpoints.get() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(unit_id = unit.id, error = %e, "No endpoint available for unit");
                    let attempts = match e {
                        JobError::PoolExhausted { attempts } => attempts,
                        _ => 0,
                    };
                    return Outcome::failure(
                        FailureKind::PoolExhausted { attempts },
                        self.clock.now().saturating_duration_since(started),
                        e.to_string(),
                    );
                }
            };

            let allocated_at = self.clock.now();
            if track_load {
                self.endpoints.hold(&endpoint);
            }
            let outcome = self.executor.execute(unit, &endpoint).await;
            if track_load {
                self.endpoints.release(&endpoint);
            }
            let elapsed = self.clock.now().saturating_duration_since(started);

            match outcome.status {
                OutcomeStatus::Succeeded => {
                    self.endpoints.success(&endpoint);
                    return outcome.with_elapsed(elapsed);
                }
                OutcomeStatus::Failed(FailureKind::Endpoint) => {
                    self.endpoints.error_since(&endpoint, allocated_at);
                    endpoint_failures += 1;
                    if endpoint_failures > self.policy.endpoint_retry_limit {
                        warn!(
                            unit_id = unit.id,
                            endpoint = %endpoint,
                            attempts = endpoint_failures,
                            "Endpoint retries exhausted"
                        );
                        return outcome.with_elapsed(elapsed);
                    }
                    debug!(
                        unit_id = unit.id,
                        endpoint = %endpoint,
                        detail = outcome.detail.as_deref().unwrap_or(""),
                        "Endpoint failed; retrying on next selection"
                    );
                }
                OutcomeStatus::Failed(FailureKind::Unit) => {
                    // The endpoint answered, so it is healthy.
                    self.endpoints.success(&endpoint);
                    if unit_retries >= self.policy.unit_retry_limit
                        || !self.policy.is_retryable(outcome.detail.as_deref())
                    {
                        return outcome.with_elapsed(elapsed);
                    }
                    unit_retries += 1;
                    warn!(
                        unit_id = unit.id,
                        retry = unit_retries,
                        detail = outcome.detail.as_deref().unwrap_or(""),
                        "Retryable unit failure; retrying"
                    );
                    self.clock.sleep(self.policy.unit_retry_interval);
                }
                OutcomeStatus::Failed(FailureKind::PoolExhausted { .. }) => {
                    return outcome.with_elapsed(elapsed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointPoolConfig;
    use crate::core::endpoint_pool::Endpoint;
    use crate::core::executor::ExecutionRequest;
    use crate::util::clock::ManualClock;
    use parking_lot::Mutex;

    /// Replays a script of outcomes and records which endpoint served each call.
    struct Scripted {
        script: Mutex<Vec<Outcome>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut script: Vec<Outcome>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl UnitExecutor for Scripted {
        async fn execute(&self, _unit: &UnitOfWork, endpoint: &Endpoint) -> Outcome {
            self.calls.lock().push(endpoint.address().to_string());
            self.script
                .lock()
                .pop()
                .unwrap_or_else(|| Outcome::success(Duration::ZERO))
        }
    }

    fn build(
        names: &[&str],
        config: EndpointPoolConfig,
        policy: RetryPolicy,
        executor: Arc<Scripted>,
    ) -> (EndpointDispatcher, Arc<EndpointPool>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let pool = Arc::new(
            EndpointPool::new(names.iter().map(|n| Endpoint::new(*n)), config, clock.clone()).unwrap(),
        );
        let dispatcher = EndpointDispatcher::new(pool.clone(), executor, policy, clock.clone());
        (dispatcher, pool, clock)
    }

    fn unit() -> UnitOfWork {
        UnitOfWork::new(1, "doc-1", Arc::new(ExecutionRequest::default()))
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn endpoint_failure_moves_to_next_endpoint() {
        let executor = Scripted::new(vec![
            Outcome::failure(FailureKind::Endpoint, Duration::ZERO, "connection refused"),
            Outcome::success(Duration::ZERO),
        ]);
        let (dispatcher, pool, _) = build(
            &["a", "b"],
            EndpointPoolConfig::new().with_retry_limit(1),
            RetryPolicy::default(),
            executor.clone(),
        );

        let outcome = block_on(dispatcher.execute(&unit()));
        assert!(outcome.is_success());
        assert_eq!(*executor.calls.lock(), vec!["a", "b"]);
        assert!(pool.is_quarantined(&pool.all()[0]));
    }

    #[test]
    fn endpoint_retries_are_bounded() {
        let failures = (0..10)
            .map(|_| Outcome::failure(FailureKind::Endpoint, Duration::ZERO, "timeout"))
            .collect();
        let executor = Scripted::new(failures);
        let policy = RetryPolicy {
            endpoint_retry_limit: 2,
            ..RetryPolicy::default()
        };
        let (dispatcher, _, _) = build(
            &["a", "b", "c"],
            EndpointPoolConfig::new().with_retry_limit(100),
            policy,
            executor.clone(),
        );

        let outcome = block_on(dispatcher.execute(&unit()));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Endpoint));
        assert_eq!(executor.calls.lock().len(), 3);
    }

    #[test]
    fn retryable_unit_failures_are_retried_after_interval() {
        let executor = Scripted::new(vec![
            Outcome::failure(FailureKind::Unit, Duration::ZERO, "XDMP-DEADLOCK detected"),
            Outcome::success(Duration::ZERO),
        ]);
        let policy = RetryPolicy {
            unit_retry_limit: 1,
            unit_retry_interval: Duration::from_secs(20),
            retryable_messages: vec!["DEADLOCK".into()],
            ..RetryPolicy::default()
        };
        let (dispatcher, _, clock) =
            build(&["a"], EndpointPoolConfig::new(), policy, executor.clone());

        let outcome = block_on(dispatcher.execute(&unit()));
        assert!(outcome.is_success());
        assert_eq!(executor.calls.lock().len(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
        assert_eq!(outcome.elapsed, Duration::from_secs(20));
    }

    #[test]
    fn non_retryable_unit_failure_is_final() {
        let executor = Scripted::new(vec![Outcome::failure(
            FailureKind::Unit,
            Duration::ZERO,
            "invalid document",
        )]);
        let policy = RetryPolicy {
            retryable_messages: vec!["DEADLOCK".into()],
            ..RetryPolicy::default()
        };
        let (dispatcher, _, _) = build(&["a"], EndpointPoolConfig::new(), policy, executor.clone());

        let outcome = block_on(dispatcher.execute(&unit()));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unit));
        assert_eq!(outcome.detail.as_deref(), Some("invalid document"));
        assert_eq!(executor.calls.lock().len(), 1);
    }

    #[test]
    fn exhausted_pool_yields_pool_exhausted_outcome() {
        let executor = Scripted::new(vec![Outcome::failure(
            FailureKind::Endpoint,
            Duration::ZERO,
            "down",
        )]);
        let config = EndpointPoolConfig::new()
            .with_retry_limit(1)
            .with_wait_attempts(0);
        let (dispatcher, _, _) = build(&["a"], config, RetryPolicy::default(), executor);

        let outcome = block_on(dispatcher.execute(&unit()));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PoolExhausted { attempts: 0 }));
    }

    /// Time that never moves; sleeps are only counted.
    #[derive(Debug)]
    struct FrozenClock {
        now: std::time::Instant,
        sleeps: Mutex<u32>,
    }

    impl crate::util::clock::Clock for FrozenClock {
        fn now(&self) -> std::time::Instant {
            self.now
        }

        fn sleep(&self, _duration: Duration) {
            *self.sleeps.lock() += 1;
        }
    }

    #[test]
    fn exhaustion_reports_the_waits_actually_made() {
        let clock = Arc::new(FrozenClock {
            now: std::time::Instant::now(),
            sleeps: Mutex::new(0),
        });
        let config = EndpointPoolConfig::new()
            .with_retry_limit(1)
            .with_wait_attempts(2);
        let pool = Arc::new(EndpointPool::new([Endpoint::new("a")], config, clock.clone()).unwrap());
        let executor = Scripted::new(vec![Outcome::failure(FailureKind::Endpoint, Duration::ZERO, "down")]);
        let dispatcher = EndpointDispatcher::new(pool.clone(), executor, RetryPolicy::default(), clock.clone());

        let outcome = block_on(dispatcher.execute(&unit()));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PoolExhausted { attempts: 2 }));
        assert_eq!(*clock.sleeps.lock(), 2);

        // A closed pool gives up without waiting, whatever the wait budget.
        pool.close();
        let outcome = block_on(dispatcher.execute(&unit()));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PoolExhausted { attempts: 0 }));
        assert_eq!(*clock.sleeps.lock(), 2);
    }

    #[test]
    fn load_policy_releases_leases() {
        let executor = Scripted::new(Vec::new());
        let config = EndpointPoolConfig::new().with_policy(PoolPolicy::Load);
        let (dispatcher, pool, _) = build(&["a", "b"], config, RetryPolicy::default(), executor);

        assert!(block_on(dispatcher.execute(&unit())).is_success());
        for endpoint in pool.all() {
            assert_eq!(pool.active_leases(&endpoint), Some(0));
        }
    }
}
