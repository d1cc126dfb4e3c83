//! Builder assembling a [`JobController`] from its collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::JobConfig;
use crate::core::controller::{staging_queue, JobController};
use crate::core::endpoint_pool::{Endpoint, EndpointPool};
use crate::core::error::JobError;
use crate::core::executor::{BatchHook, HookStage, JobHooks, UnitExecutor};
use crate::core::source::IdentifierSource;
use crate::util::clock::{system_clock, SharedClock};

use super::registry::{ExecutorRegistry, HookRegistry, SourceRegistry};

/// Collects a job's source, executor, endpoints and hooks.
///
/// ```rust,ignore
/// let controller = JobBuilder::new(JobConfig::resolve(&ConfigLayers::from_environment())?)
///     .with_source(InMemorySource::new(ids))
///     .with_executor(MyExecutor::default())
///     .with_endpoints(["db-1:8000", "db-2:8000"].map(Endpoint::new))
///     .build()?;
/// let control = controller.control();
/// let report = controller.run()?;
/// ```
pub struct JobBuilder {
    config: JobConfig,
    source: Option<Box<dyn IdentifierSource>>,
    executor: Option<Arc<dyn UnitExecutor>>,
    endpoints: Vec<Endpoint>,
    endpoint_pool: Option<Arc<EndpointPool>>,
    hooks: JobHooks,
    variables: HashMap<String, String>,
    clock: Option<SharedClock>,
}

impl std::fmt::Debug for JobBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBuilder")
            .field("config", &self.config)
            .field("has_source", &self.source.is_some())
            .field("has_executor", &self.executor.is_some())
            .field("endpoints", &self.endpoints)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl JobBuilder {
    /// Start from a resolved configuration.
    #[must_use]
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            source: None,
            executor: None,
            endpoints: Vec::new(),
            endpoint_pool: None,
            hooks: JobHooks::default(),
            variables: HashMap::new(),
            clock: None,
        }
    }

    /// Identifier source to read.
    #[must_use]
    pub fn with_source(mut self, source: impl IdentifierSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Identifier source created by `registry`.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for an unknown name or a failing factory.
    pub fn with_source_named(mut self, registry: &SourceRegistry, name: &str) -> Result<Self, JobError> {
        self.source = Some(registry.create(name, &self.config)?);
        Ok(self)
    }

    /// Operation applied to every unit.
    #[must_use]
    pub fn with_executor(mut self, executor: impl UnitExecutor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Shared operation applied to every unit.
    #[must_use]
    pub fn with_shared_executor(mut self, executor: Arc<dyn UnitExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Executor created by `registry`.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for an unknown name or a failing factory.
    pub fn with_executor_named(mut self, registry: &ExecutorRegistry, name: &str) -> Result<Self, JobError> {
        self.executor = Some(registry.create(name, &self.config)?);
        Ok(self)
    }

    /// Add one endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Add endpoints in registration order.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    /// Use an existing endpoint pool instead of building one.
    #[must_use]
    pub fn with_endpoint_pool(mut self, pool: Arc<EndpointPool>) -> Self {
        self.endpoint_pool = Some(pool);
        self
    }

    /// Hook for `stage`.
    #[must_use]
    pub fn with_hook(mut self, stage: HookStage, hook: Arc<dyn BatchHook>) -> Self {
        match stage {
            HookStage::Init => self.hooks.init = Some(hook),
            HookStage::PreBatch => self.hooks.pre_batch = Some(hook),
            HookStage::PostBatch => self.hooks.post_batch = Some(hook),
        }
        self
    }

    /// Hook run before the source is read.
    #[must_use]
    pub fn with_init_hook(self, hook: impl BatchHook + 'static) -> Self {
        self.with_hook(HookStage::Init, Arc::new(hook))
    }

    /// Hook run before the first unit is submitted.
    #[must_use]
    pub fn with_pre_batch_hook(self, hook: impl BatchHook + 'static) -> Self {
        self.with_hook(HookStage::PreBatch, Arc::new(hook))
    }

    /// Hook run after a successful run.
    #[must_use]
    pub fn with_post_batch_hook(self, hook: impl BatchHook + 'static) -> Self {
        self.with_hook(HookStage::PostBatch, Arc::new(hook))
    }

    /// Hook for `stage` created by `registry`.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for an unknown name or a failing factory.
    pub fn with_hook_named(self, registry: &HookRegistry, stage: HookStage, name: &str) -> Result<Self, JobError> {
        let hook = registry.create(name, &self.config)?;
        Ok(self.with_hook(stage, hook))
    }

    /// Custom variable forwarded to the executor in every request.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Clock for quarantines, retries and rates.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate and assemble the controller.
    ///
    /// The staging queue is created here, so an unusable spill directory is
    /// reported before the job starts.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for invalid settings or a missing source,
    /// executor or endpoint.
    pub fn build(self) -> Result<JobController, JobError> {
        self.config.validate().map_err(JobError::Configuration)?;
        let source = self
            .source
            .ok_or_else(|| JobError::Configuration("an identifier source is required".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| JobError::Configuration("a unit executor is required".into()))?;
        let clock = self.clock.unwrap_or_else(system_clock);

        let endpoints = match self.endpoint_pool {
            Some(pool) => pool,
            None => Arc::new(EndpointPool::new(
                self.endpoints,
                self.config.endpoint_pool_config(),
                Arc::clone(&clock),
            )?),
        };
        let staging = staging_queue(&self.config)?;

        debug!(config = ?self.config, "Job assembled");
        Ok(JobController::from_parts(
            self.config,
            source,
            executor,
            endpoints,
            self.hooks,
            self.variables,
            staging,
            clock,
        ))
    }
}
