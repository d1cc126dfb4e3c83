//! Units of work, their outcomes, and the execution traits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint_pool::Endpoint;
use super::error::AppResult;

/// Opaque request shared by every unit of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Batch reference token handed out by the identifier source.
    pub batch_ref: Option<String>,
    /// Custom variables forwarded to the executor untouched.
    pub variables: HashMap<String, String>,
}

impl ExecutionRequest {
    /// Create a request for the given batch reference.
    #[must_use]
    pub fn new(batch_ref: Option<String>, variables: HashMap<String, String>) -> Self {
        Self { batch_ref, variables }
    }
}

/// One identifier (or a delimited batch of identifiers) plus its request.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    /// Sequence number within the run.
    pub id: u64,
    /// Identifier text; batches are joined with the configured delimiter.
    pub identifier: String,
    /// How many source identifiers this unit covers.
    pub item_count: u64,
    /// Shared execution request.
    pub request: Arc<ExecutionRequest>,
}

impl UnitOfWork {
    /// Wrap a single identifier.
    pub fn new(id: u64, identifier: impl Into<String>, request: Arc<ExecutionRequest>) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            item_count: 1,
            request,
        }
    }

    /// Wrap a batch of identifiers joined by `delimiter`.
    #[must_use]
    pub fn batch(id: u64, identifiers: &[String], delimiter: &str, request: Arc<ExecutionRequest>) -> Self {
        Self {
            id,
            identifier: identifiers.join(delimiter),
            item_count: identifiers.len() as u64,
            request,
        }
    }
}

/// Why a unit did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The endpoint could not serve the request; another endpoint may.
    Endpoint,
    /// The operation itself failed for this identifier.
    Unit,
    /// No endpoint was available within the wait budget.
    PoolExhausted {
        /// Waits for a quarantine to lapse before giving up.
        attempts: u32,
    },
}

/// Success or failure of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Unit completed.
    Succeeded,
    /// Unit failed.
    Failed(FailureKind),
}

/// Result of executing a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Success flag with failure classification.
    pub status: OutcomeStatus,
    /// Time spent on the unit.
    pub elapsed: Duration,
    /// Optional failure detail.
    pub detail: Option<String>,
}

impl Outcome {
    /// Successful outcome.
    #[must_use]
    pub const fn success(elapsed: Duration) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            elapsed,
            detail: None,
        }
    }

    /// Failed outcome of the given kind.
    pub fn failure(kind: FailureKind, elapsed: Duration, detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed(kind),
            elapsed,
            detail: Some(detail.into()),
        }
    }

    /// Whether the unit succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded)
    }

    /// Failure classification, if any.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            OutcomeStatus::Succeeded => None,
            OutcomeStatus::Failed(kind) => Some(kind),
        }
    }

    /// Replace the elapsed time.
    #[must_use]
    pub const fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Executor run by [`PausableWorkerPool`](super::PausableWorkerPool) workers.
///
/// Each worker thread owns a single-threaded tokio runtime and drives
/// `execute` to completion on it, so implementations may block.
#[async_trait]
pub trait WorkerExecutor: Send + Sync + Clone + 'static {
    /// Run one unit and report how it went.
    async fn execute(&self, unit: &UnitOfWork) -> Outcome;
}

/// The operation applied to every identifier, against a chosen endpoint.
///
/// Implementations classify failures with [`FailureKind::Endpoint`] when the
/// endpoint itself was at fault and [`FailureKind::Unit`] otherwise.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    /// Process `unit` against `endpoint`.
    async fn execute(&self, unit: &UnitOfWork, endpoint: &Endpoint) -> Outcome;
}

/// Which batch hook is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookStage {
    /// Before the identifier source is read.
    Init,
    /// Before the first unit is submitted.
    PreBatch,
    /// After every unit succeeded or was accounted for.
    PostBatch,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::PreBatch => write!(f, "pre-batch"),
            Self::PostBatch => write!(f, "post-batch"),
        }
    }
}

/// Context handed to batch hooks.
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// Run identifier.
    pub job_id: Uuid,
    /// Stage being run.
    pub stage: HookStage,
    /// Batch reference from the source.
    pub batch_ref: Option<String>,
    /// Total identifiers reported by the source.
    pub total: u64,
    /// Shared execution request.
    pub request: Arc<ExecutionRequest>,
}

/// Job-level action run once at init, before, or after the batch.
pub trait BatchHook: Send + Sync {
    /// Run the hook.
    ///
    /// # Errors
    ///
    /// Any failure aborts the job.
    fn run(&self, ctx: &BatchContext) -> AppResult<()>;
}

/// The optional hooks of a job.
#[derive(Clone, Default)]
pub struct JobHooks {
    /// Runs before the source is read.
    pub init: Option<Arc<dyn BatchHook>>,
    /// Runs before the first submission.
    pub pre_batch: Option<Arc<dyn BatchHook>>,
    /// Runs after a successful batch.
    pub post_batch: Option<Arc<dyn BatchHook>>,
}

impl JobHooks {
    /// The hook registered for `stage`.
    #[must_use]
    pub fn get(&self, stage: HookStage) -> Option<&Arc<dyn BatchHook>> {
        match stage {
            HookStage::Init => self.init.as_ref(),
            HookStage::PreBatch => self.pre_batch.as_ref(),
            HookStage::PostBatch => self.post_batch.as_ref(),
        }
    }
}

impl fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHooks")
            .field("init", &self.init.is_some())
            .field("pre_batch", &self.pre_batch.is_some())
            .field("post_batch", &self.post_batch.is_some())
            .finish()
    }
}
