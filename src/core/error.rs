//! Error types for job execution.

use thiserror::Error;

use crate::core::executor::HookStage;
use crate::core::worker_pool::PoolError;
use crate::infra::queue::QueueError;

/// Errors produced while configuring or running a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid settings detected before any work started.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// No endpoint became available within the wait budget.
    #[error("endpoint pool exhausted after {attempts} wait attempts")]
    PoolExhausted {
        /// Number of times the pool waited for a quarantine to lapse.
        attempts: u32,
    },
    /// The endpoint pool has been closed.
    #[error("endpoint pool is closed")]
    EndpointPoolClosed,
    /// A unit failed while the job was configured to stop on first failure.
    #[error("unit `{identifier}` failed: {detail}")]
    UnitFailed {
        /// Identifier (or batch) of the failed unit.
        identifier: String,
        /// Failure detail reported by the executor.
        detail: String,
    },
    /// Staging queue failure.
    #[error("staging queue error: {0}")]
    Queue(QueueError),
    /// Worker pool failure.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    /// The identifier source failed.
    #[error("identifier source error: {0}")]
    Source(#[source] anyhow::Error),
    /// An init, pre-batch or post-batch hook failed.
    #[error("{stage} hook failed: {source}")]
    Hook {
        /// Which hook failed.
        stage: HookStage,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// A supporting thread could not be started.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Queue(other),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
