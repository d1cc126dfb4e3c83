//! Job execution core: endpoint selection, the worker pool, dispatch,
//! progress monitoring and the controller tying them together.

pub mod controller;
pub mod dispatch;
pub mod endpoint_pool;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod source;
pub mod state;
pub mod worker_pool;

pub use controller::{JobController, StagingQueue};
pub use dispatch::{EndpointDispatcher, RetryPolicy};
pub use endpoint_pool::{Endpoint, EndpointPool, PoolPolicy};
pub use error::{AppResult, JobError};
pub use executor::{
    BatchContext, BatchHook, ExecutionRequest, FailureKind, HookStage, JobHooks, Outcome, OutcomeStatus,
    UnitExecutor, UnitOfWork, WorkerExecutor,
};
pub use monitor::{Monitor, ProgressReport, ProgressSample};
pub use source::IdentifierSource;
pub use state::{JobPhase, JobReport, JobState, Snapshot};
pub use worker_pool::{
    CompletedUnit, PausableWorkerPool, PendingOutcome, PoolControl, PoolError, PoolStats, SlowUnit,
};
