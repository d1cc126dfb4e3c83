//! Pausable worker pool with dedicated worker threads.
//!
//! Each worker is an OS thread with its own single-threaded tokio runtime that
//! drives a [`WorkerExecutor`](crate::core::WorkerExecutor). Units wait in a
//! bounded backlog; when it is full, `submit` blocks the producer instead of
//! rejecting the unit.
//!
//! # Key Features
//!
//! - **Pause gate**: workers check a mutex + condvar gate after claiming a unit
//!   and before starting it, so pausing never interrupts running work
//! - **Outcome tracking**: success/failure counters and a bounded ranking of
//!   the slowest units
//! - **Live resize**: the worker count can grow or shrink while running
//! - **Two shutdown modes**: drain the backlog, or discard it
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_bulk_runner::core::PausableWorkerPool;
//! use prometheus_bulk_runner::config::WorkerPoolConfig;
//!
//! let pool = PausableWorkerPool::new(
//!     WorkerPoolConfig::new().with_worker_count(4).with_max_queue_depth(100),
//!     my_executor,
//! )?;
//!
//! let pending = pool.submit(unit)?;
//! let outcome = pending.wait(Duration::from_secs(60))?;
//! pool.shutdown(Duration::from_secs(30));
//! ```

mod gate;
mod slowest;
mod threads;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::core::executor::{Outcome, UnitOfWork};

pub use gate::PauseGate;
pub use slowest::{SlowUnit, SlowestUnits};
pub use threads::PausableWorkerPool;

/// Errors that can occur when using a `PausableWorkerPool`.
#[derive(Debug)]
pub enum PoolError {
    /// The operation timed out.
    Timeout,

    /// The unit was discarded before it started.
    Cancelled,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (worker thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "operation timed out"),
            Self::Cancelled => write!(f, "unit was discarded before it started"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization and performance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Target number of worker threads.
    pub worker_count: usize,

    /// Units currently executing.
    pub active_units: u64,

    /// Units waiting in the backlog.
    pub queued_units: u64,

    /// Units that finished successfully.
    pub completed_units: u64,

    /// Units that finished with a failure.
    pub failed_units: u64,

    /// Units accepted by `submit`.
    pub submitted_units: u64,

    /// Units dropped from the backlog by `shutdown_now`.
    pub discarded_units: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_units: AtomicU64,
    pub queued_units: AtomicU64,
    pub completed_units: AtomicU64,
    pub failed_units: AtomicU64,
    pub submitted_units: AtomicU64,
    pub discarded_units: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_units: self.active_units.load(Ordering::Relaxed),
            queued_units: self.queued_units.load(Ordering::Relaxed),
            completed_units: self.completed_units.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
            submitted_units: self.submitted_units.load(Ordering::Relaxed),
            discarded_units: self.discarded_units.load(Ordering::Relaxed),
        }
    }
}

/// A unit travelling through the backlog with its reply slot.
pub(crate) struct WorkerTask {
    pub unit: UnitOfWork,
    pub reply: Sender<Outcome>,
    pub submitted_at: Instant,
}

/// Handle to the outcome of one submitted unit.
#[derive(Debug)]
pub struct PendingOutcome {
    unit_id: u64,
    rx: Receiver<Outcome>,
}

impl PendingOutcome {
    pub(crate) const fn new(unit_id: u64, rx: Receiver<Outcome>) -> Self {
        Self { unit_id, rx }
    }

    /// Sequence id of the unit.
    #[must_use]
    pub const fn unit_id(&self) -> u64 {
        self.unit_id
    }

    /// Block until the unit finishes.
    ///
    /// # Errors
    ///
    /// - `PoolError::Timeout` if the unit has not finished within `timeout`
    /// - `PoolError::Cancelled` if the unit was discarded
    pub fn wait(&self, timeout: Duration) -> Result<Outcome, PoolError> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::Cancelled),
        }
    }

    /// Take the outcome if it is already available.
    #[must_use]
    pub fn try_take(&self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

/// A finished unit as published on the completion channel.
#[derive(Debug, Clone)]
pub struct CompletedUnit {
    /// The unit that ran.
    pub unit: UnitOfWork,
    /// How it went.
    pub outcome: Outcome,
    /// Worker that ran it.
    pub worker_id: usize,
    /// Time from submission until the worker started it.
    pub queued_for: Duration,
}

/// Type-erased control over a running pool.
pub trait PoolControl: Send + Sync {
    /// Stop workers from starting new units.
    fn pause(&self);
    /// Let workers start units again.
    fn resume(&self);
    /// Whether the pool is paused.
    fn is_paused(&self) -> bool;
    /// Change the number of worker threads.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` for zero, or a spawn failure.
    fn set_worker_count(&self, count: usize) -> Result<(), PoolError>;
    /// Target number of worker threads.
    fn worker_count(&self) -> usize;
    /// Current statistics.
    fn stats(&self) -> PoolStats;
    /// Stop starting queued units; running units finish.
    fn discard_backlog(&self);
}
