//! Live control handle for a running job.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::state::{JobPhase, JobReport, JobState, Snapshot};
use crate::core::worker_pool::PoolControl;
use crate::util::clock::SharedClock;

struct Inner {
    state: Arc<JobState>,
    pool: Mutex<Option<Arc<dyn PoolControl>>>,
    report: Mutex<Option<JobReport>>,
    clock: SharedClock,
}

/// Cloneable handle to pause, resume, resize or stop a job from any thread.
///
/// Requests made before the worker pool exists are remembered in the job
/// state and applied when the pool is attached.
#[derive(Clone)]
pub struct JobControl {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobControl")
            .field("job_id", &self.inner.state.job_id())
            .field("phase", &self.inner.state.phase())
            .finish_non_exhaustive()
    }
}

impl JobControl {
    pub(crate) fn new(state: Arc<JobState>, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                pool: Mutex::new(None),
                report: Mutex::new(None),
                clock,
            }),
        }
    }

    /// Hold off starting new units. Running units finish.
    pub fn pause(&self) {
        let state = &self.inner.state;
        if state.phase().is_terminal() {
            return;
        }
        state.set_paused(true);
        if state.phase() == JobPhase::Running {
            state.transition(JobPhase::Paused);
        }
        if let Some(pool) = self.pool() {
            pool.pause();
        }
        info!(job_id = %state.job_id(), "Job paused");
    }

    /// Start units again after a pause.
    pub fn resume(&self) {
        let state = &self.inner.state;
        if state.phase().is_terminal() {
            return;
        }
        state.set_paused(false);
        if state.phase() == JobPhase::Paused {
            state.transition(JobPhase::Running);
        }
        if let Some(pool) = self.pool() {
            pool.resume();
        }
        info!(job_id = %state.job_id(), "Job resumed");
    }

    /// Ask the job to stop. Returns `false` if a stop was already requested.
    ///
    /// Units that have not started are discarded; running units finish.
    pub fn stop(&self) -> bool {
        let state = &self.inner.state;
        if !state.request_stop() {
            return false;
        }
        // Discard first so opening the gate cannot start queued units.
        state.set_paused(false);
        if let Some(pool) = self.pool() {
            pool.discard_backlog();
            pool.resume();
        }
        info!(job_id = %state.job_id(), "Stop requested");
        true
    }

    /// Change the number of worker threads. Zero is ignored.
    pub fn set_thread_count(&self, count: usize) {
        let state = &self.inner.state;
        if count == 0 {
            warn!(job_id = %state.job_id(), "Ignoring request for zero worker threads");
            return;
        }
        state.set_thread_count(count);
        if let Some(pool) = self.pool() {
            if let Err(e) = pool.set_worker_count(count) {
                warn!(job_id = %state.job_id(), error = %e, "Failed to change worker count");
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.snapshot(self.inner.clock.now())
    }

    /// Shared job state.
    #[must_use]
    pub fn state(&self) -> &Arc<JobState> {
        &self.inner.state
    }

    /// Final report, once the run has ended.
    #[must_use]
    pub fn report(&self) -> Option<JobReport> {
        self.inner.report.lock().clone()
    }

    pub(crate) fn attach(&self, pool: Arc<dyn PoolControl>) {
        let state = &self.inner.state;
        if state.stop_requested() {
            pool.discard_backlog();
        }
        if state.is_paused() {
            pool.pause();
        }
        if pool.worker_count() != state.thread_count() {
            if let Err(e) = pool.set_worker_count(state.thread_count()) {
                warn!(job_id = %state.job_id(), error = %e, "Failed to apply pending worker count");
            }
        }
        *self.inner.pool.lock() = Some(pool);
    }

    pub(crate) fn detach(&self) {
        self.inner.pool.lock().take();
    }

    pub(crate) fn store_report(&self, report: JobReport) {
        *self.inner.report.lock() = Some(report);
    }

    fn pool(&self) -> Option<Arc<dyn PoolControl>> {
        self.inner.pool.lock().clone()
    }
}
