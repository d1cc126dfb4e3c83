//! Shared job counters and lifecycle phase.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::worker_pool::SlowUnit;

/// Lifecycle of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    /// Configured, not yet submitting.
    Init,
    /// Submitting and executing units.
    Running,
    /// Workers hold off starting new units.
    Paused,
    /// Every identifier was processed.
    Completed,
    /// Stopped on request.
    Stopped,
    /// Aborted by a fatal failure.
    Failed,
}

impl JobPhase {
    /// Whether the phase is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    const fn can_move_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Init, Self::Running | Self::Paused)
            | (Self::Running, Self::Paused)
            | (Self::Paused, Self::Running) => true,
            (from, to) => !from.is_terminal() && to.is_terminal(),
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Counters shared by the controller, monitor and control surface.
#[derive(Debug)]
pub struct JobState {
    job_id: Uuid,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total: AtomicU64,
    discarded: AtomicU64,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    thread_count: AtomicUsize,
    started: Mutex<Option<Instant>>,
    phase: Mutex<JobPhase>,
}

impl JobState {
    /// Fresh state for a run with `thread_count` workers.
    #[must_use]
    pub fn new(thread_count: usize) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            thread_count: AtomicUsize::new(thread_count),
            started: Mutex::new(None),
            phase: Mutex::new(JobPhase::Init),
        }
    }

    /// Run identifier.
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        *self.phase.lock()
    }

    /// Move to `next` if the lifecycle allows it. Terminal phases are sticky.
    pub fn transition(&self, next: JobPhase) -> bool {
        let mut phase = self.phase.lock();
        if *phase == next {
            return true;
        }
        if phase.can_move_to(next) {
            *phase = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_started(&self, at: Instant) {
        *self.started.lock() = Some(at);
    }

    /// When the run started.
    #[must_use]
    pub fn started(&self) -> Option<Instant> {
        *self.started.lock()
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Release);
    }

    pub(crate) fn add_succeeded(&self, n: u64) {
        self.succeeded.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn add_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn set_discarded(&self, n: u64) {
        self.discarded.store(n, Ordering::Release);
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Flag a stop. Returns `false` if one was already requested.
    pub(crate) fn request_stop(&self) -> bool {
        !self.stop_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_thread_count(&self, n: usize) {
        self.thread_count.store(n, Ordering::Release);
    }

    /// Identifiers processed successfully.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Acquire)
    }

    /// Identifiers that failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    /// Identifiers reported by the source.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Units discarded from the backlog on stop or abort.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Acquire)
    }

    /// Whether the job is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Configured worker thread count.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    /// Point-in-time view of the counters.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let succeeded = self.succeeded();
        let failed = self.failed();
        let elapsed = self
            .started()
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
        #[allow(clippy::cast_precision_loss)]
        let rate = if elapsed.is_zero() {
            0.0
        } else {
            (succeeded + failed) as f64 / elapsed.as_secs_f64()
        };
        Snapshot {
            job_id: self.job_id,
            phase: self.phase(),
            succeeded,
            failed,
            total: self.total(),
            discarded: self.discarded(),
            rate,
            paused: self.is_paused(),
            thread_count: self.thread_count(),
            elapsed,
        }
    }
}

/// Point-in-time view of a job, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Run identifier.
    pub job_id: Uuid,
    /// Lifecycle phase.
    pub phase: JobPhase,
    /// Identifiers processed successfully.
    pub succeeded: u64,
    /// Identifiers that failed.
    pub failed: u64,
    /// Identifiers reported by the source.
    pub total: u64,
    /// Units discarded on stop or abort.
    pub discarded: u64,
    /// Average identifiers per second since the start.
    pub rate: f64,
    /// Whether the job is paused.
    pub paused: bool,
    /// Configured worker thread count.
    pub thread_count: usize,
    /// Time since the start.
    pub elapsed: Duration,
}

/// Final summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    /// Counters at the end of the run.
    pub snapshot: Snapshot,
    /// Slowest units, slowest first.
    pub slowest: Vec<SlowUnit>,
    /// What ended the run when it did not complete normally.
    pub terminated_by: Option<String>,
}

impl JobReport {
    /// Final phase.
    #[must_use]
    pub const fn phase(&self) -> JobPhase {
        self.snapshot.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let state = JobState::new(1);
        assert_eq!(state.phase(), JobPhase::Init);
        assert!(state.transition(JobPhase::Running));
        assert!(state.transition(JobPhase::Paused));
        assert!(state.transition(JobPhase::Running));
        assert!(state.transition(JobPhase::Stopped));
        assert!(!state.transition(JobPhase::Running));
        assert!(!state.transition(JobPhase::Completed));
        assert_eq!(state.phase(), JobPhase::Stopped);
    }

    #[test]
    fn stop_request_is_idempotent() {
        let state = JobState::new(1);
        assert!(state.request_stop());
        assert!(!state.request_stop());
        assert!(state.stop_requested());
    }

    #[test]
    fn snapshot_rate_uses_processed_count() {
        let state = JobState::new(2);
        let start = Instant::now();
        state.mark_started(start);
        state.add_succeeded(8);
        state.add_failed(2);

        let snapshot = state.snapshot(start + Duration::from_secs(5));
        assert_eq!(snapshot.succeeded, 8);
        assert_eq!(snapshot.failed, 2);
        assert!((snapshot.rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.thread_count, 2);
    }

    #[test]
    fn phase_serializes_in_upper_case() {
        assert_eq!(serde_json::to_string(&JobPhase::Completed).unwrap(), "\"COMPLETED\"");
        assert_eq!(JobPhase::Paused.to_string(), "PAUSED");
    }
}
