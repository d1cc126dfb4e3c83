//! `PausableWorkerPool` on dedicated OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: idle workers block in `select!` on the backlog and the
//!   retire channel; paused workers block on the gate's condvar
//! - **Blocking backpressure**: a full backlog blocks the producer
//! - **Clean shutdown**: dropping the sender unblocks workers naturally

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::{UnitOfWork, WorkerExecutor};

use super::{
    CompletedUnit, PauseGate, PendingOutcome, PoolControl, PoolCounters, PoolError, PoolStats,
    SlowUnit, SlowestUnits, WorkerTask,
};

// How often a producer blocked on a full backlog re-checks for shutdown.
const SEND_RECHECK: Duration = Duration::from_millis(50);

/// State shared between the pool handle and its workers.
struct Shared<E> {
    executor: E,
    task_rx: Receiver<WorkerTask>,
    retire_rx: Receiver<()>,
    completion_tx: Sender<CompletedUnit>,
    gate: PauseGate,
    counters: PoolCounters,
    slowest: Mutex<SlowestUnits>,
    shutdown: AtomicBool,
    discard: AtomicBool,
    live_workers: AtomicUsize,
}

/// Bounded worker pool with a pause gate, live resizing and outcome tracking.
pub struct PausableWorkerPool<E: WorkerExecutor> {
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Backlog sender. Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<WorkerTask>>>,

    /// Retire tokens; each one makes an idle worker exit.
    retire_tx: Sender<()>,

    /// Finished units, in completion order.
    completion_rx: Receiver<CompletedUnit>,

    /// State the workers see.
    shared: Arc<Shared<E>>,

    /// Desired number of workers.
    target_workers: AtomicUsize,

    /// Next worker thread id.
    next_worker_id: AtomicUsize,

    /// Whether the one-time "queue is full" notice has been logged.
    queue_full_logged: AtomicBool,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: WorkerExecutor> PausableWorkerPool<E> {
    /// Create a new pool and spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<WorkerTask>(config.max_queue_depth);
        let (retire_tx, retire_rx) = unbounded();
        let (completion_tx, completion_rx) = unbounded();

        let shared = Arc::new(Shared {
            executor,
            task_rx,
            retire_rx,
            completion_tx,
            gate: PauseGate::new(),
            counters: PoolCounters::default(),
            slowest: Mutex::new(SlowestUnits::new(config.slowest_capacity)),
            shutdown: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
        });

        let pool = Self {
            task_tx: Mutex::new(Some(task_tx)),
            retire_tx,
            completion_rx,
            shared,
            target_workers: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            queue_full_logged: AtomicBool::new(false),
            workers: Mutex::new(Vec::with_capacity(config.worker_count)),
            config,
        };
        pool.spawn_workers(pool.config.worker_count)?;

        info!(
            worker_count = pool.config.worker_count,
            max_queue_depth = pool.config.max_queue_depth,
            slowest_capacity = pool.config.slowest_capacity,
            "PausableWorkerPool initialized with dedicated OS threads"
        );

        Ok(pool)
    }

    /// Submit a unit, blocking while the backlog is full.
    ///
    /// # Errors
    ///
    /// `PoolError::PoolShutdown` if the pool is (or becomes) shut down.
    pub fn submit(&self, unit: UnitOfWork) -> Result<PendingOutcome, PoolError> {
        if self.shared.shutdown.load(Ordering::Acquire) || self.shared.discard.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let sender = {
            let guard = self.task_tx.lock();
            guard.as_ref().cloned().ok_or(PoolError::PoolShutdown)?
        };

        let unit_id = unit.id;
        let (reply, rx) = bounded(1);
        let task = WorkerTask {
            unit,
            reply,
            submitted_at: Instant::now(),
        };

        let counters = &self.shared.counters;
        counters.submitted_units.fetch_add(1, Ordering::Relaxed);
        counters.queued_units.fetch_add(1, Ordering::Relaxed);

        let sent = match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                if !self.queue_full_logged.swap(true, Ordering::AcqRel) {
                    info!(
                        size = self.config.max_queue_depth,
                        "queue is full: size = {} (will only appear once)",
                        self.config.max_queue_depth
                    );
                }
                self.send_blocking(&sender, task)
            }
            Err(TrySendError::Disconnected(_)) => Err(PoolError::PoolShutdown),
        };

        match sent {
            Ok(()) => {
                debug!(unit_id, "Unit submitted to worker pool");
                Ok(PendingOutcome::new(unit_id, rx))
            }
            Err(e) => {
                counters.submitted_units.fetch_sub(1, Ordering::Relaxed);
                counters.queued_units.fetch_sub(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn send_blocking(&self, sender: &Sender<WorkerTask>, mut task: WorkerTask) -> Result<(), PoolError> {
        loop {
            match sender.send_timeout(task, SEND_RECHECK) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.shared.shutdown.load(Ordering::Acquire) || self.shared.discard.load(Ordering::Acquire) {
                        return Err(PoolError::PoolShutdown);
                    }
                    task = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(PoolError::PoolShutdown),
            }
        }
    }

    /// Stop workers from starting new units. In-flight units run to completion.
    pub fn pause(&self) {
        if self.shared.gate.pause() {
            info!("Worker pool paused");
        }
    }

    /// Let workers start units again.
    pub fn resume(&self) {
        if self.shared.gate.resume() {
            info!("Worker pool resumed");
        }
    }

    /// Whether the pool is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_paused()
    }

    /// Whether the pool still accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Grow or shrink the number of worker threads.
    ///
    /// Shrinking retires idle workers; busy workers finish their unit first.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if `count` is zero
    /// - `PoolError::PoolShutdown` after shutdown
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn set_worker_count(&self, count: usize) -> Result<(), PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidConfig("worker count must be greater than 0".into()));
        }
        if !self.is_running() {
            return Err(PoolError::PoolShutdown);
        }
        let current = self.target_workers.load(Ordering::Acquire);
        if count > current {
            let mut needed = count - current;
            // Reclaim retire tokens no worker has picked up yet.
            while needed > 0 && self.shared.retire_rx.try_recv().is_ok() {
                needed -= 1;
                self.target_workers.fetch_add(1, Ordering::AcqRel);
            }
            self.spawn_workers(needed)?;
        } else {
            for _ in count..current {
                self.retire_tx
                    .send(())
                    .map_err(|e| PoolError::Internal(e.to_string()))?;
                self.target_workers.fetch_sub(1, Ordering::AcqRel);
            }
        }
        info!(from = current, to = count, "Worker count changed");
        Ok(())
    }

    /// Target number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.target_workers.load(Ordering::Acquire)
    }

    /// Worker threads currently alive.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.worker_count())
    }

    /// Slowest units seen so far, slowest first.
    #[must_use]
    pub fn slowest_units(&self) -> Vec<SlowUnit> {
        self.shared.slowest.lock().ranked()
    }

    /// Channel of finished units.
    #[must_use]
    pub fn completions(&self) -> &Receiver<CompletedUnit> {
        &self.completion_rx
    }

    /// Shut down after the backlog drains.
    ///
    /// Opens the pause gate, drops the sender so workers exit once the backlog
    /// is empty, and waits up to `drain_timeout` for them. Workers still
    /// running after that are detached.
    pub fn shutdown(&self, drain_timeout: Duration) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        self.shared.gate.resume();
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let worker_count = handles.len();
        let detached = join_with_deadline(handles, drain_timeout);

        info!(
            worker_count,
            detached,
            discarded = self.shared.counters.discarded_units.load(Ordering::Relaxed),
            "Worker pool shut down complete"
        );
    }

    /// Shut down without running the backlog.
    ///
    /// Units that have not started are discarded (their [`PendingOutcome`]
    /// reports `PoolError::Cancelled`); running units are awaited up to
    /// `drain_timeout`. Returns the number of discarded units.
    pub fn shutdown_now(&self, drain_timeout: Duration) -> u64 {
        self.discard_backlog();

        let counters = &self.shared.counters;
        while let Ok(task) = self.shared.task_rx.try_recv() {
            counters.queued_units.fetch_sub(1, Ordering::Relaxed);
            counters.discarded_units.fetch_add(1, Ordering::Relaxed);
            drop(task);
        }

        self.shutdown(drain_timeout);
        counters.discarded_units.load(Ordering::Relaxed)
    }

    /// Stop starting queued units and refuse new submissions.
    ///
    /// Workers finish the unit they are running and exit. Queued units stay in
    /// the backlog until [`shutdown_now`](Self::shutdown_now) counts them.
    pub fn discard_backlog(&self) {
        if !self.shared.discard.swap(true, Ordering::AcqRel) {
            info!("Worker pool no longer starting queued units");
        }
    }

    /// Whether [`discard_backlog`](Self::discard_backlog) has been called.
    #[must_use]
    pub fn is_discarding(&self) -> bool {
        self.shared.discard.load(Ordering::Acquire)
    }

    fn spawn_workers(&self, count: usize) -> Result<(), PoolError> {
        let mut workers = self.workers.lock();
        workers.retain(|handle| !handle.is_finished());
        for _ in 0..count {
            let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
            let handle = spawn_worker(worker_id, Arc::clone(&self.shared), self.config.thread_stack_size)?;
            workers.push(handle);
            self.target_workers.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl<E: WorkerExecutor> PoolControl for PausableWorkerPool<E> {
    fn pause(&self) {
        Self::pause(self);
    }

    fn resume(&self) {
        Self::resume(self);
    }

    fn is_paused(&self) -> bool {
        Self::is_paused(self)
    }

    fn set_worker_count(&self, count: usize) -> Result<(), PoolError> {
        Self::set_worker_count(self, count)
    }

    fn worker_count(&self) -> usize {
        Self::worker_count(self)
    }

    fn stats(&self) -> PoolStats {
        Self::stats(self)
    }

    fn discard_backlog(&self) {
        Self::discard_backlog(self);
    }
}

impl<E: WorkerExecutor> Drop for PausableWorkerPool<E> {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers in Drop
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            self.shared.gate.resume();
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!("PausableWorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Join `handles`, giving all of them together at most `timeout`.
/// Returns how many were left running.
fn join_with_deadline(handles: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    let mut detached = 0;
    for (idx, handle) in handles.into_iter().enumerate() {
        let (tx, rx) = std::sync::mpsc::channel();
        let joiner = thread::spawn(move || {
            let result = handle.join();
            let _ = tx.send(result.is_ok());
        });

        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(true) => {
                debug!(worker = idx, "Worker joined successfully");
                let _ = joiner.join();
            }
            Ok(false) => {
                warn!(worker = idx, "Worker panicked");
                let _ = joiner.join();
            }
            Err(_) => {
                warn!(worker = idx, "Worker did not exit within drain timeout - detaching");
                detached += 1;
            }
        }
    }
    detached
}

/// Spawn a worker thread.
fn spawn_worker<E: WorkerExecutor>(
    worker_id: usize,
    shared: Arc<Shared<E>>,
    stack_size: usize,
) -> Result<JoinHandle<()>, PoolError> {
    thread::Builder::new()
        .name(format!("pl-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            shared.live_workers.fetch_add(1, Ordering::AcqRel);
            debug!(worker_id, "Worker thread started");

            // Each worker has its own single-threaded tokio runtime
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => worker_loop(worker_id, &shared, &rt),
                Err(e) => error!(worker_id, error = %e, "Failed to create worker runtime"),
            }

            shared.live_workers.fetch_sub(1, Ordering::AcqRel);
            debug!(worker_id, "Worker thread exiting");
        })
        .map_err(|e| PoolError::Internal(format!("failed to spawn worker thread: {e}")))
}

enum Claim {
    Unit(WorkerTask),
    Retire,
    Closed,
}

fn worker_loop<E: WorkerExecutor>(worker_id: usize, shared: &Shared<E>, rt: &tokio::runtime::Runtime) {
    let counters = &shared.counters;
    loop {
        // Paused workers do not claim units, so a discard can still reach them.
        shared.gate.wait_until_open();
        if shared.discard.load(Ordering::Acquire) {
            break;
        }

        let claim = select! {
            recv(shared.retire_rx) -> _ => Claim::Retire,
            recv(shared.task_rx) -> msg => msg.map_or(Claim::Closed, Claim::Unit),
        };
        let task = match claim {
            Claim::Unit(task) => task,
            Claim::Retire => {
                debug!(worker_id, "Worker retired");
                break;
            }
            Claim::Closed => {
                debug!(worker_id, "Worker channel closed, exiting");
                break;
            }
        };

        // The pool may have been paused between the gate check and the claim.
        if shared.gate.wait_until_open() {
            debug!(worker_id, unit_id = task.unit.id, "Worker resumed with a claimed unit");
        }
        counters.queued_units.fetch_sub(1, Ordering::Relaxed);
        if shared.discard.load(Ordering::Acquire) {
            counters.discarded_units.fetch_add(1, Ordering::Relaxed);
            break;
        }

        counters.active_units.fetch_add(1, Ordering::Relaxed);
        let queued_for = task.submitted_at.elapsed();
        debug!(worker_id, unit_id = task.unit.id, "Worker executing unit");

        let outcome = rt.block_on(shared.executor.execute(&task.unit));

        counters.active_units.fetch_sub(1, Ordering::Relaxed);
        if outcome.is_success() {
            counters.completed_units.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed_units.fetch_add(1, Ordering::Relaxed);
        }
        shared.slowest.lock().record(&task.unit.identifier, outcome.elapsed);
        debug!(
            worker_id,
            unit_id = task.unit.id,
            success = outcome.is_success(),
            elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Worker completed unit"
        );

        let _ = task.reply.send(outcome.clone());
        let _ = shared.completion_tx.send(CompletedUnit {
            unit: task.unit,
            outcome,
            worker_id,
            queued_for,
        });
    }
}
