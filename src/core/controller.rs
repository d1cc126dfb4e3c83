//! Drives one job run from the identifier source to the final report.
//!
//! The controller thread pulls identifiers into a staging queue, groups them
//! into units and submits them to a [`PausableWorkerPool`] whose workers run
//! an [`EndpointDispatcher`]. Completed units flow back over the pool's
//! completion channel and are tallied on the controller thread, so counters
//! have a single writer.
//!
//! Two ticker threads run next to it: one logs progress through the
//! [`Monitor`], the other polls the command file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::infra::queue::{IdentifierQueue, RingQueue, SpilloverQueue};
use crate::runtime::{CommandWatcher, JobControl, Ticker};
use crate::util::clock::SharedClock;

use super::dispatch::EndpointDispatcher;
use super::endpoint_pool::EndpointPool;
use super::error::JobError;
use super::executor::{BatchContext, ExecutionRequest, FailureKind, HookStage, JobHooks, UnitExecutor, UnitOfWork};
use super::monitor::{Monitor, ProgressSample};
use super::source::IdentifierSource;
use super::state::{JobPhase, JobReport, JobState};
use super::worker_pool::{CompletedUnit, PausableWorkerPool, PoolControl, SlowUnit};

/// Staging queue between the source and the worker pool.
pub type StagingQueue = Box<dyn IdentifierQueue<String>>;

// Identifiers pulled from the source per pump iteration.
const PULL_CHUNK: usize = 1024;
// Pulled identifiers between progress log lines.
const PROGRESS_EVERY: u64 = 25_000;
// Longest the pump sleeps waiting for a completion.
const IDLE_WAIT: Duration = Duration::from_millis(50);

type JobPool = PausableWorkerPool<EndpointDispatcher>;

/// Build the staging queue the configuration asks for.
///
/// # Errors
///
/// `JobError::Configuration` if the spill directory is unusable.
pub fn staging_queue(config: &JobConfig) -> Result<StagingQueue, JobError> {
    let queue: StagingQueue = if config.spill_to_disk {
        Box::new(SpilloverQueue::<String>::new(
            config.spill_max_in_memory,
            config.spill_directory(),
        )?)
    } else {
        Box::new(RingQueue::<String>::new(config.spill_max_in_memory))
    };
    Ok(queue)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Completed,
    Stopped,
}

/// A configured job, ready to [`run`](Self::run) once.
///
/// Build one with [`JobBuilder`](crate::builders::JobBuilder).
pub struct JobController {
    config: JobConfig,
    source: Box<dyn IdentifierSource>,
    executor: Arc<dyn UnitExecutor>,
    endpoints: Arc<EndpointPool>,
    hooks: JobHooks,
    variables: HashMap<String, String>,
    staging: StagingQueue,
    clock: SharedClock,
    state: Arc<JobState>,
    control: JobControl,
    slowest: Vec<SlowUnit>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("job_id", &self.state.job_id())
            .field("config", &self.config)
            .field("endpoints", &self.endpoints)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl JobController {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: JobConfig,
        source: Box<dyn IdentifierSource>,
        executor: Arc<dyn UnitExecutor>,
        endpoints: Arc<EndpointPool>,
        hooks: JobHooks,
        variables: HashMap<String, String>,
        staging: StagingQueue,
        clock: SharedClock,
    ) -> Self {
        let state = Arc::new(JobState::new(config.thread_count));
        let control = JobControl::new(Arc::clone(&state), Arc::clone(&clock));
        Self {
            config,
            source,
            executor,
            endpoints,
            hooks,
            variables,
            staging,
            clock,
            state,
            control,
            slowest: Vec::new(),
        }
    }

    /// Run identifier.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.state.job_id()
    }

    /// Handle for pausing, resuming, resizing or stopping the run.
    #[must_use]
    pub fn control(&self) -> JobControl {
        self.control.clone()
    }

    /// Configuration of this run.
    #[must_use]
    pub const fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run the job to completion, stop or failure.
    ///
    /// # Errors
    ///
    /// Any fatal condition ends the run in [`JobPhase::Failed`] and is
    /// returned here. The report is still available from
    /// [`JobControl::report`].
    pub fn run(mut self) -> Result<JobReport, JobError> {
        info!(
            job_id = %self.state.job_id(),
            thread_count = self.config.thread_count,
            batch_size = self.config.batch_size,
            policy = %self.endpoints.policy(),
            endpoints = self.endpoints.all().len(),
            spill_to_disk = self.config.spill_to_disk,
            "Starting job"
        );
        self.state.mark_started(self.clock.now());
        let result = self.drive();
        self.finish(result)
    }

    fn drive(&mut self) -> Result<Ending, JobError> {
        let request = self.open_source()?;

        if self.state.total() == 0 {
            info!(job_id = %self.state.job_id(), "Source is empty: nothing to process");
            if self.config.hooks_when_empty {
                self.run_hook(HookStage::PreBatch, &request)?;
                self.run_hook(HookStage::PostBatch, &request)?;
            }
            return Ok(Ending::Completed);
        }

        self.run_hook(HookStage::PreBatch, &request)?;
        self.state.transition(JobPhase::Running);
        if self.state.is_paused() {
            self.state.transition(JobPhase::Paused);
        }

        let ending = self.process(&request)?;
        if ending == Ending::Completed {
            self.run_hook(HookStage::PostBatch, &request)?;
        }
        Ok(ending)
    }

    fn open_source(&mut self) -> Result<Arc<ExecutionRequest>, JobError> {
        self.source.open().map_err(JobError::Source)?;
        let total = self.source.total_count();
        self.state.set_total(total);
        let batch_ref = self.source.batch_ref();
        info!(
            job_id = %self.state.job_id(),
            total,
            batch_ref = batch_ref.as_deref().unwrap_or(""),
            "Identifier source opened"
        );

        let request = Arc::new(ExecutionRequest::new(batch_ref, self.variables.clone()));
        self.run_hook(HookStage::Init, &request)?;
        Ok(request)
    }

    fn run_hook(&self, stage: HookStage, request: &Arc<ExecutionRequest>) -> Result<(), JobError> {
        let Some(hook) = self.hooks.get(stage) else {
            return Ok(());
        };
        let ctx = BatchContext {
            job_id: self.state.job_id(),
            stage,
            batch_ref: request.batch_ref.clone(),
            total: self.state.total(),
            request: Arc::clone(request),
        };
        hook.run(&ctx).map_err(|source| JobError::Hook { stage, source })?;
        info!(job_id = %self.state.job_id(), %stage, "Hook completed");
        Ok(())
    }

    fn process(&mut self, request: &Arc<ExecutionRequest>) -> Result<Ending, JobError> {
        let dispatcher = EndpointDispatcher::new(
            Arc::clone(&self.endpoints),
            Arc::clone(&self.executor),
            self.config.retry_policy(),
            Arc::clone(&self.clock),
        );
        let pool = Arc::new(JobPool::new(self.config.worker_pool_config(), dispatcher)?);
        self.control.attach(Arc::clone(&pool) as Arc<dyn PoolControl>);

        let pumped = match self.start_tickers(&pool) {
            Ok(tickers) => {
                let pumped = self.pump(&pool, request);
                self.wind_down(&pool, pumped.as_ref().ok().copied());
                drop(tickers);
                pumped
            }
            Err(e) => {
                self.wind_down(&pool, None);
                Err(e)
            }
        };
        self.slowest = pool.slowest_units();
        pumped
    }

    fn start_tickers(&self, pool: &Arc<JobPool>) -> Result<Vec<Ticker>, JobError> {
        let mut tickers = Vec::with_capacity(2);

        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let stats_pool = Arc::clone(pool);
        let mut monitor = Monitor::new(self.clock.now(), self.config.rate_samples);
        let monitor_ticker = Ticker::spawn("job-monitor", self.config.monitor_interval(), move || {
            let succeeded = state.succeeded();
            let failed = state.failed();
            let sample = ProgressSample {
                at: clock.now(),
                completed: succeeded + failed,
                failed,
                total: state.total(),
                paused: state.is_paused(),
                active_threads: stats_pool.stats().active_units,
            };
            let report = monitor.tick(&sample);
            info!(job_id = %state.job_id(), "{}", report.message);
        })
        .map_err(|e| JobError::Internal(format!("failed to start monitor thread: {e}")))?;
        tickers.push(monitor_ticker);

        if let Some(path) = &self.config.command_file {
            let mut watcher = CommandWatcher::new(path.clone(), self.control.clone());
            info!(path = %path.display(), "Watching command file");
            let command_ticker = Ticker::spawn("job-commands", self.config.command_poll_interval(), move || {
                watcher.poll();
            })
            .map_err(|e| JobError::Internal(format!("failed to start command file thread: {e}")))?;
            tickers.push(command_ticker);
        }

        Ok(tickers)
    }

    /// Feed the pool until the source is exhausted and every unit has
    /// finished, or until a stop or a fatal failure.
    fn pump(&mut self, pool: &JobPool, request: &Arc<ExecutionRequest>) -> Result<Ending, JobError> {
        let batch_size = self.config.batch_size;
        let mut batch: Vec<String> = Vec::with_capacity(batch_size);
        let mut in_flight = 0usize;
        let mut next_unit_id = 0u64;
        let mut pulled = 0u64;
        let mut source_done = false;

        loop {
            while let Ok(done) = pool.completions().try_recv() {
                in_flight = in_flight.saturating_sub(1);
                self.record(&done)?;
            }
            if self.state.stop_requested() {
                return Ok(Ending::Stopped);
            }

            let mut staged = 0;
            if !source_done {
                (source_done, staged) = self.stage(&mut pulled)?;
            }

            let limit = self.state.thread_count() + self.config.in_flight_limit;
            let mut submitted = 0;
            while in_flight < limit {
                while batch.len() < batch_size {
                    match self.staging.poll()? {
                        Some(identifier) => batch.push(identifier),
                        None => break,
                    }
                }
                let ready = batch.len() == batch_size || (source_done && !batch.is_empty());
                if !ready {
                    break;
                }
                let unit = UnitOfWork::batch(
                    next_unit_id,
                    &batch,
                    &self.config.batch_delimiter,
                    Arc::clone(request),
                );
                batch.clear();
                next_unit_id += 1;
                match pool.submit(unit) {
                    Ok(_) => {}
                    // A stop closes the pool to new units while this loop runs.
                    Err(_) if self.state.stop_requested() => return Ok(Ending::Stopped),
                    Err(e) => return Err(e.into()),
                }
                in_flight += 1;
                submitted += 1;
            }

            if source_done && batch.is_empty() && self.staging.is_empty() && in_flight == 0 {
                info!(job_id = %self.state.job_id(), units = next_unit_id, "All units finished");
                return Ok(Ending::Completed);
            }

            if staged == 0 && submitted == 0 && in_flight > 0 {
                match pool.completions().recv_timeout(IDLE_WAIT) {
                    Ok(done) => {
                        in_flight -= 1;
                        self.record(&done)?;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(JobError::Internal("worker pool completion channel closed".into()));
                    }
                }
            }
        }
    }

    /// Pull up to one chunk of identifiers into the staging queue.
    /// Returns whether the source is exhausted and how many were staged.
    fn stage(&mut self, pulled: &mut u64) -> Result<(bool, usize), JobError> {
        let mut staged = 0;
        while staged < PULL_CHUNK && !self.staging.is_full() {
            let Some(identifier) = self.source.next_identifier().map_err(JobError::Source)? else {
                debug!(job_id = %self.state.job_id(), pulled = *pulled, "Identifier source exhausted");
                return Ok((true, staged));
            };
            *pulled += 1;
            if *pulled % PROGRESS_EVERY == 0 {
                info!(job_id = %self.state.job_id(), pulled = *pulled, "Identifiers received from source");
            }
            if identifier.trim().is_empty() {
                debug!(job_id = %self.state.job_id(), "Skipping blank identifier");
                continue;
            }
            if !self.staging.offer(identifier)? {
                return Err(JobError::Internal("staging queue refused an identifier".into()));
            }
            staged += 1;
        }
        Ok((false, staged))
    }

    /// Tally a finished unit. Returns the fatal error it causes, if any.
    fn record(&self, done: &CompletedUnit) -> Result<(), JobError> {
        let items = done.unit.item_count;
        let Some(kind) = done.outcome.failure_kind() else {
            self.state.add_succeeded(items);
            return Ok(());
        };

        self.state.add_failed(items);
        let detail = done.outcome.detail.clone().unwrap_or_default();
        warn!(
            job_id = %self.state.job_id(),
            unit_id = done.unit.id,
            identifier = %done.unit.identifier,
            worker_id = done.worker_id,
            ?kind,
            detail = detail.as_str(),
            "Unit failed"
        );

        match kind {
            FailureKind::PoolExhausted { attempts } => Err(JobError::PoolExhausted { attempts }),
            _ if self.config.fail_on_error => Err(JobError::UnitFailed {
                identifier: done.unit.identifier.clone(),
                detail,
            }),
            _ => Ok(()),
        }
    }

    /// Shut the pool down and tally whatever finished meanwhile.
    fn wind_down(&self, pool: &JobPool, ending: Option<Ending>) {
        let drain_timeout = self.config.drain_timeout();
        if ending == Some(Ending::Completed) {
            pool.shutdown(drain_timeout);
        } else {
            let discarded = pool.shutdown_now(drain_timeout);
            self.state.set_discarded(discarded);
            if discarded > 0 {
                info!(job_id = %self.state.job_id(), discarded, "Discarded units that had not started");
            }
        }
        self.control.detach();

        while let Ok(done) = pool.completions().try_recv() {
            // The run is already ending; later failures only count.
            let _ = self.record(&done);
        }
    }

    fn finish(mut self, result: Result<Ending, JobError>) -> Result<JobReport, JobError> {
        let job_id = self.state.job_id();
        if let Err(e) = self.staging.close() {
            warn!(%job_id, error = %e, "Failed to release staging queue");
        }
        if let Err(e) = self.source.close() {
            warn!(%job_id, error = %e, "Failed to close identifier source");
        }
        self.endpoints.close();

        let (phase, terminated_by) = match &result {
            Ok(Ending::Completed) => (JobPhase::Completed, None),
            Ok(Ending::Stopped) => (JobPhase::Stopped, Some("stop requested".to_string())),
            Err(e) => (JobPhase::Failed, Some(e.to_string())),
        };
        self.state.transition(phase);

        let snapshot = self.state.snapshot(self.clock.now());
        let elapsed_ms = u64::try_from(snapshot.elapsed.as_millis()).unwrap_or(u64::MAX);
        if phase == JobPhase::Failed {
            error!(
                %job_id,
                succeeded = snapshot.succeeded,
                failed = snapshot.failed,
                total = snapshot.total,
                discarded = snapshot.discarded,
                elapsed_ms,
                reason = terminated_by.as_deref().unwrap_or(""),
                "Job failed"
            );
        } else {
            info!(
                %job_id,
                %phase,
                succeeded = snapshot.succeeded,
                failed = snapshot.failed,
                total = snapshot.total,
                discarded = snapshot.discarded,
                elapsed_ms,
                "Job finished"
            );
        }
        for (rank, slow) in self.slowest.iter().enumerate() {
            info!(
                %job_id,
                rank = rank + 1,
                identifier = %slow.identifier,
                elapsed_ms = u64::try_from(slow.elapsed.as_millis()).unwrap_or(u64::MAX),
                "Slow unit"
            );
        }

        let report = JobReport {
            snapshot,
            slowest: std::mem::take(&mut self.slowest),
            terminated_by,
        };
        self.control.store_report(report.clone());
        result.map(|_| report)
    }
}
