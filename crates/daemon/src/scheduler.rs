//! Asynchronous encoding job scheduler.
//!
//! A single dispatch loop hands queued jobs, oldest first, to at most W
//! concurrent workers. Worker slots are semaphore permits; a permit is taken
//! before a claim is attempted and released only after the worker has
//! written the job's terminal (or re-queued) state. Claims and every later
//! write go through [`JobStore::transition`], so a job has exactly one owner
//! while it runs.
//!
//! Cancellation is advisory first: the scheduler flags the job in the store
//! and fires the worker's [`CancellationToken`]. The worker gives the encoder
//! `cancel_grace` to stop, then drops the encode future (which kills the
//! child process) and records the failure itself.

use crate::concurrency::ConcurrencyPlan;
use crate::encode::{EncodeError, EncodeRequest, EncoderAdapter, FailureKind};
use crate::error::{CoreError, CoreResult};
use crate::jobs::{HandbrakeJob, JobStatus, JobUpdate, CANCELLED_MESSAGE};
use crate::models::{new_id, HandbrakeSettings};
use crate::store::{AnalysisStore, JobStore, SettingsStore, StoreError, Transition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts at writing a worker's final state before giving up.
const FINAL_WRITE_ATTEMPTS: u32 = 3;

/// A job this process has claimed, with everything the worker needs.
#[derive(Debug, Clone)]
struct Claimed {
    job: HandbrakeJob,
    settings: HandbrakeSettings,
    owner: String,
}

struct Inner {
    analyses: Arc<dyn AnalysisStore>,
    settings: Arc<dyn SettingsStore>,
    jobs: Arc<dyn JobStore>,
    encoder: Arc<dyn EncoderAdapter>,
    plan: ConcurrencyPlan,
    slots: Arc<Semaphore>,
    wakeup: Notify,
    /// Cancel tokens of jobs running in this process.
    cancellations: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Owns the queue, the worker pool and job lifecycle transitions.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        analyses: Arc<dyn AnalysisStore>,
        settings: Arc<dyn SettingsStore>,
        jobs: Arc<dyn JobStore>,
        encoder: Arc<dyn EncoderAdapter>,
        plan: ConcurrencyPlan,
    ) -> Self {
        let permits = plan.workers.max(1) as usize;
        Self {
            inner: Arc::new(Inner {
                analyses,
                settings,
                jobs,
                encoder,
                plan,
                slots: Arc::new(Semaphore::new(permits)),
                wakeup: Notify::new(),
                cancellations: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.inner.plan
    }

    /// Worker slots currently taken.
    pub fn busy_workers(&self) -> usize {
        (self.inner.plan.workers.max(1) as usize)
            .saturating_sub(self.inner.slots.available_permits())
    }

    /// Start the dispatch loop.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        info!(workers = inner.plan.workers, "Job scheduler started");
        tokio::spawn(inner.dispatch_loop())
    }

    /// Stop dispatching new jobs. Workers already running are not waited for.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.wakeup.notify_one();
    }

    /// Create a queued job. Does not wait for it to run.
    pub fn enqueue(
        &self,
        video_analysis_id: &str,
        input_file: PathBuf,
        output_file: PathBuf,
        handbrake_settings_id: Option<String>,
    ) -> CoreResult<HandbrakeJob> {
        self.inner.analyses.get_analysis(video_analysis_id)?;

        if let Err(e) = std::fs::File::open(&input_file) {
            return Err(CoreError::validation(format!(
                "input file {} is not readable: {}",
                input_file.display(),
                e
            )));
        }
        if !input_file.is_file() {
            return Err(CoreError::validation(format!(
                "input file {} is not a regular file",
                input_file.display()
            )));
        }

        let job = HandbrakeJob::new(
            video_analysis_id.to_string(),
            handbrake_settings_id,
            input_file,
            output_file,
        );
        self.inner.jobs.insert_job(job.clone())?;
        info!(
            job_id = %job.id,
            analysis_id = %video_analysis_id,
            input = %job.input_file.display(),
            "Job queued"
        );
        self.inner.wakeup.notify_one();
        Ok(job)
    }

    /// Read-only snapshot for polling clients.
    pub fn get_status(&self, job_id: &str) -> CoreResult<HandbrakeJob> {
        Ok(self.inner.jobs.get_job(job_id)?)
    }

    /// Cancel a job.
    ///
    /// A queued job fails immediately with `"cancelled"`. A running job is
    /// flagged and its worker signalled; the worker writes the failure. A
    /// terminal job is returned unchanged.
    pub fn cancel(&self, job_id: &str) -> CoreResult<HandbrakeJob> {
        let jobs = &self.inner.jobs;
        loop {
            let job = jobs.get_job(job_id)?;
            match job.status {
                JobStatus::Completed | JobStatus::Failed => return Ok(job),
                JobStatus::Queued => {
                    let update = JobUpdate::Fail {
                        owner: None,
                        message: CANCELLED_MESSAGE.to_string(),
                    };
                    // A rejected CAS means a worker claimed it meanwhile.
                    if let Transition::Applied(job) =
                        jobs.transition(job_id, JobStatus::Queued, update)?
                    {
                        info!(job_id = %job_id, "Queued job cancelled");
                        return Ok(job);
                    }
                }
                JobStatus::Running => {
                    let job = jobs.request_cancel(job_id)?;
                    if job.status != JobStatus::Running {
                        continue;
                    }
                    if let Some(token) = self.inner.cancel_token(job_id) {
                        token.cancel();
                    }
                    info!(job_id = %job_id, "Cancel requested for running job");
                    return Ok(job);
                }
            }
        }
    }
}

impl Inner {
    fn cancel_token(&self, job_id: &str) -> Option<CancellationToken> {
        self.cancellations
            .lock()
            .ok()
            .and_then(|map| map.get(job_id).cloned())
    }

    fn register_cancel(&self, job_id: &str, token: CancellationToken) {
        if let Ok(mut map) = self.cancellations.lock() {
            map.insert(job_id.to_string(), token);
        }
    }

    fn unregister_cancel(&self, job_id: &str) {
        if let Ok(mut map) = self.cancellations.lock() {
            map.remove(job_id);
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.cancelled() => break,
            };

            match self.claim_next() {
                Ok(Some(claimed)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(worker.run_job(claimed, permit));
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "Dispatch failed, retrying after poll interval");
                }
            }

            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.plan.poll_interval) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        info!("Job scheduler stopped dispatching");
    }

    /// Claim the oldest dispatchable queued job.
    ///
    /// Jobs that can no longer run go `queued -> failed` here. A lost claim
    /// race moves on to the next candidate.
    fn claim_next(&self) -> Result<Option<Claimed>, StoreError> {
        for candidate in self.jobs.queued_jobs()? {
            if candidate.cancel_requested {
                self.fail_queued(&candidate.id, CANCELLED_MESSAGE)?;
                continue;
            }

            let settings = match self.resolve_for_dispatch(&candidate)? {
                Ok(settings) => settings,
                Err(reason) => {
                    warn!(job_id = %candidate.id, reason = %reason, "Job rejected at dispatch");
                    self.fail_queued(&candidate.id, &reason)?;
                    continue;
                }
            };

            let owner = format!("worker-{}", new_id());
            let claim = JobUpdate::Claim {
                owner: owner.clone(),
            };
            match self.jobs.transition(&candidate.id, JobStatus::Queued, claim)? {
                Transition::Applied(job) => {
                    info!(job_id = %job.id, attempt = job.attempts, "Job claimed");
                    return Ok(Some(Claimed {
                        job,
                        settings,
                        owner,
                    }));
                }
                Transition::Rejected { reason, .. } => {
                    debug!(job_id = %candidate.id, %reason, "Lost claim race");
                }
            }
        }
        Ok(None)
    }

    /// Inner `Err` is a reason to fail the job; outer errors are store failures.
    fn resolve_for_dispatch(
        &self,
        job: &HandbrakeJob,
    ) -> Result<Result<HandbrakeSettings, String>, StoreError> {
        if !job.input_file.is_file() {
            return Ok(Err(format!(
                "input file no longer exists: {}",
                job.input_file.display()
            )));
        }

        let settings = match &job.handbrake_settings_id {
            Some(id) => match self.settings.get_settings(id) {
                Ok(settings) => Some(settings),
                Err(StoreError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            },
            None => self.settings.latest_settings(&job.video_analysis_id)?,
        };

        Ok(settings.ok_or_else(|| {
            format!(
                "no settings recommendation found for analysis {}",
                job.video_analysis_id
            )
        }))
    }

    fn fail_queued(&self, job_id: &str, message: &str) -> Result<(), StoreError> {
        let update = JobUpdate::Fail {
            owner: None,
            message: message.to_string(),
        };
        if self
            .jobs
            .transition(job_id, JobStatus::Queued, update)?
            .is_applied()
        {
            info!(job_id = %job_id, reason = %message, "Queued job failed before dispatch");
        }
        Ok(())
    }

    async fn run_job(self: Arc<Self>, claimed: Claimed, _permit: OwnedSemaphorePermit) {
        let job_id = claimed.job.id.clone();
        let token = CancellationToken::new();
        self.register_cancel(&job_id, token.clone());
        if claimed.job.cancel_requested {
            token.cancel();
        }

        let outcome = self.drive_encode(&claimed, token).await;
        self.unregister_cancel(&job_id);
        self.finish(&claimed, outcome).await;
        self.wakeup.notify_one();
    }

    /// Run the encoder while relaying progress, enforcing the timeout and
    /// watching for cancellation.
    async fn drive_encode(
        &self,
        claimed: &Claimed,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        let job = &claimed.job;
        let request = EncodeRequest {
            job_id: job.id.clone(),
            input: job.input_file.clone(),
            output: job.output_file.clone(),
            settings: claimed.settings.clone(),
            attempt: job.attempts,
        };

        let (progress_tx, mut progress_rx) = watch::channel(0.0);
        let encode = self.encoder.encode(request, progress_tx, cancel.clone());
        tokio::pin!(encode);

        let deadline = tokio::time::sleep(self.plan.job_timeout);
        tokio::pin!(deadline);

        let mut poll = tokio::time::interval(self.plan.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut progress_open = true;
        let mut pending: Option<f64> = None;
        let mut last_flush: Option<Instant> = None;

        loop {
            tokio::select! {
                result = &mut encode => return result,

                changed = progress_rx.changed(), if progress_open => {
                    if changed.is_err() {
                        progress_open = false;
                        continue;
                    }
                    let percent = *progress_rx.borrow_and_update();
                    pending = Some(percent);
                    self.flush_progress(claimed, &mut pending, &mut last_flush);
                }

                _ = poll.tick() => {
                    self.flush_progress(claimed, &mut pending, &mut last_flush);
                    if !cancel.is_cancelled() && self.cancel_flag_set(&job.id) {
                        cancel.cancel();
                    }
                }

                _ = cancel.cancelled() => {
                    info!(job_id = %job.id, "Stopping encoder for cancelled job");
                    if tokio::time::timeout(self.plan.cancel_grace, &mut encode).await.is_err() {
                        warn!(job_id = %job.id, "Encoder ignored cancel, terminating it");
                    }
                    return Err(EncodeError::Cancelled);
                }

                _ = &mut deadline => {
                    warn!(
                        job_id = %job.id,
                        timeout_secs = self.plan.job_timeout.as_secs(),
                        "Job exceeded its time limit"
                    );
                    cancel.cancel();
                    let _ = tokio::time::timeout(self.plan.cancel_grace, &mut encode).await;
                    return Err(EncodeError::Timeout(self.plan.job_timeout));
                }
            }
        }
    }

    /// Write the latest progress if the flush interval has passed.
    fn flush_progress(
        &self,
        claimed: &Claimed,
        pending: &mut Option<f64>,
        last_flush: &mut Option<Instant>,
    ) {
        let Some(percent) = *pending else {
            return;
        };
        if let Some(at) = *last_flush {
            if at.elapsed() < self.plan.progress_flush {
                return;
            }
        }

        let update = JobUpdate::Progress {
            owner: claimed.owner.clone(),
            percent,
        };
        match self.jobs.transition(&claimed.job.id, JobStatus::Running, update) {
            Ok(Transition::Applied(job)) => {
                debug!(job_id = %job.id, progress = job.progress, "Progress updated");
            }
            Ok(Transition::Rejected { reason, .. }) => {
                warn!(job_id = %claimed.job.id, %reason, "Progress write rejected");
            }
            Err(e) => {
                warn!(job_id = %claimed.job.id, error = %e, "Progress write failed");
                return;
            }
        }
        *pending = None;
        *last_flush = Some(Instant::now());
    }

    fn cancel_flag_set(&self, job_id: &str) -> bool {
        match self.jobs.get_job(job_id) {
            Ok(job) => job.cancel_requested,
            Err(e) => {
                debug!(job_id = %job_id, error = %e, "Cancel flag check failed");
                false
            }
        }
    }

    /// Map the encode outcome onto the job's next state.
    async fn finish(&self, claimed: &Claimed, outcome: Result<(), EncodeError>) {
        let job = &claimed.job;
        let owner = claimed.owner.clone();

        let update = match outcome {
            Ok(()) => {
                info!(job_id = %job.id, attempt = job.attempts, "Job completed");
                JobUpdate::Complete { owner }
            }
            Err(e) => match e.kind() {
                FailureKind::Cancelled => {
                    info!(job_id = %job.id, "Job cancelled");
                    JobUpdate::Fail {
                        owner: Some(owner),
                        message: CANCELLED_MESSAGE.to_string(),
                    }
                }
                FailureKind::Permanent => {
                    warn!(job_id = %job.id, error = %e, "Job failed permanently");
                    JobUpdate::Fail {
                        owner: Some(owner),
                        message: format!("permanent encoder failure: {}", e),
                    }
                }
                FailureKind::Transient if job.attempts < self.plan.max_attempts => {
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        max_attempts = self.plan.max_attempts,
                        error = %e,
                        "Transient failure, re-queueing job"
                    );
                    JobUpdate::Requeue {
                        owner,
                        message: format!("attempt {} failed: {}", job.attempts, e),
                    }
                }
                FailureKind::Transient => {
                    warn!(job_id = %job.id, attempts = job.attempts, error = %e, "Job failed, retries exhausted");
                    JobUpdate::Fail {
                        owner: Some(owner),
                        message: format!("{} (gave up after {} attempts)", e, job.attempts),
                    }
                }
            },
        };

        self.write_final(&job.id, update).await;
    }

    async fn write_final(&self, job_id: &str, update: JobUpdate) {
        for attempt in 1..=FINAL_WRITE_ATTEMPTS {
            match self
                .jobs
                .transition(job_id, JobStatus::Running, update.clone())
            {
                Ok(Transition::Applied(job)) => {
                    debug!(job_id = %job_id, status = %job.status, "Final state written");
                    return;
                }
                Ok(Transition::Rejected { reason, .. }) => {
                    error!(job_id = %job_id, %reason, "Final state rejected");
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job_id, attempt, error = %e, "Final state write failed");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
            }
        }
        error!(job_id = %job_id, "Giving up on final state write");
    }
}
