//! Encoding job records and their lifecycle state machine.
//!
//! A job moves `queued -> running -> completed | failed`, or straight from
//! `queued` to `failed` when it is cancelled or rejected before dispatch.
//! The one backward edge, `running -> queued`, exists only for retrying a
//! transient encoder failure. Every mutation goes through
//! [`HandbrakeJob::apply`], which the stores call under their write lock so
//! the expected-status check and the write form a single compare-and-swap.

use crate::models::{current_timestamp_ms, new_id};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Highest progress a running job may report; 100 is written only on completion.
pub const MAX_RUNNING_PROGRESS: f64 = 99.9;

/// Error message recorded on cancelled jobs.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker.
    Queued,
    /// Owned by a worker; the encoder is running.
    Running,
    /// Encoder finished and the output was verified.
    Completed,
    /// Terminal failure, see `error_message`.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Check if the status is terminal (completed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A mutation requested against a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// `queued -> running`, taking ownership under the given lease id.
    Claim { owner: String },
    /// Progress report from the owning worker.
    Progress { owner: String, percent: f64 },
    /// `running -> completed`.
    Complete { owner: String },
    /// `running -> failed` by the owner, or `queued -> failed` with no owner.
    Fail {
        owner: Option<String>,
        message: String,
    },
    /// `running -> queued` after a transient failure.
    Requeue { owner: String, message: String },
}

impl JobUpdate {
    fn name(&self) -> &'static str {
        match self {
            JobUpdate::Claim { .. } => "claim",
            JobUpdate::Progress { .. } => "progress",
            JobUpdate::Complete { .. } => "complete",
            JobUpdate::Fail { .. } => "fail",
            JobUpdate::Requeue { .. } => "requeue",
        }
    }
}

/// Why a [`JobUpdate`] was not applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("job is {actual}, expected {expected}")]
    StatusMismatch {
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("job is not owned by the caller")]
    NotOwner,

    #[error("{update} is not allowed while job is {from}")]
    Illegal {
        from: JobStatus,
        update: &'static str,
    },
}

/// One asynchronous execution of the encoder against an input/output pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandbrakeJob {
    pub id: String,
    pub video_analysis_id: String,
    /// Recommendation the job encodes with; resolved at dispatch when None.
    pub handbrake_settings_id: Option<String>,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub status: JobStatus,
    /// Percent complete, 0-100.
    pub progress: f64,
    pub error_message: Option<String>,
    /// Encode attempts started so far.
    pub attempts: u32,
    /// Lease id of the worker that owns the job while it runs.
    pub owner: Option<String>,
    /// Advisory cancel flag observed by the owning worker.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: i64,
    pub updated_at: i64,
    /// FIFO key: `created_at`, bumped when a retry re-queues the job.
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl HandbrakeJob {
    /// Create a new queued job.
    pub fn new(
        video_analysis_id: String,
        handbrake_settings_id: Option<String>,
        input_file: PathBuf,
        output_file: PathBuf,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            id: new_id(),
            video_analysis_id,
            handbrake_settings_id,
            input_file,
            output_file,
            status: JobStatus::Queued,
            progress: 0.0,
            error_message: None,
            attempts: 0,
            owner: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Dispatch order: oldest `enqueued_at` first, ties broken by id.
    pub fn fifo_key(&self) -> (i64, &str) {
        (self.enqueued_at, self.id.as_str())
    }

    fn check_owner(&self, owner: &str) -> Result<(), TransitionError> {
        if self.owner.as_deref() == Some(owner) {
            Ok(())
        } else {
            Err(TransitionError::NotOwner)
        }
    }

    /// Apply `update` if the job is currently in `expected` status.
    ///
    /// On error the job is left untouched.
    pub fn apply(
        &mut self,
        expected: JobStatus,
        update: JobUpdate,
        now: i64,
    ) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError::StatusMismatch {
                expected,
                actual: self.status,
            });
        }

        let name = update.name();
        match (self.status, update) {
            (JobStatus::Queued, JobUpdate::Claim { owner }) => {
                self.status = JobStatus::Running;
                self.owner = Some(owner);
                self.attempts += 1;
                self.progress = 0.0;
                self.started_at = Some(now);
            }
            (JobStatus::Running, JobUpdate::Progress { owner, percent }) => {
                self.check_owner(&owner)?;
                if percent.is_finite() {
                    self.progress = self.progress.max(percent.clamp(0.0, MAX_RUNNING_PROGRESS));
                }
            }
            (JobStatus::Running, JobUpdate::Complete { owner }) => {
                self.check_owner(&owner)?;
                self.status = JobStatus::Completed;
                self.progress = 100.0;
                self.owner = None;
                self.error_message = None;
                self.completed_at = Some(now);
            }
            (JobStatus::Running, JobUpdate::Fail { owner, message }) => {
                match owner {
                    Some(owner) => self.check_owner(&owner)?,
                    None => return Err(TransitionError::NotOwner),
                }
                self.finish_failed(message, now);
            }
            (JobStatus::Queued, JobUpdate::Fail { owner: None, message }) => {
                self.finish_failed(message, now);
            }
            (JobStatus::Running, JobUpdate::Requeue { owner, message }) => {
                self.check_owner(&owner)?;
                if self.cancel_requested {
                    self.finish_failed(CANCELLED_MESSAGE.to_string(), now);
                } else {
                    self.status = JobStatus::Queued;
                    self.owner = None;
                    self.progress = 0.0;
                    self.enqueued_at = now;
                    self.error_message = Some(message);
                }
            }
            (from, _) => {
                return Err(TransitionError::Illegal { from, update: name });
            }
        }

        self.updated_at = now;
        Ok(())
    }

    fn finish_failed(&mut self, message: String, now: i64) {
        let message = if message.trim().is_empty() {
            "encoding failed".to_string()
        } else {
            message
        };
        self.status = JobStatus::Failed;
        self.owner = None;
        self.error_message = Some(message);
        self.completed_at = Some(now);
    }

    /// Fail a job whose worker is gone, e.g. found `running` after a restart.
    pub(crate) fn fail_orphaned(&mut self, message: &str, now: i64) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.finish_failed(message.to_string(), now);
        self.updated_at = now;
        true
    }

    /// Raise the advisory cancel flag. Returns false for terminal jobs.
    pub fn request_cancel(&mut self, now: i64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        self.updated_at = now;
        true
    }
}
