//! Storage contracts.
//!
//! Four logical collections, each keyed by record id. All traits are
//! synchronous with short critical sections; callers never hold a store
//! lock across an await point or an encoder run. [`JobStore::transition`]
//! is the only way a job changes status.

mod memory;

pub use memory::MemoryStore;

use crate::jobs::{HandbrakeJob, JobStatus, JobUpdate, TransitionError};
use crate::models::{DirectoryConfig, HandbrakeSettings, VideoAnalysis};
use thiserror::Error;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} not found: {id}")]
    NotFound { collection: &'static str, id: String },

    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(collection: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            collection,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a compare-and-swap on a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The update was applied; the job as stored afterwards.
    Applied(HandbrakeJob),
    /// The job did not match; nothing was written.
    Rejected {
        current: HandbrakeJob,
        reason: TransitionError,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn job(&self) -> &HandbrakeJob {
        match self {
            Transition::Applied(job) => job,
            Transition::Rejected { current, .. } => current,
        }
    }
}

pub trait AnalysisStore: Send + Sync {
    fn insert_analysis(&self, analysis: VideoAnalysis) -> StoreResult<()>;

    fn get_analysis(&self, id: &str) -> StoreResult<VideoAnalysis>;

    /// Newest first.
    fn list_analyses(&self) -> StoreResult<Vec<VideoAnalysis>>;

    fn find_analyses_by_filename(&self, filename: &str) -> StoreResult<Vec<VideoAnalysis>>;
}

pub trait SettingsStore: Send + Sync {
    /// Fails with `Conflict` if the analysis already has a record with the
    /// same version.
    fn insert_settings(&self, settings: HandbrakeSettings) -> StoreResult<()>;

    fn get_settings(&self, id: &str) -> StoreResult<HandbrakeSettings>;

    /// Highest version for the analysis, if any.
    fn latest_settings(&self, analysis_id: &str) -> StoreResult<Option<HandbrakeSettings>>;

    /// All versions for the analysis, oldest first.
    fn list_settings(&self, analysis_id: &str) -> StoreResult<Vec<HandbrakeSettings>>;
}

pub trait JobStore: Send + Sync {
    fn insert_job(&self, job: HandbrakeJob) -> StoreResult<()>;

    fn get_job(&self, id: &str) -> StoreResult<HandbrakeJob>;

    /// Oldest first.
    fn list_jobs(&self) -> StoreResult<Vec<HandbrakeJob>>;

    fn list_jobs_by_status(&self, status: JobStatus) -> StoreResult<Vec<HandbrakeJob>>;

    fn list_jobs_for_analysis(&self, analysis_id: &str) -> StoreResult<Vec<HandbrakeJob>>;

    /// Queued jobs in dispatch order.
    fn queued_jobs(&self) -> StoreResult<Vec<HandbrakeJob>> {
        let mut jobs = self.list_jobs_by_status(JobStatus::Queued)?;
        jobs.sort_by(|a, b| a.fifo_key().cmp(&b.fifo_key()));
        Ok(jobs)
    }

    /// Apply `update` atomically if the job is in `expected` status.
    fn transition(&self, id: &str, expected: JobStatus, update: JobUpdate)
        -> StoreResult<Transition>;

    /// Raise the advisory cancel flag on a non-terminal job and return the
    /// stored job.
    fn request_cancel(&self, id: &str) -> StoreResult<HandbrakeJob>;
}

pub trait DirectoryStore: Send + Sync {
    /// Fails with `Conflict` if the path is already configured.
    fn insert_directory(&self, directory: DirectoryConfig) -> StoreResult<()>;

    fn list_directories(&self) -> StoreResult<Vec<DirectoryConfig>>;

    fn remove_directory(&self, id: &str) -> StoreResult<DirectoryConfig>;
}
