//! Encoder adapter seam.
//!
//! The scheduler drives encodes through [`EncoderAdapter`]; the production
//! implementation is [`HandbrakeCli`]. Failures are reported as
//! [`EncodeError`] and classified by [`EncodeError::kind`] into retryable and
//! final outcomes.

pub mod handbrake;

pub use handbrake::{handbrake_args, parse_progress_line, HandbrakeCli};

use crate::models::HandbrakeSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Input for one encode attempt.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub job_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub settings: HandbrakeSettings,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// How the scheduler should react to a failed encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt.
    Transient,
    /// Retrying cannot help.
    Permanent,
    /// Stopped on request.
    Cancelled,
}

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder binary could not be started at all.
    #[error("encoder binary unavailable: {0}")]
    BinaryUnavailable(String),

    /// Encoder exited with non-zero status
    #[error("encoder exited with code {code}: {detail}")]
    Exit { code: i32, detail: String },

    /// Encoder was terminated by signal
    #[error("encoder terminated by signal: {detail}")]
    Signal { detail: String },

    /// Encoder reported success but left no usable output.
    #[error("encoder produced no output at {0}")]
    MissingOutput(PathBuf),

    /// Job exceeded its wall-clock budget.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exit code HandBrakeCLI uses for unusable input.
const EXIT_INVALID_INPUT: i32 = 2;
/// Exit code HandBrakeCLI uses when encoder initialization fails.
const EXIT_INIT_FAILED: i32 = 3;

impl EncodeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EncodeError::BinaryUnavailable(_) => FailureKind::Permanent,
            EncodeError::Exit { code, detail } => {
                if *code == EXIT_INVALID_INPUT
                    || *code == EXIT_INIT_FAILED
                    || detail.contains("No title found")
                {
                    FailureKind::Permanent
                } else {
                    FailureKind::Transient
                }
            }
            EncodeError::Signal { .. }
            | EncodeError::MissingOutput(_)
            | EncodeError::Timeout(_)
            | EncodeError::Io(_) => FailureKind::Transient,
            EncodeError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Runs one encode to completion.
///
/// Implementations publish overall progress (0-100) on `progress`, stop
/// promptly once `cancel` fires and return [`EncodeError::Cancelled`].
/// Dropping the returned future must stop the underlying process.
#[async_trait]
pub trait EncoderAdapter: Send + Sync {
    async fn encode(
        &self,
        request: EncodeRequest,
        progress: watch::Sender<f64>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError>;
}
