//! Error taxonomy surfaced at the service boundary.

use crate::probe::ProbeError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by the boundary operations of the optimizer.
///
/// Per-job encoder failures never reach callers through this type directly;
/// the scheduler records them on the job as `error_message`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input or analysis. Not retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Metadata extraction failed for one file.
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Resource contention or timeout while encoding.
    #[error("transient encode error: {0}")]
    TransientEncode(String),

    /// Encoder rejected the input or parameters.
    #[error("permanent encode error: {0}")]
    PermanentEncode(String),

    /// Persistence layer unavailable. Nothing was committed.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, id } => CoreError::NotFound {
                entity: collection,
                id,
            },
            other => CoreError::Storage(other),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
