//! Queue errors.

use thiserror::Error;

use crate::job::JobState;

/// Errors surfaced by the job store and worker loop.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with this id already exists.
    #[error("job '{0}' already exists")]
    DuplicateId(String),

    /// Operation referenced a nonexistent job.
    #[error("job '{0}' not found")]
    NotFound(String),

    /// State precondition violated. Signals a lost lease race or a caller
    /// bug; never silently swallowed.
    #[error("job '{id}': invalid transition from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },

    /// Underlying persistence failure. Callers back off and retry the store
    /// operation itself; this is distinct from job-level retry.
    #[error("storage error: {0}")]
    Storage(String),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed job submission.
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}
