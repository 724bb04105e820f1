//! Daemon-related errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing worker processes.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Failed to create or write a PID file.
    #[error("failed to write PID file at {path}: {reason}")]
    PidFileWrite { path: PathBuf, reason: String },

    /// Failed to read a PID file.
    #[error("failed to read PID file at {path}: {reason}")]
    PidFileRead { path: PathBuf, reason: String },

    /// Failed to remove a PID file.
    #[error("failed to remove PID file at {path}: {reason}")]
    PidFileRemoval { path: PathBuf, reason: String },

    /// Failed to spawn a worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(String),

    /// Failed to deliver a signal to a worker process.
    #[error("failed to signal worker (PID {pid}): {reason}")]
    SignalFailed { pid: u32, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
