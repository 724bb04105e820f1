//! Job record and state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in queue.
    Pending,
    /// Leased by a worker and executing.
    Processing,
    /// Finished with a zero exit status. Terminal.
    Completed,
    /// Failed with retries remaining; eligible again once `next_retry_at` passes.
    Failed,
    /// Retry budget exhausted; parked in the dead letter queue.
    Dead,
}

impl JobState {
    /// All states, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// Every store mutation consults this table; anything outside it surfaces
    /// as [`QueueError::InvalidTransition`].
    pub fn can_transition(self, to: JobState) -> bool {
        matches!(
            (self, to),
            // Acquire
            (JobState::Pending, JobState::Processing)
                | (JobState::Failed, JobState::Processing)
                // Complete / Fail
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Processing, JobState::Dead)
                // Release (and stale-lease handover, which passes through Pending)
                | (JobState::Processing, JobState::Pending)
                // Explicit DLQ retry
                | (JobState::Dead, JobState::Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Pending
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!(
                "unknown job state '{other}' (expected pending, processing, completed, failed or dead)"
            )),
        }
    }
}

/// Client-supplied job submission, as parsed from the `enqueue` JSON payload.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub command: String,
    /// Per-job retry ceiling; falls back to the configured default.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// A job in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Client-supplied unique ID. Immutable.
    pub id: String,
    /// Shell command to execute. Immutable.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Executions counted against the retry budget.
    pub attempts: u32,
    /// Retry ceiling: a job dies once `attempts` exceeds this.
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every state change.
    pub updated_at: DateTime<Utc>,
    /// Earliest time a failed job becomes eligible again. Set iff state is `Failed`.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last captured failure detail; cleared on successful completion.
    pub error_message: Option<String>,
    /// Worker holding the lease. Set iff state is `Processing`.
    pub locked_by: Option<String>,
    /// When the lease was granted; drives stale-lease detection.
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh pending job.
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            error_message: None,
            locked_by: None,
            locked_at: None,
        }
    }

    /// Build a job from a client submission, applying the configured default
    /// retry ceiling when the submission does not carry one.
    pub fn from_spec(
        spec: JobSpec,
        default_max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        if spec.id.trim().is_empty() {
            return Err(QueueError::InvalidJob("job id must not be empty".into()));
        }
        if spec.command.trim().is_empty() {
            return Err(QueueError::InvalidJob("job command must not be empty".into()));
        }

        Ok(Job::new(
            spec.id,
            spec.command,
            spec.max_retries.unwrap_or(default_max_retries),
            now,
        ))
    }
}
