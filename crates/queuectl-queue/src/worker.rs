//! Worker polling loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::executor::CommandExecutor;
use crate::job::{Job, JobState};
use crate::store::JobStore;

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// Cooperative shutdown flag shared between signal handlers and the loop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single job-queue worker.
///
/// Workers are independent peers: each runs its own polling loop against a
/// store handle and shares no in-memory state with other workers.
pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn CommandExecutor>,
    shutdown: ShutdownFlag,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn CommandExecutor>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            executor,
            shutdown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until shutdown is requested.
    ///
    /// Shutdown is only honored between iterations: an in-flight job always
    /// runs to completion and reports its outcome first. That bounds how
    /// late a lease is released, which is why the lease timeout must exceed
    /// the job timeout.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "worker started");

        while !self.shutdown.is_requested() {
            // Re-read config every cycle so `config set` reaches live workers.
            let config = match self.store.config().await {
                Ok(config) => config,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e,
                          "failed to read config, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let idle = Duration::from_secs_f64(config.worker_poll_interval);

            match self.store.acquire(&self.id).await {
                Ok(Some(job)) => self.execute(job, config.job_timeout).await,
                Ok(None) => tokio::time::sleep(idle).await,
                Err(e) => {
                    // A storage hiccup is a reason to retry the store
                    // operation itself, not to touch any job's retry budget.
                    warn!(worker_id = %self.id, error = %e, "acquire failed, backing off");
                    tokio::time::sleep(idle).await;
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
    }

    async fn execute(&self, job: Job, timeout_secs: u64) {
        info!(worker_id = %self.id, job_id = %job.id, command = %job.command, "executing job");

        match self.executor.run(&job.command, timeout_secs).await {
            Ok(output) if output.success() => match self.store.complete(&job.id).await {
                Ok(_) => {
                    info!(worker_id = %self.id, job_id = %job.id, "job completed");
                }
                Err(e) => {
                    // Typically a lost-lease race: the job was reclaimed while
                    // this worker was still running it.
                    error!(worker_id = %self.id, job_id = %job.id, error = %e,
                           "failed to record completion");
                }
            },
            Ok(output) => {
                self.report_failure(&job, &output.failure_message()).await;
            }
            Err(e) => {
                self.report_failure(&job, &e.to_string()).await;
            }
        }
    }

    async fn report_failure(&self, job: &Job, message: &str) {
        match self.store.fail(&job.id, message).await {
            Ok(updated) if updated.state == JobState::Dead => {
                warn!(worker_id = %self.id, job_id = %job.id, attempts = updated.attempts,
                      error = %message, "job failed permanently, moved to DLQ");
            }
            Ok(updated) => {
                info!(worker_id = %self.id, job_id = %job.id, attempts = updated.attempts,
                      next_retry_at = ?updated.next_retry_at, error = %message,
                      "job failed, retry scheduled");
            }
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job.id, error = %e,
                       "failed to record job failure");
            }
        }
    }
}
