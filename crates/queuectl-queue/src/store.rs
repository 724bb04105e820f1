//! SQLite-backed job store.
//!
//! The store is the single source of truth for job records. Every
//! read-modify-write that touches the `state`/`locked_by`/`attempts` triple
//! runs inside a `BEGIN IMMEDIATE` transaction, so two workers can never win
//! the same job, whether they share this process or only the database file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection as AsyncConnection;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::{Job, JobState};
use crate::retry::{self, RetryDecision};
use crate::schema::init_schema;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// Persistent job store interface.
///
/// All mutating operations are atomic with respect to concurrent callers;
/// reads may observe any committed state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job. Fails with [`QueueError::DuplicateId`] if
    /// the id is already taken.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Lease the oldest eligible job for `worker_id`, or return `None` when
    /// nothing is eligible. At most one caller wins any given job.
    async fn acquire(&self, worker_id: &str) -> Result<Option<Job>, QueueError>;

    /// Record a successful execution: processing -> completed.
    async fn complete(&self, id: &str) -> Result<Job, QueueError>;

    /// Record a failed execution: processing -> failed or dead, per the
    /// retry policy. Increments `attempts`.
    async fn fail(&self, id: &str, error_message: &str) -> Result<Job, QueueError>;

    /// Administrative unlock: processing -> pending without counting an
    /// attempt.
    async fn release(&self, id: &str) -> Result<Job, QueueError>;

    /// Revive a dead-lettered job: dead -> pending. With `reset_attempts`
    /// the job gets a fresh retry budget; without it a single further
    /// failure sends it straight back to the DLQ.
    async fn retry_dead(&self, id: &str, reset_attempts: bool) -> Result<Job, QueueError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, QueueError>;

    /// List jobs, optionally filtered by state, oldest first.
    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, QueueError>;

    /// Per-state job counts, in [`JobState::ALL`] order.
    async fn counts(&self) -> Result<Vec<(JobState, u64)>, QueueError>;

    /// Delete a single job. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, QueueError>;

    /// Delete all jobs, or all jobs in one state. Returns the number removed.
    async fn clear(&self, state: Option<JobState>) -> Result<u64, QueueError>;

    async fn config(&self) -> Result<QueueConfig, QueueError>;

    /// Persist a validated configuration.
    async fn set_config(&self, config: &QueueConfig) -> Result<(), QueueError>;
}

/// SQLite implementation of [`JobStore`].
pub struct SqliteJobStore {
    conn: AsyncConnection,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    /// Open (or create) a file-backed store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    /// Open a file-backed store with an injected clock.
    pub async fn open_with_clock(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| QueueError::Storage(e.to_string()))?;
            }
        }

        let conn = AsyncConnection::open(path.as_ref().to_path_buf())
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Self::init(&conn).await?;
        debug!(path = %path.as_ref().display(), "job store opened");
        Ok(Self { conn, clock })
    }

    /// Open an in-memory store (tests, scratch use).
    pub async fn in_memory() -> Result<Self, QueueError> {
        Self::in_memory_with_clock(Arc::new(SystemClock)).await
    }

    /// Open an in-memory store with an injected clock.
    pub async fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let conn = AsyncConnection::open_in_memory()
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Self::init(&conn).await?;
        Ok(Self { conn, clock })
    }

    async fn init(conn: &AsyncConnection) -> Result<(), QueueError> {
        conn.call(|conn| {
            // Multiple worker processes contend on one database file; WAL and
            // a busy timeout keep writers from failing fast on lock conflicts.
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            let _mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;

            init_schema(conn)?;
            seed_config(conn)?;
            Ok(())
        })
        .await
        .map_err(|e| QueueError::Storage(e.to_string()))
    }

    /// Run a synchronous store operation on the connection thread.
    async fn call<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, QueueError> + Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let job = job.clone();
        self.call(move |conn| enqueue_tx(conn, &job)).await
    }

    async fn acquire(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let worker_id = worker_id.to_string();
        let now = self.clock.now();
        self.call(move |conn| acquire_tx(conn, &worker_id, now)).await
    }

    async fn complete(&self, id: &str) -> Result<Job, QueueError> {
        let id = id.to_string();
        let now = self.clock.now();
        self.call(move |conn| complete_tx(conn, &id, now)).await
    }

    async fn fail(&self, id: &str, error_message: &str) -> Result<Job, QueueError> {
        let id = id.to_string();
        let error_message = error_message.to_string();
        let now = self.clock.now();
        self.call(move |conn| fail_tx(conn, &id, &error_message, now)).await
    }

    async fn release(&self, id: &str) -> Result<Job, QueueError> {
        let id = id.to_string();
        let now = self.clock.now();
        self.call(move |conn| release_tx(conn, &id, now)).await
    }

    async fn retry_dead(&self, id: &str, reset_attempts: bool) -> Result<Job, QueueError> {
        let id = id.to_string();
        let now = self.clock.now();
        self.call(move |conn| retry_dead_tx(conn, &id, reset_attempts, now))
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        let id = id.to_string();
        self.call(move |conn| get_job(conn, &id)).await
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, QueueError> {
        self.call(move |conn| {
            let mut jobs = Vec::new();
            match state {
                Some(state) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at, id"
                    ))?;
                    let rows = stmt.query_map([state.as_str()], row_to_job)?;
                    for row in rows {
                        jobs.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, id"
                    ))?;
                    let rows = stmt.query_map([], row_to_job)?;
                    for row in rows {
                        jobs.push(row?);
                    }
                }
            }
            Ok(jobs)
        })
        .await
    }

    async fn counts(&self) -> Result<Vec<(JobState, u64)>, QueueError> {
        self.call(|conn| {
            let mut counts: Vec<(JobState, u64)> =
                JobState::ALL.iter().map(|s| (*s, 0)).collect();

            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?;
            for row in rows {
                let (state, count) = row?;
                if let Ok(state) = state.parse::<JobState>() {
                    if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == state) {
                        entry.1 = count;
                    }
                }
            }
            Ok(counts)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, QueueError> {
        let id = id.to_string();
        self.call(move |conn| {
            let removed = conn.execute("DELETE FROM jobs WHERE id = ?1", [&id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn clear(&self, state: Option<JobState>) -> Result<u64, QueueError> {
        self.call(move |conn| {
            let removed = match state {
                Some(state) => {
                    conn.execute("DELETE FROM jobs WHERE state = ?1", [state.as_str()])?
                }
                None => conn.execute("DELETE FROM jobs", [])?,
            };
            Ok(removed as u64)
        })
        .await
    }

    async fn config(&self) -> Result<QueueConfig, QueueError> {
        self.call(|conn| read_config(conn)).await
    }

    async fn set_config(&self, config: &QueueConfig) -> Result<(), QueueError> {
        config.validate()?;
        let config = config.clone();
        self.call(move |conn| write_config_tx(conn, &config)).await
    }
}

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, \
                           next_retry_at, error_message, locked_by, locked_at";

/// Serialize a timestamp with fixed precision so that string comparison in
/// SQL matches chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let state_raw: String = row.get(2)?;
    let state = state_raw.parse::<JobState>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(2, "state".into(), rusqlite::types::Type::Text)
    })?;

    let created_raw: String = row.get(5)?;
    let updated_raw: String = row.get(6)?;
    let next_retry_raw: Option<String> = row.get(7)?;
    let locked_at_raw: Option<String> = row.get(10)?;

    Ok(Job {
        id: row.get(0)?,
        command: row.get(1)?,
        state,
        attempts: row.get(3)?,
        max_retries: row.get(4)?,
        created_at: parse_ts(5, &created_raw)?,
        updated_at: parse_ts(6, &updated_raw)?,
        next_retry_at: next_retry_raw.as_deref().map(|s| parse_ts(7, s)).transpose()?,
        error_message: row.get(8)?,
        locked_by: row.get(9)?,
        locked_at: locked_at_raw.as_deref().map(|s| parse_ts(10, s)).transpose()?,
    })
}

fn get_job(conn: &Connection, id: &str) -> Result<Option<Job>, QueueError> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

fn seed_config(conn: &Connection) -> Result<(), tokio_rusqlite::Error> {
    for (key, value) in QueueConfig::default().entries() {
        conn.execute(
            "INSERT OR IGNORE INTO queue_config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}

fn read_config(conn: &Connection) -> Result<QueueConfig, QueueError> {
    let mut config = QueueConfig::default();
    let mut stmt = conn.prepare("SELECT key, value FROM queue_config")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (key, value) = row?;
        config.apply_raw(&key, &value);
    }
    Ok(config)
}

fn write_config_tx(conn: &mut Connection, config: &QueueConfig) -> Result<(), QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (key, value) in config.entries() {
        tx.execute(
            "INSERT OR REPLACE INTO queue_config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn enqueue_tx(conn: &mut Connection, job: &Job) -> Result<(), QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists: bool = tx
        .query_row("SELECT 1 FROM jobs WHERE id = ?1", [&job.id], |_| Ok(()))
        .optional()?
        .is_some();
    if exists {
        return Err(QueueError::DuplicateId(job.id.clone()));
    }

    tx.execute(
        &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
        params![
            job.id,
            job.command,
            job.state.as_str(),
            job.attempts,
            job.max_retries,
            fmt_ts(job.created_at),
            fmt_ts(job.updated_at),
            job.next_retry_at.map(fmt_ts),
            job.error_message,
            job.locked_by,
            job.locked_at.map(fmt_ts),
        ],
    )?;

    tx.commit()?;
    debug!(job_id = %job.id, "job enqueued");
    Ok(())
}

/// Select-then-update under an exclusive write lock.
///
/// Eligible jobs, oldest `created_at` first (ties by id):
/// - pending,
/// - failed with an elapsed backoff window,
/// - processing with a lease older than `lease_timeout` (crashed worker).
///
/// Reclaiming a stale lease counts one failed attempt against the job, since
/// the original execution never reported an outcome. A reclaim that exhausts
/// the retry budget dead-letters the job instead of handing it over. A worker
/// that is merely slow past the threshold loses its lease the same way; its
/// late report is rejected with `InvalidTransition` once the job has moved on.
fn acquire_tx(
    conn: &mut Connection,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>, QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let config = read_config(&tx)?;

    let now_s = fmt_ts(now);
    let stale_cutoff = fmt_ts(now - Duration::seconds(config.lease_timeout as i64));

    loop {
        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE state = 'pending' \
                        OR (state = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1) \
                        OR (state = 'processing' AND locked_at IS NOT NULL AND locked_at < ?2) \
                     ORDER BY created_at, id \
                     LIMIT 1"
                ),
                params![now_s, stale_cutoff],
                row_to_job,
            )
            .optional()?;

        let Some(job) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        if job.state == JobState::Processing {
            // Stale lease.
            let attempts = job.attempts + 1;
            let stale_worker = job.locked_by.as_deref().unwrap_or("unknown").to_string();

            if attempts > job.max_retries {
                let message = format!(
                    "lease held by worker '{stale_worker}' expired with no retries left"
                );
                tx.execute(
                    "UPDATE jobs SET state = 'dead', attempts = ?1, next_retry_at = NULL, \
                     error_message = ?2, locked_by = NULL, locked_at = NULL, updated_at = ?3 \
                     WHERE id = ?4",
                    params![attempts, message, now_s, job.id],
                )?;
                warn!(job_id = %job.id, stale_worker = %stale_worker,
                      "stale lease exhausted retry budget, dead-lettering");
                continue;
            }

            tx.execute(
                "UPDATE jobs SET locked_by = ?1, locked_at = ?2, attempts = ?3, updated_at = ?2 \
                 WHERE id = ?4",
                params![worker_id, now_s, attempts, job.id],
            )?;
            warn!(job_id = %job.id, stale_worker = %stale_worker, new_worker = %worker_id,
                  "reclaimed stale lease");

            let leased = get_job(&tx, &job.id)?.ok_or_else(|| QueueError::NotFound(job.id.clone()))?;
            tx.commit()?;
            return Ok(Some(leased));
        }

        // Pending, or failed with an elapsed backoff window.
        tx.execute(
            "UPDATE jobs SET state = 'processing', locked_by = ?1, locked_at = ?2, \
             next_retry_at = NULL, updated_at = ?2 \
             WHERE id = ?3",
            params![worker_id, now_s, job.id],
        )?;

        let leased = get_job(&tx, &job.id)?.ok_or_else(|| QueueError::NotFound(job.id.clone()))?;
        tx.commit()?;
        debug!(job_id = %leased.id, worker_id = %worker_id, "job acquired");
        return Ok(Some(leased));
    }
}

fn complete_tx(conn: &mut Connection, id: &str, now: DateTime<Utc>) -> Result<Job, QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let job = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    if !job.state.can_transition(JobState::Completed) {
        return Err(QueueError::InvalidTransition {
            id: id.to_string(),
            from: job.state,
            to: JobState::Completed,
        });
    }

    tx.execute(
        "UPDATE jobs SET state = 'completed', locked_by = NULL, locked_at = NULL, \
         error_message = NULL, updated_at = ?1 \
         WHERE id = ?2",
        params![fmt_ts(now), id],
    )?;

    let updated = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    tx.commit()?;
    debug!(job_id = %id, "job completed");
    Ok(updated)
}

fn fail_tx(
    conn: &mut Connection,
    id: &str,
    error_message: &str,
    now: DateTime<Utc>,
) -> Result<Job, QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let config = read_config(&tx)?;

    let job = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    if !job.state.can_transition(JobState::Failed) {
        return Err(QueueError::InvalidTransition {
            id: id.to_string(),
            from: job.state,
            to: JobState::Failed,
        });
    }

    let attempts = job.attempts + 1;
    let now_s = fmt_ts(now);

    match retry::decide(attempts, job.max_retries, config.backoff_base, now) {
        RetryDecision::Retry { next_retry_at } => {
            tx.execute(
                "UPDATE jobs SET state = 'failed', attempts = ?1, next_retry_at = ?2, \
                 error_message = ?3, locked_by = NULL, locked_at = NULL, updated_at = ?4 \
                 WHERE id = ?5",
                params![attempts, fmt_ts(next_retry_at), error_message, now_s, id],
            )?;
            debug!(job_id = %id, attempts, next_retry_at = %next_retry_at, "job failed, retry scheduled");
        }
        RetryDecision::Dead => {
            tx.execute(
                "UPDATE jobs SET state = 'dead', attempts = ?1, next_retry_at = NULL, \
                 error_message = ?2, locked_by = NULL, locked_at = NULL, updated_at = ?3 \
                 WHERE id = ?4",
                params![attempts, error_message, now_s, id],
            )?;
            warn!(job_id = %id, attempts, "job failed permanently, moved to DLQ");
        }
    }

    let updated = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    tx.commit()?;
    Ok(updated)
}

fn release_tx(conn: &mut Connection, id: &str, now: DateTime<Utc>) -> Result<Job, QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let job = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    if job.state != JobState::Processing {
        return Err(QueueError::InvalidTransition {
            id: id.to_string(),
            from: job.state,
            to: JobState::Pending,
        });
    }

    tx.execute(
        "UPDATE jobs SET state = 'pending', locked_by = NULL, locked_at = NULL, updated_at = ?1 \
         WHERE id = ?2",
        params![fmt_ts(now), id],
    )?;

    let updated = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    tx.commit()?;
    debug!(job_id = %id, "job released back to pending");
    Ok(updated)
}

fn retry_dead_tx(
    conn: &mut Connection,
    id: &str,
    reset_attempts: bool,
    now: DateTime<Utc>,
) -> Result<Job, QueueError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let job = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    if job.state != JobState::Dead {
        return Err(QueueError::InvalidTransition {
            id: id.to_string(),
            from: job.state,
            to: JobState::Pending,
        });
    }

    let attempts = if reset_attempts { 0 } else { job.attempts };
    tx.execute(
        "UPDATE jobs SET state = 'pending', attempts = ?1, next_retry_at = NULL, \
         error_message = NULL, updated_at = ?2 \
         WHERE id = ?3",
        params![attempts, fmt_ts(now), id],
    )?;

    let updated = get_job(&tx, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    tx.commit()?;
    debug!(job_id = %id, reset_attempts, "dead job revived");
    Ok(updated)
}
