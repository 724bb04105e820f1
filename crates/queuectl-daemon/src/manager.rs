//! Worker process lifecycle management.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DaemonError;
use crate::pid::WorkerPidFile;

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

/// How long `stop` waits for a worker to exit after SIGTERM. Workers finish
/// their in-flight job first, so this must cover a full job execution.
const STOP_WAIT: Duration = Duration::from_secs(30);

/// Snapshot of one live worker process.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub pid: u32,
    /// Taken from the PID file's modification time.
    pub started_at: Option<DateTime<Utc>>,
}

/// Spawns, stops and inspects worker processes.
///
/// Each worker is a detached re-exec of the current binary
/// (`queuectl worker run --worker-id <id>`) recorded by a PID file under
/// `<data_dir>/workers/`. Stale PID files are reaped on every scan.
pub struct WorkerManager {
    data_dir: PathBuf,
    db_path: PathBuf,
}

impl WorkerManager {
    pub fn new(data_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_path: db_path.into(),
        }
    }

    fn workers_dir(&self) -> PathBuf {
        self.data_dir.join("workers")
    }

    /// Spawn `count` detached worker processes. Returns their PIDs.
    pub fn start(&self, count: u32) -> Result<Vec<u32>, DaemonError> {
        let exe = std::env::current_exe().map_err(|e| DaemonError::SpawnFailed(e.to_string()))?;

        let mut pids = Vec::new();
        for _ in 0..count {
            let worker_id = format!("worker-{}", Uuid::new_v4().simple());

            let child = Command::new(&exe)
                .arg("--db")
                .arg(&self.db_path)
                .args(["worker", "run", "--worker-id", &worker_id])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| DaemonError::SpawnFailed(e.to_string()))?;

            let pid = child.id();
            WorkerPidFile::for_worker(&self.workers_dir(), &worker_id).write_pid(pid)?;
            info!(worker_id = %worker_id, pid, "worker process started");
            pids.push(pid);
        }

        Ok(pids)
    }

    /// Stop all recorded workers. With `force` a SIGKILL is sent instead of
    /// SIGTERM, abandoning in-flight jobs to stale-lease recovery.
    /// Returns the number of workers stopped.
    pub fn stop(&self, force: bool) -> Result<u32, DaemonError> {
        let mut stopped = 0;

        for pid_file in self.scan()? {
            let Some(pid) = pid_file.read_pid()? else {
                continue;
            };

            if !WorkerPidFile::is_process_running(pid) {
                pid_file.remove()?;
                continue;
            }

            Self::send_signal(pid, force)?;
            info!(worker_id = %pid_file.worker_id(), pid, force, "stop signal sent");

            if Self::wait_for_exit(pid, STOP_WAIT) {
                pid_file.remove()?;
                stopped += 1;
            } else {
                warn!(worker_id = %pid_file.worker_id(), pid,
                      "worker did not exit in time, try --force");
            }
        }

        Ok(stopped)
    }

    /// List recorded workers, reaping PID files whose process is gone.
    pub fn status(&self) -> Result<Vec<WorkerStatus>, DaemonError> {
        let mut statuses = Vec::new();

        for pid_file in self.scan()? {
            let Some(pid) = pid_file.read_pid()? else {
                continue;
            };

            if !WorkerPidFile::is_process_running(pid) {
                warn!(worker_id = %pid_file.worker_id(), pid,
                      "reaping stale PID file (process gone)");
                pid_file.remove()?;
                continue;
            }

            let started_at = std::fs::metadata(pid_file.path())
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            statuses.push(WorkerStatus {
                worker_id: pid_file.worker_id(),
                pid,
                started_at,
            });
        }

        statuses.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(statuses)
    }

    /// Collect PID files under the workers directory.
    fn scan(&self) -> Result<Vec<WorkerPidFile>, DaemonError> {
        let dir = self.workers_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "pid") {
                files.push(WorkerPidFile::new(path));
            }
        }
        Ok(files)
    }

    #[cfg(unix)]
    fn send_signal(pid: u32, force: bool) -> Result<(), DaemonError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        kill(Pid::from_raw(pid as i32), signal).map_err(|e| DaemonError::SignalFailed {
            pid,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn send_signal(pid: u32, _force: bool) -> Result<(), DaemonError> {
        Err(DaemonError::SignalFailed {
            pid,
            reason: "signals not supported on this platform".to_string(),
        })
    }

    fn wait_for_exit(pid: u32, wait: Duration) -> bool {
        let deadline = std::time::Instant::now() + wait;
        while std::time::Instant::now() < deadline {
            if !WorkerPidFile::is_process_running(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        !WorkerPidFile::is_process_running(pid)
    }
}
