//! PID file management for worker processes.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::DaemonError;

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;

/// PID file recording one worker process.
///
/// Files live at `<workers_dir>/<worker_id>.pid` and contain the PID in
/// decimal. The file's modification time doubles as the worker's start time.
#[derive(Debug)]
pub struct WorkerPidFile {
    path: PathBuf,
}

impl WorkerPidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Build the path for a worker id under the workers directory.
    pub fn for_worker(workers_dir: &Path, worker_id: &str) -> Self {
        Self::new(workers_dir.join(format!("{worker_id}.pid")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Worker id derived from the file name.
    pub fn worker_id(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the recorded PID, or `None` if the file does not exist.
    pub fn read_pid(&self) -> Result<Option<u32>, DaemonError> {
        if !self.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path).map_err(|e| DaemonError::PidFileRead {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| DaemonError::PidFileRead {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let pid = contents
            .trim()
            .parse::<u32>()
            .map_err(|e| DaemonError::PidFileRead {
                path: self.path.clone(),
                reason: format!("invalid PID format: {e}"),
            })?;

        Ok(Some(pid))
    }

    /// Record a PID, creating parent directories as needed.
    pub fn write_pid(&self, pid: u32) -> Result<(), DaemonError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DaemonError::PidFileWrite {
                path: self.path.clone(),
                reason: format!("failed to create parent directory: {e}"),
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DaemonError::PidFileWrite {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        write!(file, "{pid}").map_err(|e| DaemonError::PidFileWrite {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        info!("PID file created: {} (PID: {})", self.path.display(), pid);
        Ok(())
    }

    /// Remove the PID file. Removing a nonexistent file is not an error.
    pub fn remove(&self) -> Result<(), DaemonError> {
        if !self.exists() {
            return Ok(());
        }

        fs::remove_file(&self.path).map_err(|e| DaemonError::PidFileRemoval {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        debug!("PID file removed: {}", self.path.display());
        Ok(())
    }

    /// Check if a process with the given PID is running.
    #[cfg(unix)]
    pub fn is_process_running(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Signal 0 probes for existence without delivering anything.
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    pub fn is_process_running(_pid: u32) -> bool {
        // No cheap probe available; assume alive.
        true
    }
}
