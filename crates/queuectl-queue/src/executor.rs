//! Shell command execution.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

/// Result of running a command to a normal exit.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Captured stderr, trimmed. Stdout is not persisted.
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Diagnostic text recorded against the job on failure.
    pub fn failure_message(&self) -> String {
        if self.stderr.is_empty() {
            format!("exit code: {}", self.exit_code)
        } else {
            self.stderr.clone()
        }
    }
}

/// Failures that prevent a command from reaching a normal exit.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("failed to run command: {0}")]
    Spawn(String),
}

/// Runs job commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, ExecError>;
}

/// Executes commands through the platform shell.
pub struct ShellExecutor;

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, ExecError> {
        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out child must not outlive the attempt.
            .kill_on_drop(true);

        let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| ExecError::Timeout(timeout_secs))?
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(exit_code, "command finished");

        Ok(ExecOutput { exit_code, stderr })
    }
}
