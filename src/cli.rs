//! CLI definitions for queuectl.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use queuectl_queue::JobState;

/// queuectl CLI.
#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "CLI-based background job queue with retries and a dead letter queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Database path (default: ~/.queuectl/queuectl.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Add a new job to the queue
    Enqueue {
        /// Job definition: a JSON string, or @path to a JSON file
        job_json: String,
    },

    /// List jobs, optionally filtered by state
    List {
        /// Filter by job state
        #[arg(short, long)]
        state: Option<JobState>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Show detailed information about a job
    Get {
        /// Job ID
        job_id: String,
    },

    /// Show a summary of job states, workers and configuration
    Status,

    /// Delete jobs from the queue
    Clear {
        /// Only delete jobs in this state
        #[arg(short, long)]
        state: Option<JobState>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },

    /// Manage the dead letter queue
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },

    /// Manage system configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum WorkerAction {
    /// Start one or more worker processes
    Start {
        /// Number of workers to start
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },

    /// Stop all running workers
    Stop {
        /// Kill workers immediately instead of letting them finish their job
        #[arg(short, long)]
        force: bool,
    },

    /// Show status of running workers
    Status,

    /// Run a worker loop in the foreground (spawned by `worker start`)
    #[command(hide = true)]
    Run {
        /// Worker identity recorded on leases
        #[arg(long)]
        worker_id: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum DlqAction {
    /// List all jobs in the dead letter queue
    List,

    /// Move a dead job back to the pending queue
    Retry {
        /// Job ID
        job_id: String,

        /// Give the job a fresh retry budget
        #[arg(short, long)]
        reset_attempts: bool,
    },

    /// Delete all jobs from the dead letter queue
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Config key (max-retries, backoff-base, worker-poll-interval,
        /// job-timeout, lease-timeout)
        key: String,

        /// New value
        value: String,
    },
}
