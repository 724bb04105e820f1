//! queuectl - CLI-based background job queue.
//!
//! Main entry point for the queuectl CLI.

mod cli;
mod cmd_jobs;
mod cmd_worker;

use std::path::PathBuf;

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Cli, Commands, WorkerAction};

/// Get the .queuectl data directory path.
pub(crate) fn queuectl_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".queuectl"))
        .unwrap_or_else(|| PathBuf::from(".queuectl"))
}

pub(crate) fn default_db_path() -> PathBuf {
    queuectl_dir().join("queuectl.db")
}

/// Initialize tracing.
///
/// Worker processes run detached with their stdio closed, so they also log
/// to daily-rotated files under ~/.queuectl/logs/. Interactive commands log
/// to stderr only, keeping stdout clean for command output.
fn init_tracing(log_to_file: bool) -> Result<(), Box<dyn std::error::Error>> {
    if log_to_file {
        let log_dir = queuectl_dir().join("logs");
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("worker")
            .filename_suffix("log")
            .max_log_files(14)
            .build(&log_dir)?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep the guard alive for the program duration.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_ansi(true))
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
    } else {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_to_file = matches!(
        cli.command,
        Commands::Worker {
            action: WorkerAction::Run { .. }
        }
    );
    if let Err(e) = init_tracing(log_to_file) {
        eprintln!("Error: failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);

    let result = match cli.command {
        Commands::Enqueue { job_json } => cmd_jobs::enqueue(&db_path, &job_json).await,
        Commands::List { state, limit } => cmd_jobs::list(&db_path, state, limit).await,
        Commands::Get { job_id } => cmd_jobs::get(&db_path, &job_id).await,
        Commands::Status => cmd_jobs::status(&db_path).await,
        Commands::Clear { state, yes } => cmd_jobs::clear(&db_path, state, yes).await,
        Commands::Worker { action } => cmd_worker::handle(&db_path, action).await,
        Commands::Dlq { action } => cmd_jobs::handle_dlq(&db_path, action).await,
        Commands::Config { action } => cmd_jobs::handle_config(&db_path, action).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
