//! Worker subcommand handlers.

use std::path::Path;
use std::sync::Arc;

use chrono::SecondsFormat;
use tracing::info;

use queuectl_daemon::WorkerManager;
use queuectl_queue::{ShellExecutor, ShutdownFlag, SqliteJobStore, Worker};

use crate::cli::WorkerAction;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) async fn handle(db_path: &Path, action: WorkerAction) -> CmdResult {
    match action {
        WorkerAction::Start { count } => start(db_path, count),
        WorkerAction::Stop { force } => stop(db_path, force),
        WorkerAction::Status => status(db_path),
        WorkerAction::Run { worker_id } => run(db_path, worker_id).await,
    }
}

fn start(db_path: &Path, count: u32) -> CmdResult {
    if count < 1 {
        return Err("worker count must be at least 1".into());
    }

    let manager = WorkerManager::new(crate::queuectl_dir(), db_path);
    let pids = manager.start(count)?;

    let pid_list = pids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    println!("Started {} worker(s) (PID: {pid_list})", pids.len());
    Ok(())
}

fn stop(db_path: &Path, force: bool) -> CmdResult {
    let manager = WorkerManager::new(crate::queuectl_dir(), db_path);
    let stopped = manager.stop(force)?;

    if stopped == 0 {
        println!("No workers running");
    } else {
        println!("Stopped {stopped} worker(s)");
    }
    Ok(())
}

fn status(db_path: &Path) -> CmdResult {
    let manager = WorkerManager::new(crate::queuectl_dir(), db_path);
    let workers = manager.status()?;

    if workers.is_empty() {
        println!("No workers running");
        return Ok(());
    }

    println!("{:<42} {:<8} {}", "WORKER", "PID", "STARTED");
    println!("{}", "-".repeat(80));
    for worker in &workers {
        let started = worker
            .started_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<42} {:<8} {}", worker.worker_id, worker.pid, started);
    }

    println!("\nTotal workers: {}", workers.len());
    Ok(())
}

/// Run a worker loop in the foreground until a shutdown signal arrives.
async fn run(db_path: &Path, worker_id: Option<String>) -> CmdResult {
    let worker_id = worker_id.unwrap_or_else(|| format!("worker-{}", std::process::id()));

    let store = Arc::new(SqliteJobStore::open(db_path).await?);
    let shutdown = ShutdownFlag::new();

    // SIGTERM/SIGINT request a graceful stop; the loop finishes its current
    // job before exiting.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for kind in [SignalKind::terminate(), SignalKind::interrupt()] {
            let mut sig = signal(kind)?;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if sig.recv().await.is_some() {
                    info!("shutdown signal received, finishing current job");
                    shutdown.request();
                }
            });
        }
    }

    let worker = Worker::new(worker_id, store, Arc::new(ShellExecutor), shutdown);
    worker.run().await;
    Ok(())
}
