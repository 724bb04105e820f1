//! Job, DLQ and config subcommand handlers.

use std::io::{self, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};

use queuectl_daemon::WorkerManager;
use queuectl_queue::{Job, JobSpec, JobState, JobStore, SqliteJobStore};

use crate::cli::{ConfigAction, DlqAction};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

async fn open_store(db_path: &Path) -> Result<SqliteJobStore, Box<dyn std::error::Error>> {
    Ok(SqliteJobStore::open(db_path).await?)
}

/// Ask for confirmation on destructive operations.
fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N]: ");
    io::stdout().flush().ok();

    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

pub(crate) async fn enqueue(db_path: &Path, job_json: &str) -> CmdResult {
    let raw = if let Some(path) = job_json.strip_prefix('@') {
        std::fs::read_to_string(path)?
    } else {
        job_json.to_string()
    };
    let spec: JobSpec =
        serde_json::from_str(&raw).map_err(|e| format!("invalid job JSON: {e}"))?;

    let store = open_store(db_path).await?;
    let config = store.config().await?;
    let job = Job::from_spec(spec, config.max_retries, Utc::now())?;
    store.enqueue(&job).await?;

    println!("Job '{}' enqueued", job.id);
    println!("  command:     {}", job.command);
    println!("  max retries: {}", job.max_retries);
    Ok(())
}

pub(crate) async fn list(db_path: &Path, state: Option<JobState>, limit: usize) -> CmdResult {
    let store = open_store(db_path).await?;
    let jobs = store.list(state).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    let total = jobs.len();
    let shown = &jobs[..total.min(limit)];

    println!(
        "{:<16} {:<40} {:<12} {:<9} {:<30} {}",
        "ID", "COMMAND", "STATE", "ATTEMPTS", "ERROR", "CREATED"
    );
    println!("{}", "-".repeat(130));
    for job in shown {
        println!(
            "{:<16} {:<40} {:<12} {:<9} {:<30} {}",
            truncate(&job.id, 16),
            truncate(&job.command, 40),
            job.state,
            format!("{}/{}", job.attempts, job.max_retries),
            truncate(job.error_message.as_deref().unwrap_or("-"), 30),
            job.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    println!("\nShowing {} of {} job(s)", shown.len(), total);
    if shown.len() < total {
        println!("(use --limit to show more)");
    }
    Ok(())
}

pub(crate) async fn get(db_path: &Path, job_id: &str) -> CmdResult {
    let store = open_store(db_path).await?;
    let job = store
        .get(job_id)
        .await?
        .ok_or_else(|| format!("job '{job_id}' not found"))?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

pub(crate) async fn status(db_path: &Path) -> CmdResult {
    let store = open_store(db_path).await?;
    let counts = store.counts().await?;
    let config = store.config().await?;

    let manager = WorkerManager::new(crate::queuectl_dir(), db_path);
    let workers = manager.status()?;

    println!("Jobs by state:");
    let mut total = 0;
    for (state, count) in &counts {
        println!("  {:<12} {}", state.to_string(), count);
        total += count;
    }
    println!("\nTotal jobs: {total}");
    println!("Active workers: {}", workers.len());

    println!("\nConfiguration:");
    println!("  max retries:          {}", config.max_retries);
    println!("  backoff base:         {}", config.backoff_base);
    println!("  worker poll interval: {}s", config.worker_poll_interval);
    println!("  job timeout:          {}s", config.job_timeout);
    println!("  lease timeout:        {}s", config.lease_timeout);
    Ok(())
}

pub(crate) async fn clear(db_path: &Path, state: Option<JobState>, yes: bool) -> CmdResult {
    let what = match state {
        Some(state) => format!("all {state} jobs"),
        None => "all jobs".to_string(),
    };
    if !yes && !confirm(&format!("Delete {what}?")) {
        println!("Aborted");
        return Ok(());
    }

    let store = open_store(db_path).await?;
    let removed = store.clear(state).await?;
    println!("Deleted {removed} job(s)");
    Ok(())
}

pub(crate) async fn handle_dlq(db_path: &Path, action: DlqAction) -> CmdResult {
    match action {
        DlqAction::List => dlq_list(db_path).await,
        DlqAction::Retry {
            job_id,
            reset_attempts,
        } => dlq_retry(db_path, &job_id, reset_attempts).await,
        DlqAction::Clear { yes } => dlq_clear(db_path, yes).await,
    }
}

async fn dlq_list(db_path: &Path) -> CmdResult {
    let store = open_store(db_path).await?;
    let jobs = store.list(Some(JobState::Dead)).await?;

    if jobs.is_empty() {
        println!("No jobs in DLQ");
        return Ok(());
    }

    println!(
        "{:<16} {:<40} {:<9} {:<40} {}",
        "ID", "COMMAND", "ATTEMPTS", "LAST ERROR", "FAILED AT"
    );
    println!("{}", "-".repeat(130));
    for job in &jobs {
        println!(
            "{:<16} {:<40} {:<9} {:<40} {}",
            truncate(&job.id, 16),
            truncate(&job.command, 40),
            job.attempts,
            truncate(job.error_message.as_deref().unwrap_or("-"), 40),
            job.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    println!("\nTotal jobs in DLQ: {}", jobs.len());
    Ok(())
}

async fn dlq_retry(db_path: &Path, job_id: &str, reset_attempts: bool) -> CmdResult {
    let store = open_store(db_path).await?;
    let job = store.retry_dead(job_id, reset_attempts).await?;

    println!("Job '{}' moved back to pending queue", job.id);
    if reset_attempts {
        println!("  attempts reset to 0");
    } else {
        println!("  attempts kept at {}", job.attempts);
    }
    Ok(())
}

async fn dlq_clear(db_path: &Path, yes: bool) -> CmdResult {
    if !yes && !confirm("Delete all DLQ jobs?") {
        println!("Aborted");
        return Ok(());
    }

    let store = open_store(db_path).await?;
    let removed = store.clear(Some(JobState::Dead)).await?;
    println!("Deleted {removed} job(s) from DLQ");
    Ok(())
}

pub(crate) async fn handle_config(db_path: &Path, action: ConfigAction) -> CmdResult {
    match action {
        ConfigAction::Show => config_show(db_path).await,
        ConfigAction::Set { key, value } => config_set(db_path, &key, &value).await,
    }
}

async fn config_show(db_path: &Path) -> CmdResult {
    let store = open_store(db_path).await?;
    let config = store.config().await?;

    println!("{:<22} {:<8} {}", "KEY", "VALUE", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    println!(
        "{:<22} {:<8} {}",
        "max-retries", config.max_retries, "Default retry ceiling for failed jobs"
    );
    println!(
        "{:<22} {:<8} {}",
        "backoff-base", config.backoff_base, "Base for exponential backoff (base^attempts seconds)"
    );
    println!(
        "{:<22} {:<8} {}",
        "worker-poll-interval",
        config.worker_poll_interval,
        "Worker polling interval (seconds)"
    );
    println!(
        "{:<22} {:<8} {}",
        "job-timeout", config.job_timeout, "Job execution timeout (seconds)"
    );
    println!(
        "{:<22} {:<8} {}",
        "lease-timeout", config.lease_timeout, "Stale lease threshold (seconds)"
    );
    Ok(())
}

async fn config_set(db_path: &Path, key: &str, value: &str) -> CmdResult {
    let store = open_store(db_path).await?;

    let mut config = store.config().await?;
    config.set_key(key, value)?;
    store.set_config(&config).await?;

    println!("Configuration updated: {key} = {value}");
    println!("  workers pick up the change on their next poll cycle");
    Ok(())
}
