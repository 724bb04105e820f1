
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::clock::FixedClock;
use crate::job::{Job, JobState};

fn epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

async fn store_with_clock() -> (SqliteJobStore, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(epoch()));
    let store = SqliteJobStore::in_memory_with_clock(clock.clone())
        .await
        .unwrap();
    (store, clock)
}

fn job(id: &str, max_retries: u32, clock: &FixedClock) -> Job {
    Job::new(id, "true", max_retries, clock.now())
}

#[tokio::test]
async fn test_enqueue_and_get() {
    let (store, clock) = store_with_clock().await;

    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let fetched = store.get("a").await.unwrap().unwrap();
    assert_eq!(fetched.id, "a");
    assert_eq!(fetched.command, "true");
    assert_eq!(fetched.state, JobState::Pending);
    assert_eq!(fetched.attempts, 0);
    assert_eq!(fetched.max_retries, 3);
    assert!(fetched.locked_by.is_none());

    assert!(store.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_enqueue_duplicate_id() {
    let (store, clock) = store_with_clock().await;

    store.enqueue(&job("a", 3, &clock)).await.unwrap();
    let err = store.enqueue(&job("a", 3, &clock)).await.unwrap_err();
    assert!(matches!(err, QueueError::DuplicateId(id) if id == "a"));
}

#[tokio::test]
async fn test_acquire_empty_queue_returns_none() {
    let (store, _clock) = store_with_clock().await;
    assert!(store.acquire("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_acquire_leases_pending_job() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let leased = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(leased.id, "a");
    assert_eq!(leased.state, JobState::Processing);
    assert_eq!(leased.locked_by.as_deref(), Some("w1"));
    assert_eq!(leased.locked_at, Some(clock.now()));

    // Nothing else is eligible while the lease is fresh.
    assert!(store.acquire("w2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_acquire_is_fifo() {
    let (store, clock) = store_with_clock().await;

    store.enqueue(&job("older", 3, &clock)).await.unwrap();
    clock.advance_secs(1);
    store.enqueue(&job("newer", 3, &clock)).await.unwrap();

    let first = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(first.id, "older");
    let second = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(second.id, "newer");
}

#[tokio::test]
async fn test_acquire_fifo_ties_break_by_id() {
    let (store, clock) = store_with_clock().await;

    // Same created_at; the lower id wins.
    store.enqueue(&job("b", 3, &clock)).await.unwrap();
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let first = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(first.id, "a");
}

#[tokio::test]
async fn test_acquire_mutual_exclusion_across_connections() {
    // Two independent connections to one database file, racing for a single
    // eligible job. Exactly one caller may win.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");

    let store1 = Arc::new(SqliteJobStore::open(&path).await.unwrap());
    let store2 = Arc::new(SqliteJobStore::open(&path).await.unwrap());

    store1
        .enqueue(&Job::new("contended", "true", 3, Utc::now()))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = if i % 2 == 0 { store1.clone() } else { store2.clone() };
        handles.push(tokio::spawn(async move {
            store.acquire(&format!("w{i}")).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_complete_clears_lock_and_error() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    let completed = store.complete("a").await.unwrap();

    assert_eq!(completed.state, JobState::Completed);
    assert!(completed.locked_by.is_none());
    assert!(completed.locked_at.is_none());
    assert!(completed.error_message.is_none());
}

#[tokio::test]
async fn test_complete_twice_is_invalid_transition() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();
    store.acquire("w1").await.unwrap().unwrap();

    store.complete("a").await.unwrap();
    let err = store.complete("a").await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobState::Completed,
            to: JobState::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_complete_unknown_job() {
    let (store, _clock) = store_with_clock().await;
    let err = store.complete("ghost").await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn test_fail_requires_processing() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let err = store.fail("a", "boom").await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobState::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fail_schedules_exact_backoff() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 5, &clock)).await.unwrap();

    // attempts 1, 2, 3 with base 2 must schedule retries at exactly
    // +2s, +4s, +8s from the moment of failure.
    for expected_delay in [2i64, 4, 8] {
        store.acquire("w1").await.unwrap().unwrap();
        let failed_at = clock.now();
        let failed = store.fail("a", "boom").await.unwrap();

        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(
            failed.next_retry_at,
            Some(failed_at + Duration::seconds(expected_delay))
        );
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(failed.locked_by.is_none());

        clock.advance_secs(expected_delay);
    }
}

#[tokio::test]
async fn test_failed_job_not_eligible_until_backoff_elapses() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    store.fail("a", "boom").await.unwrap();

    // Backoff window is 2s; one second in, the job is still cooling off.
    clock.advance_secs(1);
    assert!(store.acquire("w1").await.unwrap().is_none());

    clock.advance_secs(1);
    let retried = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(retried.id, "a");
    assert_eq!(retried.state, JobState::Processing);
    assert!(retried.next_retry_at.is_none());
}

#[tokio::test]
async fn test_retries_exhausted_moves_to_dead() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 2, &clock)).await.unwrap();

    for _ in 0..2 {
        store.acquire("w1").await.unwrap().unwrap();
        let failed = store.fail("a", "boom").await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        clock.advance_secs(3600);
    }

    store.acquire("w1").await.unwrap().unwrap();
    let dead = store.fail("a", "boom").await.unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 3);
    assert!(dead.next_retry_at.is_none());

    // Dead jobs are never eligible for acquisition.
    clock.advance_secs(24 * 3600);
    assert!(store.acquire("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_fail_to_dead_scenario() {
    // enqueue {id:"b", max_retries:1}: fail, wait out the 2s backoff, fail
    // again -> attempts 2 exceeds the budget and the job is dead.
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("b", 1, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    let failed_at = clock.now();
    let failed = store.fail("b", "exit code: 1").await.unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.next_retry_at, Some(failed_at + Duration::seconds(2)));

    clock.advance_secs(2);
    store.acquire("w1").await.unwrap().unwrap();
    let dead = store.fail("b", "exit code: 1").await.unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 2);
}

#[tokio::test]
async fn test_release_returns_to_pending_without_counting_attempt() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    let released = store.release("a").await.unwrap();

    assert_eq!(released.state, JobState::Pending);
    assert_eq!(released.attempts, 0);
    assert!(released.locked_by.is_none());

    // Immediately acquirable again.
    let reacquired = store.acquire("w2").await.unwrap().unwrap();
    assert_eq!(reacquired.locked_by.as_deref(), Some("w2"));
}

#[tokio::test]
async fn test_release_requires_processing() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let err = store.release("a").await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_stale_lease_is_reclaimed_by_another_worker() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let leased = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(leased.locked_by.as_deref(), Some("w1"));

    // Default lease timeout is 600s; just past it the lease is stale.
    clock.advance_secs(601);
    let reclaimed = store.acquire("w2").await.unwrap().unwrap();

    assert_eq!(reclaimed.id, "a");
    assert_eq!(reclaimed.state, JobState::Processing);
    assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
    assert_eq!(reclaimed.locked_at, Some(clock.now()));
    // The vanished execution counts as a failed attempt.
    assert_eq!(reclaimed.attempts, 1);
}

#[tokio::test]
async fn test_fresh_lease_is_not_reclaimed() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    clock.advance_secs(599);
    assert!(store.acquire("w2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_lease_with_no_budget_left_goes_dead() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 0, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    clock.advance_secs(601);

    // Reclamation would push attempts past max_retries, so the job is
    // dead-lettered instead of handed over.
    assert!(store.acquire("w2").await.unwrap().is_none());

    let dead = store.get("a").await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 1);
    assert!(dead.error_message.as_deref().unwrap().contains("lease"));
}

#[tokio::test]
async fn test_stale_lease_respects_configured_timeout() {
    let (store, clock) = store_with_clock().await;

    let mut config = store.config().await.unwrap();
    config.lease_timeout = 30;
    store.set_config(&config).await.unwrap();

    store.enqueue(&job("a", 3, &clock)).await.unwrap();
    store.acquire("w1").await.unwrap().unwrap();

    clock.advance_secs(31);
    let reclaimed = store.acquire("w2").await.unwrap().unwrap();
    assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
}

#[tokio::test]
async fn test_retry_dead_with_reset_attempts() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 0, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    let dead = store.fail("a", "boom").await.unwrap();
    assert_eq!(dead.state, JobState::Dead);

    let revived = store.retry_dead("a", true).await.unwrap();
    assert_eq!(revived.state, JobState::Pending);
    assert_eq!(revived.attempts, 0);
    assert!(revived.next_retry_at.is_none());
    assert!(revived.error_message.is_none());
}

#[tokio::test]
async fn test_retry_dead_without_reset_allows_one_more_try() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 1, &clock)).await.unwrap();

    // Exhaust the budget: two failures with max_retries=1.
    for _ in 0..2 {
        store.acquire("w1").await.unwrap().unwrap();
        store.fail("a", "boom").await.unwrap();
        clock.advance_secs(3600);
    }
    assert_eq!(store.get("a").await.unwrap().unwrap().state, JobState::Dead);

    // Revive without resetting the counter: attempts stays at its terminal
    // value, so the very next failure returns the job to the DLQ.
    let revived = store.retry_dead("a", false).await.unwrap();
    assert_eq!(revived.state, JobState::Pending);
    assert_eq!(revived.attempts, 2);

    store.acquire("w1").await.unwrap().unwrap();
    let dead_again = store.fail("a", "boom").await.unwrap();
    assert_eq!(dead_again.state, JobState::Dead);
    assert_eq!(dead_again.attempts, 3);
}

#[tokio::test]
async fn test_retry_dead_requires_dead_state() {
    let (store, clock) = store_with_clock().await;
    store.enqueue(&job("a", 3, &clock)).await.unwrap();

    let err = store.retry_dead("a", false).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobState::Pending,
            to: JobState::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn test_list_and_counts() {
    let (store, clock) = store_with_clock().await;

    store.enqueue(&job("a", 3, &clock)).await.unwrap();
    clock.advance_secs(1);
    store.enqueue(&job("b", 3, &clock)).await.unwrap();
    clock.advance_secs(1);
    store.enqueue(&job("c", 3, &clock)).await.unwrap();

    store.acquire("w1").await.unwrap().unwrap();
    store.complete("a").await.unwrap();

    let all = store.list(None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, "a"); // oldest first

    let pending = store.list(Some(JobState::Pending)).await.unwrap();
    assert_eq!(pending.len(), 2);

    let counts = store.counts().await.unwrap();
    let count_of = |state: JobState| {
        counts
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, n)| *n)
            .unwrap()
    };
    assert_eq!(count_of(JobState::Pending), 2);
    assert_eq!(count_of(JobState::Completed), 1);
    assert_eq!(count_of(JobState::Dead), 0);
}

#[tokio::test]
async fn test_delete_and_clear() {
    let (store, clock) = store_with_clock().await;

    store.enqueue(&job("a", 3, &clock)).await.unwrap();
    store.enqueue(&job("b", 3, &clock)).await.unwrap();
    store.enqueue(&job("c", 3, &clock)).await.unwrap();

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());
    assert!(store.get("a").await.unwrap().is_none());

    store.acquire("w1").await.unwrap().unwrap();
    store.complete("b").await.unwrap();

    let removed = store.clear(Some(JobState::Completed)).await.unwrap();
    assert_eq!(removed, 1);

    let removed = store.clear(None).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_config_defaults_and_roundtrip() {
    let (store, _clock) = store_with_clock().await;

    let config = store.config().await.unwrap();
    assert_eq!(config, QueueConfig::default());

    let mut updated = config.clone();
    updated.max_retries = 7;
    updated.backoff_base = 3;
    updated.worker_poll_interval = 0.25;
    store.set_config(&updated).await.unwrap();

    assert_eq!(store.config().await.unwrap(), updated);
}

#[tokio::test]
async fn test_set_config_rejects_invalid() {
    let (store, _clock) = store_with_clock().await;

    let mut config = store.config().await.unwrap();
    config.job_timeout = 0;
    let err = store.set_config(&config).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidConfig(_)));

    // The stored config is untouched.
    assert_eq!(store.config().await.unwrap(), QueueConfig::default());
}

#[tokio::test]
async fn test_config_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");

    {
        let store = SqliteJobStore::open(&path).await.unwrap();
        let mut config = store.config().await.unwrap();
        config.max_retries = 9;
        store.set_config(&config).await.unwrap();
    }

    let store = SqliteJobStore::open(&path).await.unwrap();
    assert_eq!(store.config().await.unwrap().max_retries, 9);
}

#[tokio::test]
async fn test_succeed_scenario() {
    // enqueue {id:"a", command:"succeed", max_retries:3} -> acquire ->
    // complete -> completed.
    let (store, clock) = store_with_clock().await;
    store
        .enqueue(&Job::new("a", "succeed", 3, clock.now()))
        .await
        .unwrap();

    let leased = store.acquire("w1").await.unwrap().unwrap();
    assert_eq!(leased.command, "succeed");
    store.complete("a").await.unwrap();

    assert_eq!(
        store.get("a").await.unwrap().unwrap().state,
        JobState::Completed
    );
}
