//! Retry scheduling policy.

use chrono::{DateTime, Duration, Utc};

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once the backoff window elapses.
    Retry { next_retry_at: DateTime<Utc> },
    /// Retry budget exhausted; dead-letter the job.
    Dead,
}

/// Decide the fate of a job whose execution just failed.
///
/// `attempts` is the post-increment execution count. The backoff window is
/// exactly `backoff_base^attempts` seconds, no jitter, no cap; callers depend
/// on that exact schedule.
pub fn decide(
    attempts: u32,
    max_retries: u32,
    backoff_base: u32,
    now: DateTime<Utc>,
) -> RetryDecision {
    if attempts > max_retries {
        return RetryDecision::Dead;
    }

    let delay_secs = (backoff_base as u64)
        .saturating_pow(attempts)
        .min(i64::MAX as u64) as i64;

    RetryDecision::Retry {
        next_retry_at: now + Duration::seconds(delay_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn retry_at(decision: RetryDecision) -> DateTime<Utc> {
        match decision {
            RetryDecision::Retry { next_retry_at } => next_retry_at,
            RetryDecision::Dead => panic!("expected a retry decision"),
        }
    }

    #[test]
    fn test_backoff_is_base_to_the_attempts() {
        let t = now();
        assert_eq!(retry_at(decide(1, 3, 2, t)), t + Duration::seconds(2));
        assert_eq!(retry_at(decide(2, 3, 2, t)), t + Duration::seconds(4));
        assert_eq!(retry_at(decide(3, 3, 2, t)), t + Duration::seconds(8));

        assert_eq!(retry_at(decide(2, 3, 3, t)), t + Duration::seconds(9));
    }

    #[test]
    fn test_dead_once_budget_exhausted() {
        assert_eq!(decide(4, 3, 2, now()), RetryDecision::Dead);
        // max_retries=1 allows two executions in total.
        assert_eq!(decide(2, 1, 2, now()), RetryDecision::Dead);
        // max_retries=0: the very first failure is terminal.
        assert_eq!(decide(1, 0, 2, now()), RetryDecision::Dead);
    }

    #[test]
    fn test_boundary_attempt_still_retries() {
        assert!(matches!(decide(3, 3, 2, now()), RetryDecision::Retry { .. }));
    }

    #[test]
    fn test_huge_attempt_count_saturates() {
        // Must not panic or overflow.
        assert!(matches!(decide(63, 100, 2, now()), RetryDecision::Retry { .. }));
    }
}
