//! Retry and backoff policy.
//!
//! Pure and deterministic given its inputs so it can be tested without a
//! clock or a database.

/// Decision returned by [`next_after_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule to `pending` at the given epoch; attempts remain.
    Retry { next_run_time: i64 },
    /// Attempts exhausted; the task is terminal.
    PermanentlyFailed,
}

/// `backoff(n, base)`: `base` seconds if `base > 0`, else `2^(n-1)` seconds
/// capped at 60. `n` is the 1-indexed attempt number that just failed.
pub fn backoff(attempt: i32, retry_interval: i32) -> i64 {
    if retry_interval > 0 {
        return retry_interval as i64;
    }
    let n = attempt.max(1) as u32;
    let exp = 1i64.checked_shl(n - 1).unwrap_or(i64::MAX);
    exp.min(60)
}

/// Decide whether a task that just failed its `retry_count`-th attempt
/// should be retried or marked permanently failed.
///
/// `retry_count` is the post-increment attempt count set by `claim_ready`.
/// Cron tasks never retry through this path — a failed cron task simply
/// fires again on its own schedule — so callers must not invoke this for
/// `TaskType::Cron`.
pub fn next_after_failure(retry_count: i32, max_retries: i32, retry_interval: i32, now: i64) -> RetryDecision {
    if retry_count > max_retries {
        RetryDecision::PermanentlyFailed
    } else {
        RetryDecision::Retry {
            next_run_time: now + backoff(retry_count, retry_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_exponential_capped_at_60() {
        assert_eq!(backoff(1, 0), 1);
        assert_eq!(backoff(2, 0), 2);
        assert_eq!(backoff(3, 0), 4);
        assert_eq!(backoff(7, 0), 64i64.min(60));
        assert_eq!(backoff(10, 0), 60);
    }

    #[test]
    fn nonzero_interval_is_used_verbatim() {
        assert_eq!(backoff(1, 5), 5);
        assert_eq!(backoff(9, 5), 5);
    }

    #[test]
    fn retries_while_attempts_remain() {
        let decision = next_after_failure(1, 3, 0, 1000);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                next_run_time: 1001
            }
        );
    }

    #[test]
    fn exhausts_after_max_retries() {
        let decision = next_after_failure(4, 3, 0, 1000);
        assert_eq!(decision, RetryDecision::PermanentlyFailed);
    }

    #[test]
    fn boundary_retry_count_equals_max_is_last_retry() {
        let decision = next_after_failure(4, 4, 0, 1000);
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }
}
