use chrono::{DateTime, Duration, Utc};

/// Retry delays in seconds, indexed by attempt count.
const BACKOFF_TABLE_SECS: [i64; 6] = [0, 1, 3, 8, 20, 45];

/// Attempts at or above this count end in the terminal `failed` state.
pub const MAX_ATTEMPTS: i32 = 5;

/// Delay before the next attempt, clamped to the last table entry.
pub fn delay_seconds(attempts: i32) -> i64 {
    let idx = usize::try_from(attempts.max(0))
        .unwrap_or(usize::MAX)
        .min(BACKOFF_TABLE_SECS.len() - 1);
    BACKOFF_TABLE_SECS[idx]
}

/// What to persist after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    GiveUp,
}

/// Decide between rescheduling and terminal failure for a record that has
/// been claimed `attempts` times.
pub fn next_retry(attempts: i32, now: DateTime<Utc>) -> RetryDecision {
    if attempts >= MAX_ATTEMPTS {
        RetryDecision::GiveUp
    } else {
        RetryDecision::RetryAt(now + Duration::seconds(delay_seconds(attempts)))
    }
}
