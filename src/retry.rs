//! Pure backoff arithmetic and per-attempt retry bookkeeping.
//!
//! [`RetryPolicy::next`] is the only piece of actual logic here: a
//! deterministic doubling schedule with a ceiling, no jitter. Everything
//! else in this module ([`RetryRecord`], [`RetryState`]) is plain
//! bookkeeping appended to by the consumer core's retry loop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pure exponential-backoff schedule: `next(current, ceiling) = min(current * 2, ceiling)`.
///
/// No randomization — the source system specifies no jitter. When
/// `current >= ceiling` the ceiling is returned outright.
pub struct RetryPolicy;

impl RetryPolicy {
    /// Computes the delay for the attempt following one that waited `current`,
    /// capped at `ceiling`. `current` and `ceiling` must both be positive;
    /// this is enforced at [`crate::config::Config`] construction, not here.
    pub fn next(current: Duration, ceiling: Duration) -> Duration {
        if current >= ceiling {
            return ceiling;
        }
        current.checked_mul(2).unwrap_or(ceiling).min(ceiling)
    }
}

/// Formats a duration the way the retry history records it: whole seconds as
/// `"Ns"`, anything finer as `"Nms"`.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis > 0 && millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

/// One recorded attempt against a single message, appended in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    /// 1-based attempt number; `history[i].attempt == i + 1`.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: String,
    /// The backoff waited *before* this attempt, formatted (e.g. `"200ms"`).
    pub backoff: String,
}

/// Retry bookkeeping for a single message, keyed by `(topic, partition, offset)`
/// in [`crate::retry_state::RetryStateTable`].
///
/// Invariants: `attempts == history.len()`; `history[i].attempt == i + 1`;
/// `first_attempt == Some(history[0].timestamp)` once non-empty.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub first_attempt: Option<DateTime<Utc>>,
    pub history: Vec<RetryRecord>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `RetryRecord` for the attempt that just failed with `error`,
    /// having waited `backoff` before it ran (pass `Duration::ZERO` for the
    /// first attempt).
    pub fn record_attempt(&mut self, error: impl Into<String>, backoff: Duration) {
        let attempt = self.attempts + 1;
        let timestamp = Utc::now();
        if self.history.is_empty() {
            self.first_attempt = Some(timestamp);
        }
        self.history.push(RetryRecord {
            attempt,
            timestamp,
            error: error.into(),
            backoff: format_duration(backoff),
        });
        self.attempts = attempt;
    }
}
