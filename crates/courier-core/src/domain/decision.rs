//! Decision model: what happens to an entry after a failed attempt.
//!
//! The decision is a pure function of the counters re-read inside the
//! failure transaction. Executing it (the UPDATE) is the store's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::BackoffPolicy;

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum FailureDecision {
    /// Entry becomes `failed`; the sweeper requeues it at `next_retry_at`.
    Retry {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },

    /// Entry becomes `dead` (terminal).
    MarkDead { attempts: u32 },
}

impl FailureDecision {
    pub fn attempts(&self) -> u32 {
        match self {
            FailureDecision::Retry { attempts, .. } | FailureDecision::MarkDead { attempts } => {
                *attempts
            }
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, FailureDecision::MarkDead { .. })
    }
}

/// Decide the next state after one more failed attempt.
///
/// # Arguments
/// * `attempts` - attempts recorded before this failure (fresh from the store)
/// * `max_attempts` - the entry's fixed limit
///
/// The incremented count reaching `max_attempts` dead-letters the entry, so
/// `attempts` never exceeds `max_attempts`.
pub fn decide_failure(
    attempts: u32,
    max_attempts: u32,
    backoff: &BackoffPolicy,
    now: DateTime<Utc>,
) -> FailureDecision {
    let attempts = attempts.saturating_add(1);
    if attempts >= max_attempts {
        FailureDecision::MarkDead {
            attempts: attempts.min(max_attempts.max(1)),
        }
    } else {
        FailureDecision::Retry {
            attempts,
            next_retry_at: backoff.next_retry(attempts, now),
        }
    }
}
