//! Row models: the business record and its queue entry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::EntryStatus;
use super::timestamp::parse_date;
use crate::domain::{EntryId, Gid, WorkerId};

/// Business entity written by the producer.
///
/// `payload` is the only mutable field: it is set once, when delivery succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub gid: Gid,
    pub path: String,
    pub payload: Option<String>,
    pub created_at: String,
}

/// Lease held on a queue entry.
///
/// `locked_by` and `locked_at` only exist together, so they are modeled as one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub locked_by: WorkerId,
    pub locked_at: DateTime<Utc>,
}

/// Queue/task entity, 1:1 with `Record` via `gid`.
///
/// Design:
/// - The store row is the single source of truth; this is a snapshot.
/// - `created_at` is kept as stored text so an unparsable value can be
///   detected (and tolerated) by the relocation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub gid: Gid,
    pub path: String,
    pub status: EntryStatus,
    pub lease: Option<Lease>,
    pub created_at: String,
    pub processed_at: Option<DateTime<Utc>>,

    /// Failed delivery attempts so far. Never exceeds `max_attempts`.
    pub attempts: u32,

    /// Fixed when the entry is created.
    pub max_attempts: u32,

    pub next_retry_at: Option<DateTime<Utc>>,

    /// Truncated text of the most recent failure (advisory only).
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// Is this entry currently leased by `worker`?
    pub fn is_leased_by(&self, worker: &WorkerId) -> bool {
        self.status == EntryStatus::InProgress
            && self
                .lease
                .as_ref()
                .is_some_and(|lease| &lease.locked_by == worker)
    }

    /// Creation date, if the stored timestamp parses.
    pub fn created_on(&self) -> Option<NaiveDate> {
        parse_date(&self.created_at)
    }

    /// Remaining attempts before the entry is dead-lettered.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// What the producer writes: one Record and one pending QueueEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub gid: Gid,
    pub path: String,
    pub max_attempts: u32,
}

impl NewEvent {
    pub fn new(gid: Gid, path: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            gid,
            path: path.into(),
            max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(status: EntryStatus, lease: Option<Lease>) -> QueueEntry {
        QueueEntry {
            id: EntryId::new(1),
            gid: Gid::new("g1"),
            path: "a/b.jpg".to_string(),
            status,
            lease,
            created_at: "2024-03-04 05:06:07.000".to_string(),
            processed_at: None,
            attempts: 2,
            max_attempts: 5,
            next_retry_at: None,
            last_error: None,
        }
    }

    #[test]
    fn leased_by_requires_in_progress_and_matching_worker() {
        let worker = WorkerId::new("w1");
        let lease = Lease {
            locked_by: worker.clone(),
            locked_at: Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap(),
        };

        let leased = entry(EntryStatus::InProgress, Some(lease.clone()));
        assert!(leased.is_leased_by(&worker));
        assert!(!leased.is_leased_by(&WorkerId::new("w2")));
        assert!(!entry(EntryStatus::Done, Some(lease)).is_leased_by(&worker));
        assert!(!entry(EntryStatus::InProgress, None).is_leased_by(&worker));
    }

    #[test]
    fn created_on_parses_stored_date() {
        let e = entry(EntryStatus::Pending, None);
        assert_eq!(e.created_on(), NaiveDate::from_ymd_opt(2024, 3, 4));
        assert_eq!(e.remaining_attempts(), 3);
    }

    #[test]
    fn created_on_is_none_for_garbage() {
        let mut e = entry(EntryStatus::Pending, None);
        e.created_at = "not a date".to_string();
        assert_eq!(e.created_on(), None);
    }
}
