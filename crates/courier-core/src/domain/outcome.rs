//! Outcome model: what one worker cycle or one sweep did.
//!
//! These are reporting values only. The store rows are the source of truth;
//! loops use the outcome to decide whether to sleep and what to log.

use serde::{Deserialize, Serialize};

use super::decision::FailureDecision;
use super::ids::{EntryId, Gid};

/// Result of one worker cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nothing was claimed (empty queue, lost race, or transient store error).
    Idle,

    /// Delivered and committed as `done`.
    Delivered { entry_id: EntryId, gid: Gid },

    /// Attempt failed and the failure was committed.
    Failed {
        entry_id: EntryId,
        gid: Gid,
        decision: FailureDecision,
        error: String,
    },

    /// The outcome could not be committed; the entry stays `in_progress`
    /// until the sweeper's lease timeout returns it to `pending`.
    Uncommitted { entry_id: EntryId, gid: Gid },
}

impl CycleOutcome {
    /// Did this cycle claim an entry? Idle cycles are followed by a poll sleep.
    pub fn claimed(&self) -> bool {
        !matches!(self, CycleOutcome::Idle)
    }
}

/// Result of one sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Entries whose lease timed out (reset, or only matched in dry-run).
    pub stuck: Vec<EntryId>,

    /// Failed entries whose retry time arrived.
    pub due: Vec<EntryId>,

    pub dry_run: bool,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.stuck.is_empty() && self.due.is_empty()
    }

    pub fn total(&self) -> usize {
        self.stuck.len() + self.due.len()
    }
}
