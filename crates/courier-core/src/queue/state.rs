//! Queue entry state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Queue entry status.
///
/// State transitions:
/// - Pending -> InProgress (claim)
/// - InProgress -> Done (delivery committed)
/// - InProgress -> Failed (retry scheduled) -> Pending (sweeper, when due)
/// - InProgress -> Dead (attempts reached max_attempts)
/// - InProgress -> Pending (sweeper, lease timed out)
///
/// Done and Dead are terminal: nothing transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be claimed.
    Pending,

    /// Leased by a worker (`locked_by`/`locked_at` set).
    InProgress,

    /// Last attempt failed; waiting for `next_retry_at`.
    Failed,

    /// Retries exhausted (dead-letter).
    Dead,

    /// Delivered.
    Done,
}

impl EntryStatus {
    pub const ALL: [EntryStatus; 5] = [
        EntryStatus::Pending,
        EntryStatus::InProgress,
        EntryStatus::Failed,
        EntryStatus::Dead,
        EntryStatus::Done,
    ];

    /// The value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Failed => "failed",
            EntryStatus::Dead => "dead",
            EntryStatus::Done => "done",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Done | EntryStatus::Dead)
    }

    /// Is this entry eligible for claim?
    pub fn is_claimable(self) -> bool {
        matches!(self, EntryStatus::Pending)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entry status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for EntryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(EntryStatus::Pending, false)]
    #[case::in_progress(EntryStatus::InProgress, false)]
    #[case::failed(EntryStatus::Failed, false)]
    #[case::dead(EntryStatus::Dead, true)]
    #[case::done(EntryStatus::Done, true)]
    fn terminal_states(#[case] status: EntryStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn only_pending_is_claimable() {
        let claimable: Vec<_> = EntryStatus::ALL
            .into_iter()
            .filter(|s| s.is_claimable())
            .collect();
        assert_eq!(claimable, vec![EntryStatus::Pending]);
    }

    #[test]
    fn column_values_parse_back() {
        for status in EntryStatus::ALL {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
        assert!("sent".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn serde_matches_column_values() {
        let s = serde_json::to_string(&EntryStatus::InProgress).unwrap();
        assert_eq!(s, "\"in_progress\"");
    }
}
