//! Status - キューの状態集計

use serde::{Deserialize, Serialize};

use crate::queue::EntryStatus;

/// status ごとの QueueEntry 件数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub dead: usize,
    pub done: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: EntryStatus, n: usize) {
        let slot = match status {
            EntryStatus::Pending => &mut self.pending,
            EntryStatus::InProgress => &mut self.in_progress,
            EntryStatus::Failed => &mut self.failed,
            EntryStatus::Dead => &mut self.dead,
            EntryStatus::Done => &mut self.done,
        };
        *slot += n;
    }

    pub fn get(&self, status: EntryStatus) -> usize {
        match status {
            EntryStatus::Pending => self.pending,
            EntryStatus::InProgress => self.in_progress,
            EntryStatus::Failed => self.failed,
            EntryStatus::Dead => self.dead,
            EntryStatus::Done => self.done,
        }
    }

    pub fn total(&self) -> usize {
        EntryStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// まだ終端に達していない件数（pending + in_progress + failed）
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_progress + self.failed
    }
}
