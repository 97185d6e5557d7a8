//! Error taxonomy for the delivery queue.
//!
//! - `StoreError`: anything the durable store reports. Only the transient
//!   variants (`Busy`, `Unavailable`) may be absorbed by the loops.
//! - `DeliveryError`: a failed delivery attempt. Always counted against the
//!   entry (attempts/backoff/dead-letter), never absorbed.
//! - `CourierError`: what the app layer surfaces to callers.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{EntryId, Gid};

/// Errors reported by an `OutboxStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock contention (another writer holds the store).
    #[error("store busy: {0}")]
    Busy(String),

    /// The store cannot be reached or the connection is unusable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The producer tried to publish a gid that already exists.
    #[error("duplicate gid: {0}")]
    DuplicateGid(Gid),

    /// A fenced commit matched no row: the entry is no longer leased by this worker.
    #[error("lease lost for entry {0}")]
    LeaseLost(EntryId),

    /// A row could not be decoded (unknown status, malformed timestamp, ...).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Any other statement failure (constraint, schema mismatch).
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Contention or unavailability: "nothing to do this cycle".
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_) | StoreError::Unavailable(_))
    }
}

/// Opaque failure reported by a `Sender`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SenderError(pub String);

impl SenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure while relocating a resource.
#[derive(Debug, Error)]
pub enum RelocationError {
    #[error("source resource missing: {}", .0.display())]
    Missing(PathBuf),

    #[error("relocation failed {} -> {}: {source}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failed delivery attempt (relocation or send).
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("resource missing: {}", .0.display())]
    ResourceMissing(PathBuf),

    #[error(transparent)]
    Relocation(RelocationError),

    #[error("send failed: {0}")]
    Sender(#[from] SenderError),

    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<RelocationError> for DeliveryError {
    fn from(err: RelocationError) -> Self {
        match err {
            RelocationError::Missing(path) => DeliveryError::ResourceMissing(path),
            other => DeliveryError::Relocation(other),
        }
    }
}

/// Errors surfaced by the app layer.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// The outcome of a delivery could not be written; the entry stays `in_progress`.
    #[error("terminal commit failed for entry {entry_id}: {source}")]
    TerminalCommit {
        entry_id: EntryId,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Truncate error text before it is persisted as `last_error`.
///
/// Counts characters, not bytes, so a multi-byte message is never cut mid-codepoint.
pub fn truncate_error(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::busy(StoreError::Busy("locked".into()), true)]
    #[case::unavailable(StoreError::Unavailable("closed".into()), true)]
    #[case::lease_lost(StoreError::LeaseLost(EntryId::new(1)), false)]
    #[case::corrupt(StoreError::Corrupt("status=weird".into()), false)]
    #[case::query(StoreError::Query("no such table".into()), false)]
    fn transient_classification(#[case] err: StoreError, #[case] transient: bool) {
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn truncate_keeps_short_messages() {
        assert_eq!(truncate_error("boom", 1000), "boom");
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let msg = "送信失敗".repeat(10);
        let cut = truncate_error(&msg, 3);
        assert_eq!(cut, "送信失");
    }

    #[test]
    fn missing_relocation_maps_to_resource_missing() {
        let err: DeliveryError = RelocationError::Missing(PathBuf::from("a/b.jpg")).into();
        assert!(matches!(err, DeliveryError::ResourceMissing(p) if p == PathBuf::from("a/b.jpg")));
    }
}
