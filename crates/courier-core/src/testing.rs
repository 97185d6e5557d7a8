//! Fixtures shared by the in-crate tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::app::status::StatusCounts;
use crate::config::CourierConfig;
use crate::domain::{EntryId, FailureDecision, Gid, WorkerId};
use crate::error::StoreError;
use crate::impls::SqliteOutboxStore;
use crate::ports::OutboxStore;
use crate::queue::{BackoffPolicy, EntryStatus, NewEvent, QueueEntry, Record};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Create `dir/rel` (and its parents) with some bytes in it.
pub(crate) fn write_resource(dir: &Path, rel: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, b"resource").unwrap();
    path
}

pub(crate) fn pending_entry(gid: &str, path: &Path) -> QueueEntry {
    QueueEntry {
        id: EntryId::new(1),
        gid: Gid::new(gid),
        path: path.to_string_lossy().to_string(),
        status: EntryStatus::Pending,
        lease: None,
        created_at: "2024-05-01 12:00:00.000".to_string(),
        processed_at: None,
        attempts: 0,
        max_attempts: 5,
        next_retry_at: None,
        last_error: None,
    }
}

/// Config rooted in a temp dir, with intervals short enough for tests.
pub(crate) fn test_config(dir: &Path) -> CourierConfig {
    CourierConfig {
        db_path: dir.join("outbox.db"),
        save_dir: dir.join("saved"),
        poll_interval_ms: 10,
        sweep_interval_secs: 1,
        busy_timeout_ms: 5_000,
        ..CourierConfig::default()
    }
}

/// Store whose calls can be switched to fail with transient errors.
///
/// - commits: `Unavailable`
/// - claims: `Busy`
/// - sweeps: `Busy` for stuck leases, `Unavailable` for due retries
pub(crate) struct FlakyStore {
    pub(crate) inner: SqliteOutboxStore,
    fail_commits: AtomicBool,
    fail_claims: AtomicBool,
    fail_sweeps: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new(inner: SqliteOutboxStore) -> Self {
        Self {
            inner,
            fail_commits: AtomicBool::new(false),
            fail_claims: AtomicBool::new(false),
            fail_sweeps: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sweeps(&self, fail: bool) {
        self.fail_sweeps.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, err: fn() -> StoreError) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(err());
        }
        Ok(())
    }
}

fn offline() -> StoreError {
    StoreError::Unavailable("store offline".to_string())
}

fn busy() -> StoreError {
    StoreError::Busy("database is locked".to_string())
}

#[async_trait]
impl OutboxStore for FlakyStore {
    async fn publish(&self, event: NewEvent, now: DateTime<Utc>) -> Result<EntryId, StoreError> {
        self.inner.publish(event, now).await
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, StoreError> {
        Self::check(&self.fail_claims, busy)?;
        self.inner.claim_next(worker, now).await
    }

    async fn complete(
        &self,
        entry: &QueueEntry,
        worker: &WorkerId,
        payload: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Self::check(&self.fail_commits, offline)?;
        self.inner.complete(entry, worker, payload, now).await
    }

    async fn record_failure(
        &self,
        entry: &QueueEntry,
        worker: &WorkerId,
        error: String,
        backoff: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureDecision, StoreError> {
        Self::check(&self.fail_commits, offline)?;
        self.inner
            .record_failure(entry, worker, error, backoff, now)
            .await
    }

    async fn recover_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        dry_run: bool,
    ) -> Result<Vec<EntryId>, StoreError> {
        Self::check(&self.fail_sweeps, busy)?;
        self.inner.recover_stuck(cutoff, limit, dry_run).await
    }

    async fn requeue_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        dry_run: bool,
    ) -> Result<Vec<EntryId>, StoreError> {
        Self::check(&self.fail_sweeps, offline)?;
        self.inner.requeue_due(now, limit, dry_run).await
    }

    async fn entry(&self, gid: &Gid) -> Result<Option<QueueEntry>, StoreError> {
        self.inner.entry(gid).await
    }

    async fn record(&self, gid: &Gid) -> Result<Option<Record>, StoreError> {
        self.inner.record(gid).await
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        self.inner.counts().await
    }
}
