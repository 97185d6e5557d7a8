//! OutboxStore port - 正本（source of truth）となる耐久ストア
//!
//! OutboxStore は以下を管理します：
//! - Record（業務データ）と QueueEntry（配送タスク）
//! - lease（locked_by / locked_at）
//! - 再試行の状態（attempts, next_retry_at, last_error）
//!
//! # 実装
//! - **SqliteOutboxStore**: `impls::sqlite_store`

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::StatusCounts;
use crate::domain::{EntryId, FailureDecision, Gid, WorkerId};
use crate::error::StoreError;
use crate::queue::{BackoffPolicy, NewEvent, QueueEntry, Record};

/// OutboxStore は状態遷移をすべて短いトランザクションで行う
///
/// # 設計原則
/// - 排他の権威はここにある（プロセス内ロックには頼らない）
/// - すべての更新は「期待する状態」を条件に持つ（conditional update）
/// - トランザクションを開いたまま sleep や I/O をしない
/// - Done / Dead の行は二度と更新しない
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Producer 契約: Record と pending の QueueEntry を 1 トランザクションで作成
    async fn publish(&self, event: NewEvent, now: DateTime<Utc>) -> Result<EntryId, StoreError>;

    /// 最も古い pending を 1 件 claim（FIFO by created_at）
    ///
    /// 競合に負けた場合や pending が無い場合は `Ok(None)`。
    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// 配送成功: Record.payload を書き込み、エントリを done にする
    ///
    /// `worker` がまだ lease を持っていない場合は `StoreError::LeaseLost`。
    async fn complete(
        &self,
        entry: &QueueEntry,
        worker: &WorkerId,
        payload: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// 配送失敗: attempts を読み直して +1 し、failed か dead にする
    async fn record_failure(
        &self,
        entry: &QueueEntry,
        worker: &WorkerId,
        error: String,
        backoff: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureDecision, StoreError>;

    /// lease が `cutoff` より古い in_progress / failed を pending に戻す
    ///
    /// `dry_run` のときは候補を返すだけで更新しない。
    async fn recover_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        dry_run: bool,
    ) -> Result<Vec<EntryId>, StoreError>;

    /// next_retry_at <= now の failed を pending に戻す
    async fn requeue_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        dry_run: bool,
    ) -> Result<Vec<EntryId>, StoreError>;

    async fn entry(&self, gid: &Gid) -> Result<Option<QueueEntry>, StoreError>;

    async fn record(&self, gid: &Gid) -> Result<Option<Record>, StoreError>;

    async fn counts(&self) -> Result<StatusCounts, StoreError>;
}
