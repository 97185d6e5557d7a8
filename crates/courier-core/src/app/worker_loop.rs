//! WorkerLoop - 配送ループ
//!
//! # フロー
//! 1. OutboxStore::claim_next() で最も古い pending を lease 付きで取得
//! 2. DeliveryExecutor::deliver() で移動 → 送信（トランザクション外）
//! 3. 成功なら OutboxStore::complete()、失敗なら OutboxStore::record_failure()
//!
//! # エラー方針
//! - claim 時の一時的なストアエラー（Busy / Unavailable）は「今回は何もない」扱い
//! - 配送の失敗は必ず attempts に数える
//! - 結果を書き込めなかった場合はエントリを in_progress のまま残し、
//!   Sweeper の lease timeout に回収を任せる（その場で再試行しない）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::delivery::DeliveryExecutor;
use crate::config::CourierConfig;
use crate::domain::{CycleOutcome, FailureDecision, WorkerId};
use crate::error::{CourierError, StoreError, truncate_error};
use crate::ports::{Clock, OutboxStore};
use crate::queue::{BackoffPolicy, QueueEntry};

pub struct WorkerLoop {
    worker_id: WorkerId,
    store: Arc<dyn OutboxStore>,
    delivery: DeliveryExecutor,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    poll_interval: Duration,
    error_limit: usize,
}

impl WorkerLoop {
    pub fn new(
        worker_id: WorkerId,
        store: Arc<dyn OutboxStore>,
        delivery: DeliveryExecutor,
        clock: Arc<dyn Clock>,
        config: &CourierConfig,
    ) -> Self {
        Self {
            worker_id,
            store,
            delivery,
            clock,
            backoff: config.backoff(),
            poll_interval: config.poll_interval(),
            error_limit: config.error_limit,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Claim the oldest pending entry.
    ///
    /// Contention and unavailability read as "nothing to claim". Any other
    /// store error is returned.
    pub async fn claim(&self) -> Result<Option<QueueEntry>, CourierError> {
        match self.store.claim_next(&self.worker_id, self.clock.now()).await {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_transient() => {
                debug!(worker_id = %self.worker_id, error = %e, "Claim skipped");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One cycle: claim, deliver, commit.
    pub async fn run_once(&self) -> Result<CycleOutcome, CourierError> {
        let Some(entry) = self.claim().await? else {
            return Ok(CycleOutcome::Idle);
        };

        info!(
            worker_id = %self.worker_id,
            entry_id = %entry.id,
            gid = %entry.gid,
            attempts = entry.attempts,
            "Claimed entry"
        );
        Ok(self.process(entry).await)
    }

    /// Deliver a claimed entry and commit the outcome.
    pub async fn process(&self, entry: QueueEntry) -> CycleOutcome {
        let today = self.clock.now().date_naive();

        match self.delivery.deliver(&entry, today).await {
            Ok(payload) => {
                let committed = self
                    .store
                    .complete(&entry, &self.worker_id, payload, self.clock.now())
                    .await;
                match committed {
                    Ok(()) => {
                        info!(
                            worker_id = %self.worker_id,
                            entry_id = %entry.id,
                            gid = %entry.gid,
                            "Delivered"
                        );
                        CycleOutcome::Delivered {
                            entry_id: entry.id,
                            gid: entry.gid,
                        }
                    }
                    Err(source) => self.uncommitted(entry, source),
                }
            }
            Err(err) => {
                let message = truncate_error(&err.to_string(), self.error_limit);
                warn!(
                    worker_id = %self.worker_id,
                    entry_id = %entry.id,
                    gid = %entry.gid,
                    error = %message,
                    "Delivery attempt failed"
                );

                let committed = self
                    .store
                    .record_failure(
                        &entry,
                        &self.worker_id,
                        message.clone(),
                        &self.backoff,
                        self.clock.now(),
                    )
                    .await;
                match committed {
                    Ok(decision) => {
                        self.log_decision(&entry, &decision);
                        CycleOutcome::Failed {
                            entry_id: entry.id,
                            gid: entry.gid,
                            decision,
                            error: message,
                        }
                    }
                    Err(source) => self.uncommitted(entry, source),
                }
            }
        }
    }

    fn log_decision(&self, entry: &QueueEntry, decision: &FailureDecision) {
        match decision {
            FailureDecision::Retry {
                attempts,
                next_retry_at,
            } => info!(
                worker_id = %self.worker_id,
                entry_id = %entry.id,
                gid = %entry.gid,
                attempts,
                next_retry_at = %next_retry_at,
                "Retry scheduled"
            ),
            FailureDecision::MarkDead { attempts } => error!(
                worker_id = %self.worker_id,
                entry_id = %entry.id,
                gid = %entry.gid,
                attempts,
                "Entry dead-lettered"
            ),
        }
    }

    fn uncommitted(&self, entry: QueueEntry, source: StoreError) -> CycleOutcome {
        if let StoreError::LeaseLost(_) = source {
            warn!(
                worker_id = %self.worker_id,
                entry_id = %entry.id,
                gid = %entry.gid,
                "Lease lost before commit, outcome discarded"
            );
        } else {
            let err = CourierError::TerminalCommit {
                entry_id: entry.id,
                source,
            };
            error!(
                worker_id = %self.worker_id,
                gid = %entry.gid,
                error = %err,
                "Outcome not committed, leaving entry for lease recovery"
            );
        }
        CycleOutcome::Uncommitted {
            entry_id: entry.id,
            gid: entry.gid,
        }
    }

    /// Loop until shutdown is signalled (or the sender side is dropped).
    ///
    /// An in-flight delivery is finished before the signal is checked.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed = match self.run_once().await {
                Ok(outcome) => outcome.claimed(),
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Worker cycle failed");
                    false
                }
            };
            if claimed {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(worker_id = %self.worker_id, "Worker stopped");
    }
}
