//! SqliteOutboxStore - SQLite を正本とする OutboxStore 実装
//!
//! # 学習ポイント
//! - `BEGIN IMMEDIATE` で書き込みロックを先に取る（claim の二重取得を防ぐ）
//! - すべての UPDATE は期待する状態を WHERE に持つ（conditional update）
//! - blocking な rusqlite 呼び出しは spawn_blocking に逃がす
//!
//! # 接続
//! Worker ごとに `open` して専用の接続を持たせます。
//! 同じプロセス内で接続を共有しても正しさは変わりませんが、
//! 排他の権威はあくまで SQLite のロックです。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};
use tracing::{debug, info};

use super::migrations;
use crate::app::status::StatusCounts;
use crate::domain::{EntryId, FailureDecision, Gid, WorkerId, decide_failure};
use crate::error::StoreError;
use crate::ports::OutboxStore;
use crate::queue::timestamp::{format_timestamp, parse_timestamp};
use crate::queue::{BackoffPolicy, EntryStatus, Lease, NewEvent, QueueEntry, Record};

const ENTRY_COLUMNS: &str = "id, gid, path, status, locked_by, locked_at, created_at, \
     processed_at, attempts, max_attempts, next_retry_at, last_error";

/// SQLite-backed outbox store.
///
/// Clones share one connection. Open a second store on the same path to get
/// an independent connection.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl SqliteOutboxStore {
    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("create {}: {e}", parent.display()))
            })?;
        }

        let path_str = path.to_string_lossy().to_string();
        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        conn.busy_timeout(busy_timeout)?;
        migrations::run_migrations(&mut conn)?;

        info!(path = %path_str, "Opened outbox store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_str,
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: ":memory:".to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Drop and recreate all tables.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.call(|conn| Ok(migrations::reset_schema(conn)?)).await?;
        info!(path = %self.path, "Reset outbox store");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The closure must only touch SQL. No sleeping and no file or network
    /// I/O while a transaction is open.
    async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            // A panicked call leaves SQLite consistent: its transaction rolled back on drop.
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<usize, StoreError> {
        self.call(move |conn| Ok(conn.execute(sql, [])?)).await
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                StoreError::Busy(err.to_string())
            }
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::FileLockingProtocolFailed,
            ) => StoreError::Unavailable(err.to_string()),
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Raw column values; decoding into `QueueEntry` can fail separately.
struct EntryRow {
    id: i64,
    gid: String,
    path: String,
    status: String,
    locked_by: Option<String>,
    locked_at: Option<String>,
    created_at: String,
    processed_at: Option<String>,
    attempts: i64,
    max_attempts: i64,
    next_retry_at: Option<String>,
    last_error: Option<String>,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            gid: row.get(1)?,
            path: row.get(2)?,
            status: row.get(3)?,
            locked_by: row.get(4)?,
            locked_at: row.get(5)?,
            created_at: row.get(6)?,
            processed_at: row.get(7)?,
            attempts: row.get(8)?,
            max_attempts: row.get(9)?,
            next_retry_at: row.get(10)?,
            last_error: row.get(11)?,
        })
    }
}

impl TryFrom<EntryRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |what: &str| StoreError::Corrupt(format!("queue entry {id}: {what}"));

        let status = row
            .status
            .parse::<EntryStatus>()
            .map_err(|e| corrupt(&e.to_string()))?;

        let lease = match (row.locked_by, row.locked_at) {
            (None, None) => None,
            (Some(locked_by), Some(locked_at)) => Some(Lease {
                locked_by: WorkerId::new(locked_by),
                locked_at: parse_timestamp(&locked_at)
                    .ok_or_else(|| corrupt(&format!("locked_at={locked_at}")))?,
            }),
            _ => return Err(corrupt("locked_by and locked_at disagree")),
        };

        let optional_ts = |name: &str, raw: Option<String>| match raw {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| corrupt(&format!("{name}={raw}"))),
        };

        Ok(QueueEntry {
            id: EntryId::new(id),
            gid: Gid::new(row.gid),
            path: row.path,
            status,
            lease,
            created_at: row.created_at,
            processed_at: optional_ts("processed_at", row.processed_at)?,
            attempts: u32::try_from(row.attempts).map_err(|_| corrupt("attempts"))?,
            max_attempts: u32::try_from(row.max_attempts).map_err(|_| corrupt("max_attempts"))?,
            next_retry_at: optional_ts("next_retry_at", row.next_retry_at)?,
            last_error: row.last_error,
        })
    }
}

fn select_entry(
    conn: &Connection,
    clause: &str,
    key: &dyn rusqlite::ToSql,
) -> Result<Option<QueueEntry>, StoreError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE {clause}");
    let row = conn.query_row(&sql, [key], EntryRow::read).optional()?;
    row.map(QueueEntry::try_from).transpose()
}

fn collect_ids(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<i64>, StoreError> {
    let mut stmt = tx.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn publish(&self, event: NewEvent, now: DateTime<Utc>) -> Result<EntryId, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let created_at = format_timestamp(now);

            let inserted = tx.execute(
                "INSERT INTO records (gid, path, created_at) VALUES (?1, ?2, ?3)",
                params![event.gid.as_str(), event.path, created_at],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateGid(event.gid));
                }
                other => other?,
            };

            let inserted = tx.execute(
                "INSERT INTO queue_entries (gid, path, status, created_at, attempts, max_attempts)
                 VALUES (?1, ?2, 'pending', ?3, 0, ?4)",
                params![event.gid.as_str(), event.path, created_at, event.max_attempts],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateGid(event.gid));
                }
                other => other?,
            };

            let id = EntryId::new(tx.last_insert_rowid());
            tx.commit()?;
            debug!(entry_id = %id, gid = %event.gid, "Published event");
            Ok(id)
        })
        .await
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let worker = worker.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let candidate: Option<i64> = tx
                .query_row(
                    "SELECT id FROM queue_entries
                     WHERE status = 'pending'
                     ORDER BY created_at, id
                     LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            // Dropping `tx` rolls back.
            let Some(id) = candidate else {
                return Ok(None);
            };

            let changed = tx.execute(
                "UPDATE queue_entries
                 SET status = 'in_progress', locked_by = ?2, locked_at = ?3, processed_at = NULL
                 WHERE id = ?1 AND status = 'pending'",
                params![id, worker.as_str(), format_timestamp(now)],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            let entry = select_entry(&tx, "id = ?1", &id)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn complete(
        &self,
        entry: &QueueEntry,
        worker: &WorkerId,
        payload: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = entry.id;
        let gid = entry.gid.clone();
        let worker = worker.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            // The lease columns stay as the record of who finished the entry.
            let changed = tx.execute(
                "UPDATE queue_entries
                 SET status = 'done', processed_at = ?3
                 WHERE id = ?1 AND status = 'in_progress' AND locked_by = ?2",
                params![id.get(), worker.as_str(), format_timestamp(now)],
            )?;
            if changed == 0 {
                return Err(StoreError::LeaseLost(id));
            }

            let written = tx.execute(
                "UPDATE records SET payload = ?2 WHERE gid = ?1 AND payload IS NULL",
                params![gid.as_str(), payload],
            )?;
            if written == 0 {
                debug!(entry_id = %id, gid = %gid, "Record payload already set");
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn record_failure(
        &self,
        entry: &QueueEntry,
        worker: &WorkerId,
        error: String,
        backoff: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureDecision, StoreError> {
        let id = entry.id;
        let worker = worker.clone();
        let backoff = backoff.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            // Counters are re-read here, never taken from the claimed snapshot.
            let counters: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT attempts, max_attempts FROM queue_entries
                     WHERE id = ?1 AND status = 'in_progress' AND locked_by = ?2",
                    params![id.get(), worker.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((attempts, max_attempts)) = counters else {
                return Err(StoreError::LeaseLost(id));
            };
            let attempts = u32::try_from(attempts)
                .map_err(|_| StoreError::Corrupt(format!("queue entry {id}: attempts")))?;
            let max_attempts = u32::try_from(max_attempts)
                .map_err(|_| StoreError::Corrupt(format!("queue entry {id}: max_attempts")))?;

            let decision = decide_failure(attempts, max_attempts, &backoff, now);
            let processed_at = format_timestamp(now);

            let changed = match &decision {
                FailureDecision::MarkDead { attempts } => tx.execute(
                    "UPDATE queue_entries
                     SET status = 'dead', processed_at = ?3, attempts = ?4,
                         last_error = ?5, next_retry_at = NULL
                     WHERE id = ?1 AND status = 'in_progress' AND locked_by = ?2",
                    params![id.get(), worker.as_str(), processed_at, attempts, error],
                )?,
                // A failed row carries no lease; only the due-retry sweep moves it.
                FailureDecision::Retry {
                    attempts,
                    next_retry_at,
                } => tx.execute(
                    "UPDATE queue_entries
                     SET status = 'failed', processed_at = ?3, attempts = ?4,
                         last_error = ?5, next_retry_at = ?6,
                         locked_by = NULL, locked_at = NULL
                     WHERE id = ?1 AND status = 'in_progress' AND locked_by = ?2",
                    params![
                        id.get(),
                        worker.as_str(),
                        processed_at,
                        attempts,
                        error,
                        format_timestamp(*next_retry_at)
                    ],
                )?,
            };
            if changed == 0 {
                return Err(StoreError::LeaseLost(id));
            }

            tx.commit()?;
            Ok(decision)
        })
        .await
    }

    async fn recover_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        dry_run: bool,
    ) -> Result<Vec<EntryId>, StoreError> {
        self.call(move |conn| {
            let behavior = if dry_run {
                TransactionBehavior::Deferred
            } else {
                TransactionBehavior::Immediate
            };
            let tx = conn.transaction_with_behavior(behavior)?;
            let cutoff = format_timestamp(cutoff);

            let candidates = collect_ids(
                &tx,
                "SELECT id FROM queue_entries
                 WHERE status IN ('in_progress', 'failed')
                   AND locked_by IS NOT NULL
                   AND locked_at < ?1
                 ORDER BY locked_at, id
                 LIMIT ?2",
                params![cutoff, sql_limit(limit)],
            )?;

            if dry_run {
                return Ok(candidates.into_iter().map(EntryId::new).collect());
            }

            let mut reset = Vec::with_capacity(candidates.len());
            for id in candidates {
                let changed = tx.execute(
                    "UPDATE queue_entries
                     SET status = 'pending', locked_by = NULL, locked_at = NULL
                     WHERE id = ?1
                       AND status IN ('in_progress', 'failed')
                       AND locked_at < ?2",
                    params![id, cutoff],
                )?;
                if changed == 1 {
                    reset.push(EntryId::new(id));
                }
            }

            tx.commit()?;
            Ok(reset)
        })
        .await
    }

    async fn requeue_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        dry_run: bool,
    ) -> Result<Vec<EntryId>, StoreError> {
        self.call(move |conn| {
            let behavior = if dry_run {
                TransactionBehavior::Deferred
            } else {
                TransactionBehavior::Immediate
            };
            let tx = conn.transaction_with_behavior(behavior)?;
            let now = format_timestamp(now);

            let candidates = collect_ids(
                &tx,
                "SELECT id FROM queue_entries
                 WHERE status = 'failed'
                   AND next_retry_at IS NOT NULL
                   AND next_retry_at <= ?1
                   AND attempts < max_attempts
                 ORDER BY next_retry_at, id
                 LIMIT ?2",
                params![now, sql_limit(limit)],
            )?;

            if dry_run {
                return Ok(candidates.into_iter().map(EntryId::new).collect());
            }

            let mut requeued = Vec::with_capacity(candidates.len());
            for id in candidates {
                let changed = tx.execute(
                    "UPDATE queue_entries
                     SET status = 'pending', locked_by = NULL, locked_at = NULL
                     WHERE id = ?1
                       AND status = 'failed'
                       AND next_retry_at <= ?2
                       AND attempts < max_attempts",
                    params![id, now],
                )?;
                if changed == 1 {
                    requeued.push(EntryId::new(id));
                }
            }

            tx.commit()?;
            Ok(requeued)
        })
        .await
    }

    async fn entry(&self, gid: &Gid) -> Result<Option<QueueEntry>, StoreError> {
        let gid = gid.as_str().to_string();
        self.call(move |conn| select_entry(conn, "gid = ?1", &gid)).await
    }

    async fn record(&self, gid: &Gid) -> Result<Option<Record>, StoreError> {
        let gid = gid.as_str().to_string();
        self.call(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, gid, path, payload, created_at FROM records WHERE gid = ?1",
                    [&gid],
                    |row| {
                        Ok(Record {
                            id: row.get(0)?,
                            gid: Gid::new(row.get::<_, String>(1)?),
                            path: row.get(2)?,
                            payload: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        self.call(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM queue_entries GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut counts = StatusCounts::default();
            for (status, n) in rows {
                let status = status
                    .parse::<EntryStatus>()
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                counts.add(status, usize::try_from(n).unwrap_or(0));
            }
            Ok(counts)
        })
        .await
    }
}
