//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.
//! Every worker opens its own connection and runs this on startup, so the
//! whole check-and-apply happens inside one immediate transaction.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Schema up to date");
        return tx.commit();
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox(&tx)?;
    }

    tx.commit()
}

/// Drop every table and recreate the schema (development reset).
pub fn reset_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS queue_entries;
        DROP TABLE IF EXISTS records;
        DROP TABLE IF EXISTS migrations;
        ",
    )?;
    info!("Dropped outbox tables");
    run_migrations(conn)
}

/// v1: records + queue_entries.
///
/// Both tables live in the same database so the producer can write them in
/// one transaction.
fn migrate_v1_outbox(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            gid TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS queue_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            gid TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'in_progress', 'failed', 'dead', 'done')),
            locked_by TEXT,
            locked_at TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 5,
            next_retry_at TEXT,
            last_error TEXT,
            CHECK ((locked_by IS NULL) = (locked_at IS NULL)),
            CHECK (max_attempts >= 1),
            CHECK (attempts >= 0 AND attempts <= max_attempts)
        );

        CREATE INDEX IF NOT EXISTS idx_queue_entries_status_created_at
            ON queue_entries(status, created_at);

        CREATE INDEX IF NOT EXISTS idx_queue_entries_status_next_retry_at
            ON queue_entries(status, next_retry_at);
        ",
    )?;

    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (1, 'outbox')",
        [],
    )?;

    info!("Applied migration v1_outbox");
    Ok(())
}
