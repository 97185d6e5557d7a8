//! Runtime configuration.
//!
//! Every component receives its settings from here at construction time.
//! Sources, lowest precedence first: defaults, a JSON file, CLI flags / env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CourierError;
use crate::queue::BackoffPolicy;

/// Longest retry delay `validate` accepts (one year).
pub const BACKOFF_CEILING_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// SQLite database holding `records` and `queue_entries`.
    pub db_path: PathBuf,

    /// Root of the relocated resources (`<save_dir>/<YYYYMMDD>/<gid><ext>`).
    pub save_dir: PathBuf,

    /// Worker tasks started by `run`.
    pub workers: usize,

    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval_ms: u64,

    /// A lease older than this is considered abandoned.
    pub lease_timeout_secs: u64,

    pub sweep_interval_secs: u64,

    /// Max rows reset per sweep query.
    pub batch_size: usize,

    /// Sweeper only reports what it would reset.
    pub dry_run: bool,

    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,

    /// Applied to newly published entries.
    pub max_attempts: u32,

    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,

    /// Characters of error text kept in `last_error`.
    pub error_limit: usize,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("outbox.db"),
            save_dir: PathBuf::from("./"),
            workers: 3,
            poll_interval_ms: 2_000,
            lease_timeout_secs: 30,
            sweep_interval_secs: 10,
            batch_size: 100,
            dry_run: false,
            backoff_base_secs: 5,
            backoff_max_secs: 24 * 60 * 60,
            max_attempts: 5,
            busy_timeout_ms: 30_000,
            error_limit: 1000,
        }
    }
}

impl CourierConfig {
    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CourierError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| CourierError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Reject settings the loops cannot run with.
    pub fn validate(&self) -> Result<(), CourierError> {
        let fail = |msg: &str| Err(CourierError::Config(msg.to_string()));

        if self.workers == 0 {
            return fail("workers must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be positive");
        }
        if self.lease_timeout_secs == 0 {
            return fail("lease_timeout_secs must be positive");
        }
        if self.sweep_interval_secs == 0 {
            return fail("sweep_interval_secs must be positive");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive");
        }
        if self.max_attempts == 0 {
            return fail("max_attempts must be at least 1");
        }
        if self.backoff_max_secs < self.backoff_base_secs {
            return fail("backoff_max_secs must not be less than backoff_base_secs");
        }
        if self.backoff_max_secs > BACKOFF_CEILING_SECS {
            return fail("backoff_max_secs must not exceed one year");
        }
        if self.error_limit == 0 {
            return fail("error_limit must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_max_secs),
        )
    }
}
