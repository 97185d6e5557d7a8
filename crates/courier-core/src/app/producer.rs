//! Producer - Outbox への書き込み
//!
//! Record と pending の QueueEntry を 1 トランザクションで作成します。
//! `run_feed` は開発用のモックフィード（一定間隔でイベントを投入）です。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::CourierConfig;
use crate::domain::{EntryId, Gid};
use crate::error::StoreError;
use crate::ports::{Clock, OutboxStore};
use crate::queue::NewEvent;

/// Paths published on every tick of the mock feed.
pub const FEED_PATHS: [&str; 3] = ["abc/abc", "bcd/bcd", "def/def"];

pub struct Producer {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl Producer {
    pub fn new(store: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>, config: &CourierConfig) -> Self {
        Self {
            store,
            clock,
            max_attempts: config.max_attempts,
        }
    }

    /// Publish under an explicit gid. A gid that already exists is rejected.
    pub async fn publish(&self, gid: Gid, path: impl Into<String>) -> Result<EntryId, StoreError> {
        let event = NewEvent::new(gid, path, self.max_attempts);
        self.store.publish(event, self.clock.now()).await
    }

    /// Publish under a freshly generated gid.
    pub async fn publish_new(&self, path: impl Into<String>) -> Result<(Gid, EntryId), StoreError> {
        let gid = Gid::generate();
        let id = self.publish(gid.clone(), path).await?;
        Ok((gid, id))
    }

    /// Publish `paths` every `interval` until shutdown.
    pub async fn run_feed(
        &self,
        paths: &[String],
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(paths = paths.len(), interval_ms = interval.as_millis() as u64, "Feed started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            for path in paths {
                match self.publish_new(path.as_str()).await {
                    Ok((gid, id)) => info!(entry_id = %id, gid = %gid, path = %path, "Published"),
                    Err(e) => warn!(path = %path, error = %e, "Publish failed"),
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Feed stopped");
    }
}
