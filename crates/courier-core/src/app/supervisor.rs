//! Supervisor - ワーカー群とスイーパーの起動・停止
//!
//! N 個の WorkerLoop と 1 個の ReaperLoop（任意で Producer のフィード）を
//! 共通の shutdown シグナルの下で動かします。

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::builder::Runtime;
use crate::error::StoreError;

/// Supervisor handle for N workers plus one sweeper.
/// - `shutdown_tx` を drop すると全タスクが止まる
/// - `shutdown_and_join()` で全タスクの終了を待てる
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn `workers` workers and the sweeper, each with its own store handle.
    pub fn spawn(runtime: &Runtime, workers: usize) -> Result<Self, StoreError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(workers + 1);
        for index in 0..workers {
            let worker = runtime.worker(index)?;
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move { worker.run(rx).await }));
        }

        let reaper = runtime.reaper()?;
        let rx = shutdown_rx.clone();
        joins.push(tokio::spawn(async move { reaper.run(rx).await }));

        info!(workers, "Supervisor started");
        Ok(Self { shutdown_tx, joins })
    }

    /// Also run the mock feed under the same shutdown signal.
    pub fn spawn_feed(
        &mut self,
        runtime: &Runtime,
        paths: Vec<String>,
        interval: Duration,
    ) -> Result<(), StoreError> {
        let producer = runtime.producer()?;
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(async move {
            producer.run_feed(&paths, interval, rx).await
        }));
        Ok(())
    }

    /// Request shutdown for all tasks.
    /// In-flight deliveries finish; no new entries are claimed.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all tasks.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::builder::RuntimeBuilder;
    use crate::domain::Gid;
    use crate::impls::SimulatedSender;
    use crate::queue::EntryStatus;
    use crate::testing::{test_config, write_resource};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_drain_queue_and_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeBuilder::new(test_config(dir.path()))
            .sender(Arc::new(SimulatedSender::reliable()))
            .build()
            .unwrap();

        let producer = runtime.producer().unwrap();
        let mut gids = Vec::new();
        for i in 0..10 {
            let source = write_resource(dir.path(), &format!("in/{i}.jpg"));
            let (gid, _) = producer
                .publish_new(source.to_string_lossy().to_string())
                .await
                .unwrap();
            gids.push(gid);
        }

        let supervisor = Supervisor::spawn(&runtime, 3).unwrap();
        let store = runtime.open_store().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let counts = store.counts().await.unwrap();
            if counts.done == gids.len() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "queue not drained: {counts:?}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown_and_join())
            .await
            .unwrap();

        for gid in &gids {
            let entry = store.entry(gid).await.unwrap().unwrap();
            assert_eq!(entry.status, EntryStatus::Done);
            let record = store.record(gid).await.unwrap().unwrap();
            assert!(record.payload.is_some());
        }
        assert!(store.entry(&Gid::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn feed_runs_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeBuilder::new(test_config(dir.path()))
            .sender(Arc::new(SimulatedSender::reliable()))
            .build()
            .unwrap();

        let mut supervisor = Supervisor::spawn(&runtime, 1).unwrap();
        supervisor
            .spawn_feed(&runtime, vec!["nope/1".to_string()], Duration::from_secs(3600))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown_and_join())
            .await
            .unwrap();

        let counts = runtime.open_store().unwrap().counts().await.unwrap();
        assert_eq!(counts.total(), 1);
    }
}
