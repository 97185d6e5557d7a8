//! RuntimeBuilder - 構成要素のワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - グローバル状態を持たない（worker id も保存先も構築時に明示的に渡す）

use std::sync::Arc;

use super::delivery::DeliveryExecutor;
use super::producer::Producer;
use super::reaper_loop::ReaperLoop;
use super::worker_loop::WorkerLoop;
use crate::config::CourierConfig;
use crate::domain::WorkerId;
use crate::error::{CourierError, StoreError};
use crate::impls::{LocalResourceStore, SqliteOutboxStore};
use crate::ports::{Clock, OutboxStore, ResourceStore, Sender, SystemClock};

/// RuntimeBuilder は Runtime を構築
///
/// # 使用例
/// ```ignore
/// let runtime = RuntimeBuilder::new(config)
///     .sender(Arc::new(SimulatedSender::default()))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定を検証する
/// - Sender が無ければ BuildError::MissingSender
/// - ResourceStore / Clock は未指定ならローカルディスク / システム時刻
pub struct RuntimeBuilder {
    config: CourierConfig,
    sender: Option<Arc<dyn Sender>>,
    resources: Option<Arc<dyn ResourceStore>>,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn OutboxStore>>,
}

/// BuildError は Runtime 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidConfig(#[from] CourierError),

    #[error("no sender configured; call RuntimeBuilder::sender()")]
    MissingSender,
}

impl RuntimeBuilder {
    pub fn new(config: CourierConfig) -> Self {
        Self {
            config,
            sender: None,
            resources: None,
            clock: None,
            store: None,
        }
    }

    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share one store between every component instead of opening a
    /// connection per component.
    pub fn store(mut self, store: Arc<dyn OutboxStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        self.config.validate()?;
        let sender = self.sender.ok_or(BuildError::MissingSender)?;
        let resources: Arc<dyn ResourceStore> = match self.resources {
            Some(resources) => resources,
            None => Arc::new(LocalResourceStore::new(&self.config.save_dir)),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        Ok(Runtime {
            config: self.config,
            delivery: DeliveryExecutor::new(resources, sender),
            clock,
            shared_store: self.store,
        })
    }
}

/// Runtime は構成済みの部品から各ループを組み立てる
pub struct Runtime {
    config: CourierConfig,
    delivery: DeliveryExecutor,
    clock: Arc<dyn Clock>,
    shared_store: Option<Arc<dyn OutboxStore>>,
}

impl Runtime {
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// A store handle with its own connection (or the shared store, if one was given).
    pub fn open_store(&self) -> Result<Arc<dyn OutboxStore>, StoreError> {
        if let Some(store) = &self.shared_store {
            return Ok(Arc::clone(store));
        }
        let store = SqliteOutboxStore::open(&self.config.db_path, self.config.busy_timeout())?;
        Ok(Arc::new(store))
    }

    /// Worker `index`, with a fresh `<pid>-<index>-<ulid>` identity.
    pub fn worker(&self, index: usize) -> Result<WorkerLoop, StoreError> {
        Ok(WorkerLoop::new(
            WorkerId::generate(index),
            self.open_store()?,
            self.delivery.clone(),
            self.clock(),
            &self.config,
        ))
    }

    pub fn reaper(&self) -> Result<ReaperLoop, StoreError> {
        Ok(ReaperLoop::new(self.open_store()?, self.clock(), &self.config))
    }

    pub fn producer(&self) -> Result<Producer, StoreError> {
        Ok(Producer::new(self.open_store()?, self.clock(), &self.config))
    }
}
