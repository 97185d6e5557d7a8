//! courier-core
//!
//! Transactional outbox delivery queue on SQLite.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, decision, outcome）
//! - **queue**: エントリの状態・行モデル・バックオフ・時刻表現
//! - **ports**: 抽象化レイヤー（OutboxStore, Sender, ResourceStore, Clock）
//! - **impls**: 実装（SqliteOutboxStore, LocalResourceStore, SimulatedSender）
//! - **app**: アプリケーションロジック（builder, producer, worker_loop, reaper_loop, supervisor）
//! - **config**: 実行時設定
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Runtime, RuntimeBuilder, StatusCounts, Supervisor};
pub use config::CourierConfig;
pub use error::{CourierError, DeliveryError, StoreError};
