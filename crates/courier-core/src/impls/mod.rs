//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteOutboxStore**: SQLite を正本とする OutboxStore
//! - **LocalResourceStore**: ローカルディスクへのリソース移動
//! - **SimulatedSender**: 遅延と失敗率を持つ開発用 Sender

pub mod local_resources;
pub mod migrations;
pub mod simulated_sender;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::local_resources::LocalResourceStore;
pub use self::simulated_sender::SimulatedSender;
pub use self::sqlite_store::SqliteOutboxStore;
