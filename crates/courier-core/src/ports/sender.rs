//! Sender port - 外部の配送先
//!
//! # 実装
//! - **SimulatedSender**: 遅延と失敗率を持つ開発用 Sender

use std::path::Path;

use async_trait::async_trait;

use crate::error::SenderError;

/// Sender は移動済みリソースを外部に届ける
///
/// # 契約
/// - 成功時は構造化されたペイロードを返す（Record.payload に保存される）
/// - 失敗の中身は不透明（メッセージは記録用で、制御には使わない）
/// - 同じリソースで複数回呼ばれる可能性がある（at-least-once）
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, resource: &Path) -> Result<serde_json::Value, SenderError>;
}
