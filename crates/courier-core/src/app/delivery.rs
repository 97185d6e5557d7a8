//! DeliveryExecutor - 副作用の実行（移動 → 送信）
//!
//! ストアのトランザクションの外で実行されます。
//! 結果（成功時のペイロード / 失敗）の書き込みは WorkerLoop の仕事です。

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::DeliveryError;
use crate::ports::{ResourceStore, Sender};
use crate::queue::QueueEntry;

#[derive(Clone)]
pub struct DeliveryExecutor {
    resources: Arc<dyn ResourceStore>,
    sender: Arc<dyn Sender>,
}

impl DeliveryExecutor {
    pub fn new(resources: Arc<dyn ResourceStore>, sender: Arc<dyn Sender>) -> Self {
        Self { resources, sender }
    }

    /// Relocate the entry's resource, send it, and return the serialized response.
    ///
    /// Safe to repeat for the same entry: relocation short-circuits when the
    /// destination already exists.
    pub async fn deliver(
        &self,
        entry: &QueueEntry,
        today: NaiveDate,
    ) -> Result<String, DeliveryError> {
        let source = Path::new(&entry.path);
        let dest = self
            .resources
            .relocate(&entry.gid, source, entry.created_on(), today)
            .await?;

        let response = self.sender.send(&dest).await?;
        debug!(
            entry_id = %entry.id,
            gid = %entry.gid,
            dest = %dest.display(),
            "Sender accepted resource"
        );

        Ok(serde_json::to_string(&response)?)
    }
}
