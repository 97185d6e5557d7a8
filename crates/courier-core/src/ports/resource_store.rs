//! ResourceStore port - リソースの移動（relocation）
//!
//! # 実装
//! - **LocalResourceStore**: ローカルファイルシステム

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::Gid;
use crate::error::RelocationError;

/// ResourceStore はリソースを gid で決まる移動先へ移す
///
/// # 冪等性
/// - 移動先がすでに存在すれば移動せずにその場所を返す
/// - クラッシュ後の再配送で同じ gid が再実行されても安全
/// - 移動元も移動先も無い場合は `RelocationError::Missing`
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// `source` を `gid` の移動先へ移す
    ///
    /// `created_on` は移動先ディレクトリの日付。None なら `today` を使う。
    async fn relocate(
        &self,
        gid: &Gid,
        source: &Path,
        created_on: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<PathBuf, RelocationError>;
}
