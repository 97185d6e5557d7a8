//! Domain identifiers (strongly-typed IDs).
//!
//! # ID の種類
//! - **EntryId**: queue_entries の行 ID（ストアが採番する整数）
//! - **Gid**: Record と QueueEntry を結ぶ相関キー（グローバルに一意）
//! - **WorkerId**: lease の所有者（`locked_by` に書き込まれる）
//!
//! Gid と WorkerId は ULID から生成します。
//! - **時刻でソート可能**: 生成順に並ぶ
//! - **分散生成可能**: 調整なしで複数プロセスから生成できる

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// queue_entries の行 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

impl EntryId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// 相関キー（correlation key）
///
/// Producer が Record と QueueEntry を同じ gid で作成します。
/// リソースの移動先ファイル名にも使われるため、値はそのまま保持します。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(String);

impl Gid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ULID ベースの新しい gid を生成
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Gid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Worker の識別子
///
/// プロセス全体で共有するグローバル値ではなく、
/// Worker ごとに生成して構築時に明示的に渡します。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `<pid>-<index>-<ulid>` 形式の ID を生成
    ///
    /// 同じホストで同じ pid が再利用されても ULID 部分で区別できます。
    pub fn generate(index: usize) -> Self {
        Self(format!("{}-{}-{}", std::process::id(), index, Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_gids_are_unique() {
        let a = Gid::generate();
        let b = Gid::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn worker_id_embeds_pid_and_index() {
        let id = WorkerId::generate(2);
        let prefix = format!("{}-2-", std::process::id());
        assert!(id.as_str().starts_with(&prefix));
        assert_ne!(WorkerId::generate(2), id);
    }

    #[test]
    fn entry_id_display_has_prefix() {
        assert_eq!(EntryId::new(42).to_string(), "entry-42");
    }

    #[test]
    fn gid_serializes_as_plain_string() {
        let s = serde_json::to_string(&Gid::new("g1")).unwrap();
        assert_eq!(s, "\"g1\"");
    }
}
