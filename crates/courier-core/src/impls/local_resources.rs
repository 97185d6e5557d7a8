//! LocalResourceStore - ローカルファイルシステムへのリソース移動
//!
//! 移動先: `<save_dir>/<YYYYMMDD>/<gid><ext>`
//! - 日付は QueueEntry.created_at（読めなければ当日）
//! - 拡張子は移動元のものを引き継ぐ

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::Gid;
use crate::error::RelocationError;
use crate::ports::ResourceStore;

#[derive(Debug, Clone)]
pub struct LocalResourceStore {
    save_dir: PathBuf,
}

impl LocalResourceStore {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Deterministic destination for `gid`.
    pub fn destination(&self, gid: &Gid, source: &Path, date: NaiveDate) -> PathBuf {
        let ext = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        self.save_dir
            .join(date.format("%Y%m%d").to_string())
            .join(format!("{gid}{ext}"))
    }
}

fn io_error(from: &Path, to: &Path) -> impl FnOnce(io::Error) -> RelocationError {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    move |source| RelocationError::Io { from, to, source }
}

#[async_trait]
impl ResourceStore for LocalResourceStore {
    async fn relocate(
        &self,
        gid: &Gid,
        source: &Path,
        created_on: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<PathBuf, RelocationError> {
        let date = created_on.unwrap_or_else(|| {
            warn!(gid = %gid, "created_at unreadable, using today's directory");
            today
        });
        let dest = self.destination(gid, source, date);

        // An earlier attempt already moved it.
        if fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(gid = %gid, dest = %dest.display(), "Resource already relocated");
            return Ok(dest);
        }

        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(RelocationError::Missing(source.to_path_buf()));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(io_error(source, &dest))?;
        }

        match fs::rename(source, &dest).await {
            Ok(()) => {}
            // Someone else moved it between the checks.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::try_exists(&dest).await.unwrap_or(false) {
                    return Ok(dest);
                }
                return Err(RelocationError::Missing(source.to_path_buf()));
            }
            // rename cannot cross filesystems.
            Err(e) => {
                debug!(gid = %gid, error = %e, "rename failed, falling back to copy");
                fs::copy(source, &dest)
                    .await
                    .map_err(io_error(source, &dest))?;
                fs::remove_file(source)
                    .await
                    .map_err(io_error(source, &dest))?;
            }
        }

        debug!(gid = %gid, from = %source.display(), to = %dest.display(), "Relocated resource");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn destination_uses_date_dir_and_extension() {
        let store = LocalResourceStore::new("/data");
        let dest = store.destination(&Gid::new("g1"), Path::new("a/b.jpg"), day(2024, 3, 4));
        assert_eq!(dest, PathBuf::from("/data/20240304/g1.jpg"));

        let bare = store.destination(&Gid::new("g2"), Path::new("abc/abc"), day(2024, 3, 4));
        assert_eq!(bare, PathBuf::from("/data/20240304/g2"));
    }

    #[tokio::test]
    async fn relocate_moves_file() {
        let src_dir = tempfile::tempdir().unwrap();
        let save_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("b.jpg");
        std::fs::write(&source, b"image").unwrap();

        let store = LocalResourceStore::new(save_dir.path());
        let dest = store
            .relocate(&Gid::new("g1"), &source, Some(day(2024, 3, 4)), day(2024, 6, 1))
            .await
            .unwrap();

        assert_eq!(dest, save_dir.path().join("20240304").join("g1.jpg"));
        assert!(!source.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"image");
    }

    #[tokio::test]
    async fn relocate_is_idempotent() {
        let src_dir = tempfile::tempdir().unwrap();
        let save_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("b.jpg");
        std::fs::write(&source, b"image").unwrap();

        let store = LocalResourceStore::new(save_dir.path());
        let gid = Gid::new("g1");
        let first = store
            .relocate(&gid, &source, Some(day(2024, 3, 4)), day(2024, 3, 4))
            .await
            .unwrap();
        // Source is gone now; the destination short-circuits.
        let second = store
            .relocate(&gid, &source, Some(day(2024, 3, 4)), day(2024, 3, 4))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"image");
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let save_dir = tempfile::tempdir().unwrap();
        let store = LocalResourceStore::new(save_dir.path());

        let err = store
            .relocate(
                &Gid::new("g1"),
                Path::new("does/not/exist.jpg"),
                None,
                day(2024, 3, 4),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelocationError::Missing(_)));
    }

    #[tokio::test]
    async fn unreadable_date_falls_back_to_today() {
        let src_dir = tempfile::tempdir().unwrap();
        let save_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("c.png");
        std::fs::write(&source, b"x").unwrap();

        let store = LocalResourceStore::new(save_dir.path());
        let dest = store
            .relocate(&Gid::new("g3"), &source, None, day(2024, 12, 31))
            .await
            .unwrap();
        assert_eq!(dest, save_dir.path().join("20241231").join("g3.png"));
    }
}
