//! Local transport: mirrors the source tree into another directory
//!
//! Removals run first, deepest paths first, so a removed directory never has
//! to be emptied by hand. Uploads run in path order so parents exist before
//! their children.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use shipsync_core::ReconciliationResult;
use tracing::{debug, info};

use crate::{TransferReport, Transport};

/// Destination directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalTransport {
    dest: PathBuf,
}

impl LocalTransport {
    /// Mirror into `dest`, which is created on first use
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }

    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    async fn remove(&self, path: &str) -> Result<bool> {
        let target = self.dest.join(path);
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{path} is already gone from {}", self.dest.display());
                return Ok(false);
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("Failed to stat {}", target.display()));
            }
        };

        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        removed.wrap_err_with(|| format!("Failed to remove {}", target.display()))?;
        debug!("Removed {path}");
        Ok(true)
    }

    async fn upload(&self, source_root: &Path, path: &str) -> Result<u64> {
        let source = source_root.join(path);
        let target = self.dest.join(path);

        let source_meta = tokio::fs::metadata(&source)
            .await
            .wrap_err_with(|| format!("Failed to stat {}", source.display()))?;
        let existing = tokio::fs::symlink_metadata(&target).await.ok();

        if source_meta.is_dir() {
            if existing.as_ref().is_some_and(|m| !m.is_dir()) {
                tokio::fs::remove_file(&target)
                    .await
                    .wrap_err_with(|| format!("Failed to replace {}", target.display()))?;
            }
            tokio::fs::create_dir_all(&target)
                .await
                .wrap_err_with(|| format!("Failed to create {}", target.display()))?;
            debug!("Created directory {path}");
            return Ok(0);
        }

        if existing.as_ref().is_some_and(std::fs::Metadata::is_dir) {
            debug!("Replacing directory {path} with a file");
            tokio::fs::remove_dir_all(&target)
                .await
                .wrap_err_with(|| format!("Failed to replace {}", target.display()))?;
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }

        let bytes = tokio::fs::copy(&source, &target).await.wrap_err_with(|| {
            format!("Failed to copy {} to {}", source.display(), target.display())
        })?;

        if let Ok(mtime) = source_meta.modified() {
            preserve_mtime(&target, mtime).await;
        }
        debug!("Uploaded {path} ({bytes} bytes)");
        Ok(bytes)
    }
}

/// Best effort: a destination that refuses timestamps still has correct content
async fn preserve_mtime(target: &Path, mtime: std::time::SystemTime) {
    let file = match tokio::fs::OpenOptions::new().write(true).open(target).await {
        Ok(file) => file.into_std().await,
        Err(e) => {
            debug!("Cannot reopen {} to set mtime: {e}", target.display());
            return;
        }
    };
    if let Err(e) = file.set_modified(mtime) {
        debug!("Cannot set mtime on {}: {e}", target.display());
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn describe(&self) -> String {
        format!("directory {}", self.dest.display())
    }

    async fn apply(
        &self,
        source_root: &Path,
        result: &ReconciliationResult,
    ) -> Result<TransferReport> {
        tokio::fs::create_dir_all(&self.dest)
            .await
            .wrap_err_with(|| format!("Failed to create {}", self.dest.display()))?;

        let mut report = TransferReport::default();

        for path in result.to_remove.iter().rev() {
            if self.remove(path).await? {
                report.removed += 1;
            }
        }

        for path in &result.to_upload {
            report.bytes += self.upload(source_root, path).await?;
            report.uploaded += 1;
        }

        info!(
            "Applied {} uploads and {} removals to {}",
            report.uploaded,
            report.removed,
            self.dest.display()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn result(upload: &[&str], remove: &[&str]) -> ReconciliationResult {
        ReconciliationResult {
            to_upload: upload.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
            to_remove: remove.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upload_creates_parents_and_copies() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("a/b/deep.txt"), "deep content").unwrap();

        let transport = LocalTransport::new(dst.path().join("mirror"));
        let report = transport
            .apply(src.path(), &result(&["a/b/deep.txt"], &[]))
            .await
            .unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.bytes, 12);
        assert_eq!(
            std::fs::read_to_string(dst.path().join("mirror/a/b/deep.txt")).unwrap(),
            "deep content"
        );
    }

    #[tokio::test]
    async fn test_removals_deepest_first() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::create_dir_all(dst.path().join("old/nested")).unwrap();
        std::fs::write(dst.path().join("old/nested/f.txt"), "x").unwrap();
        std::fs::write(dst.path().join("keep.txt"), "keep").unwrap();

        let transport = LocalTransport::new(dst.path());
        let report = transport
            .apply(
                src.path(),
                &result(&[], &["old", "old/nested", "old/nested/f.txt", "never-there.txt"]),
            )
            .await
            .unwrap();

        assert_eq!(report.removed, 3);
        assert!(!dst.path().join("old").exists());
        assert!(dst.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_file_replaces_directory_and_back() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("x"), "now a file").unwrap();
        std::fs::create_dir_all(dst.path().join("x/inner")).unwrap();
        std::fs::create_dir(src.path().join("y")).unwrap();
        std::fs::write(dst.path().join("y"), "was a file").unwrap();

        let transport = LocalTransport::new(dst.path());
        transport
            .apply(src.path(), &result(&["x", "y"], &[]))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dst.path().join("x")).unwrap(), "now a file");
        assert!(dst.path().join("y").is_dir());
    }

    #[tokio::test]
    async fn test_upload_preserves_mtime() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let file = src.path().join("stamped.txt");
        std::fs::write(&file, "hello").unwrap();
        let expected = UNIX_EPOCH + Duration::from_secs(1_704_067_200);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(expected)
            .unwrap();

        LocalTransport::new(dst.path())
            .apply(src.path(), &result(&["stamped.txt"], &[]))
            .await
            .unwrap();

        let copied = std::fs::metadata(dst.path().join("stamped.txt"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(copied, expected);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        let err = LocalTransport::new(dst.path())
            .apply(src.path(), &result(&["ghost.txt"], &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost.txt"));
    }
}
