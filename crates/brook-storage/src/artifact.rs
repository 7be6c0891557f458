//! Reading and writing flushed page artifacts on local disk.
//!
//! Every file is written to a temporary sibling, fsynced and renamed into
//! place. The body is written before the metadata, so a metadata file on disk
//! always describes a complete body; a crash in between leaves an orphan body
//! that recovery ignores.

use brook_core::{CoreError, CoreResult};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::codec::PageMetadata;
use crate::paths::ArtifactPaths;

const TMP_EXT: &str = "tmp";

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".");
    tmp.push(TMP_EXT);
    PathBuf::from(tmp)
}

/// Fsyncs the directory holding `path`. A failure is logged and returned as `false`.
async fn sync_parent(path: &Path) -> bool {
    #[cfg(unix)]
    {
        let Some(parent) = path.parent() else {
            return true;
        };
        let synced = match tokio::fs::File::open(parent).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            warn!(dir = %parent.display(), error = %e, "Directory fsync failed");
            return false;
        }
        true
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        true
    }
}

/// Replaces `path` with `data` so readers see either the old or the new contents.
pub async fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    sync_parent(path).await;
    Ok(())
}

/// Persists body then metadata.
pub async fn write_page(paths: &ArtifactPaths, metadata: &PageMetadata, body: &[u8]) -> CoreResult<()> {
    write_atomic(&paths.body, body).await?;
    write_atomic(&paths.metadata, &metadata.to_json()?).await
}

pub async fn read_metadata(path: &Path) -> CoreResult<PageMetadata> {
    let bytes = tokio::fs::read(path).await.map_err(|e| not_found(path, e))?;
    PageMetadata::from_json(&bytes)
}

/// Reads metadata and body, verifying the body length and checksum.
pub async fn read_page(paths: &ArtifactPaths) -> CoreResult<(PageMetadata, Bytes)> {
    let metadata = read_metadata(&paths.metadata).await?;
    let body = tokio::fs::read(&paths.body)
        .await
        .map_err(|e| not_found(&paths.body, e))?;
    if body.len() as u64 != metadata.body_len || crc32fast::hash(&body) != metadata.body_crc32 {
        return Err(CoreError::corrupted(
            paths.body.display().to_string(),
            0,
            "body does not match its metadata",
        ));
    }
    Ok((metadata, Bytes::from(body)))
}

/// Removes every file of the artifact. Missing files are ignored.
pub async fn remove_page(paths: &ArtifactPaths) -> CoreResult<()> {
    // Metadata first: without it the artifact is no longer considered present.
    for path in paths.all() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn not_found(path: &Path, e: std::io::Error) -> CoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CoreError::not_found("artifact", path.display().to_string())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/file.meta");

        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths {
            metadata: dir.path().join("1.meta"),
            body: dir.path().join("1.body"),
            checkpoint: dir.path().join("1.ckpt"),
        };
        write_atomic(&paths.body, b"body").await.unwrap();

        remove_page(&paths).await.unwrap();
        remove_page(&paths).await.unwrap();
        assert!(!paths.body.exists());
    }

    #[tokio::test]
    async fn test_missing_metadata_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = read_metadata(&dir.path().join("none.meta")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_sync_parent_reports_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(sync_parent(&dir.path().join("file.meta")).await);
        assert!(!sync_parent(&dir.path().join("gone/file.meta")).await);
    }
}
