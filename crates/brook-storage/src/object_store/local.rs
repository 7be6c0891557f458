//! Local filesystem implementation of ObjectStore
//!
//! Objects are stored as files with the key as the relative path. Puts go
//! through a temporary sibling and a rename, so a crash mid-write never
//! leaves a truncated object under the final key.

use super::{ObjectMetadata, ObjectStore};
use async_trait::async_trait;
use brook_core::{CoreError, CoreResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::AsyncWriteExt;

const TMP_SUFFIX: &str = ".partial";

/// Local filesystem object store
///
/// # Example
///
/// ```rust,no_run
/// use brook_storage::object_store::{LocalObjectStore, ObjectStore};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() -> brook_core::CoreResult<()> {
///     let store = LocalObjectStore::new("./remote").await?;
///     let key = "brook/acme/logs/api/0/0/00000000000000000001.body";
///     store.put(key, Bytes::from("x")).await?;
///     println!("{} bytes", store.head(key).await?.size_bytes);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct LocalObjectStore {
    base_dir: PathBuf,
}

impl LocalObjectStore {
    /// Create a new local object store, creating the base directory if needed.
    pub async fn new(base_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    /// Convert key to full filesystem path, rejecting keys that escape the base directory.
    fn full_path(&self, key: &str) -> CoreResult<PathBuf> {
        if key.is_empty() {
            return Err(CoreError::ValidationError("Key cannot be empty".to_string()));
        }
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CoreError::ValidationError(format!(
                "Key `{key}` must be a relative path without `..`"
            )));
        }
        Ok(self.base_dir.join(relative))
    }

    fn metadata_for(key: String, metadata: &std::fs::Metadata) -> ObjectMetadata {
        ObjectMetadata {
            key,
            size_bytes: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|t| {
                    t.duration_since(UNIX_EPOCH)
                        .ok()
                        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
                })
                .unwrap_or_else(Utc::now),
            etag: None,
        }
    }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> CoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CoreError::not_found("object", key)
    } else {
        CoreError::from(e)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        let path = self.full_path(key)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        if !metadata.is_file() {
            return Err(CoreError::not_found("object", key));
        }
        Ok(Self::metadata_for(key.to_string(), &metadata))
    }
}
