//! Uploads flushed pages to the remote store and records checkpoints.
//!
//! An upload writes the body, then the metadata, under keys derived only from
//! the partition key, confirms the body's size with a `head` call, and finally
//! writes a `.ckpt` file next to the local artifact.
//! Retrying an upload overwrites the same two objects, so a retried or
//! re-run upload never produces a second remote copy. The checkpoint is the
//! only signal that allows the local artifact to be deleted.

use brook_core::metrics::{UPLOADS, UPLOAD_LATENCY};
use brook_core::{Clock, CoreError, CoreResult, Lsn, StreamId, UploadConfig};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::artifact;
use crate::codec::PageMetadata;
use crate::object_store::ObjectStore;
use crate::paths::{DiskPathResolver, PartitionKey, BODY_EXT, METADATA_EXT};

/// Proof that a partition's page reached the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub stream: StreamId,
    /// Display form of the partition key.
    pub partition_key: String,
    pub bucket: i64,
    pub first_lsn: Lsn,
    pub last_lsn: Lsn,
    pub uploaded_at_ms: i64,
    /// Remote key of the body object.
    pub remote_key: String,
    pub metadata_key: String,
    pub body_crc32: u32,
}

/// Deterministic remote object keys of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteKeys {
    pub body: String,
    pub metadata: String,
}

pub struct CheckpointUploader {
    store: Arc<dyn ObjectStore>,
    paths: DiskPathResolver,
    base_prefix: String,
    shard: String,
    attempt_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CheckpointUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointUploader")
            .field("base_prefix", &self.base_prefix)
            .field("shard", &self.shard)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl CheckpointUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        paths: DiskPathResolver,
        config: &UploadConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            paths,
            base_prefix: config.base_prefix.trim_end_matches('/').to_string(),
            shard: config.shard.clone(),
            attempt_timeout: config.attempt_timeout(),
            clock,
        }
    }

    /// `{base_prefix}/{tenant}/{kind}/{name}/{bucket}/{shard}/{first_lsn:020}.{meta|body}`
    pub fn remote_keys(&self, key: &PartitionKey) -> RemoteKeys {
        let stem = format!(
            "{}/{}/{}/{}/{}/{}/{}",
            self.base_prefix,
            key.stream.tenant,
            key.stream.kind,
            key.stream.name,
            key.bucket,
            self.shard,
            key.file_stem()
        );
        RemoteKeys {
            body: format!("{stem}.{BODY_EXT}"),
            metadata: format!("{stem}.{METADATA_EXT}"),
        }
    }

    /// Uploads one page and writes its checkpoint.
    ///
    /// If a checkpoint for the same body already exists nothing is sent. Each
    /// call is a single attempt bounded by the configured deadline; the caller
    /// owns retries.
    ///
    /// # Errors
    /// - [`CoreError::Timeout`] if the attempt exceeded its deadline.
    /// - [`CoreError::Transient`] or [`CoreError::StorageError`] from the store.
    pub async fn upload(
        &self,
        key: &PartitionKey,
        metadata: &PageMetadata,
        body: Bytes,
    ) -> CoreResult<CheckpointRecord> {
        if let Some(existing) = self.load_checkpoint(key).await? {
            if existing.body_crc32 == metadata.body_crc32 {
                debug!(partition = %key, "Already checkpointed, skipping upload");
                return Ok(existing);
            }
        }

        let kind = key.stream.kind.as_str();
        let keys = self.remote_keys(key);
        let started = Instant::now();

        let transfer = async {
            self.store.put(&keys.body, body).await?;
            self.store.put(&keys.metadata, metadata.to_json()?).await?;
            let remote = self.store.head(&keys.body).await?;
            if remote.size_bytes != metadata.body_len {
                return Err(CoreError::Transient(format!(
                    "remote body {} holds {} bytes, expected {}",
                    keys.body, remote.size_bytes, metadata.body_len
                )));
            }
            Ok(())
        };
        let outcome = match tokio::time::timeout(self.attempt_timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                operation: "upload",
                millis: self.attempt_timeout.as_millis() as u64,
            }),
        };
        if let Err(e) = outcome {
            UPLOADS.with_label_values(&[kind, "error"]).inc();
            return Err(e);
        }

        let record = CheckpointRecord {
            stream: key.stream.clone(),
            partition_key: key.to_string(),
            bucket: key.bucket,
            first_lsn: metadata.first_lsn,
            last_lsn: metadata.last_lsn,
            uploaded_at_ms: self.clock.now_ms(),
            remote_key: keys.body,
            metadata_key: keys.metadata,
            body_crc32: metadata.body_crc32,
        };
        let checkpoint_path = self.paths.artifact_paths(key).checkpoint;
        let json = serde_json::to_vec(&record).map_err(CoreError::serialization)?;
        artifact::write_atomic(&checkpoint_path, &json).await?;

        UPLOADS.with_label_values(&[kind, "ok"]).inc();
        UPLOAD_LATENCY
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());
        info!(
            partition = %key,
            remote_key = %record.remote_key,
            last_lsn = %record.last_lsn,
            "Uploaded page"
        );
        Ok(record)
    }

    /// Uploads the artifact of `key` as currently stored on local disk.
    pub async fn upload_artifact(&self, key: &PartitionKey) -> CoreResult<CheckpointRecord> {
        let (metadata, body) = artifact::read_page(&self.paths.artifact_paths(key)).await?;
        self.upload(key, &metadata, body).await
    }

    pub async fn is_checkpointed(&self, key: &PartitionKey) -> CoreResult<bool> {
        Ok(self.load_checkpoint(key).await?.is_some())
    }

    /// Reads the checkpoint of `key`. A file that fails to parse counts as absent.
    pub async fn load_checkpoint(&self, key: &PartitionKey) -> CoreResult<Option<CheckpointRecord>> {
        let path = self.paths.artifact_paths(key).checkpoint;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<CheckpointRecord>(&bytes) {
            Ok(record) if record.partition_key == key.to_string() => Ok(Some(record)),
            _ => {
                debug!(path = %path.display(), "Ignoring unreadable checkpoint");
                Ok(None)
            }
        }
    }
}
