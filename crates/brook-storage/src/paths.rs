//! Deterministic on-disk layout for flushed pages and stream WALs.
//!
//! ```text
//! {data_dir}/{bucket}/{stream}/{first_lsn:020}.meta
//! {data_dir}/{bucket}/{stream}/{first_lsn:020}.body
//! {data_dir}/{bucket}/{stream}/{first_lsn:020}.ckpt
//! {data_dir}/wal/{stream}/...
//! ```
//!
//! `bucket = floor(timestamp_ms / idx_expiry_duration_ms)`, so every artifact
//! of one expiry window sits under a single directory that can be removed
//! with one call once it has expired.

use brook_core::{CoreResult, Lsn, StreamId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const WAL_DIR: &str = "wal";
pub const METADATA_EXT: &str = "meta";
pub const BODY_EXT: &str = "body";
pub const CHECKPOINT_EXT: &str = "ckpt";

/// Identifies one flushed page: stream, partition bucket and first LSN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub stream: StreamId,
    pub bucket: i64,
    pub first_lsn: Lsn,
}

impl PartitionKey {
    pub fn new(stream: StreamId, bucket: i64, first_lsn: Lsn) -> Self {
        Self {
            stream,
            bucket,
            first_lsn,
        }
    }

    /// File stem shared by the artifact files.
    pub fn file_stem(&self) -> String {
        format!("{:020}", self.first_lsn.value())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.stream, self.bucket, self.file_stem())
    }
}

/// The files that make up one flushed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub metadata: PathBuf,
    pub body: PathBuf,
    pub checkpoint: PathBuf,
}

impl ArtifactPaths {
    pub fn all(&self) -> [&Path; 3] {
        [&self.metadata, &self.body, &self.checkpoint]
    }
}

#[derive(Debug, Clone)]
pub struct DiskPathResolver {
    data_dir: PathBuf,
    idx_expiry_duration_ms: i64,
}

impl DiskPathResolver {
    pub fn new(data_dir: impl Into<PathBuf>, idx_expiry_duration_ms: u64) -> Self {
        Self {
            data_dir: data_dir.into(),
            idx_expiry_duration_ms: idx_expiry_duration_ms.clamp(1, i64::MAX as u64) as i64,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Partition bucket of a timestamp. Floors toward negative infinity.
    pub fn bucket_of(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms.div_euclid(self.idx_expiry_duration_ms)
    }

    /// Start of the time window covered by `bucket`.
    pub fn bucket_start_ms(&self, bucket: i64) -> i64 {
        bucket.saturating_mul(self.idx_expiry_duration_ms)
    }

    pub fn partition_dir(&self, bucket: i64) -> PathBuf {
        self.data_dir.join(bucket.to_string())
    }

    /// Directory holding a stream's artifacts for the partition of `timestamp_ms`.
    pub fn path_for(&self, stream: &StreamId, timestamp_ms: i64) -> PathBuf {
        self.stream_dir(stream, self.bucket_of(timestamp_ms))
    }

    pub fn stream_dir(&self, stream: &StreamId, bucket: i64) -> PathBuf {
        self.partition_dir(bucket).join(stream.path_segment())
    }

    pub fn artifact_paths(&self, key: &PartitionKey) -> ArtifactPaths {
        let dir = self.stream_dir(&key.stream, key.bucket);
        let stem = key.file_stem();
        ArtifactPaths {
            metadata: dir.join(format!("{stem}.{METADATA_EXT}")),
            body: dir.join(format!("{stem}.{BODY_EXT}")),
            checkpoint: dir.join(format!("{stem}.{CHECKPOINT_EXT}")),
        }
    }

    pub fn wal_root(&self) -> PathBuf {
        self.data_dir.join(WAL_DIR)
    }

    pub fn wal_dir(&self, stream: &StreamId) -> PathBuf {
        self.wal_root().join(stream.path_segment())
    }

    /// Buckets present on disk, ascending. Non-numeric entries (the WAL root) are skipped.
    pub async fn list_partitions(&self) -> CoreResult<Vec<i64>> {
        let mut buckets = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(buckets),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(bucket) = entry.file_name().to_str().and_then(|n| n.parse::<i64>().ok()) {
                buckets.push(bucket);
            }
        }
        buckets.sort_unstable();
        Ok(buckets)
    }

    /// Buckets whose whole window ends at or before `now_ms`.
    pub async fn expired_partitions(&self, now_ms: i64) -> CoreResult<Vec<i64>> {
        let current = self.bucket_of(now_ms);
        Ok(self
            .list_partitions()
            .await?
            .into_iter()
            .filter(|bucket| *bucket < current)
            .collect())
    }

    /// Metadata files in one partition, across all streams.
    pub async fn list_metadata_files(&self, bucket: i64) -> CoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut streams = match tokio::fs::read_dir(self.partition_dir(bucket)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(stream_dir) = streams.next_entry().await? {
            if !stream_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut artifacts = tokio::fs::read_dir(stream_dir.path()).await?;
            while let Some(artifact) = artifacts.next_entry().await? {
                let path = artifact.path();
                if path.extension().is_some_and(|ext| ext == METADATA_EXT) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Stream directories whose bucket intersects `[start_ms, end_ms]`.
    pub async fn list_range(
        &self,
        stream: &StreamId,
        start_ms: i64,
        end_ms: i64,
    ) -> CoreResult<Vec<PathBuf>> {
        let (first, last) = (self.bucket_of(start_ms), self.bucket_of(end_ms));
        let mut dirs = Vec::new();
        for bucket in self.list_partitions().await? {
            if bucket < first || bucket > last {
                continue;
            }
            let dir = self.stream_dir(stream, bucket);
            if tokio::fs::try_exists(&dir).await? {
                dirs.push(dir);
            }
        }
        Ok(dirs)
    }
}
