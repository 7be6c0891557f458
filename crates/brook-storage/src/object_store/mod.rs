//! Object Store abstraction for remote durable storage
//!
//! The upload pipeline needs two calls: `put` to write an object and `head`
//! to confirm what landed. Backends:
//! - AWS S3 / MinIO (production)
//! - Local filesystem (single-node deployments, development)
//! - In-memory mock with scripted failures (tests)

mod local;
mod mock;
mod s3;

pub use local::LocalObjectStore;
pub use mock::{CallHistoryEntry, MockFailure, MockObjectStore, MockStoreConfig};
pub use s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;
use brook_core::CoreResult;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object metadata returned by `head`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modification timestamp
    pub last_modified: DateTime<Utc>,
    /// ETag (S3 entity tag, None for local storage)
    pub etag: Option<String>,
}

/// Object Store trait - S3-like interface for cloud/local storage
///
/// All implementations must be thread-safe (Send + Sync) and support
/// concurrent operations. Keys are UTF-8 strings treated as opaque identifiers.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - Object does not exist (head)
/// - `CoreError::Transient` - Retryable backend failure (5xx, throttling, timeouts)
/// - `CoreError::StorageError` - Other backend errors (permissions, bad request)
/// - `CoreError::IoError` - I/O error (local filesystem only)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Put object (overwrites if exists)
    ///
    /// A reader never observes a partially written object: either the old
    /// contents, nothing, or the new contents.
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()>;

    /// Get object metadata without downloading
    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_metadata_serialization() {
        let metadata = ObjectMetadata {
            key: "brook/acme/logs/api/0/0/00000000000000000001.body".to_string(),
            size_bytes: 1024,
            last_modified: Utc::now(),
            etag: Some("abc123".to_string()),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: ObjectMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.key, metadata.key);
        assert_eq!(deserialized.size_bytes, metadata.size_bytes);
    }
}
