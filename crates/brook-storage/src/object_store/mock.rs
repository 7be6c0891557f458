//! In-memory ObjectStore with scripted failures
//!
//! Drives the upload pipeline through transient errors, permanent errors and
//! stalls without a real S3 endpoint.
//!
//! # Examples
//!
//! ```rust
//! use brook_storage::object_store::{MockObjectStore, MockFailure, ObjectStore};
//! use bytes::Bytes;
//!
//! # async fn example() -> brook_core::CoreResult<()> {
//! let mock = MockObjectStore::new_with_failures(vec![
//!     MockFailure::Transient("503 Service Unavailable"),
//!     MockFailure::Ok,
//! ]);
//!
//! assert!(mock.put("key1", Bytes::from("data1")).await.is_err());
//! assert!(mock.put("key2", Bytes::from("data2")).await.is_ok());
//!
//! assert_eq!(mock.failed_puts(), 1);
//! assert_eq!(mock.successful_puts(), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::{ObjectMetadata, ObjectStore};
use brook_core::{CoreError, CoreResult};

/// Outcome scripted for the next operation.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Retryable error (500, 503, throttling).
    Transient(&'static str),

    /// Non-retryable error (403, 400).
    Permanent(&'static str),

    /// Stall for the given time, then succeed. Used to trip attempt timeouts.
    Hang(Duration),

    /// Success.
    Ok,
}

/// Mock store configuration.
#[derive(Debug, Clone)]
pub struct MockStoreConfig {
    /// Simulated network latency per call.
    pub latency: Duration,

    /// Enable call history tracking.
    pub track_history: bool,
}

impl Default for MockStoreConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            track_history: true,
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct CallHistoryEntry {
    /// "put" or "head".
    pub operation: &'static str,
    pub key: String,
    pub success: bool,
    pub timestamp: Instant,
}

#[derive(Debug, Default)]
pub struct MockObjectStore {
    storage: RwLock<BTreeMap<String, Bytes>>,
    failure_queue: RwLock<VecDeque<MockFailure>>,
    config: MockStoreConfig,
    call_history: RwLock<Vec<CallHistoryEntry>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::new_with_config(MockStoreConfig::default())
    }

    pub fn new_with_config(config: MockStoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Failures are consumed in order, one per call. Once the queue is empty every call succeeds.
    pub fn new_with_failures(pattern: Vec<MockFailure>) -> Self {
        let mock = Self::new();
        *mock.failure_queue.write() = pattern.into();
        mock
    }

    /// Fails the next 1000 calls with the same error.
    pub fn new_always_fail(error: &'static str, is_transient: bool) -> Self {
        let failure = if is_transient {
            MockFailure::Transient(error)
        } else {
            MockFailure::Permanent(error)
        };
        Self::new_with_failures(vec![failure; 1000])
    }

    /// 100 random outcomes, each a transient failure with probability `failure_rate`.
    pub fn new_flaky(failure_rate: f64) -> Self {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let pattern = (0..100)
            .map(|_| {
                if rng.gen::<f64>() < failure_rate {
                    MockFailure::Transient("timeout")
                } else {
                    MockFailure::Ok
                }
            })
            .collect();
        Self::new_with_failures(pattern)
    }

    /// Appends outcomes to the failure queue.
    pub fn push_failures(&self, pattern: impl IntoIterator<Item = MockFailure>) {
        self.failure_queue.write().extend(pattern);
    }

    /// Drops any scripted outcomes still queued.
    pub fn clear_failures(&self) {
        self.failure_queue.write().clear();
    }

    pub fn get_call_history(&self) -> Vec<CallHistoryEntry> {
        self.call_history.read().clone()
    }

    pub fn clear_history(&self) {
        self.call_history.write().clear();
    }

    pub fn successful_puts(&self) -> usize {
        self.count_puts(true)
    }

    pub fn failed_puts(&self) -> usize {
        self.count_puts(false)
    }

    fn count_puts(&self, success: bool) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == "put" && entry.success == success)
            .count()
    }

    /// Number of stored objects.
    pub fn storage_size(&self) -> usize {
        self.storage.read().len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.storage.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.storage.read().keys().cloned().collect()
    }

    /// Sleeps for the configured latency, then applies the next scripted outcome.
    async fn simulate(&self) -> CoreResult<()> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        let next = self.failure_queue.write().pop_front();
        match next {
            Some(MockFailure::Transient(msg)) => Err(CoreError::Transient(msg.to_string())),
            Some(MockFailure::Permanent(msg)) => Err(CoreError::StorageError(msg.to_string())),
            Some(MockFailure::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Some(MockFailure::Ok) | None => Ok(()),
        }
    }

    fn record_call(&self, operation: &'static str, key: &str, success: bool) {
        if self.config.track_history {
            self.call_history.write().push(CallHistoryEntry {
                operation,
                key: key.to_string(),
                success,
                timestamp: Instant::now(),
            });
        }
    }

    fn metadata(key: &str, data: &Bytes) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            last_modified: Utc::now(),
            etag: Some(format!("{:x}", md5::compute(data.as_ref()))),
        }
    }

    async fn checked(&self, operation: &'static str, key: &str) -> CoreResult<()> {
        self.simulate().await.map_err(|e| {
            self.record_call(operation, key, false);
            e
        })
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        self.checked("put", key).await?;
        self.storage.write().insert(key.to_string(), data);
        self.record_call("put", key, true);
        Ok(())
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        self.checked("head", key).await?;
        let found = self.storage.read().get(key).map(|data| Self::metadata(key, data));
        self.record_call("head", key, found.is_some());
        found.ok_or_else(|| CoreError::not_found("object", key))
    }
}
