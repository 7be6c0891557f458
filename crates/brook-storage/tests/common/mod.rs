//! Shared fixtures for the brook-storage integration tests.

#![allow(dead_code)]

use brook_core::{BrookConfig, FsyncPolicy, ManualClock, RetryConfig, SignalKind, StreamId};
use brook_storage::object_store::MockObjectStore;
use brook_storage::{LogBufferPool, LogRecord, Severity};
use std::path::Path;
use std::sync::Arc;

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

/// Small pages (100 bytes), a sealed-page cap of 2 and one second TTL/grace.
pub fn small_config(dir: &Path) -> BrookConfig {
    let mut config = BrookConfig::default();
    config.storage.data_dir = dir.join("data");
    config.storage.disk_retry = RetryConfig {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
    };
    config.buffer_pool.max_page_bytes = 100;
    config.buffer_pool.max_page_window_ms = 5_000;
    config.buffer_pool.sealed_page_cap = 2;
    config.buffer_pool.sealed_page_ttl_ms = 1_000;
    config.buffer_pool.flush_eval_millis = 20;
    config.buffer_pool.expected_insertions = 100;
    config.wal.fsync_policy = FsyncPolicy::Manual;
    config.wal.segment_size_bytes = 64 * 1024;
    config.upload.upload_grace_ms = 1_000;
    config.upload.attempt_timeout_ms = 1_000;
    config.upload.retry = RetryConfig {
        max_attempts: 0,
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        backoff_multiplier: 2.0,
    };
    config.upload.remote.local_dir = dir.join("remote");
    config
}

pub fn stream(name: &str) -> StreamId {
    StreamId::new("acme", SignalKind::Logs, name).unwrap()
}

/// A log record whose encoding is exactly `encoded_len` bytes (at least 18).
pub fn log_of_size(timestamp_ms: i64, encoded_len: usize) -> LogRecord {
    LogRecord::new(timestamp_ms, Severity::Info, "x".repeat(encoded_len - 18))
}

pub async fn open_pool(
    config: &BrookConfig,
    store: &Arc<MockObjectStore>,
    clock: &Arc<ManualClock>,
) -> LogBufferPool {
    LogBufferPool::open(config.clone(), store.clone(), clock.clone())
        .await
        .unwrap()
}
