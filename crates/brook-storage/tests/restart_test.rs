//! Restart recovery tests
//!
//! Each test drops a pool (releasing its WAL locks) and opens a new one over
//! the same data directory:
//! - unflushed records are replayed from the WAL
//! - records already held by an artifact are skipped, and the artifact is
//!   queued for upload again
//! - checkpointed artifacts are not uploaded twice
//! - a torn WAL tail loses only the partial frame
//! - a record logged but never consumed survives truncation and comes back
//! - an unreadable artifact is quarantined and its records replayed
//! - a second pool over a live directory is refused

mod common;

use brook_core::{CoreError, Lsn, ManualClock};
use brook_storage::object_store::MockObjectStore;
use brook_storage::PartitionKey;
use common::{log_of_size, open_pool, small_config, stream, T0};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_unflushed_records_are_replayed() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let pool = open_pool(&config, &store, &clock).await;
    for i in 0..3 {
        pool.ingest(&api, log_of_size(T0 + i, 20)).unwrap();
    }
    drop(pool);

    let pool = open_pool(&config, &store, &clock).await;
    let recovery = pool.recovery();
    assert_eq!(recovery.streams, 1);
    assert_eq!(recovery.replayed, 3);
    assert_eq!(recovery.skipped, 0);

    let active = pool.snapshot_active(&api).unwrap();
    let lsns: Vec<u64> = active.entries.iter().map(|e| e.lsn.value()).collect();
    assert_eq!(lsns, vec![1, 2, 3]);
    assert_eq!(active.time_range, Some((T0, T0 + 2)));

    // LSNs continue where the previous process stopped
    assert_eq!(pool.ingest(&api, log_of_size(T0, 20)).unwrap(), Lsn::new(4));
}

#[tokio::test]
async fn test_flushed_but_not_uploaded_page_is_not_replayed_twice() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    // Setup: one flushed page the store refused, one record still in the WAL only
    let failing = Arc::new(MockObjectStore::new_always_fail("503 Service Unavailable", true));
    let pool = open_pool(&config, &failing, &clock).await;
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.flushed, 1);
    assert_eq!(report.upload_failures, 1);
    pool.ingest(&api, log_of_size(T0, 20)).unwrap();
    // The pending artifact pins the watermark at its first LSN
    assert_eq!(pool.wal_positions(&api).unwrap().reclaim_before, Lsn::new(1));
    drop(pool);

    // Action
    let store = Arc::new(MockObjectStore::new());
    let pool = open_pool(&config, &store, &clock).await;

    // Validation
    let recovery = pool.recovery();
    assert_eq!(recovery.artifacts, 1);
    assert_eq!(recovery.checkpointed, 0);
    assert_eq!(recovery.skipped, 2);
    assert_eq!(recovery.replayed, 1);
    assert_eq!(pool.stats().pending_uploads, 1);

    let active = pool.snapshot_active(&api).unwrap();
    assert_eq!(active.first_lsn, Some(Lsn::new(3)));

    pool.await_idle(Duration::from_secs(5)).await.unwrap();
    assert_eq!(store.keys().len(), 2);
    assert_eq!(pool.wal_positions(&api).unwrap().reclaim_before, Lsn::new(3));
}

#[tokio::test]
async fn test_checkpointed_artifact_is_not_uploaded_again() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let store = Arc::new(MockObjectStore::new());
    let pool = open_pool(&config, &store, &clock).await;
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.run_cycle().await.unwrap();
    assert_eq!(store.successful_puts(), 2);
    drop(pool);

    let pool = open_pool(&config, &store, &clock).await;
    assert_eq!(pool.recovery().checkpointed, 1);
    assert_eq!(pool.recovery().artifacts, 0);
    assert_eq!(pool.recovery().replayed, 0);
    assert_eq!(pool.stats().pending_uploads, 0);

    pool.run_cycle().await.unwrap();
    assert_eq!(store.successful_puts(), 2);

    // Still deleted locally once grace and TTL have passed
    clock.advance(1_000);
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.deleted, 1);
    let key = PartitionKey::new(api, pool.paths().bucket_of(T0), Lsn::new(1));
    assert!(!pool.paths().artifact_paths(&key).metadata.exists());
}

#[tokio::test]
async fn test_shutdown_flushes_active_page_for_upload_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let pool = open_pool(&config, &store, &clock).await;
    pool.ingest(&api, log_of_size(T0, 20)).unwrap();
    pool.shutdown().await.unwrap();
    let key = PartitionKey::new(api.clone(), pool.paths().bucket_of(T0), Lsn::new(1));
    assert!(pool.paths().artifact_paths(&key).metadata.exists());
    assert!(store.keys().is_empty());
    drop(pool);

    let pool = open_pool(&config, &store, &clock).await;
    assert_eq!(pool.recovery().artifacts, 1);
    assert_eq!(pool.recovery().skipped, 1);
    assert!(pool.snapshot_active(&api).is_none());

    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(pool.ingest(&api, log_of_size(T0, 20)).unwrap(), Lsn::new(2));
}

#[tokio::test]
async fn test_torn_wal_tail_keeps_every_complete_record() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let pool = open_pool(&config, &store, &clock).await;
    for _ in 0..3 {
        pool.ingest(&api, log_of_size(T0, 20)).unwrap();
    }
    let wal_dir = pool.paths().wal_dir(&api);
    drop(pool);

    // A crash in the middle of a frame leaves a few stray bytes behind
    let segment = std::fs::read_dir(&wal_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "segment"))
        .max()
        .unwrap();
    let mut file = std::fs::OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(&[0x2a, 0x00, 0x00, 0x00, 0x07]).unwrap();
    drop(file);

    let pool = open_pool(&config, &store, &clock).await;
    let recovery = pool.recovery();
    assert_eq!(recovery.replayed, 3);
    assert_eq!(recovery.wal_truncated_bytes, 5);
    assert_eq!(recovery.corrupt_wal_segments, 0);
    assert_eq!(recovery.replay_stopped, 0);
    assert_eq!(pool.ingest(&api, log_of_size(T0, 20)).unwrap(), Lsn::new(4));
}

#[tokio::test]
async fn test_logged_but_unconsumed_record_is_kept_and_replayed() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let pool = open_pool(&config, &store, &clock).await;
    let first = pool.append_wal(&api, &log_of_size(T0, 20)).unwrap();
    let second = pool.append_wal(&api, &log_of_size(T0 + 1, 20)).unwrap();
    pool.consume(first, &api, log_of_size(T0, 20)).unwrap();

    // Page [1] is uploaded; the watermark stops below the unconsumed record
    let report = pool.flush_all_now().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(pool.wal_positions(&api).unwrap().reclaim_before, second);
    drop(pool);

    let pool = open_pool(&config, &store, &clock).await;
    assert_eq!(pool.recovery().checkpointed, 1);
    assert_eq!(pool.recovery().replayed, 1);
    let active = pool.snapshot_active(&api).unwrap();
    assert_eq!(active.first_lsn, Some(second));
    assert_eq!(active.time_range, Some((T0 + 1, T0 + 1)));
}

#[tokio::test]
async fn test_unreadable_artifact_is_quarantined_and_replayed() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let failing = Arc::new(MockObjectStore::new_always_fail("503 Service Unavailable", true));
    let pool = open_pool(&config, &failing, &clock).await;
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.run_cycle().await.unwrap();
    let key = PartitionKey::new(api.clone(), pool.paths().bucket_of(T0), Lsn::new(1));
    let metadata = pool.paths().artifact_paths(&key).metadata;
    drop(pool);

    std::fs::write(&metadata, b"{ not json").unwrap();

    let store = Arc::new(MockObjectStore::new());
    let pool = open_pool(&config, &store, &clock).await;
    let recovery = pool.recovery();
    assert_eq!(recovery.quarantined, 1);
    assert_eq!(recovery.artifacts, 0);
    assert_eq!(recovery.replayed, 2);
    assert!(!metadata.exists());
    assert!(metadata.with_extension("meta.corrupt").exists());

    // The replayed records form a new page that flushes and uploads normally
    let report = pool.flush_all_now().await.unwrap();
    assert_eq!(report.uploaded, 1);
}

#[tokio::test]
async fn test_second_pool_over_live_directory_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));

    let pool = open_pool(&config, &store, &clock).await;
    pool.ingest(&stream("api"), log_of_size(T0, 20)).unwrap();

    let err = brook_storage::LogBufferPool::open(config.clone(), store.clone(), clock.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::FileLock { .. }), "got {err:?}");

    drop(pool);
    open_pool(&config, &store, &clock).await;
}
