//! Buffer pool lifecycle tests
//!
//! Covers sealing, the sealed-page cap, backpressure, flush, upload, TTL
//! eviction, WAL truncation and the operator controls. Time-driven
//! transitions use a ManualClock.

mod common;

use brook_core::{BrookConfig, CoreError, Lsn, ManualClock, SignalKind, StreamId};
use brook_storage::object_store::MockObjectStore;
use brook_storage::{LogRecord, PageState, PartitionKey, Severity};
use common::{log_of_size, open_pool, small_config, stream, T0};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_page_seals_after_crossing_size_threshold() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    // 50 bytes: still below the 100 byte limit
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    assert_eq!(pool.stats().active_pages, 1);
    assert_eq!(pool.stats().sealed_pages, 0);

    // 50 + 51 = 101 bytes: this record crosses the limit and seals the page
    pool.ingest(&api, log_of_size(T0, 51)).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.active_pages, 0);
    assert_eq!(stats.sealed_pages, 1);
    assert!(pool.snapshot_active(&api).is_none());

    // The next record opens a fresh ACTIVE page
    let lsn = pool.ingest(&api, log_of_size(T0, 20)).unwrap();
    assert_eq!(lsn, Lsn::new(3));
    let active = pool.snapshot_active(&api).unwrap();
    assert_eq!(active.state, PageState::Active);
    assert_eq!(active.first_lsn, Some(Lsn::new(3)));

    let sealed = pool.snapshot_sealed(&api, i64::MIN, i64::MAX);
    assert_eq!(sealed.len(), 1);
    assert_eq!(sealed[0].state, PageState::Sealed);
    let lsns: Vec<u64> = sealed[0].entries.iter().map(|e| e.lsn.value()).collect();
    assert_eq!(lsns, vec![1, 2]);
}

#[tokio::test]
async fn test_window_elapsed_seals_idle_stream_on_cycle() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    pool.ingest(&api, log_of_size(T0, 30)).unwrap();

    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.sealed, 0);
    assert!(pool.snapshot_active(&api).is_some());

    clock.advance(config.buffer_pool.max_page_window_ms as i64);
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.sealed, 1);
    assert_eq!(report.flushed, 1);
    assert_eq!(report.uploaded, 1);
    assert!(pool.snapshot_active(&api).is_none());

    // Body and metadata objects
    assert_eq!(store.keys().len(), 2);
}

#[tokio::test]
async fn test_sealed_cap_full_of_unflushed_pages_rejects_with_backpressure() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    // Three pages of two records; the third cannot enter the full set
    for _ in 0..6 {
        pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    }
    let stats = pool.stats();
    assert_eq!(stats.sealed_pages, 2);
    assert_eq!(stats.held_pages, 1);

    let err = pool.ingest(&api, log_of_size(T0, 50)).unwrap_err();
    assert!(err.is_backpressure(), "expected backpressure, got {err:?}");
    assert!(matches!(err, CoreError::CannotBuffer { .. }));

    // The rejected record never reached the WAL
    assert_eq!(pool.wal_positions(&api).unwrap().last_lsn, Lsn::new(6));

    // A cycle flushes the set and admits the held page
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.flushed, 2);
    assert_eq!(pool.stats().held_pages, 0);

    let lsn = pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    assert_eq!(lsn, Lsn::new(7));
}

#[tokio::test]
async fn test_cap_evicts_oldest_flushed_page_which_still_uploads_from_disk() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new_always_fail("503 Service Unavailable", true));
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    // Setup: two FLUSHED pages whose uploads keep failing
    for _ in 0..4 {
        pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    }
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.flushed, 2);
    assert_eq!(report.upload_failures, 2);
    assert_eq!(pool.stats().flushed_pages, 2);

    // Action: seal a third page
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();

    // Validation: the oldest flushed page left memory to admit the new one
    let stats = pool.stats();
    assert_eq!(stats.held_pages, 0);
    assert_eq!(stats.flushed_pages, 1);
    assert_eq!(stats.sealed_pages, 1);
    let firsts: Vec<_> = pool
        .snapshot_sealed(&api, i64::MIN, i64::MAX)
        .iter()
        .map(|s| s.first_lsn)
        .collect();
    assert_eq!(firsts, vec![Some(Lsn::new(3)), Some(Lsn::new(5))]);

    // Both flushed artifacts are still owed an upload
    assert_eq!(stats.pending_uploads, 2);

    // The store recovers; past the backoff every artifact is uploaded
    store.clear_failures();
    clock.advance(1_000);
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.flushed, 1);
    assert_eq!(report.uploaded, 3);
    assert_eq!(pool.stats().pending_uploads, 0);

    let first = PartitionKey::new(api.clone(), pool.paths().bucket_of(T0), Lsn::new(1));
    assert!(pool.paths().artifact_paths(&first).checkpoint.exists());
}

#[tokio::test]
async fn test_flush_all_now_writes_artifact_uploads_and_truncates_wal() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    pool.ingest(&api, log_of_size(T0, 30)).unwrap();
    pool.ingest(&api, log_of_size(T0 + 5, 30)).unwrap();
    assert_eq!(pool.wal_positions(&api).unwrap().reclaim_before, Lsn::ZERO);

    let report = pool.flush_all_now().await.unwrap();
    assert_eq!(report.sealed, 1);
    assert_eq!(report.flushed, 1);
    assert_eq!(report.uploaded, 1);

    let key = PartitionKey::new(api.clone(), pool.paths().bucket_of(T0), Lsn::new(1));
    let artifact = pool.paths().artifact_paths(&key);
    assert!(artifact.metadata.exists());
    assert!(artifact.body.exists());
    assert!(artifact.checkpoint.exists());

    let remote = format!(
        "brook/acme/logs/api/{}/0/00000000000000000001.body",
        pool.paths().bucket_of(T0)
    );
    assert!(store.contains_key(&remote), "missing {remote} in {:?}", store.keys());

    // Everything up to LSN 2 is now held remotely
    assert_eq!(pool.wal_positions(&api).unwrap().reclaim_before, Lsn::new(3));
    assert_eq!(pool.stats().uploaded_pages, 1);
}

#[tokio::test]
async fn test_ttl_evicts_uploaded_page_and_deletes_local_artifact() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    pool.ingest(&api, log_of_size(T0, 30)).unwrap();
    pool.flush_all_now().await.unwrap();
    let key = PartitionKey::new(api.clone(), pool.paths().bucket_of(T0), Lsn::new(1));
    let artifact = pool.paths().artifact_paths(&key);

    // Not yet aged
    clock.advance(500);
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.evicted, 0);
    assert_eq!(report.deleted, 0);
    assert!(artifact.metadata.exists());

    // TTL and grace both elapsed
    clock.advance(500);
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.evicted, 1);
    assert_eq!(report.deleted, 1);
    assert!(!artifact.metadata.exists());
    assert!(!artifact.body.exists());
    assert!(!artifact.checkpoint.exists());

    let stats = pool.stats();
    assert_eq!(stats.uploaded_pages, 0);
    assert_eq!(stats.tracked_artifacts, 0);
    assert!(pool.snapshot_sealed(&api, i64::MIN, i64::MAX).is_empty());
}

#[tokio::test]
async fn test_expired_partition_is_collected() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    pool.ingest(&api, log_of_size(T0, 30)).unwrap();
    pool.flush_all_now().await.unwrap();
    let bucket = pool.paths().bucket_of(T0);
    assert!(pool.paths().partition_dir(bucket).exists());

    // A full partition width later the artifact is deleted and its bucket removed
    clock.advance(config.storage.idx_expiry_duration_ms as i64);
    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.partitions_removed, 1);
    assert!(!pool.paths().partition_dir(bucket).exists());
}

#[tokio::test]
async fn test_full_wal_ring_is_backpressure_until_checkpointed() {
    let dir = TempDir::new().unwrap();
    let mut config = small_config(dir.path());
    config.buffer_pool.max_page_bytes = 1024 * 1024;
    config.wal.segment_size_bytes = 256;
    config.wal.max_segments = 2;
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    let mut accepted = 0;
    let err = loop {
        match pool.ingest(&api, log_of_size(T0, 50)) {
            Ok(_) => accepted += 1,
            Err(e) => break e,
        }
        assert!(accepted < 100, "WAL ring never filled");
    };
    assert!(matches!(err, CoreError::CannotBuffer { .. }), "got {err:?}");
    assert!(err.to_string().contains("WAL"), "got {err}");

    // Once everything is uploaded the covered segment is reclaimed
    pool.flush_all_now().await.unwrap();
    let lsn = pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    assert_eq!(lsn.value(), accepted + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_assigns_a_total_order() {
    let dir = TempDir::new().unwrap();
    let mut config = small_config(dir.path());
    config.buffer_pool.max_page_bytes = 1024 * 1024;
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = Arc::new(open_pool(&config, &store, &clock).await);
    let api = stream("api");

    let mut tasks = Vec::new();
    for writer in 0..8 {
        let pool = Arc::clone(&pool);
        let api = api.clone();
        tasks.push(tokio::spawn(async move {
            let mut lsns = Vec::new();
            for i in 0..50 {
                let record = LogRecord::new(T0 + i, Severity::Info, format!("writer {writer} #{i}"));
                lsns.push(pool.ingest(&api, record).unwrap().value());
            }
            lsns
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        let lsns = task.await.unwrap();
        // Each writer observes its own LSNs increasing
        assert!(lsns.windows(2).all(|w| w[0] < w[1]));
        all.extend(lsns);
    }
    all.sort_unstable();
    assert_eq!(all, (1..=400).collect::<Vec<u64>>());

    // The page holds the records in LSN order
    let active = pool.snapshot_active(&api).unwrap();
    let page_lsns: Vec<u64> = active.entries.iter().map(|e| e.lsn.value()).collect();
    assert_eq!(page_lsns, (1..=400).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_streams_are_independent() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;

    let api = stream("api");
    let web = stream("web");
    assert_eq!(pool.ingest(&api, log_of_size(T0, 20)).unwrap(), Lsn::new(1));
    assert_eq!(pool.ingest(&web, log_of_size(T0, 20)).unwrap(), Lsn::new(1));
    assert_eq!(pool.ingest(&api, log_of_size(T0, 20)).unwrap(), Lsn::new(2));
    assert_eq!(pool.streams(), vec![api, web]);
}

#[tokio::test]
async fn test_stream_of_another_kind_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;

    let cpu = StreamId::new("acme", SignalKind::Metrics, "cpu").unwrap();
    let err = pool.ingest(&cpu, log_of_size(T0, 20)).unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert!(pool.streams().is_empty());
}

fn active_lsns(pool: &brook_storage::LogBufferPool, stream: &StreamId) -> Vec<u64> {
    pool.snapshot_active(stream)
        .map(|page| page.entries.iter().map(|e| e.lsn.value()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_consume_takes_only_logged_lsns_in_order() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    for expected in 1..=3 {
        let lsn = pool.append_wal(&api, &log_of_size(T0, 20)).unwrap();
        assert_eq!(lsn, Lsn::new(expected));
    }
    assert!(pool.snapshot_active(&api).is_none());

    pool.consume(Lsn::new(1), &api, log_of_size(T0, 20)).unwrap();
    let err = pool.consume(Lsn::new(1), &api, log_of_size(T0, 20)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }), "got {err:?}");

    // Record 3 is logged but not consumed yet: ingest would hand out LSN 4 ahead of it
    let err = pool.ingest(&api, log_of_size(T0, 20)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }), "got {err:?}");

    // Skipping 2 is allowed; going past the end of the WAL is not
    pool.consume(Lsn::new(3), &api, log_of_size(T0, 20)).unwrap();
    let err = pool.consume(Lsn::new(4), &api, log_of_size(T0, 20)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }), "got {err:?}");
    assert_eq!(pool.wal_positions(&api).unwrap().last_lsn, Lsn::new(3));

    assert_eq!(pool.ingest(&api, log_of_size(T0, 20)).unwrap(), Lsn::new(4));
    assert_eq!(active_lsns(&pool, &api), vec![1, 3, 4]);
}

#[tokio::test]
async fn test_write_after_window_starts_new_page() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");
    let window = config.buffer_pool.max_page_window_ms as i64;

    pool.ingest(&api, log_of_size(T0, 20)).unwrap();
    clock.advance(3 * window);

    // No cycle ran in between; the write itself seals the aged page
    let lsn = pool.ingest(&api, log_of_size(T0 + 3 * window, 20)).unwrap();
    assert_eq!(lsn, Lsn::new(2));
    assert_eq!(active_lsns(&pool, &api), vec![2]);

    let sealed = pool.snapshot_sealed(&api, i64::MIN, i64::MAX);
    assert_eq!(sealed.len(), 1);
    assert_eq!(sealed[0].state, PageState::Sealed);
    let lsns: Vec<u64> = sealed[0].entries.iter().map(|e| e.lsn.value()).collect();
    assert_eq!(lsns, vec![1]);

    // A consumed record follows the same rule
    let logged = pool.append_wal(&api, &log_of_size(T0, 20)).unwrap();
    clock.advance(window);
    pool.consume(logged, &api, log_of_size(T0, 20)).unwrap();
    assert_eq!(active_lsns(&pool, &api), vec![3]);
    assert_eq!(pool.stats().sealed_pages, 2);
}

#[tokio::test]
async fn test_failed_stream_releases_sealed_cap_and_keeps_its_wal() {
    let dir = TempDir::new().unwrap();
    let mut config = small_config(dir.path());
    config.buffer_pool.sealed_page_cap = 1;
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let bad = stream("bad");
    let good = stream("good");

    // A file where the stream's artifact directory should go makes every flush fail
    let bucket = pool.paths().bucket_of(T0);
    let blocker = pool.paths().stream_dir(&bad, bucket);
    std::fs::create_dir_all(pool.paths().partition_dir(bucket)).unwrap();
    std::fs::write(&blocker, b"not a directory").unwrap();

    pool.ingest(&bad, log_of_size(T0, 50)).unwrap();
    pool.ingest(&bad, log_of_size(T0, 50)).unwrap();
    assert_eq!(pool.stats().sealed_pages, 1);

    let report = pool.run_cycle().await.unwrap();
    assert_eq!(report.flush_failures, 1);
    let stats = pool.stats();
    assert_eq!(stats.failed_streams, 1);
    assert_eq!(stats.sealed_pages, 0);

    let err = pool.ingest(&bad, log_of_size(T0, 50)).unwrap_err();
    assert!(matches!(err, CoreError::StreamUnavailable { .. }), "got {err:?}");

    // The healthy stream still gets the whole cap
    for _ in 0..3 {
        pool.ingest(&good, log_of_size(T0, 50)).unwrap();
    }
    assert_eq!(pool.stats().sealed_pages, 1);
    pool.await_idle(Duration::from_secs(5)).await.unwrap();
    assert_eq!(store.keys().len(), 2);
    assert_eq!(pool.wal_positions(&good).unwrap().reclaim_before, Lsn::new(3));

    // Nothing of the failed stream's WAL is reclaimed
    let positions = pool.wal_positions(&bad).unwrap();
    assert_eq!(positions.reclaim_before, Lsn::ZERO);
    assert_eq!(positions.last_lsn, Lsn::new(2));
    drop(pool);

    std::fs::remove_file(&blocker).unwrap();
    let pool = open_pool(&config, &store, &clock).await;
    assert_eq!(pool.stats().failed_streams, 0);
    let sealed = pool.snapshot_sealed(&bad, i64::MIN, i64::MAX);
    assert_eq!(sealed.len(), 1);
    let lsns: Vec<u64> = sealed[0].entries.iter().map(|e| e.lsn.value()).collect();
    assert_eq!(lsns, vec![1, 2]);
}

#[tokio::test]
async fn test_flush_pages_older_than_only_seals_old_pages() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let old = stream("old");
    let fresh = stream("fresh");

    pool.ingest(&old, log_of_size(T0 - 60_000, 20)).unwrap();
    pool.ingest(&fresh, log_of_size(T0, 20)).unwrap();

    let report = pool.flush_pages_older_than(T0 - 1_000).await.unwrap();
    assert_eq!(report.sealed, 1);
    assert_eq!(report.flushed, 1);
    assert!(pool.snapshot_active(&old).is_none());
    assert!(pool.snapshot_active(&fresh).is_some());
}

#[tokio::test]
async fn test_snapshot_sealed_filters_by_time_range() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    pool.ingest(&api, log_of_size(1_000, 50)).unwrap();
    pool.ingest(&api, log_of_size(2_000, 50)).unwrap();
    pool.ingest(&api, log_of_size(9_000, 50)).unwrap();
    pool.ingest(&api, log_of_size(9_500, 50)).unwrap();

    assert_eq!(pool.snapshot_sealed(&api, 0, 5_000).len(), 1);
    assert_eq!(pool.snapshot_sealed(&api, 1_500, 9_000).len(), 2);
    assert!(pool.snapshot_sealed(&api, 3_000, 8_000).is_empty());
    assert!(pool.snapshot_sealed(&stream("other"), 0, i64::MAX).is_empty());
}

#[tokio::test]
async fn test_await_idle_drains_and_times_out_while_uploads_fail() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let clock = Arc::new(ManualClock::new(T0));
    let api = stream("api");

    let store = Arc::new(MockObjectStore::new());
    let pool = open_pool(&config, &store, &clock).await;
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.await_idle(Duration::from_secs(5)).await.unwrap();
    assert_eq!(pool.stats().pending_uploads, 0);
    assert_eq!(store.keys().len(), 2);
    drop(pool);

    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let failing = Arc::new(MockObjectStore::new_always_fail("503 SlowDown", true));
    let pool = open_pool(&config, &failing, &clock).await;
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    pool.ingest(&api, log_of_size(T0, 50)).unwrap();
    let err = pool.await_idle(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { operation: "await_idle", .. }));
    assert_eq!(pool.stats().pending_uploads, 1);
}

#[tokio::test]
async fn test_background_scheduler_flushes_idle_stream() {
    let dir = TempDir::new().unwrap();
    let config = small_config(dir.path());
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let pool = open_pool(&config, &store, &clock).await;
    let api = stream("api");

    pool.ingest(&api, log_of_size(T0, 30)).unwrap();
    clock.advance(config.buffer_pool.max_page_window_ms as i64);
    pool.start_scheduler();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.keys().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "scheduler never uploaded");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.shutdown().await.unwrap();
    assert!(pool.snapshot_active(&api).is_none());
}

#[tokio::test]
async fn test_config_is_validated_on_open() {
    let dir = TempDir::new().unwrap();
    let mut config: BrookConfig = small_config(dir.path());
    config.buffer_pool.sealed_page_cap = 0;
    let store = Arc::new(MockObjectStore::new());
    let clock = Arc::new(ManualClock::new(T0));

    let err = brook_storage::LogBufferPool::open(config, store, clock)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
}
