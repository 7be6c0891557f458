//! Central metrics registry and metric definitions
//!
//! Prometheus metrics for the WAL, buffer pool and upload pipeline.
//! Metrics are registered lazily on first access using once_cell::Lazy.
//! Every metric carries a `kind` label (logs, metrics, traces).

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

// ===== WAL Metrics =====

/// WAL appends by status (ok, error)
pub static WAL_APPENDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_wal_appends_total",
        "Total number of WAL appends",
        &["kind", "status"]
    )
    .expect("Failed to register WAL appends counter")
});

/// Bytes written to WAL segments, framing included
pub static WAL_BYTES_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_wal_bytes_written_total",
        "Total bytes written to WAL segments",
        &["kind"]
    )
    .expect("Failed to register WAL bytes counter")
});

/// Records replayed from the WAL at startup
pub static WAL_RECOVERED_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_wal_recovered_records_total",
        "Records replayed from the WAL during recovery",
        &["kind"]
    )
    .expect("Failed to register WAL recovered records counter")
});

/// Corrupt frames found by recovery or replay
pub static WAL_CORRUPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_wal_corruptions_total",
        "Corrupt WAL frames detected",
        &["kind"]
    )
    .expect("Failed to register WAL corruptions counter")
});

// ===== Buffer Pool Metrics =====

/// Pages sealed by trigger (size, window, manual)
pub static PAGES_SEALED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_pages_sealed_total",
        "Total number of pages sealed",
        &["kind", "trigger"]
    )
    .expect("Failed to register pages sealed counter")
});

/// Page flushes to local disk by status
pub static PAGE_FLUSHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_page_flushes_total",
        "Total number of page flushes to local disk",
        &["kind", "status"]
    )
    .expect("Failed to register page flushes counter")
});

/// Encoded page bytes (metadata + body) written to local disk
pub static PAGE_SERIALIZED_BYTES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_page_serialized_bytes_total",
        "Encoded page bytes written to local disk",
        &["kind"]
    )
    .expect("Failed to register page serialized bytes counter")
});

/// Sealed pages currently held in memory
pub static SEALED_PAGES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "brook_sealed_pages",
        "Sealed pages held in memory",
        &["kind"]
    )
    .expect("Failed to register sealed pages gauge")
});

/// Writes rejected with backpressure by reason
pub static BACKPRESSURE_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_backpressure_rejections_total",
        "Writes rejected with backpressure",
        &["kind", "reason"]
    )
    .expect("Failed to register backpressure counter")
});

/// Pages evicted from memory by reason (ttl, cap, failed)
pub static PAGE_EVICTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_page_evictions_total",
        "Sealed pages evicted from memory",
        &["kind", "reason"]
    )
    .expect("Failed to register page evictions counter")
});

// ===== Upload Metrics =====

/// Upload attempts by status (ok, skipped, error, timeout)
pub static UPLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "brook_uploads_total",
        "Upload attempts by outcome",
        &["kind", "status"]
    )
    .expect("Failed to register uploads counter")
});

/// Upload attempt latency
pub static UPLOAD_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "brook_upload_latency_seconds",
        "Upload attempt latency in seconds",
        &["kind"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register upload latency histogram")
});

/// Artifacts flushed locally but not yet checkpointed
pub static PENDING_UPLOADS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "brook_pending_uploads",
        "Flushed artifacts awaiting upload",
        &["kind"]
    )
    .expect("Failed to register pending uploads gauge")
});
