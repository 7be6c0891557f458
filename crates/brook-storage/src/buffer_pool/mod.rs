//! Buffer pool: WAL-gated ingestion into pages and the tiered
//! flush / upload / evict pipeline behind it.
//!
//! One pool serves every stream of one record kind. Per stream, the WAL
//! append and the page append happen under the stream's lock, so page order
//! is LSN order. Sealed pages move into a single bounded set shared by all
//! streams; a background scheduler flushes them to disk, uploads the
//! artifacts, advances each WAL's reclaim watermark and evicts what is no
//! longer needed.
//!
//! # Example
//!
//! ```rust,no_run
//! use brook_core::{BrookConfig, SignalKind, StreamId, SystemClock};
//! use brook_storage::object_store::LocalObjectStore;
//! use brook_storage::{LogBufferPool, LogRecord, Severity};
//! use std::sync::Arc;
//!
//! # async fn example() -> brook_core::CoreResult<()> {
//! let config = BrookConfig::default();
//! let store = Arc::new(LocalObjectStore::new(&config.upload.remote.local_dir).await?);
//! let pool = LogBufferPool::open(config, store, Arc::new(SystemClock)).await?;
//! pool.start_scheduler();
//!
//! let stream = StreamId::new("acme", SignalKind::Logs, "checkout")?;
//! let lsn = pool.ingest(&stream, LogRecord::new(1_700_000_000_000, Severity::Info, "paid"))?;
//! println!("durable at {lsn}");
//!
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod ledger;
mod recovery;
mod scheduler;
mod sealed;

pub use recovery::PoolRecovery;
pub use scheduler::CycleReport;

use brook_core::metrics::{BACKPRESSURE_REJECTIONS, PAGES_SEALED, PAGE_EVICTIONS, SEALED_PAGES};
use brook_core::{BrookConfig, Clock, CoreError, CoreResult, Lsn, StreamId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointUploader;
use crate::codec::{BodyCompression, Codec, PageCodec};
use crate::object_store::ObjectStore;
use crate::page::{Page, PageLimits, PageSnapshot, PageState, SealTrigger};
use crate::paths::DiskPathResolver;
use crate::record::IngestRecord;
use crate::wal::Wal;

use ledger::UploadLedger;
use scheduler::Worker;
use sealed::{Admission, SealedPageSet};

/// Written into each stream's WAL directory so restart can rediscover the stream.
pub const STREAM_DESCRIPTOR: &str = "stream.json";

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Point-in-time counters, mainly for tests and operator tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub streams: usize,
    pub active_pages: usize,
    /// Sealed pages still in their stream slot because the sealed set is full.
    pub held_pages: usize,
    pub sealed_pages: usize,
    pub flushed_pages: usize,
    pub uploaded_pages: usize,
    pub pending_uploads: usize,
    pub tracked_artifacts: usize,
    pub failed_streams: usize,
}

/// WAL positions of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalPositions {
    pub last_lsn: Lsn,
    pub reclaim_before: Lsn,
    pub segments: usize,
}

pub(crate) struct ActiveSlot<R: IngestRecord> {
    /// ACTIVE page, or a sealed page waiting for room in the sealed set.
    page: Option<Page<R>>,
    last_lsn: Lsn,
}

impl<R: IngestRecord> ActiveSlot<R> {
    fn holds_sealed(&self) -> bool {
        self.page
            .as_ref()
            .is_some_and(|p| p.state() != PageState::Active)
    }
}

pub(crate) struct StreamHandle<R: IngestRecord> {
    id: StreamId,
    wal: Wal,
    slot: Mutex<ActiveSlot<R>>,
    failure: Mutex<Option<String>>,
}

impl<R: IngestRecord> StreamHandle<R> {
    fn check_available(&self) -> CoreResult<()> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(CoreError::StreamUnavailable {
                stream: self.id.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }
}

pub(crate) struct PoolInner<R: IngestRecord> {
    config: BrookConfig,
    limits: PageLimits,
    paths: DiskPathResolver,
    codec: Box<dyn Codec<R>>,
    uploader: Option<CheckpointUploader>,
    clock: Arc<dyn Clock>,
    streams: RwLock<HashMap<StreamId, Arc<StreamHandle<R>>>>,
    /// Serializes first-use opens so `streams` is never held across WAL I/O.
    opening: Mutex<()>,
    sealed: Mutex<SealedPageSet<R>>,
    ledger: Mutex<UploadLedger>,
    wake: Notify,
    cycle: tokio::sync::Mutex<()>,
}

impl<R: IngestRecord> PoolInner<R> {
    fn kind(&self) -> &'static str {
        R::KIND.as_str()
    }

    fn handles(&self) -> Vec<Arc<StreamHandle<R>>> {
        self.streams.read().values().cloned().collect()
    }

    fn handle(&self, id: &StreamId) -> Option<Arc<StreamHandle<R>>> {
        self.streams.read().get(id).cloned()
    }

    /// Returns the stream's handle, opening its WAL on first use.
    fn stream(&self, id: &StreamId) -> CoreResult<Arc<StreamHandle<R>>> {
        if let Some(handle) = self.handle(id) {
            return Ok(handle);
        }
        if id.kind != R::KIND {
            return Err(CoreError::ValidationError(format!(
                "stream {} does not belong to the {} pool",
                id,
                R::KIND
            )));
        }

        let _opening = self.opening.lock();
        if let Some(handle) = self.handle(id) {
            return Ok(handle);
        }
        let handle = Arc::new(self.open_stream(id)?);
        self.streams.write().insert(id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    fn open_stream(&self, id: &StreamId) -> CoreResult<StreamHandle<R>> {
        let dir = self.paths.wal_dir(id);
        let wal = Wal::open(&dir, self.config.wal.clone(), R::KIND)?;

        let descriptor = dir.join(STREAM_DESCRIPTOR);
        if !descriptor.exists() {
            let json = serde_json::to_vec_pretty(id).map_err(CoreError::serialization)?;
            std::fs::write(&descriptor, json)?;
        }

        let last_lsn = wal.last_lsn();
        info!(stream = %id, last_lsn = %last_lsn, "Opened stream");
        Ok(StreamHandle {
            id: id.clone(),
            wal,
            slot: Mutex::new(ActiveSlot {
                page: None,
                last_lsn,
            }),
            failure: Mutex::new(None),
        })
    }

    /// Moves a page into the sealed set. Hands it back if the set is full of unflushed pages.
    fn admit(&self, page: Page<R>) -> CoreResult<Option<Page<R>>> {
        let mut sealed = self.sealed.lock();
        let outcome = sealed.admit(page, None, None)?;
        SEALED_PAGES
            .with_label_values(&[self.kind()])
            .set(sealed.len() as i64);
        drop(sealed);

        match outcome {
            Admission::Admitted { evicted } => {
                if let Some(entry) = evicted {
                    PAGE_EVICTIONS.with_label_values(&[self.kind(), "cap"]).inc();
                    debug!(
                        stream = %entry.page.stream(),
                        partition = ?entry.key.map(|k| k.to_string()),
                        "Evicted flushed page at sealed-page cap"
                    );
                }
                Ok(None)
            }
            Admission::Full(page) => Ok(Some(page)),
        }
    }

    /// Seals the slot's page (if ACTIVE and non-empty) and tries to move it into the sealed set.
    fn seal_locked(
        &self,
        handle: &StreamHandle<R>,
        slot: &mut ActiveSlot<R>,
        trigger: SealTrigger,
    ) -> CoreResult<bool> {
        let Some(mut page) = slot.page.take() else {
            return Ok(false);
        };
        if page.state() == PageState::Active {
            if page.is_empty() {
                slot.page = Some(page);
                return Ok(false);
            }
            page.seal(self.clock.now_ms())?;
            PAGES_SEALED
                .with_label_values(&[self.kind(), trigger.as_str()])
                .inc();
            debug!(
                stream = %handle.id,
                trigger = trigger.as_str(),
                records = page.len(),
                bytes = page.size_bytes(),
                "Sealed page"
            );
        }

        if let Some(page) = self.admit(page)? {
            slot.page = Some(page);
            self.wake.notify_one();
        }
        Ok(true)
    }

    /// Takes a stream out of service after its flush failed for good.
    ///
    /// The stream's unflushed pages leave memory so they stop occupying the
    /// shared sealed set. Their records stay in the WAL, which is no longer
    /// truncated, and are replayed on the next start.
    pub(crate) fn fail_stream(&self, handle: &StreamHandle<R>, message: String) {
        let mut slot = handle.slot.lock();
        *handle.failure.lock() = Some(message);
        let held = usize::from(slot.page.take().is_some());

        let mut sealed = self.sealed.lock();
        let dropped = sealed.discard_unflushed(&handle.id);
        SEALED_PAGES
            .with_label_values(&[self.kind()])
            .set(sealed.len() as i64);
        drop(sealed);

        PAGE_EVICTIONS
            .with_label_values(&[self.kind(), "failed"])
            .inc_by((dropped + held) as u64);
        warn!(
            stream = %handle.id,
            dropped_pages = dropped + held,
            last_lsn = %slot.last_lsn,
            "Stream taken out of service; its WAL is kept for replay"
        );
    }

    /// Ensures the slot can take a record.
    ///
    /// An ACTIVE page past its window is sealed first, and a held sealed page
    /// must get into the sealed set before a new page can start.
    fn make_room(&self, handle: &StreamHandle<R>, slot: &mut ActiveSlot<R>) -> CoreResult<()> {
        let now = self.clock.now_ms();
        if let Some(trigger) = slot
            .page
            .as_ref()
            .and_then(|p| p.seal_trigger(&self.limits, now))
        {
            self.seal_locked(handle, slot, trigger)?;
        }
        if !slot.holds_sealed() {
            return Ok(());
        }
        let Some(page) = slot.page.take() else {
            return Ok(());
        };
        if let Some(page) = self.admit(page)? {
            slot.page = Some(page);
            self.wake.notify_one();
            BACKPRESSURE_REJECTIONS
                .with_label_values(&[self.kind(), "sealed_cap"])
                .inc();
            return Err(CoreError::cannot_buffer(
                &handle.id,
                format!(
                    "sealed page set is at its cap of {} with nothing flushed",
                    self.config.buffer_pool.sealed_page_cap
                ),
            ));
        }
        Ok(())
    }

    fn append_locked(
        &self,
        handle: &StreamHandle<R>,
        slot: &mut ActiveSlot<R>,
        lsn: Lsn,
        record: R,
    ) -> CoreResult<()> {
        let now = self.clock.now_ms();
        // The record is in the WAL either way; a later record must not reuse its LSN.
        slot.last_lsn = lsn;
        let page = slot
            .page
            .get_or_insert_with(|| Page::new(handle.id.clone(), now, &self.limits));
        page.append(lsn, record)?;
        let full = page.is_full(&self.limits);

        if full {
            self.seal_locked(handle, slot, SealTrigger::Size)?;
        }
        Ok(())
    }

    /// Appends to the stream's WAL, mapping a full segment ring to backpressure.
    fn wal_append(&self, handle: &StreamHandle<R>, payload: &[u8]) -> CoreResult<Lsn> {
        match handle.wal.append(payload) {
            Ok(lsn) => Ok(lsn),
            Err(CoreError::NoMoreWalSlots { max_segments }) => {
                self.wake.notify_one();
                BACKPRESSURE_REJECTIONS
                    .with_label_values(&[self.kind(), "wal_full"])
                    .inc();
                Err(CoreError::cannot_buffer(
                    &handle.id,
                    format!("all {max_segments} WAL segments hold records not yet checkpointed"),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn ingest(&self, id: &StreamId, record: R) -> CoreResult<Lsn> {
        let handle = self.stream(id)?;
        let payload = record.to_bytes()?;

        let mut slot = handle.slot.lock();
        handle.check_available()?;
        let logged = handle.wal.last_lsn();
        if logged > slot.last_lsn {
            return Err(CoreError::invalid_state(format!(
                "stream {} has WAL records up to {} not yet consumed (last consumed {})",
                id, logged, slot.last_lsn
            )));
        }
        self.make_room(&handle, &mut slot)?;
        let lsn = self.wal_append(&handle, &payload)?;
        self.append_locked(&handle, &mut slot, lsn, record)?;
        Ok(lsn)
    }

    fn append_wal(&self, id: &StreamId, record: &R) -> CoreResult<Lsn> {
        let handle = self.stream(id)?;
        let payload = record.to_bytes()?;

        let _slot = handle.slot.lock();
        handle.check_available()?;
        self.wal_append(&handle, &payload)
    }

    fn consume(&self, lsn: Lsn, id: &StreamId, record: R) -> CoreResult<()> {
        let handle = self.stream(id)?;

        let mut slot = handle.slot.lock();
        handle.check_available()?;
        if lsn <= slot.last_lsn {
            return Err(CoreError::invalid_state(format!(
                "{} is not after {} in stream {}",
                lsn, slot.last_lsn, id
            )));
        }
        let logged = handle.wal.last_lsn();
        if lsn > logged {
            return Err(CoreError::invalid_state(format!(
                "{} is not in the WAL of stream {}, which ends at {}",
                lsn, id, logged
            )));
        }
        self.make_room(&handle, &mut slot)?;
        self.append_locked(&handle, &mut slot, lsn, record)
    }

    /// Seals every ACTIVE page accepted by `filter`. Returns how many were sealed.
    fn seal_matching(
        &self,
        trigger: SealTrigger,
        filter: impl Fn(&Page<R>) -> bool,
    ) -> CoreResult<usize> {
        let mut sealed = 0;
        for handle in self.handles() {
            if handle.is_failed() {
                continue;
            }
            let mut slot = handle.slot.lock();
            let matches = slot
                .page
                .as_ref()
                .is_some_and(|p| p.state() == PageState::Active && !p.is_empty() && filter(p));
            if matches && self.seal_locked(&handle, &mut slot, trigger)? {
                sealed += 1;
            }
        }
        Ok(sealed)
    }

    /// Nothing waits for a flush or an upload.
    fn is_idle(&self) -> bool {
        let held = self
            .handles()
            .iter()
            .any(|h| !h.is_failed() && h.slot.lock().holds_sealed());
        if held {
            return false;
        }
        if self.sealed.lock().count_in(PageState::Sealed) > 0 {
            return false;
        }
        self.ledger.lock().pending_count() == 0
    }

    fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for handle in self.handles() {
            stats.streams += 1;
            if handle.is_failed() {
                stats.failed_streams += 1;
            }
            let slot = handle.slot.lock();
            match slot.page.as_ref().map(Page::state) {
                Some(PageState::Active) => stats.active_pages += 1,
                Some(_) => stats.held_pages += 1,
                None => {}
            }
        }
        {
            let sealed = self.sealed.lock();
            stats.sealed_pages = sealed.count_in(PageState::Sealed);
            stats.flushed_pages = sealed.count_in(PageState::Flushed);
            stats.uploaded_pages = sealed.count_in(PageState::Uploaded);
        }
        let ledger = self.ledger.lock();
        stats.pending_uploads = ledger.pending_count();
        stats.tracked_artifacts = ledger.len();
        stats
    }
}

/// Generic buffer pool over one record kind.
pub struct BufferPool<R: IngestRecord> {
    inner: Arc<PoolInner<R>>,
    recovery: PoolRecovery,
    worker: Mutex<Option<Worker>>,
}

impl<R: IngestRecord> std::fmt::Debug for BufferPool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("kind", &R::KIND)
            .field("data_dir", &self.inner.paths.data_dir())
            .finish()
    }
}

impl<R: IngestRecord> BufferPool<R> {
    /// Opens the pool over `config.storage.data_dir` and recovers its state.
    ///
    /// Recovery rediscovers every stream of this kind from its WAL directory,
    /// reloads flushed artifacts that are not yet checkpointed (queued for
    /// upload) and replays the rest of each WAL into pages.
    ///
    /// # Errors
    /// - [`CoreError::ValidationError`] for an invalid configuration.
    /// - [`CoreError::FileLock`] if another process owns one of the stream WALs.
    pub async fn open(
        config: BrookConfig,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        config
            .validate()
            .map_err(|e| CoreError::ValidationError(e.to_string()))?;

        let compression = if config.buffer_pool.compress_bodies {
            BodyCompression::Gzip
        } else {
            BodyCompression::None
        };
        Self::open_with_codec(config, store, clock, Box::new(PageCodec::new(compression))).await
    }

    /// Like [`BufferPool::open`] with a caller-supplied page codec.
    pub async fn open_with_codec(
        config: BrookConfig,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        codec: Box<dyn Codec<R>>,
    ) -> CoreResult<Self> {
        let paths = DiskPathResolver::new(
            &config.storage.data_dir,
            config.storage.idx_expiry_duration_ms,
        );
        tokio::fs::create_dir_all(paths.wal_root()).await?;

        let uploader = config.upload.enabled.then(|| {
            CheckpointUploader::new(store, paths.clone(), &config.upload, Arc::clone(&clock))
        });

        let inner = Arc::new(PoolInner {
            limits: PageLimits::from(&config.buffer_pool),
            sealed: Mutex::new(SealedPageSet::new(config.buffer_pool.sealed_page_cap)),
            config,
            paths,
            codec,
            uploader,
            clock,
            streams: RwLock::new(HashMap::new()),
            opening: Mutex::new(()),
            ledger: Mutex::new(UploadLedger::default()),
            wake: Notify::new(),
            cycle: tokio::sync::Mutex::new(()),
        });

        let recovery = inner.recover().await?;
        Ok(Self {
            inner,
            recovery,
            worker: Mutex::new(None),
        })
    }

    /// What restart recovery found when the pool was opened.
    pub fn recovery(&self) -> &PoolRecovery {
        &self.recovery
    }

    /// Appends `record` to the stream's WAL and then to its ACTIVE page.
    ///
    /// Returns the record's LSN once it is durable. The stream is opened on first use.
    ///
    /// # Errors
    /// - [`CoreError::CannotBuffer`] when the sealed-page set or the WAL ring is full;
    ///   retry after a delay.
    /// - [`CoreError::StreamUnavailable`] after the stream's flush failed permanently.
    /// - [`CoreError::InvalidState`] while records added with [`BufferPool::append_wal`]
    ///   wait to be consumed.
    pub fn ingest(&self, stream: &StreamId, record: R) -> CoreResult<Lsn> {
        self.inner.ingest(stream, record)
    }

    /// Appends `record` to the stream's WAL only. The caller hands it to
    /// [`BufferPool::consume`] with the returned LSN.
    ///
    /// While appended records wait to be consumed, [`BufferPool::ingest`] on the
    /// same stream is refused.
    ///
    /// # Errors
    /// Same as [`BufferPool::ingest`].
    pub fn append_wal(&self, stream: &StreamId, record: &R) -> CoreResult<Lsn> {
        self.inner.append_wal(stream, record)
    }

    /// Adds a record whose WAL append already returned `lsn`.
    ///
    /// `lsn` must be greater than every LSN consumed so far for the stream and
    /// no greater than the WAL's last LSN. LSNs may be skipped; a skipped record
    /// stays in the WAL and comes back on replay.
    ///
    /// # Errors
    /// - [`CoreError::InvalidState`] for an LSN outside that range.
    /// - [`CoreError::CannotBuffer`] and [`CoreError::StreamUnavailable`] as for `ingest`.
    pub fn consume(&self, lsn: Lsn, stream: &StreamId, record: R) -> CoreResult<()> {
        self.inner.consume(lsn, stream, record)
    }

    /// Runs one seal / flush / upload / truncate / evict pass now.
    pub async fn run_cycle(&self) -> CoreResult<CycleReport> {
        self.inner.run_cycle().await
    }

    /// Seals every non-empty ACTIVE page, then runs a full cycle.
    pub async fn flush_all_now(&self) -> CoreResult<CycleReport> {
        let sealed = self.inner.seal_matching(SealTrigger::Manual, |_| true)?;
        let mut report = self.inner.run_cycle().await?;
        report.sealed += sealed;
        Ok(report)
    }

    /// Seals ACTIVE pages whose newest record is older than `timestamp_ms`, then runs a cycle.
    pub async fn flush_pages_older_than(&self, timestamp_ms: i64) -> CoreResult<CycleReport> {
        let sealed = self.inner.seal_matching(SealTrigger::Manual, |page| {
            page.time_range()
                .is_some_and(|(_, newest)| newest < timestamp_ms)
        })?;
        let mut report = self.inner.run_cycle().await?;
        report.sealed += sealed;
        Ok(report)
    }

    /// Drives cycles until nothing is waiting for a flush or an upload.
    ///
    /// Upload backoff is measured on the pool clock, so with a manual clock
    /// a failing upload keeps this waiting until the clock moves.
    ///
    /// # Errors
    /// [`CoreError::Timeout`] if the pool is still busy after `timeout`.
    pub async fn await_idle(&self, timeout: Duration) -> CoreResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.inner.run_cycle().await?;
            if self.inner.is_idle() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Timeout {
                    operation: "await_idle",
                    millis: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Read-only copy of the stream's ACTIVE page.
    pub fn snapshot_active(&self, stream: &StreamId) -> Option<PageSnapshot<R>> {
        let handle = self.inner.handle(stream)?;
        let slot = handle.slot.lock();
        slot.page
            .as_ref()
            .filter(|p| p.state() == PageState::Active && !p.is_empty())
            .map(Page::snapshot)
    }

    /// Read-only copies of the stream's sealed pages still in memory that overlap
    /// `[start_ms, end_ms]`, in LSN order.
    pub fn snapshot_sealed(
        &self,
        stream: &StreamId,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<PageSnapshot<R>> {
        let Some(handle) = self.inner.handle(stream) else {
            return Vec::new();
        };
        let slot = handle.slot.lock();
        let mut snapshots = self.inner.sealed.lock().snapshots(stream, start_ms, end_ms);
        if let Some(held) = slot
            .page
            .as_ref()
            .filter(|p| p.state() != PageState::Active && p.overlaps(start_ms, end_ms))
        {
            snapshots.push(held.snapshot());
        }
        snapshots.sort_by_key(|s| s.first_lsn);
        snapshots
    }

    pub fn streams(&self) -> Vec<StreamId> {
        let mut streams: Vec<StreamId> = self.inner.streams.read().keys().cloned().collect();
        streams.sort();
        streams
    }

    pub fn wal_positions(&self, stream: &StreamId) -> Option<WalPositions> {
        let handle = self.inner.handle(stream)?;
        Some(WalPositions {
            last_lsn: handle.wal.last_lsn(),
            reclaim_before: handle.wal.reclaim_watermark(),
            segments: handle.wal.segments().len(),
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    pub fn paths(&self) -> &DiskPathResolver {
        &self.inner.paths
    }

    /// Starts the background scheduler. A second call is a no-op.
    pub fn start_scheduler(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!(kind = R::KIND.as_str(), "Buffer pool scheduler already running");
            return;
        }
        *worker = Some(scheduler::spawn_worker(Arc::clone(&self.inner)));
    }

    /// Stops the scheduler, then seals and flushes everything buffered and syncs the WALs.
    ///
    /// An upload in flight is abandoned; its artifact is uploaded again after restart.
    pub async fn shutdown(&self) -> CoreResult<()> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
        }

        self.inner.seal_matching(SealTrigger::Manual, |_| true)?;
        let report = self.inner.final_flush().await?;
        for handle in self.inner.handles() {
            handle.wal.sync()?;
        }
        info!(
            kind = R::KIND.as_str(),
            flushed = report.flushed,
            "Buffer pool shut down"
        );
        Ok(())
    }
}
