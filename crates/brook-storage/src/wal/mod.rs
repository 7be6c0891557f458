//! Per-stream Write-Ahead Log
//!
//! The WAL ensures that every ingested record is on disk before it becomes
//! visible in a page. Each record is assigned a strictly increasing Log
//! Sequence Number at append time.
//!
//! Storage layout:
//! ```text
//! {data_dir}/wal/{stream}/
//!   wal.lock                 - single-writer lock (flock)
//!   segments.json            - manifest: segment table, reclaim watermark
//!   wal_0000000001.segment   - sealed segment
//!   wal_0000000002.segment   - active segment
//! ```
//!
//! Segments form a bounded ring of at most `max_segments` live files. A
//! rotation that finds the ring full first reclaims segments entirely below
//! the watermark set by [`Wal::truncate_before`]; if none qualify the append
//! fails with [`CoreError::NoMoreWalSlots`]. The newest
//! `keep_sealed_segments` sealed segments are never reclaimed.
//!
//! When an append forces the active segment to disk is decided by the
//! configured [`FsyncPolicy`].

mod frame;
mod lock;
mod manifest;
mod recovery;

pub use frame::{encode_frame, read_frame, FrameRead, WalRecord, FRAME_OVERHEAD, MAX_PAYLOAD_BYTES};
pub use lock::{WalLock, LOCK_FILE};
pub use manifest::{segment_file_name, SegmentMeta, WalManifest, MANIFEST_FILE};
pub use recovery::{list_segments, recover_segments, scan_segment, RecoveryReport, SegmentScan};

use brook_core::metrics::{WAL_APPENDS, WAL_BYTES_WRITTEN, WAL_CORRUPTIONS};
use brook_core::{CoreError, CoreResult, FsyncPolicy, Lsn, SignalKind, WalConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Take, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

struct WalState {
    manifest: WalManifest,
    active: File,
    last_lsn: Lsn,
    /// Bytes appended since the active segment was last forced to disk.
    unsynced_bytes: u64,
    last_sync: Instant,
    /// Set when a failed append could not be rolled back. Every later append fails.
    poisoned: Option<String>,
}

impl WalState {
    fn active_meta(&mut self) -> CoreResult<&mut SegmentMeta> {
        self.manifest
            .segments
            .last_mut()
            .ok_or_else(|| CoreError::internal("WAL has no active segment"))
    }

    fn mark_synced(&mut self, now: Instant) {
        self.unsynced_bytes = 0;
        self.last_sync = now;
    }
}

/// Whether an append that brings the unsynced total to `unsynced_bytes` must fsync.
fn sync_due(config: &WalConfig, unsynced_bytes: u64, since_sync: Duration) -> bool {
    match config.fsync_policy {
        FsyncPolicy::EveryRecord => true,
        FsyncPolicy::Bytes => unsynced_bytes >= config.fsync_bytes,
        FsyncPolicy::Interval => since_sync >= config.fsync_interval(),
        FsyncPolicy::Manual => false,
    }
}

/// Append-only, segmented, crash-recoverable log for one stream.
pub struct Wal {
    dir: PathBuf,
    config: WalConfig,
    kind: SignalKind,
    state: Mutex<WalState>,
    recovery: RecoveryReport,
    _lock: WalLock,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Wal {
    /// Opens (or creates) the WAL in `dir`.
    ///
    /// Acquires the directory lock, truncates a torn tail left by a crash and
    /// rebuilds the segment table.
    ///
    /// # Errors
    /// - [`CoreError::FileLock`] if another owner holds the directory.
    /// - [`CoreError::InvalidState`] if the manifest watermark is ahead of the log.
    pub fn open(dir: impl AsRef<Path>, config: WalConfig, kind: SignalKind) -> CoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = WalLock::acquire(&dir)?;
        let mut manifest = WalManifest::load(&dir)?;
        let mut report = recover_segments(&dir)?;
        let corruptions =
            report.corrupt_segments.len() as u64 + u64::from(report.truncated_bytes > 0);
        if corruptions > 0 {
            WAL_CORRUPTIONS
                .with_label_values(&[kind.as_str()])
                .inc_by(corruptions);
        }

        let last_lsn = report.last_lsn.max(manifest.high_water_lsn);
        let log_end = last_lsn
            .checked_next()
            .ok_or_else(|| CoreError::internal("LSN space exhausted"))?;
        if manifest.reclaim_before > log_end {
            return Err(CoreError::invalid_state(format!(
                "WAL manifest in {} claims records below {} are checkpointed but the log ends at {}",
                dir.display(),
                manifest.reclaim_before,
                last_lsn
            )));
        }

        let mut segments = std::mem::take(&mut report.segments);
        let next_from_disk = segments.last().map_or(1, |s| s.id + 1);
        manifest.next_segment_id = manifest.next_segment_id.max(next_from_disk);
        if segments.is_empty() {
            let meta = SegmentMeta::empty(manifest.next_segment_id);
            manifest.next_segment_id += 1;
            File::create(dir.join(meta.file_name()))?.sync_all()?;
            segments.push(meta);
        }

        let active_name = segments
            .last()
            .map(SegmentMeta::file_name)
            .ok_or_else(|| CoreError::internal("WAL has no active segment"))?;
        let active = OpenOptions::new()
            .append(true)
            .open(dir.join(active_name))?;

        manifest.segments = segments;
        manifest.high_water_lsn = last_lsn;
        manifest.persist(&dir)?;

        info!(
            dir = %dir.display(),
            segments = manifest.segments.len(),
            last_lsn = %last_lsn,
            reclaim_before = %manifest.reclaim_before,
            "Opened WAL"
        );

        Ok(Self {
            dir,
            config,
            kind,
            state: Mutex::new(WalState {
                manifest,
                active,
                last_lsn,
                unsynced_bytes: 0,
                last_sync: Instant::now(),
                poisoned: None,
            }),
            recovery: report,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// What the open-time scan truncated or found corrupt. `segments` is left empty.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    fn unavailable(&self, reason: &str) -> CoreError {
        CoreError::StreamUnavailable {
            stream: self.dir.display().to_string(),
            message: reason.to_string(),
        }
    }

    /// Refuses every later append. The segment may end in a partial frame.
    fn poison(&self, state: &mut WalState, reason: String) -> CoreError {
        error!(dir = %self.dir.display(), reason = %reason, "WAL poisoned, appends disabled");
        let err = self.unavailable(&reason);
        state.poisoned = Some(reason);
        err
    }

    /// Durably appends `payload` and returns its LSN.
    ///
    /// The LSN is only consumed when the frame was fully written; a failed
    /// write is rolled back so the segment never holds a torn frame in the
    /// middle. If the rollback itself fails the WAL is poisoned and this and
    /// every later append return [`CoreError::StreamUnavailable`].
    pub fn append(&self, payload: &[u8]) -> CoreResult<Lsn> {
        let result = self.append_inner(payload);
        let status = if result.is_ok() { "ok" } else { "error" };
        WAL_APPENDS
            .with_label_values(&[self.kind.as_str(), status])
            .inc();
        result
    }

    fn append_inner(&self, payload: &[u8]) -> CoreResult<Lsn> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.poisoned {
            return Err(self.unavailable(reason));
        }
        let lsn = state
            .last_lsn
            .checked_next()
            .ok_or_else(|| CoreError::internal("LSN space exhausted"))?;
        let frame = encode_frame(lsn, payload)?;

        let active_size = state.active_meta()?.size_bytes;
        if active_size > 0 && active_size + frame.len() as u64 > self.config.segment_size_bytes {
            self.rotate(&mut state)?;
        }

        let before = state.active_meta()?.size_bytes;
        let now = Instant::now();
        let unsynced = state.unsynced_bytes + frame.len() as u64;
        let force = sync_due(&self.config, unsynced, now.duration_since(state.last_sync));
        let written = match state.active.write_all(&frame) {
            Ok(()) if force => state.active.sync_data(),
            other => other,
        };
        if let Err(e) = written {
            if let Err(rollback) = state.active.set_len(before) {
                let reason = format!(
                    "append failed ({e}) and the partial frame could not be removed ({rollback})"
                );
                return Err(self.poison(&mut state, reason));
            }
            return Err(e.into());
        }

        if force {
            state.mark_synced(now);
        } else {
            state.unsynced_bytes = unsynced;
        }
        state.active_meta()?.record_appended(lsn, frame.len() as u64);
        state.last_lsn = lsn;
        WAL_BYTES_WRITTEN
            .with_label_values(&[self.kind.as_str()])
            .inc_by(frame.len() as u64);
        Ok(lsn)
    }

    /// Seals the active segment and starts a new one.
    fn rotate(&self, state: &mut WalState) -> CoreResult<()> {
        if state.manifest.segments.len() >= self.config.max_segments {
            self.reclaim_locked(state)?;
        }
        if state.manifest.segments.len() >= self.config.max_segments {
            return Err(CoreError::NoMoreWalSlots {
                max_segments: self.config.max_segments,
            });
        }

        state.active.sync_all()?;
        state.mark_synced(Instant::now());
        state.active_meta()?.sealed = true;

        let meta = SegmentMeta::empty(state.manifest.next_segment_id);
        let path = self.dir.join(meta.file_name());
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        manifest::sync_dir(&self.dir);

        debug!(segment = %meta.file_name(), after = %state.last_lsn, "Rotated WAL segment");

        state.manifest.next_segment_id += 1;
        state.manifest.segments.push(meta);
        state.manifest.high_water_lsn = state.last_lsn;
        state.active = file;
        state.manifest.persist(&self.dir)
    }

    /// Marks every record below `lsn` as durable elsewhere and deletes the
    /// sealed segments that are now fully covered. Returns the number of
    /// segments deleted.
    ///
    /// The watermark only moves forward; an older `lsn` is a no-op.
    pub fn truncate_before(&self, lsn: Lsn) -> CoreResult<usize> {
        let mut state = self.state.lock();
        let log_end = state
            .last_lsn
            .checked_next()
            .ok_or_else(|| CoreError::internal("LSN space exhausted"))?;
        if lsn > log_end {
            return Err(CoreError::invalid_state(format!(
                "cannot truncate WAL before {} past its end {}",
                lsn, state.last_lsn
            )));
        }
        if lsn <= state.manifest.reclaim_before {
            return Ok(0);
        }

        state.manifest.reclaim_before = lsn;
        state.manifest.high_water_lsn = state.last_lsn;
        state.manifest.persist(&self.dir)?;
        self.reclaim_locked(&mut state)
    }

    /// Deletes sealed segments below the reclaim watermark, sparing the
    /// newest `keep_sealed_segments` sealed ones.
    fn reclaim_locked(&self, state: &mut WalState) -> CoreResult<usize> {
        let watermark = state.manifest.reclaim_before;
        // Covered segments form a prefix; the active segment is never reclaimed.
        let sealed = state.manifest.segments.len().saturating_sub(1);
        let covered = state.manifest.segments[..sealed]
            .iter()
            .take_while(|s| s.sealed && s.is_covered_by(watermark))
            .count();
        let reclaimable = covered.min(sealed.saturating_sub(self.config.keep_sealed_segments));

        let mut removed = 0;
        while removed < reclaimable {
            let oldest = &state.manifest.segments[0];
            let path = self.dir.join(oldest.file_name());
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(segment = %oldest.file_name(), watermark = %watermark, "Reclaimed WAL segment");
            state.manifest.segments.remove(0);
            removed += 1;
        }

        if removed > 0 {
            state.manifest.high_water_lsn = state.last_lsn;
            state.manifest.persist(&self.dir)?;
        }
        Ok(removed)
    }

    /// Replays records with `lsn >= from`, in LSN order.
    pub fn replay(&self, from: Lsn) -> CoreResult<WalReplay> {
        self.replay_range(from, None)
    }

    /// Replays records with `from <= lsn <= upto` (unbounded when `upto` is `None`).
    ///
    /// The set of segments and the length of the active one are fixed when
    /// this is called; records appended afterwards are not returned.
    pub fn replay_range(&self, from: Lsn, upto: Option<Lsn>) -> CoreResult<WalReplay> {
        let state = self.state.lock();
        let segments = state
            .manifest
            .segments
            .iter()
            .filter(|s| s.last_lsn.map_or(true, |last| last >= from))
            .filter(|s| match (upto, s.first_lsn) {
                (Some(upto), Some(first)) => first <= upto,
                _ => true,
            })
            .map(|s| {
                let fence = if s.sealed { u64::MAX } else { s.size_bytes };
                (s.file_name(), self.dir.join(s.file_name()), fence)
            })
            .collect();

        Ok(WalReplay {
            segments,
            current: None,
            from,
            upto,
            kind: self.kind,
            finished: false,
        })
    }

    /// fsyncs the active segment.
    pub fn sync(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.active.sync_data()?;
        state.mark_synced(Instant::now());
        Ok(())
    }

    /// Highest LSN assigned so far (`Lsn::ZERO` for an empty log).
    pub fn last_lsn(&self) -> Lsn {
        self.state.lock().last_lsn
    }

    pub fn reclaim_watermark(&self) -> Lsn {
        self.state.lock().manifest.reclaim_before
    }

    /// Snapshot of the live segment table, oldest first.
    pub fn segments(&self) -> Vec<SegmentMeta> {
        self.state.lock().manifest.segments.clone()
    }
}

struct OpenSegment {
    name: String,
    reader: Take<BufReader<File>>,
    offset: u64,
}

/// Lazy iterator over WAL records.
///
/// Yields `Ok(record)` in LSN order. On the first corrupt frame it yields a
/// single [`CoreError::CorruptedRecord`] and ends; every record before it was
/// CRC-valid. Not restartable: call [`Wal::replay`] again to start over.
pub struct WalReplay {
    segments: VecDeque<(String, PathBuf, u64)>,
    current: Option<OpenSegment>,
    from: Lsn,
    upto: Option<Lsn>,
    kind: SignalKind,
    finished: bool,
}

impl WalReplay {
    fn fail(&mut self, err: CoreError) -> Option<CoreResult<WalRecord>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl Iterator for WalReplay {
    type Item = CoreResult<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.current.is_none() {
                let (name, path, fence) = match self.segments.pop_front() {
                    Some(next) => next,
                    None => {
                        self.finished = true;
                        return None;
                    }
                };
                match File::open(&path) {
                    Ok(file) => {
                        self.current = Some(OpenSegment {
                            name,
                            reader: BufReader::new(file).take(fence),
                            offset: 0,
                        })
                    }
                    Err(e) => return self.fail(e.into()),
                }
            }

            let segment = self.current.as_mut()?;
            let read = match read_frame(&mut segment.reader) {
                Ok(read) => read,
                Err(e) => return self.fail(e.into()),
            };

            match read {
                FrameRead::End => self.current = None,
                FrameRead::Corrupt { reason } => {
                    let err = CoreError::corrupted(segment.name.clone(), segment.offset, reason);
                    WAL_CORRUPTIONS
                        .with_label_values(&[self.kind.as_str()])
                        .inc();
                    return self.fail(err);
                }
                FrameRead::Record { record, len } => {
                    segment.offset += len as u64;
                    if record.lsn < self.from {
                        continue;
                    }
                    if self.upto.is_some_and(|upto| record.lsn > upto) {
                        self.finished = true;
                        return None;
                    }
                    return Some(Ok(record));
                }
            }
        }
        None
    }
}
