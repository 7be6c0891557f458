//! Background evaluation of a buffer pool.
//!
//! Each cycle runs, in order: seal aged pages, flush sealed pages, re-admit
//! pages held back by the cap, upload pending artifacts, advance WAL reclaim
//! watermarks, evict expired pages, delete checkpointed artifacts and collect
//! expired partitions. Cycles never overlap.

use brook_core::metrics::{
    PAGE_EVICTIONS, PAGE_FLUSHES, PAGE_SERIALIZED_BYTES, PENDING_UPLOADS, SEALED_PAGES,
};
use brook_core::{CoreError, CoreResult, Lsn, StreamId};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::PoolInner;
use crate::artifact;
use crate::page::{Page, PageState};
use crate::paths::PartitionKey;
use crate::record::IngestRecord;
use crate::retry::retry_with_backoff;

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sealed: usize,
    pub flushed: usize,
    pub flush_failures: usize,
    pub uploaded: usize,
    pub upload_failures: usize,
    pub truncated_segments: usize,
    pub evicted: usize,
    pub deleted: usize,
    pub partitions_removed: usize,
}

impl CycleReport {
    fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Worker {
    /// Signals the worker and waits for it. A cycle in progress is abandoned.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Buffer pool scheduler task ended abnormally");
        }
    }
}

pub(crate) fn spawn_worker<R: IngestRecord>(inner: Arc<PoolInner<R>>) -> Worker {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let interval = inner
        .config
        .buffer_pool
        .flush_interval()
        .max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = inner.wake.notified() => {}
                _ = shutdown_rx.changed() => break,
            }

            tokio::select! {
                result = inner.run_cycle() => {
                    if let Err(e) = result {
                        error!(kind = inner.kind(), error = %e, "Buffer pool cycle failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!(kind = inner.kind(), "Buffer pool scheduler stopped");
    });

    info!(
        kind = R::KIND.as_str(),
        interval_ms = interval.as_millis() as u64,
        "Buffer pool scheduler started"
    );
    Worker { handle, shutdown }
}

impl<R: IngestRecord> PoolInner<R> {
    pub(crate) async fn run_cycle(&self) -> CoreResult<CycleReport> {
        let _cycle = self.cycle.lock().await;

        let mut report = CycleReport {
            sealed: self.seal_aged()?,
            ..CycleReport::default()
        };
        (report.flushed, report.flush_failures) = self.flush_sealed().await;
        self.admit_held()?;
        (report.uploaded, report.upload_failures) = self.upload_pending().await;
        report.truncated_segments = self.truncate_wals().await;
        report.evicted = self.evict_expired()?;
        report.deleted = self.delete_checkpointed().await;
        report.partitions_removed = self.collect_partitions().await?;
        self.publish_gauges();

        if !report.is_noop() {
            debug!(kind = self.kind(), report = ?report, "Buffer pool cycle complete");
        }
        Ok(report)
    }

    /// Shutdown pass: flush everything that can be flushed and advance the watermarks.
    pub(crate) async fn final_flush(&self) -> CoreResult<CycleReport> {
        let _cycle = self.cycle.lock().await;
        let mut report = CycleReport::default();

        loop {
            let (flushed, failures) = self.flush_sealed().await;
            report.flushed += flushed;
            report.flush_failures += failures;
            if self.admit_held()? == 0 {
                break;
            }
        }
        report.truncated_segments = self.truncate_wals().await;
        self.publish_gauges();
        Ok(report)
    }

    fn seal_aged(&self) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        let mut sealed = 0;
        for handle in self.handles() {
            if handle.is_failed() {
                continue;
            }
            let mut slot = handle.slot.lock();
            let trigger = slot
                .page
                .as_ref()
                .and_then(|p| p.seal_trigger(&self.limits, now));
            if let Some(trigger) = trigger {
                if self.seal_locked(&handle, &mut slot, trigger)? {
                    sealed += 1;
                }
            }
        }
        Ok(sealed)
    }

    /// Flushes sealed pages stream by stream, oldest first. A stream whose
    /// flush fails after all disk retries is marked unavailable.
    pub(crate) async fn flush_sealed(&self) -> (usize, usize) {
        let (mut flushed, mut failures) = (0, 0);
        let streams = self.sealed.lock().streams_with_unflushed();

        for stream in streams {
            let Some(handle) = self.handle(&stream) else {
                continue;
            };
            if handle.is_failed() {
                continue;
            }

            let seqs = self.sealed.lock().unflushed(&stream);
            for seq in seqs {
                match self.flush_one(seq).await {
                    Ok(true) => flushed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        failures += 1;
                        PAGE_FLUSHES
                            .with_label_values(&[self.kind(), "error"])
                            .inc();
                        error!(
                            stream = %stream,
                            error = %e,
                            "Page flush failed; stream stops accepting records"
                        );
                        self.fail_stream(&handle, format!("page flush failed: {e}"));
                        break;
                    }
                }
            }
        }
        (flushed, failures)
    }

    async fn flush_one(&self, seq: u64) -> CoreResult<bool> {
        let (key, encoded) = {
            let sealed = self.sealed.lock();
            let Some(entry) = sealed.get(seq) else {
                return Ok(false);
            };
            if entry.page.state() != PageState::Sealed {
                return Ok(false);
            }
            let first_lsn = entry
                .page
                .first_lsn()
                .ok_or_else(|| CoreError::internal("sealed page has no records"))?;
            let key = PartitionKey::new(
                entry.page.stream().clone(),
                self.paths.bucket_of(entry.page.created_at_ms()),
                first_lsn,
            );
            (key, self.codec.encode(&entry.page)?)
        };

        let artifact_paths = self.paths.artifact_paths(&key);
        let (paths, metadata, body) = (&artifact_paths, &encoded.metadata, &encoded.body[..]);
        retry_with_backoff(&self.config.storage.disk_retry, "flush_page", move || {
            artifact::write_page(paths, metadata, body)
        })
        .await?;

        let now = self.clock.now_ms();
        self.sealed.lock().mark_flushed(seq, key.clone(), now)?;
        if self.uploader.is_some() {
            self.ledger.lock().insert_pending(key.clone(), now);
        }

        PAGE_FLUSHES.with_label_values(&[self.kind(), "ok"]).inc();
        PAGE_SERIALIZED_BYTES
            .with_label_values(&[self.kind()])
            .inc_by(encoded.body.len() as u64);
        debug!(
            partition = %key,
            records = encoded.metadata.record_count,
            bytes = encoded.body.len(),
            "Flushed page"
        );
        Ok(true)
    }

    /// Moves held pages into the sealed set while it has room.
    pub(crate) fn admit_held(&self) -> CoreResult<usize> {
        let mut admitted = 0;
        for handle in self.handles() {
            if handle.is_failed() {
                continue;
            }
            let mut slot = handle.slot.lock();
            if !slot.holds_sealed() {
                continue;
            }
            let Some(page) = slot.page.take() else {
                continue;
            };
            if let Some(page) = self.admit(page)? {
                slot.page = Some(page);
                break;
            }
            admitted += 1;
        }
        Ok(admitted)
    }

    async fn upload_pending(&self) -> (usize, usize) {
        let Some(uploader) = self.uploader.as_ref() else {
            return (0, 0);
        };
        let ready = self.ledger.lock().ready(self.clock.now_ms());
        if ready.is_empty() {
            return (0, 0);
        }

        let results: Vec<_> = stream::iter(ready)
            .map(|key| async move {
                let result = uploader.upload_artifact(&key).await;
                (key, result)
            })
            .buffer_unordered(self.config.upload.concurrency.max(1))
            .collect()
            .await;

        let (mut uploaded, mut failed) = (0, 0);
        for (key, result) in results {
            match result {
                Ok(record) => {
                    uploaded += 1;
                    self.ledger
                        .lock()
                        .mark_checkpointed(&key, record.uploaded_at_ms);
                    if let Err(e) = self.sealed.lock().mark_uploaded(&key) {
                        warn!(partition = %key, error = %e, "Could not mark page uploaded");
                    }
                }
                Err(e) => {
                    failed += 1;
                    let next = self.ledger.lock().mark_failed(
                        &key,
                        &self.config.upload.retry,
                        self.clock.now_ms(),
                    );
                    if let Some((delay, failures)) = next {
                        warn!(
                            partition = %key,
                            failures,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Upload failed, will retry"
                        );
                    }
                }
            }
        }
        (uploaded, failed)
    }

    /// Lowest LSN of `stream` that is not yet durable outside the WAL.
    fn reclaim_mark(&self, stream: &StreamId, slot_first: Option<Lsn>, last: Lsn) -> Lsn {
        let next = last.checked_next().unwrap_or(last);
        [
            slot_first,
            self.sealed.lock().min_unflushed_lsn(stream),
            self.ledger.lock().min_pending_lsn(stream),
        ]
        .into_iter()
        .flatten()
        .fold(next, std::cmp::min)
    }

    /// Advances each healthy stream's reclaim watermark. A failed stream keeps
    /// its whole WAL for replay on the next start.
    pub(crate) async fn truncate_wals(&self) -> usize {
        let mut reclaimed = 0;
        for handle in self.handles() {
            if handle.is_failed() {
                continue;
            }
            let mark = {
                let slot = handle.slot.lock();
                let slot_first = slot.page.as_ref().and_then(Page::first_lsn);
                self.reclaim_mark(&handle.id, slot_first, slot.last_lsn)
            };
            if mark <= handle.wal.reclaim_watermark() {
                continue;
            }

            // Segment removal and the manifest rewrite fsync; keep them off the runtime threads.
            let stream = handle.id.clone();
            let truncated =
                tokio::task::spawn_blocking(move || handle.wal.truncate_before(mark)).await;
            match truncated {
                Ok(Ok(segments)) => {
                    reclaimed += segments;
                    if segments > 0 {
                        debug!(stream = %stream, before = %mark, segments, "Reclaimed WAL segments");
                    }
                }
                Ok(Err(e)) => warn!(stream = %stream, before = %mark, error = %e, "WAL truncation failed"),
                Err(e) => warn!(stream = %stream, error = %e, "WAL truncation task did not finish"),
            }
        }
        reclaimed
    }

    fn evict_expired(&self) -> CoreResult<usize> {
        let expired = self.sealed.lock().take_expired(
            self.clock.now_ms(),
            self.config.buffer_pool.sealed_page_ttl_ms,
            self.uploader.is_some(),
        )?;
        for entry in &expired {
            PAGE_EVICTIONS.with_label_values(&[self.kind(), "ttl"]).inc();
            debug!(stream = %entry.page.stream(), first_lsn = ?entry.page.first_lsn(), "Evicted page");
        }
        Ok(expired.len())
    }

    /// Removes local artifacts that were checkpointed long enough ago.
    async fn delete_checkpointed(&self) -> usize {
        if self.uploader.is_none() {
            return 0;
        }
        let candidates = self.ledger.lock().deletable(
            self.clock.now_ms(),
            self.config.upload.upload_grace_ms,
            self.config.buffer_pool.sealed_page_ttl_ms,
        );

        let mut deleted = 0;
        for key in candidates {
            if self.sealed.lock().holds(&key) {
                continue;
            }
            match artifact::remove_page(&self.paths.artifact_paths(&key)).await {
                Ok(()) => {
                    self.ledger.lock().remove(&key);
                    deleted += 1;
                    debug!(partition = %key, "Deleted checkpointed artifact");
                }
                Err(e) => warn!(partition = %key, error = %e, "Could not delete checkpointed artifact"),
            }
        }
        deleted
    }

    /// Drops this kind's stream directories from expired partitions once
    /// nothing in them is tracked, then the partition itself if empty.
    async fn collect_partitions(&self) -> CoreResult<usize> {
        if self.uploader.is_none() {
            return Ok(0);
        }

        let mut removed = 0;
        for bucket in self.paths.expired_partitions(self.clock.now_ms()).await? {
            let dir = self.paths.partition_dir(bucket);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(stream) = name
                    .to_str()
                    .and_then(|n| StreamId::from_path_segment(n).ok())
                else {
                    continue;
                };
                if stream.kind != R::KIND || self.ledger.lock().tracks_partition(&stream, bucket) {
                    continue;
                }
                tokio::fs::remove_dir_all(entry.path()).await?;
                removed += 1;
                info!(bucket, stream = %stream, "Removed expired partition");
            }
            // Fails while other kinds still have streams here.
            if tokio::fs::remove_dir(&dir).await.is_ok() {
                debug!(bucket, "Removed empty partition directory");
            }
        }
        Ok(removed)
    }

    pub(crate) fn publish_gauges(&self) {
        SEALED_PAGES
            .with_label_values(&[self.kind()])
            .set(self.sealed.lock().len() as i64);
        PENDING_UPLOADS
            .with_label_values(&[self.kind()])
            .set(self.ledger.lock().pending_count() as i64);
    }
}
