//! Restart recovery: rediscover streams, reload flushed artifacts, replay WALs.
//!
//! Artifacts come first. Every artifact found on disk (checkpointed or not)
//! covers an LSN range, and WAL records inside a covered range are not
//! replayed; everything else above the reclaim watermark is rebuilt into pages.

use brook_core::metrics::WAL_RECOVERED_RECORDS;
use brook_core::{CoreError, CoreResult, Lsn, StreamId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, warn};

use super::{PoolInner, StreamHandle, STREAM_DESCRIPTOR};
use crate::artifact;
use crate::codec::PageMetadata;
use crate::page::{Page, PageState};
use crate::paths::{ArtifactPaths, PartitionKey};
use crate::record::IngestRecord;

const QUARANTINE_EXT: &str = "meta.corrupt";

/// What recovery found when the pool was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolRecovery {
    pub streams: usize,
    /// Flushed artifacts reloaded and queued for upload.
    pub artifacts: usize,
    /// Artifacts that already had a checkpoint.
    pub checkpointed: usize,
    /// Unreadable artifacts renamed out of the way.
    pub quarantined: usize,
    pub replayed: usize,
    /// WAL records skipped because an artifact already holds them.
    pub skipped: usize,
    /// Bytes of torn WAL tails cut off when the WALs were opened.
    pub wal_truncated_bytes: u64,
    /// Sealed WAL segments with a corrupt frame. Replay of that stream stops there.
    pub corrupt_wal_segments: usize,
    /// Streams whose replay ended before the end of their WAL.
    pub replay_stopped: usize,
}

type Coverage = HashMap<StreamId, Vec<(Lsn, Lsn)>>;

impl<R: IngestRecord> PoolInner<R> {
    pub(crate) async fn recover(&self) -> CoreResult<PoolRecovery> {
        let mut report = PoolRecovery::default();

        for id in self.discover_streams().await? {
            let handle = self.stream(&id)?;
            let wal = handle.wal.recovery_report();
            report.wal_truncated_bytes += wal.truncated_bytes;
            report.corrupt_wal_segments += wal.corrupt_segments.len();
            report.streams += 1;
        }

        let coverage = self.load_artifacts(&mut report).await?;

        for handle in self.handles() {
            let ranges = coverage.get(&handle.id).map(Vec::as_slice).unwrap_or(&[]);
            self.replay_stream(&handle, ranges, &mut report).await?;
        }
        self.publish_gauges();

        info!(
            kind = self.kind(),
            streams = report.streams,
            artifacts = report.artifacts,
            checkpointed = report.checkpointed,
            quarantined = report.quarantined,
            replayed = report.replayed,
            skipped = report.skipped,
            wal_truncated_bytes = report.wal_truncated_bytes,
            corrupt_wal_segments = report.corrupt_wal_segments,
            replay_stopped = report.replay_stopped,
            "Buffer pool recovered"
        );
        Ok(report)
    }

    /// Streams of this pool's kind that have a WAL directory.
    async fn discover_streams(&self) -> CoreResult<Vec<StreamId>> {
        let mut streams = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.paths.wal_root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(streams),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match read_descriptor(&entry.path()).await {
                Ok(id) if id.kind == R::KIND => streams.push(id),
                Ok(_) => {}
                Err(e) => {
                    warn!(dir = %entry.path().display(), error = %e, "Skipping unrecognized WAL directory")
                }
            }
        }
        streams.sort();
        Ok(streams)
    }

    async fn load_artifacts(&self, report: &mut PoolRecovery) -> CoreResult<Coverage> {
        let mut coverage = Coverage::new();
        let now = self.clock.now_ms();

        for bucket in self.paths.list_partitions().await? {
            for path in self.paths.list_metadata_files(bucket).await? {
                let Some(key) = partition_key(&path, bucket) else {
                    warn!(path = %path.display(), "Skipping artifact with unrecognized name");
                    continue;
                };
                if key.stream.kind != R::KIND {
                    continue;
                }

                if let Some(uploader) = &self.uploader {
                    if let Some(checkpoint) = uploader.load_checkpoint(&key).await? {
                        coverage
                            .entry(key.stream.clone())
                            .or_default()
                            .push((checkpoint.first_lsn, checkpoint.last_lsn));
                        self.ledger.lock().insert_checkpointed(
                            key,
                            checkpoint.uploaded_at_ms,
                            checkpoint.uploaded_at_ms,
                        );
                        report.checkpointed += 1;
                        continue;
                    }
                }

                let paths = self.paths.artifact_paths(&key);
                let (metadata, page) = match self.load_page(&key, &paths).await {
                    Ok(loaded) => loaded,
                    Err(CoreError::IoError(e)) => return Err(CoreError::IoError(e)),
                    Err(e) => {
                        quarantine(&paths.metadata, &e).await?;
                        report.quarantined += 1;
                        continue;
                    }
                };

                coverage
                    .entry(key.stream.clone())
                    .or_default()
                    .push((metadata.first_lsn, metadata.last_lsn));
                if self.uploader.is_some() {
                    self.ledger.lock().insert_pending(key.clone(), now);
                }
                // Keeping the page in memory is best-effort; the artifact is authoritative.
                let _ = self.sealed.lock().admit(page, Some(key), Some(now))?;
                report.artifacts += 1;
            }
        }
        Ok(coverage)
    }

    async fn load_page(
        &self,
        key: &PartitionKey,
        paths: &ArtifactPaths,
    ) -> CoreResult<(PageMetadata, Page<R>)> {
        let (metadata, body) = artifact::read_page(paths).await?;
        if metadata.stream != key.stream || metadata.first_lsn != key.first_lsn {
            return Err(CoreError::corrupted(
                paths.metadata.display().to_string(),
                0,
                "metadata does not match its location",
            ));
        }
        let mut page = self.codec.decode(&metadata, &body)?;
        if page.state() == PageState::Sealed {
            page.transition(PageState::Flushed)?;
        }
        Ok((metadata, page))
    }

    async fn replay_stream(
        &self,
        handle: &StreamHandle<R>,
        covered: &[(Lsn, Lsn)],
        report: &mut PoolRecovery,
    ) -> CoreResult<()> {
        let from = handle.wal.reclaim_watermark().max(Lsn::new(1));
        let (mut replayed, mut skipped) = (0usize, 0usize);

        for item in handle.wal.replay(from)? {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    error!(stream = %handle.id, error = %e, "WAL replay stopped at corrupt record");
                    report.replay_stopped += 1;
                    break;
                }
            };
            if covered
                .iter()
                .any(|(first, last)| record.lsn >= *first && record.lsn <= *last)
            {
                skipped += 1;
                continue;
            }
            let decoded = match R::decode(&record.payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    error!(stream = %handle.id, lsn = %record.lsn, error = %e, "WAL replay stopped at undecodable record");
                    report.replay_stopped += 1;
                    break;
                }
            };
            if let Err(e) = self.append_replayed(handle, record.lsn, decoded).await {
                if !handle.is_failed() {
                    return Err(e);
                }
                error!(stream = %handle.id, lsn = %record.lsn, error = %e, "WAL replay stopped, stream is out of service");
                report.replay_stopped += 1;
                break;
            }
            replayed += 1;
        }

        handle.slot.lock().last_lsn = handle.wal.last_lsn();
        WAL_RECOVERED_RECORDS
            .with_label_values(&[self.kind()])
            .inc_by(replayed as u64);
        report.replayed += replayed;
        report.skipped += skipped;
        Ok(())
    }

    /// Appends a replayed record, flushing once to make room if the sealed set is full.
    async fn append_replayed(&self, handle: &StreamHandle<R>, lsn: Lsn, record: R) -> CoreResult<()> {
        match self.try_append_replayed(handle, lsn, record.clone()) {
            Err(e) if e.is_backpressure() => {
                self.flush_sealed().await;
                self.admit_held()?;
                self.try_append_replayed(handle, lsn, record)
            }
            other => other,
        }
    }

    fn try_append_replayed(&self, handle: &StreamHandle<R>, lsn: Lsn, record: R) -> CoreResult<()> {
        let mut slot = handle.slot.lock();
        handle.check_available()?;
        self.make_room(handle, &mut slot)?;
        self.append_locked(handle, &mut slot, lsn, record)
    }
}

async fn read_descriptor(dir: &Path) -> CoreResult<StreamId> {
    match tokio::fs::read(dir.join(STREAM_DESCRIPTOR)).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CoreError::ValidationError("non-UTF-8 WAL directory".into()))?;
            StreamId::from_path_segment(name)
        }
        Err(e) => Err(e.into()),
    }
}

/// Rebuilds the key of an artifact from `{bucket}/{stream}/{first_lsn}.meta`.
fn partition_key(metadata_path: &Path, bucket: i64) -> Option<PartitionKey> {
    let first_lsn = metadata_path.file_stem()?.to_str()?.parse::<u64>().ok()?;
    let stream_dir = metadata_path.parent()?.file_name()?.to_str()?;
    let stream = StreamId::from_path_segment(stream_dir).ok()?;
    Some(PartitionKey::new(stream, bucket, Lsn::new(first_lsn)))
}

async fn quarantine(metadata_path: &Path, cause: &CoreError) -> CoreResult<()> {
    let target = metadata_path.with_extension(QUARANTINE_EXT);
    tokio::fs::rename(metadata_path, &target).await?;
    error!(
        path = %metadata_path.display(),
        quarantined_as = %target.display(),
        error = %cause,
        "Quarantined unreadable page artifact"
    );
    Ok(())
}
