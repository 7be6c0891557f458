//! Startup scan of WAL segments.
//!
//! Every segment is validated frame by frame. A bad frame in the last
//! segment is a torn write from a crash and the file is truncated back to
//! the last good frame. A bad frame in an earlier segment cannot be a torn
//! write; it is left in place and surfaces as a corruption during replay.

use brook_core::{CoreResult, Lsn};
use std::fs::{self, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::frame::{read_frame, FrameRead};
use super::manifest::{parse_segment_file_name, segment_file_name, SegmentMeta};

/// Result of validating one segment file.
#[derive(Debug, Clone)]
pub struct SegmentScan {
    pub meta: SegmentMeta,
    /// Length of the valid frame prefix.
    pub valid_len: u64,
    pub file_len: u64,
    /// Offset and reason of the first invalid frame, if any.
    pub corruption: Option<(u64, String)>,
}

/// Validates the frames in a segment file.
pub fn scan_segment(path: &Path, id: u64) -> CoreResult<SegmentScan> {
    let file = fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut meta = SegmentMeta::empty(id);
    let mut offset = 0u64;
    let mut corruption = None;

    loop {
        match read_frame(&mut reader)? {
            FrameRead::End => break,
            FrameRead::Corrupt { reason } => {
                corruption = Some((offset, reason));
                break;
            }
            FrameRead::Record { record, len } => {
                if meta.last_lsn.is_some_and(|last| record.lsn <= last) {
                    corruption = Some((offset, format!("non-increasing {}", record.lsn)));
                    break;
                }
                meta.record_appended(record.lsn, len as u64);
                offset += len as u64;
            }
        }
    }

    Ok(SegmentScan {
        meta,
        valid_len: offset,
        file_len,
        corruption,
    })
}

/// What recovery found and repaired.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Segment table rebuilt from disk, oldest first. All but the last are sealed.
    pub segments: Vec<SegmentMeta>,
    /// Highest valid LSN found in any segment.
    pub last_lsn: Lsn,
    /// Bytes cut from the tail segment.
    pub truncated_bytes: u64,
    /// Ids of non-tail segments holding corrupt frames.
    pub corrupt_segments: Vec<u64>,
}

/// Segment files in `dir`, sorted by id.
pub fn list_segments(dir: &Path) -> CoreResult<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_file_name) {
            segments.push((id, entry.path()));
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

/// Scans all segments in `dir`, truncating a torn tail.
pub fn recover_segments(dir: &Path) -> CoreResult<RecoveryReport> {
    let files = list_segments(dir)?;
    let mut report = RecoveryReport::default();
    let count = files.len();

    for (index, (id, path)) in files.into_iter().enumerate() {
        let is_tail = index + 1 == count;
        let mut scan = scan_segment(&path, id)?;

        if let Some((offset, reason)) = &scan.corruption {
            if is_tail {
                warn!(
                    segment = %segment_file_name(id),
                    offset,
                    reason = %reason,
                    dropped_bytes = scan.file_len - scan.valid_len,
                    "Truncating torn WAL tail"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
                report.truncated_bytes += scan.file_len - scan.valid_len;
            } else {
                warn!(
                    segment = %segment_file_name(id),
                    offset,
                    reason = %reason,
                    "Corrupt frame in sealed WAL segment; replay will stop here"
                );
                report.corrupt_segments.push(id);
            }
        }

        scan.meta.sealed = !is_tail;
        if let Some(last) = scan.meta.last_lsn {
            report.last_lsn = report.last_lsn.max(last);
        }
        report.segments.push(scan.meta);
    }

    if !report.segments.is_empty() {
        info!(
            segments = report.segments.len(),
            last_lsn = %report.last_lsn,
            truncated_bytes = report.truncated_bytes,
            "Scanned WAL segments"
        );
    }

    Ok(report)
}
