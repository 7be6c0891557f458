//! Segment table persisted next to the WAL segments.
//!
//! The segment files are the source of truth for record contents; the
//! manifest carries what cannot be recovered from them: the reclaim
//! watermark and the highest LSN ever handed out.

use brook_core::{CoreError, CoreResult, Lsn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MANIFEST_FILE: &str = "segments.json";

/// Metadata about one segment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: u64,
    pub first_lsn: Option<Lsn>,
    pub last_lsn: Option<Lsn>,
    pub record_count: u64,
    pub size_bytes: u64,
    pub sealed: bool,
}

impl SegmentMeta {
    pub fn empty(id: u64) -> Self {
        Self {
            id,
            first_lsn: None,
            last_lsn: None,
            record_count: 0,
            size_bytes: 0,
            sealed: false,
        }
    }

    pub fn file_name(&self) -> String {
        segment_file_name(self.id)
    }

    /// Whether every record in this segment is below `watermark`.
    pub fn is_covered_by(&self, watermark: Lsn) -> bool {
        match self.last_lsn {
            Some(last) => last < watermark,
            None => true,
        }
    }

    pub(crate) fn record_appended(&mut self, lsn: Lsn, frame_len: u64) {
        if self.first_lsn.is_none() {
            self.first_lsn = Some(lsn);
        }
        self.last_lsn = Some(lsn);
        self.record_count += 1;
        self.size_bytes += frame_len;
    }
}

pub fn segment_file_name(id: u64) -> String {
    format!("wal_{:010}.segment", id)
}

/// Parses a segment id out of a `wal_{id}.segment` file name.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("wal_")?
        .strip_suffix(".segment")?
        .parse()
        .ok()
}

/// Manifest tracking all WAL segments for a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalManifest {
    pub version: u32,
    pub next_segment_id: u64,
    /// Records below this LSN are durable elsewhere and their segments may be deleted.
    pub reclaim_before: Lsn,
    /// Highest LSN assigned so far; LSNs stay monotonic even if every segment is reclaimed.
    pub high_water_lsn: Lsn,
    pub segments: Vec<SegmentMeta>,
}

impl Default for WalManifest {
    fn default() -> Self {
        Self {
            version: 1,
            next_segment_id: 1,
            reclaim_before: Lsn::ZERO,
            high_water_lsn: Lsn::ZERO,
            segments: Vec::new(),
        }
    }
}

impl WalManifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Loads the manifest, or a fresh one when the directory has none.
    pub fn load(dir: &Path) -> CoreResult<Self> {
        let path = Self::path(dir);
        match fs::read(&path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the manifest atomically (tmp file, fsync, rename).
    pub fn persist(&self, dir: &Path) -> CoreResult<()> {
        let path = Self::path(dir);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let data = serde_json::to_vec_pretty(self).map_err(CoreError::serialization)?;

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        sync_dir(dir);
        Ok(())
    }
}

/// Directory fsync so renames survive power loss. Failures are logged and
/// reported as `false`; the rename itself already happened.
pub(crate) fn sync_dir(dir: &Path) -> bool {
    #[cfg(unix)]
    {
        let synced = fs::File::open(dir).and_then(|handle| handle.sync_all());
        if let Err(e) = synced {
            warn!(dir = %dir.display(), error = %e, "Directory fsync failed");
            return false;
        }
        true
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_segment_file_names() {
        assert_eq!(segment_file_name(7), "wal_0000000007.segment");
        assert_eq!(parse_segment_file_name("wal_0000000007.segment"), Some(7));
        assert_eq!(parse_segment_file_name("segments.json"), None);
        assert_eq!(parse_segment_file_name("wal_x.segment"), None);
    }

    #[test]
    fn test_coverage() {
        let mut meta = SegmentMeta::empty(1);
        assert!(meta.is_covered_by(Lsn::ZERO));

        meta.record_appended(Lsn::new(5), 30);
        meta.record_appended(Lsn::new(6), 30);
        assert_eq!(meta.first_lsn, Some(Lsn::new(5)));
        assert_eq!(meta.size_bytes, 60);
        assert!(!meta.is_covered_by(Lsn::new(6)));
        assert!(meta.is_covered_by(Lsn::new(7)));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        assert_eq!(WalManifest::load(dir.path()).unwrap().next_segment_id, 1);

        let manifest = WalManifest {
            next_segment_id: 4,
            reclaim_before: Lsn::new(10),
            high_water_lsn: Lsn::new(42),
            segments: vec![SegmentMeta::empty(3)],
            ..Default::default()
        };
        manifest.persist(dir.path()).unwrap();

        let loaded = WalManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.next_segment_id, 4);
        assert_eq!(loaded.reclaim_before, Lsn::new(10));
        assert_eq!(loaded.high_water_lsn, Lsn::new(42));
        assert_eq!(loaded.segments, vec![SegmentMeta::empty(3)]);
        assert!(!dir.path().join("segments.json.tmp").exists());
    }

    #[test]
    fn test_sync_dir_reports_failure() {
        let dir = TempDir::new().unwrap();
        assert!(sync_dir(dir.path()));
        assert!(!sync_dir(&dir.path().join("gone")));
    }
}
