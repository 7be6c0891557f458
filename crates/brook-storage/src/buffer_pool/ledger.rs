//! Flushed artifacts and their upload progress.
//!
//! Tracked separately from the sealed-page set: a page evicted from memory
//! under cap pressure is still uploaded from its disk artifact.

use brook_core::{Lsn, RetryConfig, StreamId};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::paths::PartitionKey;
use crate::retry::Backoff;

#[derive(Debug, Clone)]
pub(crate) enum UploadStatus {
    Pending(Backoff),
    Checkpointed { uploaded_at_ms: i64 },
}

#[derive(Debug, Clone)]
pub(crate) struct LedgerEntry {
    pub flushed_at_ms: i64,
    pub status: UploadStatus,
}

#[derive(Debug, Default)]
pub(crate) struct UploadLedger {
    entries: BTreeMap<PartitionKey, LedgerEntry>,
}

impl UploadLedger {
    pub fn insert_pending(&mut self, key: PartitionKey, flushed_at_ms: i64) {
        self.entries.insert(
            key,
            LedgerEntry {
                flushed_at_ms,
                status: UploadStatus::Pending(Backoff::default()),
            },
        );
    }

    pub fn insert_checkpointed(&mut self, key: PartitionKey, flushed_at_ms: i64, uploaded_at_ms: i64) {
        self.entries.insert(
            key,
            LedgerEntry {
                flushed_at_ms,
                status: UploadStatus::Checkpointed { uploaded_at_ms },
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.status, UploadStatus::Pending(_)))
            .count()
    }

    /// Pending artifacts whose backoff has elapsed, oldest LSN first per stream.
    pub fn ready(&self, now_ms: i64) -> Vec<PartitionKey> {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(&e.status, UploadStatus::Pending(b) if b.is_ready(now_ms)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn mark_checkpointed(&mut self, key: &PartitionKey, uploaded_at_ms: i64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.status = UploadStatus::Checkpointed { uploaded_at_ms };
        }
    }

    /// Schedules the next attempt. Returns the backoff delay and the failure count.
    pub fn mark_failed(
        &mut self,
        key: &PartitionKey,
        retry: &RetryConfig,
        now_ms: i64,
    ) -> Option<(Duration, u32)> {
        match self.entries.get_mut(key).map(|e| &mut e.status) {
            Some(UploadStatus::Pending(backoff)) => {
                let delay = backoff.record_failure(retry, now_ms);
                Some((delay, backoff.failures()))
            }
            _ => None,
        }
    }

    /// Smallest first LSN of a not yet checkpointed artifact of `stream`.
    pub fn min_pending_lsn(&self, stream: &StreamId) -> Option<Lsn> {
        self.entries
            .iter()
            .filter(|(k, e)| &k.stream == stream && matches!(e.status, UploadStatus::Pending(_)))
            .map(|(k, _)| k.first_lsn)
            .min()
    }

    /// Checkpointed artifacts past both the upload grace period and the flush TTL.
    pub fn deletable(&self, now_ms: i64, grace_ms: u64, ttl_ms: u64) -> Vec<PartitionKey> {
        self.entries
            .iter()
            .filter(|(_, e)| match e.status {
                UploadStatus::Checkpointed { uploaded_at_ms } => {
                    now_ms.saturating_sub(uploaded_at_ms) >= grace_ms as i64
                        && now_ms.saturating_sub(e.flushed_at_ms) >= ttl_ms as i64
                }
                UploadStatus::Pending(_) => false,
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn remove(&mut self, key: &PartitionKey) -> Option<LedgerEntry> {
        self.entries.remove(key)
    }

    /// Whether any artifact of `stream` in `bucket` is still tracked.
    pub fn tracks_partition(&self, stream: &StreamId, bucket: i64) -> bool {
        self.entries
            .keys()
            .any(|k| k.bucket == bucket && &k.stream == stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::SignalKind;

    fn key(stream: &str, bucket: i64, first: u64) -> PartitionKey {
        PartitionKey::new(
            StreamId::new("acme", SignalKind::Traces, stream).unwrap(),
            bucket,
            Lsn::new(first),
        )
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_pending_lifecycle() {
        let mut ledger = UploadLedger::default();
        ledger.insert_pending(key("a", 0, 10), 0);
        ledger.insert_pending(key("a", 0, 20), 0);
        ledger.insert_pending(key("b", 1, 5), 0);

        assert_eq!(ledger.ready(0).len(), 3);
        assert_eq!(ledger.min_pending_lsn(&key("a", 0, 0).stream), Some(Lsn::new(10)));

        ledger.mark_checkpointed(&key("a", 0, 10), 50);
        assert_eq!(ledger.pending_count(), 2);
        assert_eq!(ledger.min_pending_lsn(&key("a", 0, 0).stream), Some(Lsn::new(20)));
        let b = key("b", 1, 5).stream;
        assert!(ledger.tracks_partition(&b, 1));
        assert!(!ledger.tracks_partition(&b, 2));
        assert!(!ledger.tracks_partition(&key("a", 0, 0).stream, 1));
    }

    #[test]
    fn test_failed_upload_backs_off() {
        let mut ledger = UploadLedger::default();
        let k = key("a", 0, 1);
        ledger.insert_pending(k.clone(), 0);

        let (delay, failures) = ledger.mark_failed(&k, &retry(), 1_000).unwrap();
        assert!(delay >= Duration::from_millis(100));
        assert_eq!(failures, 1);
        assert!(ledger.ready(1_050).is_empty());
        assert_eq!(ledger.ready(1_200), vec![k.clone()]);
        assert_eq!(ledger.pending_count(), 1);
    }

    #[test]
    fn test_deletable_needs_grace_and_ttl() {
        let mut ledger = UploadLedger::default();
        let k = key("a", 0, 1);
        ledger.insert_checkpointed(k.clone(), 0, 100);

        assert!(ledger.deletable(150, 100, 10).is_empty());
        assert_eq!(ledger.deletable(200, 100, 10), vec![k.clone()]);
        assert!(ledger.deletable(200, 100, 500).is_empty());

        ledger.remove(&k);
        assert_eq!(ledger.len(), 0);
    }
}
