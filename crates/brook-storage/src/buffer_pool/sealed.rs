//! The bounded set of sealed pages shared by every stream of a pool.
//!
//! Entries are kept in seal order. Admission at the cap evicts the oldest
//! entry that is already on disk; if every entry still waits for its flush the
//! new page is handed back to the caller.

use brook_core::{CoreResult, Lsn, StreamId};
use std::collections::VecDeque;

use crate::page::{Page, PageSnapshot, PageState};
use crate::paths::PartitionKey;
use crate::record::IngestRecord;

#[derive(Debug)]
pub(crate) struct SealedEntry<R: IngestRecord> {
    pub seq: u64,
    pub page: Page<R>,
    /// Set once the page has been flushed.
    pub key: Option<PartitionKey>,
    pub flushed_at_ms: Option<i64>,
}

impl<R: IngestRecord> SealedEntry<R> {
    fn is_on_disk(&self) -> bool {
        matches!(self.page.state(), PageState::Flushed | PageState::Uploaded)
    }
}

#[derive(Debug)]
pub(crate) enum Admission<R: IngestRecord> {
    Admitted { evicted: Option<SealedEntry<R>> },
    /// The set is full of unflushed pages; the page is returned unchanged.
    Full(Page<R>),
}

#[derive(Debug)]
pub(crate) struct SealedPageSet<R: IngestRecord> {
    cap: usize,
    next_seq: u64,
    entries: VecDeque<SealedEntry<R>>,
}

impl<R: IngestRecord> SealedPageSet<R> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            next_seq: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count_in(&self, state: PageState) -> usize {
        self.entries.iter().filter(|e| e.page.state() == state).count()
    }

    /// Inserts a sealed (or recovered, flushed) page.
    pub fn admit(
        &mut self,
        page: Page<R>,
        key: Option<PartitionKey>,
        flushed_at_ms: Option<i64>,
    ) -> CoreResult<Admission<R>> {
        let mut evicted = None;
        if self.entries.len() >= self.cap {
            let Some(idx) = self.entries.iter().position(SealedEntry::is_on_disk) else {
                return Ok(Admission::Full(page));
            };
            if let Some(mut entry) = self.entries.remove(idx) {
                entry.page.transition(PageState::Evicted)?;
                evicted = Some(entry);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(SealedEntry {
            seq,
            page,
            key,
            flushed_at_ms,
        });
        Ok(Admission::Admitted { evicted })
    }

    /// Sealed, unflushed pages of `stream`, oldest first.
    pub fn unflushed(&self, stream: &StreamId) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|e| e.page.state() == PageState::Sealed && e.page.stream() == stream)
            .map(|e| e.seq)
            .collect()
    }

    /// Streams that have at least one unflushed page.
    pub fn streams_with_unflushed(&self) -> Vec<StreamId> {
        let mut streams: Vec<StreamId> = self
            .entries
            .iter()
            .filter(|e| e.page.state() == PageState::Sealed)
            .map(|e| e.page.stream().clone())
            .collect();
        streams.sort();
        streams.dedup();
        streams
    }

    pub fn get(&self, seq: u64) -> Option<&SealedEntry<R>> {
        self.entries.iter().find(|e| e.seq == seq)
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut SealedEntry<R>> {
        self.entries.iter_mut().find(|e| e.seq == seq)
    }

    pub fn mark_flushed(&mut self, seq: u64, key: PartitionKey, now_ms: i64) -> CoreResult<()> {
        if let Some(entry) = self.get_mut(seq) {
            entry.page.transition(PageState::Flushed)?;
            entry.key = Some(key);
            entry.flushed_at_ms = Some(now_ms);
        }
        Ok(())
    }

    /// Marks the in-memory copy of `key` uploaded, if it is still held.
    pub fn mark_uploaded(&mut self, key: &PartitionKey) -> CoreResult<()> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.key.as_ref() == Some(key) && e.page.state() == PageState::Flushed)
        {
            entry.page.transition(PageState::Uploaded)?;
        }
        Ok(())
    }

    pub fn holds(&self, key: &PartitionKey) -> bool {
        self.entries.iter().any(|e| e.key.as_ref() == Some(key))
    }

    /// Removes pages whose TTL since flush has elapsed. With `require_upload`
    /// only uploaded pages qualify.
    pub fn take_expired(
        &mut self,
        now_ms: i64,
        ttl_ms: u64,
        require_upload: bool,
    ) -> CoreResult<Vec<SealedEntry<R>>> {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for mut entry in self.entries.drain(..) {
            let aged = entry
                .flushed_at_ms
                .is_some_and(|at| now_ms.saturating_sub(at) >= ttl_ms as i64);
            let releasable = match entry.page.state() {
                PageState::Uploaded => true,
                PageState::Flushed => !require_upload,
                _ => false,
            };
            if releasable && aged {
                entry.page.transition(PageState::Evicted)?;
                expired.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        Ok(expired)
    }

    /// Drops every unflushed page of `stream`. Returns how many were dropped.
    pub fn discard_unflushed(&mut self, stream: &StreamId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.page.state() != PageState::Sealed || e.page.stream() != stream);
        before - self.entries.len()
    }

    /// Smallest first LSN of an unflushed page of `stream`.
    pub fn min_unflushed_lsn(&self, stream: &StreamId) -> Option<Lsn> {
        self.entries
            .iter()
            .filter(|e| e.page.state() == PageState::Sealed && e.page.stream() == stream)
            .filter_map(|e| e.page.first_lsn())
            .min()
    }

    /// Read-only copies of `stream`'s pages overlapping `[start_ms, end_ms]`, in LSN order.
    pub fn snapshots(&self, stream: &StreamId, start_ms: i64, end_ms: i64) -> Vec<PageSnapshot<R>> {
        let mut pages: Vec<&Page<R>> = self
            .entries
            .iter()
            .map(|e| &e.page)
            .filter(|p| p.stream() == stream && p.overlaps(start_ms, end_ms))
            .collect();
        pages.sort_by_key(|p| p.first_lsn());
        pages.into_iter().map(Page::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageLimits;
    use crate::record::{LogRecord, Severity};
    use brook_core::SignalKind;

    fn stream() -> StreamId {
        StreamId::new("acme", SignalKind::Logs, "api").unwrap()
    }

    fn sealed_page(first: u64) -> Page<LogRecord> {
        sealed_page_of(stream(), first)
    }

    fn sealed_page_of(id: StreamId, first: u64) -> Page<LogRecord> {
        let limits = PageLimits {
            max_page_bytes: 1_000,
            max_page_window_ms: 1_000,
            expected_insertions: 10,
            bloom_fpp: 0.01,
        };
        let mut page = Page::new(id, 0, &limits);
        page.append(Lsn::new(first), LogRecord::new(first as i64, Severity::Info, "x"))
            .unwrap();
        page.seal(0).unwrap();
        page
    }

    fn key(first: u64) -> PartitionKey {
        PartitionKey::new(stream(), 0, Lsn::new(first))
    }

    #[test]
    fn test_full_of_unflushed_pages_rejects() {
        let mut set = SealedPageSet::new(2);
        assert!(matches!(
            set.admit(sealed_page(1), None, None).unwrap(),
            Admission::Admitted { evicted: None }
        ));
        set.admit(sealed_page(2), None, None).unwrap();

        match set.admit(sealed_page(3), None, None).unwrap() {
            Admission::Full(page) => assert_eq!(page.first_lsn(), Some(Lsn::new(3))),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(set.len(), 2);
        assert_eq!(set.unflushed(&stream()).len(), 2);
    }

    #[test]
    fn test_cap_evicts_oldest_flushed() {
        let mut set = SealedPageSet::new(2);
        set.admit(sealed_page(1), None, None).unwrap();
        set.admit(sealed_page(2), None, None).unwrap();
        let seqs = set.unflushed(&stream());
        for (seq, first) in seqs.into_iter().zip([1, 2]) {
            set.mark_flushed(seq, key(first), 10).unwrap();
        }

        match set.admit(sealed_page(3), None, None).unwrap() {
            Admission::Admitted { evicted: Some(entry) } => {
                assert_eq!(entry.key, Some(key(1)));
                assert_eq!(entry.page.state(), PageState::Evicted);
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        assert!(!set.holds(&key(1)));
        assert!(set.holds(&key(2)));
        assert_eq!(set.min_unflushed_lsn(&stream()), Some(Lsn::new(3)));
    }

    #[test]
    fn test_ttl_eviction_requires_upload() {
        let mut set = SealedPageSet::new(4);
        set.admit(sealed_page(1), None, None).unwrap();
        set.admit(sealed_page(2), None, None).unwrap();
        let seqs = set.unflushed(&stream());
        set.mark_flushed(seqs[0], key(1), 100).unwrap();
        set.mark_flushed(seqs[1], key(2), 100).unwrap();
        set.mark_uploaded(&key(1)).unwrap();

        assert!(set.take_expired(150, 100, true).unwrap().is_empty());
        let expired = set.take_expired(200, 100, true).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, Some(key(1)));
        assert_eq!(set.count_in(PageState::Flushed), 1);

        // Without an upload pipeline a flushed page is enough.
        let expired = set.take_expired(200, 100, false).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, Some(key(2)));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_snapshots_filter_by_time() {
        let mut set = SealedPageSet::new(4);
        set.admit(sealed_page(5), None, None).unwrap();
        set.admit(sealed_page(50), None, None).unwrap();

        let snaps = set.snapshots(&stream(), 0, 10);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].first_lsn, Some(Lsn::new(5)));
        assert_eq!(set.snapshots(&stream(), 0, 100).len(), 2);
    }

    #[test]
    fn test_discard_unflushed_frees_cap_for_other_streams() {
        let other = StreamId::new("acme", SignalKind::Logs, "web").unwrap();
        let mut set = SealedPageSet::new(3);
        set.admit(sealed_page(1), None, None).unwrap();
        set.admit(sealed_page(2), None, None).unwrap();
        set.admit(sealed_page_of(other.clone(), 1), None, None).unwrap();
        let first = set.unflushed(&stream())[0];
        set.mark_flushed(first, key(1), 10).unwrap();

        assert_eq!(set.discard_unflushed(&stream()), 1);
        assert!(set.holds(&key(1)));
        assert_eq!(set.min_unflushed_lsn(&stream()), None);
        assert_eq!(set.streams_with_unflushed(), vec![other.clone()]);

        assert!(matches!(
            set.admit(sealed_page_of(other, 2), None, None).unwrap(),
            Admission::Admitted { evicted: None }
        ));
        assert_eq!(set.len(), 3);
    }
}
