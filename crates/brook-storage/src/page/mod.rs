//! In-memory page: the unit of buffering, sealing and flushing.
//!
//! A page accumulates the records of one stream in LSN order while ACTIVE.
//! Sealing freezes it; from then on it only moves forward through the
//! lifecycle:
//!
//! ```text
//! ACTIVE -> SEALED -> FLUSHED -> UPLOADED -> EVICTED
//! ```

mod bloom;

pub use bloom::BloomFilter;

use brook_core::{CoreError, CoreResult, Lsn, StreamId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::IngestRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageState {
    Active,
    Sealed,
    Flushed,
    Uploaded,
    Evicted,
}

impl PageState {
    /// Whether `next` is the state directly after this one.
    pub fn can_transition_to(self, next: PageState) -> bool {
        matches!(
            (self, next),
            (PageState::Active, PageState::Sealed)
                | (PageState::Sealed, PageState::Flushed)
                | (PageState::Flushed, PageState::Uploaded)
                | (PageState::Uploaded, PageState::Evicted)
                // A flushed page may leave memory before its upload completes;
                // its disk artifact stays pending upload.
                | (PageState::Flushed, PageState::Evicted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageState::Active => "active",
            PageState::Sealed => "sealed",
            PageState::Flushed => "flushed",
            PageState::Uploaded => "uploaded",
            PageState::Evicted => "evicted",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a page was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTrigger {
    Size,
    Window,
    Manual,
}

impl SealTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SealTrigger::Size => "size",
            SealTrigger::Window => "window",
            SealTrigger::Manual => "manual",
        }
    }
}

/// Size and age limits for sealing.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub max_page_bytes: usize,
    pub max_page_window_ms: u64,
    pub expected_insertions: usize,
    pub bloom_fpp: f64,
}

impl From<&brook_core::BufferPoolConfig> for PageLimits {
    fn from(config: &brook_core::BufferPoolConfig) -> Self {
        Self {
            max_page_bytes: config.max_page_bytes,
            max_page_window_ms: config.max_page_window_ms,
            expected_insertions: config.expected_insertions,
            bloom_fpp: config.bloom_fpp,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageEntry<R> {
    pub lsn: Lsn,
    pub record: R,
}

/// Records of one stream, in LSN order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R: IngestRecord> {
    stream: StreamId,
    state: PageState,
    created_at_ms: i64,
    sealed_at_ms: Option<i64>,
    size_bytes: usize,
    entries: Vec<PageEntry<R>>,
    min_ts_ms: i64,
    max_ts_ms: i64,
    bloom: BloomFilter,
}

impl<R: IngestRecord> Page<R> {
    pub fn new(stream: StreamId, created_at_ms: i64, limits: &PageLimits) -> Self {
        Self {
            stream,
            state: PageState::Active,
            created_at_ms,
            sealed_at_ms: None,
            size_bytes: 0,
            entries: Vec::new(),
            min_ts_ms: i64::MAX,
            max_ts_ms: i64::MIN,
            bloom: BloomFilter::with_rate(limits.expected_insertions, limits.bloom_fpp),
        }
    }

    /// Rebuilds a page from persisted parts. Used by the codec.
    pub(crate) fn from_parts(
        stream: StreamId,
        state: PageState,
        created_at_ms: i64,
        sealed_at_ms: Option<i64>,
        entries: Vec<PageEntry<R>>,
        bloom: BloomFilter,
    ) -> CoreResult<Self> {
        let mut page = Self {
            stream,
            state: PageState::Active,
            created_at_ms,
            sealed_at_ms: None,
            size_bytes: 0,
            entries: Vec::with_capacity(entries.len()),
            min_ts_ms: i64::MAX,
            max_ts_ms: i64::MIN,
            bloom,
        };
        for entry in entries {
            page.push(entry.lsn, entry.record, false)?;
        }
        page.state = state;
        page.sealed_at_ms = sealed_at_ms;
        Ok(page)
    }

    /// Appends a record. Rejects writes to a non-ACTIVE page with
    /// [`CoreError::CannotBuffer`] and out-of-order LSNs with
    /// [`CoreError::InvalidState`].
    pub fn append(&mut self, lsn: Lsn, record: R) -> CoreResult<()> {
        if self.state != PageState::Active {
            return Err(CoreError::cannot_buffer(
                &self.stream,
                format!("page is {}", self.state),
            ));
        }
        self.push(lsn, record, true)
    }

    fn push(&mut self, lsn: Lsn, record: R, index: bool) -> CoreResult<()> {
        if let Some(last) = self.last_lsn() {
            if lsn <= last {
                return Err(CoreError::invalid_state(format!(
                    "{} is not after {} in stream {}",
                    lsn, last, self.stream
                )));
            }
        }
        if index {
            if let Some(key) = record.index_key() {
                self.bloom.insert(key.as_bytes());
            }
        }
        let ts = record.timestamp_ms();
        self.min_ts_ms = self.min_ts_ms.min(ts);
        self.max_ts_ms = self.max_ts_ms.max(ts);
        self.size_bytes += record.encoded_len();
        self.entries.push(PageEntry { lsn, record });
        Ok(())
    }

    /// Which limit, if any, says this page should be sealed now.
    /// Empty pages never seal.
    pub fn seal_trigger(&self, limits: &PageLimits, now_ms: i64) -> Option<SealTrigger> {
        if self.state != PageState::Active || self.is_empty() {
            return None;
        }
        if self.size_bytes >= limits.max_page_bytes {
            return Some(SealTrigger::Size);
        }
        if now_ms.saturating_sub(self.created_at_ms) >= limits.max_page_window_ms as i64 {
            return Some(SealTrigger::Window);
        }
        None
    }

    pub fn is_full(&self, limits: &PageLimits) -> bool {
        self.size_bytes >= limits.max_page_bytes
    }

    /// Freezes the page. Only valid while ACTIVE.
    pub fn seal(&mut self, now_ms: i64) -> CoreResult<()> {
        self.transition(PageState::Sealed)?;
        self.sealed_at_ms = Some(now_ms);
        Ok(())
    }

    /// Moves to the next lifecycle state, rejecting skips and reversals.
    pub fn transition(&mut self, next: PageState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::invalid_state(format!(
                "page of stream {} cannot move from {} to {}",
                self.stream, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn sealed_at_ms(&self) -> Option<i64> {
        self.sealed_at_ms
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PageEntry<R>] {
        &self.entries
    }

    pub fn first_lsn(&self) -> Option<Lsn> {
        self.entries.first().map(|e| e.lsn)
    }

    pub fn last_lsn(&self) -> Option<Lsn> {
        self.entries.last().map(|e| e.lsn)
    }

    /// Inclusive event-time range, `None` for an empty page.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        (!self.is_empty()).then_some((self.min_ts_ms, self.max_ts_ms))
    }

    /// Whether the page's event-time range intersects `[start_ms, end_ms]`.
    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.time_range()
            .is_some_and(|(min, max)| min <= end_ms && max >= start_ms)
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    /// Bloom check on the page index (trace id, metric name).
    pub fn might_contain(&self, key: &str) -> bool {
        self.bloom.might_contain(key.as_bytes())
    }

    pub fn snapshot(&self) -> PageSnapshot<R> {
        PageSnapshot {
            stream: self.stream.clone(),
            state: self.state,
            first_lsn: self.first_lsn(),
            last_lsn: self.last_lsn(),
            time_range: self.time_range(),
            entries: self.entries.clone(),
        }
    }
}

/// Read-only copy of a page handed to query layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot<R> {
    pub stream: StreamId,
    pub state: PageState,
    pub first_lsn: Option<Lsn>,
    pub last_lsn: Option<Lsn>,
    pub time_range: Option<(i64, i64)>,
    pub entries: Vec<PageEntry<R>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LogRecord, Severity};
    use brook_core::SignalKind;

    fn limits(max_page_bytes: usize) -> PageLimits {
        PageLimits {
            max_page_bytes,
            max_page_window_ms: 1_000,
            expected_insertions: 100,
            bloom_fpp: 0.01,
        }
    }

    fn page() -> Page<LogRecord> {
        let stream = StreamId::new("acme", SignalKind::Logs, "api").unwrap();
        Page::new(stream, 0, &limits(100))
    }

    #[test]
    fn test_append_tracks_size_and_ranges() {
        let mut page = page();
        let a = LogRecord::new(50, Severity::Info, "a").with_trace_id("t1");
        let b = LogRecord::new(20, Severity::Info, "b");
        let size = a.encoded_len() + b.encoded_len();

        page.append(Lsn::new(1), a).unwrap();
        page.append(Lsn::new(2), b).unwrap();

        assert_eq!(page.size_bytes(), size);
        assert_eq!(page.time_range(), Some((20, 50)));
        assert_eq!(page.first_lsn(), Some(Lsn::new(1)));
        assert_eq!(page.last_lsn(), Some(Lsn::new(2)));
        assert!(page.might_contain("t1"));
        assert!(page.overlaps(0, 20));
        assert!(!page.overlaps(51, 100));
    }

    #[test]
    fn test_rejects_out_of_order_lsn() {
        let mut page = page();
        page.append(Lsn::new(5), LogRecord::new(1, Severity::Info, "a"))
            .unwrap();
        let err = page
            .append(Lsn::new(5), LogRecord::new(1, Severity::Info, "b"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn test_sealed_page_rejects_writes() {
        let mut page = page();
        page.append(Lsn::new(1), LogRecord::new(1, Severity::Info, "a"))
            .unwrap();
        page.seal(10).unwrap();

        let err = page
            .append(Lsn::new(2), LogRecord::new(1, Severity::Info, "b"))
            .unwrap_err();
        assert!(err.is_backpressure());
        assert_eq!(page.sealed_at_ms(), Some(10));
    }

    #[test]
    fn test_seal_triggers() {
        let mut page = page();
        assert_eq!(page.seal_trigger(&limits(100), 10_000), None, "empty page never seals");

        page.append(Lsn::new(1), LogRecord::new(1, Severity::Info, "a"))
            .unwrap();
        assert_eq!(page.seal_trigger(&limits(100), 999), None);
        assert_eq!(page.seal_trigger(&limits(100), 1_000), Some(SealTrigger::Window));
        assert_eq!(page.seal_trigger(&limits(1), 0), Some(SealTrigger::Size));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut page = page();
        assert!(page.transition(PageState::Flushed).is_err());
        page.append(Lsn::new(1), LogRecord::new(1, Severity::Info, "a"))
            .unwrap();
        page.seal(1).unwrap();
        page.transition(PageState::Flushed).unwrap();
        page.transition(PageState::Uploaded).unwrap();
        assert!(page.transition(PageState::Sealed).is_err());
        page.transition(PageState::Evicted).unwrap();
    }
}
