//! Page codec: converts a page into (snapshot, metadata, body) and back.
//!
//! Metadata is JSON and small enough to scan without touching bodies. The
//! body is binary:
//!
//! ```text
//! magic "BRKP" | version:u8 | count:u32 | { lsn:u64 | len:u32 | record[len] } * count
//! ```
//!
//! optionally gzip-compressed. `body_crc32` in the metadata covers the body
//! bytes as stored.

use brook_core::{CoreError, CoreResult, Lsn, StreamId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::page::{BloomFilter, Page, PageEntry, PageSnapshot, PageState};
use crate::record::IngestRecord;

pub const BODY_MAGIC: [u8; 4] = *b"BRKP";
pub const BODY_VERSION: u8 = 1;
pub const METADATA_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyCompression {
    #[default]
    None,
    Gzip,
}

/// Everything about a persisted page except its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub format_version: u32,
    pub stream: StreamId,
    pub state: PageState,
    pub created_at_ms: i64,
    pub sealed_at_ms: Option<i64>,
    pub first_lsn: Lsn,
    pub last_lsn: Lsn,
    pub min_ts_ms: i64,
    pub max_ts_ms: i64,
    pub record_count: u64,
    /// Sum of encoded record sizes, before framing and compression.
    pub raw_size_bytes: u64,
    pub body_len: u64,
    pub body_crc32: u32,
    pub compression: BodyCompression,
    pub bloom: BloomFilter,
}

impl PageMetadata {
    pub fn to_json(&self) -> CoreResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self).map_err(CoreError::serialization)?))
    }

    pub fn from_json(bytes: &[u8]) -> CoreResult<Self> {
        let metadata: PageMetadata = serde_json::from_slice(bytes)?;
        if metadata.format_version != METADATA_FORMAT_VERSION {
            return Err(CoreError::DeserializationError(format!(
                "unsupported page metadata version {}",
                metadata.format_version
            )));
        }
        Ok(metadata)
    }

    pub fn might_contain(&self, key: &str) -> bool {
        self.bloom.might_contain(key.as_bytes())
    }

    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.min_ts_ms <= end_ms && self.max_ts_ms >= start_ms
    }
}

/// Output of [`Codec::encode`].
#[derive(Debug, Clone)]
pub struct EncodedPage<R> {
    pub snapshot: PageSnapshot<R>,
    pub metadata: PageMetadata,
    pub body: Bytes,
}

pub trait Codec<R: IngestRecord>: Send + Sync {
    /// Encodes a non-empty page.
    fn encode(&self, page: &Page<R>) -> CoreResult<EncodedPage<R>>;

    /// Rebuilds the page described by `metadata` from its body, verifying
    /// length, checksum and record count.
    fn decode(&self, metadata: &PageMetadata, body: &[u8]) -> CoreResult<Page<R>>;
}

/// Default codec for every record kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageCodec {
    compression: BodyCompression,
}

impl PageCodec {
    pub fn new(compression: BodyCompression) -> Self {
        Self { compression }
    }

    pub fn gzip() -> Self {
        Self::new(BodyCompression::Gzip)
    }

    fn location(metadata: &PageMetadata) -> String {
        format!("page {} @ {}", metadata.stream, metadata.first_lsn)
    }
}

impl<R: IngestRecord> Codec<R> for PageCodec {
    fn encode(&self, page: &Page<R>) -> CoreResult<EncodedPage<R>> {
        let (first_lsn, last_lsn, (min_ts_ms, max_ts_ms)) =
            match (page.first_lsn(), page.last_lsn(), page.time_range()) {
                (Some(first), Some(last), Some(range)) => (first, last, range),
                _ => {
                    return Err(CoreError::invalid_state(format!(
                        "refusing to encode empty page of stream {}",
                        page.stream()
                    )))
                }
            };

        let mut raw = Vec::with_capacity(page.size_bytes() + 12 * page.len() + 9);
        raw.extend_from_slice(&BODY_MAGIC);
        raw.write_u8(BODY_VERSION)?;
        raw.write_u32::<LittleEndian>(page.len() as u32)?;
        let mut record_buf = Vec::new();
        for entry in page.entries() {
            record_buf.clear();
            entry.record.encode(&mut record_buf)?;
            raw.write_u64::<LittleEndian>(entry.lsn.value())?;
            raw.write_u32::<LittleEndian>(record_buf.len() as u32)?;
            raw.extend_from_slice(&record_buf);
        }

        let body = match self.compression {
            BodyCompression::None => Bytes::from(raw),
            BodyCompression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&raw).map_err(|e| {
                    CoreError::SerializationError(format!("Gzip compression failed: {}", e))
                })?;
                Bytes::from(encoder.finish().map_err(|e| {
                    CoreError::SerializationError(format!("Gzip finish failed: {}", e))
                })?)
            }
        };

        let metadata = PageMetadata {
            format_version: METADATA_FORMAT_VERSION,
            stream: page.stream().clone(),
            state: page.state(),
            created_at_ms: page.created_at_ms(),
            sealed_at_ms: page.sealed_at_ms(),
            first_lsn,
            last_lsn,
            min_ts_ms,
            max_ts_ms,
            record_count: page.len() as u64,
            raw_size_bytes: page.size_bytes() as u64,
            body_len: body.len() as u64,
            body_crc32: crc32fast::hash(&body),
            compression: self.compression,
            bloom: page.bloom().clone(),
        };

        Ok(EncodedPage {
            snapshot: page.snapshot(),
            metadata,
            body,
        })
    }

    fn decode(&self, metadata: &PageMetadata, body: &[u8]) -> CoreResult<Page<R>> {
        let location = Self::location(metadata);
        if body.len() as u64 != metadata.body_len {
            return Err(CoreError::corrupted(
                location,
                body.len() as u64,
                format!("body is {} bytes, metadata says {}", body.len(), metadata.body_len),
            ));
        }
        if crc32fast::hash(body) != metadata.body_crc32 {
            return Err(CoreError::corrupted(location, 0, "body crc mismatch"));
        }
        if metadata.stream.kind != R::KIND {
            return Err(CoreError::invalid_state(format!(
                "page of {} stream decoded as {}",
                metadata.stream.kind,
                R::KIND
            )));
        }

        let raw = match metadata.compression {
            BodyCompression::None => body.to_vec(),
            BodyCompression::Gzip => {
                let mut decoded = Vec::new();
                GzDecoder::new(body)
                    .read_to_end(&mut decoded)
                    .map_err(|e| {
                        CoreError::DeserializationError(format!(
                            "Gzip decompression failed: {}",
                            e
                        ))
                    })?;
                decoded
            }
        };

        let bad = |reason: &str| CoreError::corrupted(Self::location(metadata), 0, reason);
        let mut input = &raw[..];
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic).map_err(|_| bad("truncated body header"))?;
        if magic != BODY_MAGIC {
            return Err(bad("bad body magic"));
        }
        let version = input.read_u8().map_err(|_| bad("truncated body header"))?;
        if version != BODY_VERSION {
            return Err(bad("unsupported body version"));
        }
        let count = input
            .read_u32::<LittleEndian>()
            .map_err(|_| bad("truncated body header"))? as u64;
        if count != metadata.record_count {
            return Err(bad("record count does not match metadata"));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let lsn = Lsn::new(
                input
                    .read_u64::<LittleEndian>()
                    .map_err(|_| bad("truncated record header"))?,
            );
            let len = input
                .read_u32::<LittleEndian>()
                .map_err(|_| bad("truncated record header"))? as usize;
            if len > input.len() {
                return Err(bad("record overruns body"));
            }
            let (record_bytes, rest) = input.split_at(len);
            entries.push(PageEntry {
                lsn,
                record: R::decode(record_bytes)?,
            });
            input = rest;
        }
        if !input.is_empty() {
            return Err(bad("trailing bytes after last record"));
        }
        if entries.first().map(|e| e.lsn) != Some(metadata.first_lsn)
            || entries.last().map(|e| e.lsn) != Some(metadata.last_lsn)
        {
            return Err(bad("LSN range does not match metadata"));
        }

        Page::from_parts(
            metadata.stream.clone(),
            metadata.state,
            metadata.created_at_ms,
            metadata.sealed_at_ms,
            entries,
            metadata.bloom.clone(),
        )
    }
}
