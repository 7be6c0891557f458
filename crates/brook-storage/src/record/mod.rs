//! Telemetry record kinds accepted by the buffer pool.
//!
//! Each kind has its own compact binary encoding (little-endian, length
//! prefixed strings). The same bytes are used as the WAL payload and inside
//! page bodies.

mod log;
mod metric;
mod span;

pub use log::{LogRecord, Severity};
pub use metric::MetricSample;
pub use span::SpanRecord;

use brook_core::{CoreError, CoreResult, SignalKind};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Read;

/// A record that can be logged, paged and persisted.
pub trait IngestRecord: Clone + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// Signal kind of every stream carrying this record type.
    const KIND: SignalKind;

    /// Event time in milliseconds since the Unix epoch.
    fn timestamp_ms(&self) -> i64;

    /// Key inserted into the page bloom filter (trace id, metric name).
    fn index_key(&self) -> Option<&str> {
        None
    }

    /// Appends the binary encoding to `buf`.
    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()>;

    /// Decodes a record, rejecting short input and trailing bytes.
    fn decode(bytes: &[u8]) -> CoreResult<Self>;

    /// Size of the binary encoding; drives page size accounting.
    fn encoded_len(&self) -> usize;

    fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

pub(crate) fn str_len(s: &str) -> usize {
    4 + s.len()
}

pub(crate) fn attrs_len(attrs: &[(String, String)]) -> usize {
    4 + attrs
        .iter()
        .map(|(k, v)| str_len(k) + str_len(v))
        .sum::<usize>()
}

pub(crate) fn write_str(buf: &mut Vec<u8>, s: &str) -> CoreResult<()> {
    buf.write_u32::<LittleEndian>(s.len() as u32)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn write_attrs(buf: &mut Vec<u8>, attrs: &[(String, String)]) -> CoreResult<()> {
    buf.write_u32::<LittleEndian>(attrs.len() as u32)?;
    for (key, value) in attrs {
        write_str(buf, key)?;
        write_str(buf, value)?;
    }
    Ok(())
}

/// Cursor over an encoded record.
pub(crate) struct Reader<'a> {
    what: &'static str,
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(what: &'static str, input: &'a [u8]) -> Self {
        Self { what, input }
    }

    fn err(&self, detail: impl fmt::Display) -> CoreError {
        CoreError::DeserializationError(format!("{}: {}", self.what, detail))
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        self.input.read_u8().map_err(|e| self.err(e))
    }

    pub(crate) fn i64(&mut self) -> CoreResult<i64> {
        self.input
            .read_i64::<LittleEndian>()
            .map_err(|e| self.err(e))
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        self.input
            .read_u64::<LittleEndian>()
            .map_err(|e| self.err(e))
    }

    pub(crate) fn f64(&mut self) -> CoreResult<f64> {
        self.input
            .read_f64::<LittleEndian>()
            .map_err(|e| self.err(e))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        self.input
            .read_u32::<LittleEndian>()
            .map_err(|e| self.err(e))
    }

    pub(crate) fn string(&mut self) -> CoreResult<String> {
        let len = self.u32()? as usize;
        if len > self.input.len() {
            return Err(self.err(format!("string of {len} bytes overruns input")));
        }
        let mut bytes = vec![0u8; len];
        self.input.read_exact(&mut bytes).map_err(|e| self.err(e))?;
        String::from_utf8(bytes).map_err(|e| self.err(e))
    }

    pub(crate) fn attrs(&mut self) -> CoreResult<Vec<(String, String)>> {
        let count = self.u32()? as usize;
        // Each pair needs at least two length prefixes.
        if count > self.input.len() / 8 {
            return Err(self.err(format!("{count} attributes overrun input")));
        }
        let mut attrs = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.string()?;
            let value = self.string()?;
            attrs.push((key, value));
        }
        Ok(attrs)
    }

    pub(crate) fn finish(self) -> CoreResult<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(self.err(format!("{} trailing bytes", self.input.len())))
        }
    }
}
