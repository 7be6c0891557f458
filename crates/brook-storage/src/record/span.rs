use brook_core::{CoreResult, SignalKind};
use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{attrs_len, str_len, write_attrs, write_str, IngestRecord, Reader};

/// One finished span of a distributed trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_ms: i64,
    pub duration_us: u64,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
}

impl SpanRecord {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        start_ms: i64,
        duration_us: u64,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            start_ms,
            duration_us,
            attributes: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }
}

impl IngestRecord for SpanRecord {
    const KIND: SignalKind = SignalKind::Traces;

    fn timestamp_ms(&self) -> i64 {
        self.start_ms
    }

    fn index_key(&self) -> Option<&str> {
        Some(&self.trace_id)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        write_str(buf, &self.trace_id)?;
        write_str(buf, &self.span_id)?;
        match &self.parent_span_id {
            Some(parent) => {
                buf.write_u8(1)?;
                write_str(buf, parent)?;
            }
            None => buf.write_u8(0)?,
        }
        write_str(buf, &self.name)?;
        buf.write_i64::<LittleEndian>(self.start_ms)?;
        buf.write_u64::<LittleEndian>(self.duration_us)?;
        write_attrs(buf, &self.attributes)
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = Reader::new("span record", bytes);
        let trace_id = reader.string()?;
        let span_id = reader.string()?;
        let parent_span_id = match reader.u8()? {
            0 => None,
            _ => Some(reader.string()?),
        };
        let name = reader.string()?;
        let start_ms = reader.i64()?;
        let duration_us = reader.u64()?;
        let attributes = reader.attrs()?;
        reader.finish()?;
        Ok(Self {
            trace_id,
            span_id,
            parent_span_id,
            name,
            start_ms,
            duration_us,
            attributes,
        })
    }

    fn encoded_len(&self) -> usize {
        str_len(&self.trace_id)
            + str_len(&self.span_id)
            + 1
            + self.parent_span_id.as_deref().map_or(0, str_len)
            + str_len(&self.name)
            + 8
            + 8
            + attrs_len(&self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_encoding() {
        let span = SpanRecord::new("trace-1", "span-2", "GET /cart", 1_000, 2_500).with_parent("span-1");
        let bytes = span.to_bytes().unwrap();
        assert_eq!(bytes.len(), span.encoded_len());
        assert_eq!(SpanRecord::decode(&bytes).unwrap(), span);
        assert_eq!(span.timestamp_ms(), 1_000);
    }
}
