use brook_core::{CoreResult, SignalKind};
use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{attrs_len, str_len, write_attrs, write_str, IngestRecord, Reader};

/// One sample of a labelled time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp_ms: i64,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(timestamp_ms: i64, name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp_ms,
            name: name.into(),
            labels: Vec::new(),
            value,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

impl IngestRecord for MetricSample {
    const KIND: SignalKind = SignalKind::Metrics;

    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    fn index_key(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        buf.write_i64::<LittleEndian>(self.timestamp_ms)?;
        write_str(buf, &self.name)?;
        write_attrs(buf, &self.labels)?;
        buf.write_f64::<LittleEndian>(self.value)?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = Reader::new("metric sample", bytes);
        let timestamp_ms = reader.i64()?;
        let name = reader.string()?;
        let labels = reader.attrs()?;
        let value = reader.f64()?;
        reader.finish()?;
        Ok(Self {
            timestamp_ms,
            name,
            labels,
            value,
        })
    }

    fn encoded_len(&self) -> usize {
        8 + str_len(&self.name) + attrs_len(&self.labels) + 8
    }
}
