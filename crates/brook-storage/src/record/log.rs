use brook_core::{CoreError, CoreResult, SignalKind};
use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{attrs_len, str_len, write_attrs, write_str, IngestRecord, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    Trace = 1,
    Debug = 2,
    Info = 3,
    Warn = 4,
    Error = 5,
    Fatal = 6,
}

impl TryFrom<u8> for Severity {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, CoreError> {
        Ok(match value {
            1 => Severity::Trace,
            2 => Severity::Debug,
            3 => Severity::Info,
            4 => Severity::Warn,
            5 => Severity::Error,
            6 => Severity::Fatal,
            other => {
                return Err(CoreError::DeserializationError(format!(
                    "log record: unknown severity {other}"
                )))
            }
        })
    }
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ms: i64,
    pub severity: Severity,
    pub body: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
}

impl LogRecord {
    pub fn new(timestamp_ms: i64, severity: Severity, body: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            severity,
            body: body.into(),
            trace_id: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

impl IngestRecord for LogRecord {
    const KIND: SignalKind = SignalKind::Logs;

    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    fn index_key(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        buf.write_i64::<LittleEndian>(self.timestamp_ms)?;
        buf.write_u8(self.severity as u8)?;
        write_str(buf, &self.body)?;
        match &self.trace_id {
            Some(trace_id) => {
                buf.write_u8(1)?;
                write_str(buf, trace_id)?;
            }
            None => buf.write_u8(0)?,
        }
        write_attrs(buf, &self.attributes)
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = Reader::new("log record", bytes);
        let timestamp_ms = reader.i64()?;
        let severity = Severity::try_from(reader.u8()?)?;
        let body = reader.string()?;
        let trace_id = match reader.u8()? {
            0 => None,
            _ => Some(reader.string()?),
        };
        let attributes = reader.attrs()?;
        reader.finish()?;
        Ok(Self {
            timestamp_ms,
            severity,
            body,
            trace_id,
            attributes,
        })
    }

    fn encoded_len(&self) -> usize {
        8 + 1
            + str_len(&self.body)
            + 1
            + self.trace_id.as_deref().map_or(0, str_len)
            + attrs_len(&self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_encoding() {
        let record = LogRecord::new(1_700_000_000_000, Severity::Warn, "disk at 91%")
            .with_trace_id("4bf92f3577b34da6")
            .with_attribute("host", "db-1");

        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(LogRecord::decode(&bytes).unwrap(), record);
        assert_eq!(record.index_key(), Some("4bf92f3577b34da6"));
    }

    #[test]
    fn test_rejects_trailing_and_short_input() {
        let mut bytes = LogRecord::new(1, Severity::Info, "x").to_bytes().unwrap();
        assert!(LogRecord::decode(&bytes[..bytes.len() - 1]).is_err());
        bytes.push(0);
        assert!(LogRecord::decode(&bytes).is_err());
    }
}
