//! WAL frame encoding.
//!
//! Every record is written as one self-delimiting frame (big-endian):
//!
//! ```text
//! magic "WALS" | version:u8 | lsn:u64 | len:u32 | payload[len] | crc32:u32 | magic "WALE"
//! ```
//!
//! The CRC covers `version..payload`. A frame is either fully valid or the
//! reader reports the offset where validation failed; nothing after a bad
//! frame in the same segment is trusted.

use brook_core::{CoreError, CoreResult, Lsn};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::{self, Read};

pub const FRAME_MAGIC: [u8; 4] = *b"WALS";
pub const FRAME_END_MAGIC: [u8; 4] = *b"WALE";
pub const FRAME_VERSION: u8 = 1;

/// Hard cap to avoid unbounded allocations on corrupt logs.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4 + 1 + 8 + 4;
const TRAILER_LEN: usize = 4 + 4;

/// Bytes added around every payload.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;

/// A record read back from the WAL. Only CRC-valid records are ever produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub payload: Bytes,
    pub crc: u32,
}

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum FrameRead {
    /// A valid record; `len` is the full frame length on disk.
    Record { record: WalRecord, len: usize },
    /// Clean end of segment.
    End,
    /// The frame at this offset is torn or corrupt.
    Corrupt { reason: String },
}

fn checksum(lsn: Lsn, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[FRAME_VERSION]);
    hasher.update(&lsn.value().to_be_bytes());
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encodes `payload` as a frame for `lsn`.
pub fn encode_frame(lsn: Lsn, payload: &[u8]) -> CoreResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CoreError::ValidationError(format!(
            "WAL payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_PAYLOAD_BYTES
        )));
    }

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.write_u8(FRAME_VERSION)?;
    buf.write_u64::<BigEndian>(lsn.value())?;
    buf.write_u32::<BigEndian>(payload.len() as u32)?;
    buf.extend_from_slice(payload);
    buf.write_u32::<BigEndian>(checksum(lsn, payload))?;
    buf.extend_from_slice(&FRAME_END_MAGIC);
    Ok(buf)
}

/// Reads exactly `buf.len()` bytes, distinguishing a clean EOF at the first
/// byte from a short read in the middle.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads the next frame. I/O errors are returned; format problems are
/// reported as [`FrameRead::Corrupt`].
pub fn read_frame(reader: &mut impl Read) -> io::Result<FrameRead> {
    let mut header = [0u8; HEADER_LEN];
    let n = read_full(reader, &mut header)?;
    if n == 0 {
        return Ok(FrameRead::End);
    }
    if n < HEADER_LEN {
        return Ok(corrupt("truncated frame header"));
    }
    if header[..4] != FRAME_MAGIC {
        return Ok(corrupt("bad frame magic"));
    }

    let mut cursor = &header[4..];
    let version = cursor.read_u8()?;
    if version != FRAME_VERSION {
        return Ok(corrupt(format!("unsupported frame version {version}")));
    }
    let lsn = Lsn::new(cursor.read_u64::<BigEndian>()?);
    let len = cursor.read_u32::<BigEndian>()? as usize;
    if len > MAX_PAYLOAD_BYTES {
        return Ok(corrupt(format!("payload length {len} exceeds limit")));
    }

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)? < len {
        return Ok(corrupt("truncated payload"));
    }

    let mut trailer = [0u8; TRAILER_LEN];
    if read_full(reader, &mut trailer)? < TRAILER_LEN {
        return Ok(corrupt("truncated frame trailer"));
    }
    let mut cursor = &trailer[..];
    let crc = cursor.read_u32::<BigEndian>()?;
    if trailer[4..] != FRAME_END_MAGIC {
        return Ok(corrupt("bad frame end magic"));
    }
    if crc != checksum(lsn, &payload) {
        return Ok(corrupt("crc mismatch"));
    }

    Ok(FrameRead::Record {
        record: WalRecord {
            lsn,
            payload: Bytes::from(payload),
            crc,
        },
        len: FRAME_OVERHEAD + len,
    })
}

fn corrupt(reason: impl Into<String>) -> FrameRead {
    FrameRead::Corrupt {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one(bytes: &[u8]) -> FrameRead {
        let mut reader = bytes;
        read_frame(&mut reader).unwrap()
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = encode_frame(Lsn::new(9), b"hello").unwrap();
        assert_eq!(frame.len(), FRAME_OVERHEAD + 5);

        match read_one(&frame) {
            FrameRead::Record { record, len } => {
                assert_eq!(record.lsn, Lsn::new(9));
                assert_eq!(&record.payload[..], b"hello");
                assert_eq!(len, frame.len());
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_input_is_clean_end() {
        assert!(matches!(read_one(&[]), FrameRead::End));
    }

    #[test]
    fn test_every_truncation_is_detected() {
        let frame = encode_frame(Lsn::new(1), b"payload").unwrap();
        for cut in 1..frame.len() {
            assert!(
                matches!(read_one(&frame[..cut]), FrameRead::Corrupt { .. }),
                "cut at {cut} not detected"
            );
        }
    }

    #[test]
    fn test_bit_flip_fails_crc() {
        let mut frame = encode_frame(Lsn::new(3), b"abcdef").unwrap();
        frame[HEADER_LEN + 2] ^= 0x01;
        match read_one(&frame) {
            FrameRead::Corrupt { reason } => assert_eq!(reason, "crc mismatch"),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        assert!(encode_frame(Lsn::new(1), &payload).is_err());
    }
}
