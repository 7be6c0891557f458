//! Property tests for the page codec and WAL crash recovery.

use brook_core::{BufferPoolConfig, FsyncPolicy, Lsn, SignalKind, StreamId, WalConfig};
use brook_storage::wal::FRAME_OVERHEAD;
use brook_storage::{Codec, LogRecord, Page, PageCodec, PageLimits, Severity, Wal};
use proptest::prelude::*;
use std::fs::OpenOptions;
use tempfile::TempDir;

fn log_record() -> impl Strategy<Value = LogRecord> {
    (
        0i64..4_000_000_000_000,
        1u8..=6,
        ".{0,64}",
        proptest::option::of("[0-9a-f]{32}"),
    )
        .prop_map(|(ts, severity, body, trace)| {
            let severity = Severity::try_from(severity).unwrap();
            let record = LogRecord::new(ts, severity, body);
            match trace {
                Some(trace) => record.with_trace_id(trace),
                None => record,
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn page_survives_encode_decode(
        records in proptest::collection::vec(log_record(), 1..40),
        gaps in proptest::collection::vec(1u64..5, 40),
        gzip in any::<bool>(),
    ) {
        let stream = StreamId::new("acme", SignalKind::Logs, "api").unwrap();
        let limits = PageLimits::from(&BufferPoolConfig::default());
        let mut page = Page::new(stream, 1_000, &limits);
        let mut lsn = 0;
        for (record, gap) in records.into_iter().zip(gaps) {
            lsn += gap;
            page.append(Lsn::new(lsn), record).unwrap();
        }
        page.seal(2_000).unwrap();

        let codec = if gzip { PageCodec::gzip() } else { PageCodec::default() };
        let encoded = Codec::<LogRecord>::encode(&codec, &page).unwrap();
        prop_assert_eq!(encoded.metadata.record_count as usize, page.len());
        prop_assert_eq!(encoded.metadata.last_lsn, Lsn::new(lsn));

        let decoded: Page<LogRecord> = codec.decode(&encoded.metadata, &encoded.body).unwrap();
        prop_assert_eq!(decoded, page);
    }

    #[test]
    fn torn_wal_replays_exactly_the_complete_prefix(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..200), 1..30),
        cut in any::<proptest::sample::Index>(),
    ) {
        let dir = TempDir::new().unwrap();
        let config = WalConfig {
            fsync_policy: FsyncPolicy::Manual,
            ..WalConfig::default()
        };

        {
            let wal = Wal::open(dir.path(), config.clone(), SignalKind::Logs).unwrap();
            for payload in &payloads {
                wal.append(payload).unwrap();
            }
        }

        // Everything is in one segment; chop it anywhere
        let total: usize = payloads.iter().map(|p| p.len() + FRAME_OVERHEAD).sum();
        let keep = cut.index(total + 1);
        let segment = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|e| e == "segment"))
            .unwrap();
        OpenOptions::new()
            .write(true)
            .open(&segment)
            .unwrap()
            .set_len(keep as u64)
            .unwrap();

        let mut complete = 0;
        let mut offset = 0;
        for payload in &payloads {
            offset += payload.len() + FRAME_OVERHEAD;
            if offset > keep {
                break;
            }
            complete += 1;
        }

        let wal = Wal::open(dir.path(), config, SignalKind::Logs).unwrap();
        let replayed: Vec<_> = wal
            .replay(Lsn::new(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        prop_assert_eq!(replayed.len(), complete);
        for (i, record) in replayed.iter().enumerate() {
            prop_assert_eq!(record.lsn, Lsn::new(i as u64 + 1));
            prop_assert_eq!(&record.payload[..], &payloads[i][..]);
        }
    }
}
