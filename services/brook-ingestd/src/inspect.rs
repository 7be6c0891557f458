//! Read-only operator commands.

use brook_core::{BrookConfig, CoreError, Lsn, StreamId};
use brook_storage::buffer_pool::STREAM_DESCRIPTOR;
use brook_storage::paths::{DiskPathResolver, CHECKPOINT_EXT, METADATA_EXT};
use brook_storage::Wal;
use serde::Serialize;
use std::path::Path;

/// Opens the WAL in `dir` (taking its lock) and prints what a replay from `from` sees.
pub fn inspect_wal(config: &BrookConfig, dir: &Path, from: u64) -> Result<(), Box<dyn std::error::Error>> {
    let stream = stream_of(dir)?;
    let wal = Wal::open(dir, config.wal.clone(), stream.kind)?;

    println!("stream:         {stream}");
    println!("last lsn:       {}", wal.last_lsn());
    println!("reclaim before: {}", wal.reclaim_watermark());
    let recovery = wal.recovery_report();
    if recovery.truncated_bytes > 0 {
        println!("torn tail:      {} bytes cut on open", recovery.truncated_bytes);
    }
    if !recovery.corrupt_segments.is_empty() {
        println!("corrupt:        segments {:?}", recovery.corrupt_segments);
    }
    println!("segments:");
    for segment in wal.segments() {
        let range = match (segment.first_lsn, segment.last_lsn) {
            (Some(first), Some(last)) => format!("{}..={}", first.value(), last.value()),
            _ => "empty".to_string(),
        };
        println!(
            "  {}  lsn {:<16} records {:<8} bytes {:<10} {}",
            segment.file_name(),
            range,
            segment.record_count,
            segment.size_bytes,
            if segment.sealed { "sealed" } else { "active" }
        );
    }

    let mut replayed = 0u64;
    let mut bytes = 0u64;
    let mut span: Option<(Lsn, Lsn)> = None;
    for item in wal.replay(Lsn::new(from))? {
        match item {
            Ok(record) => {
                replayed += 1;
                bytes += record.payload.len() as u64;
                span = Some(match span {
                    Some((first, _)) => (first, record.lsn),
                    None => (record.lsn, record.lsn),
                });
            }
            Err(e) => {
                println!("replay stopped: {e}");
                break;
            }
        }
    }
    match span {
        Some((first, last)) => println!("replayed {replayed} records ({bytes} payload bytes), {first} to {last}"),
        None => println!("replayed 0 records"),
    }
    Ok(())
}

fn stream_of(dir: &Path) -> Result<StreamId, CoreError> {
    match std::fs::read(dir.join(STREAM_DESCRIPTOR)) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CoreError::ValidationError(format!("{} is not a stream WAL directory", dir.display())))?;
            StreamId::from_path_segment(name)
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
struct PartitionSummary {
    bucket: i64,
    start_ms: i64,
    expired: bool,
    streams: Vec<StreamSummary>,
}

#[derive(Debug, Serialize)]
struct StreamSummary {
    stream: String,
    artifacts: usize,
    checkpointed: usize,
}

pub async fn list_partitions(config: &BrookConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let paths = DiskPathResolver::new(&config.storage.data_dir, config.storage.idx_expiry_duration_ms);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let current = paths.bucket_of(now_ms);

    let mut partitions = Vec::new();
    for bucket in paths.list_partitions().await? {
        let mut streams = Vec::new();
        let mut entries = tokio::fs::read_dir(paths.partition_dir(bucket)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let stream = StreamId::from_path_segment(&name)
                .map(|s| s.to_string())
                .unwrap_or(name);

            let (mut artifacts, mut checkpointed) = (0, 0);
            let mut files = tokio::fs::read_dir(entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                match file.path().extension().and_then(|e| e.to_str()) {
                    Some(METADATA_EXT) => artifacts += 1,
                    Some(CHECKPOINT_EXT) => checkpointed += 1,
                    _ => {}
                }
            }
            streams.push(StreamSummary {
                stream,
                artifacts,
                checkpointed,
            });
        }
        streams.sort_by(|a, b| a.stream.cmp(&b.stream));
        partitions.push(PartitionSummary {
            bucket,
            start_ms: paths.bucket_start_ms(bucket),
            expired: bucket < current,
            streams,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&partitions)?);
        return Ok(());
    }

    if partitions.is_empty() {
        println!("no partitions under {}", paths.data_dir().display());
    }
    for partition in &partitions {
        println!(
            "bucket {} (from {}){}",
            partition.bucket,
            partition.start_ms,
            if partition.expired { " expired" } else { "" }
        );
        for stream in &partition.streams {
            println!(
                "  {:<48} artifacts {:<6} checkpointed {}",
                stream.stream, stream.artifacts, stream.checkpointed
            );
        }
    }
    Ok(())
}
