//! Storage engine for brook: per-stream WALs, in-memory pages, flushed page
//! artifacts and their upload to an object store.

pub mod artifact;
pub mod buffer_pool;
pub mod checkpoint;
pub mod codec;
pub mod object_store;
pub mod page;
pub mod paths;
pub mod record;
pub mod retry;
pub mod wal;

pub use buffer_pool::{BufferPool, CycleReport, PoolRecovery, PoolStats, WalPositions};
pub use checkpoint::{CheckpointRecord, CheckpointUploader, RemoteKeys};
pub use codec::{BodyCompression, Codec, EncodedPage, PageCodec, PageMetadata};
pub use object_store::{LocalObjectStore, MockObjectStore, ObjectMetadata, ObjectStore, S3ObjectStore};
pub use page::{BloomFilter, Page, PageEntry, PageLimits, PageSnapshot, PageState, SealTrigger};
pub use paths::{ArtifactPaths, DiskPathResolver, PartitionKey};
pub use record::{IngestRecord, LogRecord, MetricSample, Severity, SpanRecord};
pub use retry::{retry_with_backoff, Backoff};
pub use wal::{Wal, WalRecord, WalReplay};

pub type LogBufferPool = BufferPool<LogRecord>;
pub type MetricBufferPool = BufferPool<MetricSample>;
pub type SpanBufferPool = BufferPool<SpanRecord>;
