//! Core domain types shared by the brook ingestion engine.

pub mod clock;
pub mod config;
pub mod error;
pub mod lsn;
pub mod metrics;
pub mod stream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BrookConfig, BufferPoolConfig, FsyncPolicy, RemoteStoreConfig, RemoteStoreKind, RetryConfig,
    StorageConfig, UploadConfig, WalConfig,
};
pub use error::{CoreError, CoreResult};
pub use lsn::Lsn;
pub use stream::{SignalKind, StreamId, TenantId};
