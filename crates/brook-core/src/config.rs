//! Configuration management for brook
//!
//! This module provides a centralized configuration system that supports:
//! - YAML configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure for brook
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BrookConfig {
    #[serde(default)]
    pub buffer_pool: BufferPoolConfig,

    #[serde(default)]
    pub wal: WalConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

impl BrookConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. `path`, or the file named by the BROOK_CONFIG env var
    /// 3. ./config/brook.yaml
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder.add_source(File::with_name("./config/brook").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else if let Ok(config_path) = std::env::var("BROOK_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: BROOK_BUFFER_POOL__MAX_PAGE_BYTES=65536
        builder = builder.add_source(
            Environment::with_prefix("BROOK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: BrookConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Buffer pool
            .set_default("buffer_pool.max_page_bytes", 1024 * 1024)?
            .set_default("buffer_pool.max_page_window_ms", 60_000)?
            .set_default("buffer_pool.sealed_page_cap", 64)?
            .set_default("buffer_pool.sealed_page_ttl_ms", 60_000)?
            .set_default("buffer_pool.flush_eval_millis", 1_000)?
            .set_default("buffer_pool.expected_insertions", 10_000)?
            .set_default("buffer_pool.bloom_fpp", 0.01)?
            .set_default("buffer_pool.compress_bodies", false)?
            // WAL
            .set_default("wal.segment_size_bytes", 64 * 1024 * 1024)?
            .set_default("wal.max_segments", 16)?
            .set_default("wal.fsync_policy", "every_record")?
            .set_default("wal.fsync_bytes", 1024 * 1024)?
            .set_default("wal.fsync_interval_ms", 1_000)?
            .set_default("wal.keep_sealed_segments", 0)?
            // Storage
            .set_default("storage.data_dir", "./data")?
            .set_default("storage.idx_expiry_duration_ms", 3_600_000)?
            .set_default("storage.disk_retry.max_attempts", 3)?
            .set_default("storage.disk_retry.initial_backoff_ms", 50)?
            .set_default("storage.disk_retry.max_backoff_ms", 1_000)?
            .set_default("storage.disk_retry.backoff_multiplier", 2.0)?
            // Upload
            .set_default("upload.enabled", true)?
            .set_default("upload.base_prefix", "brook")?
            .set_default("upload.shard", "0")?
            .set_default("upload.upload_grace_ms", 300_000)?
            .set_default("upload.attempt_timeout_ms", 30_000)?
            .set_default("upload.concurrency", 4)?
            .set_default("upload.retry.max_attempts", 0)?
            .set_default("upload.retry.initial_backoff_ms", 500)?
            .set_default("upload.retry.max_backoff_ms", 60_000)?
            .set_default("upload.retry.backoff_multiplier", 2.0)?
            .set_default("upload.remote.kind", "local")?
            .set_default("upload.remote.bucket", "brook")?
            .set_default("upload.remote.region", "us-east-1")?
            .set_default("upload.remote.local_dir", "./data/remote")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bp = &self.buffer_pool;
        if bp.max_page_bytes == 0 {
            return Err(ConfigError::Message(
                "buffer_pool.max_page_bytes must be > 0".to_string(),
            ));
        }
        if bp.max_page_window_ms == 0 {
            return Err(ConfigError::Message(
                "buffer_pool.max_page_window_ms must be > 0".to_string(),
            ));
        }
        if bp.sealed_page_cap == 0 {
            return Err(ConfigError::Message(
                "buffer_pool.sealed_page_cap must be > 0".to_string(),
            ));
        }
        if bp.flush_eval_millis == 0 {
            return Err(ConfigError::Message(
                "buffer_pool.flush_eval_millis must be > 0".to_string(),
            ));
        }
        if bp.expected_insertions == 0 {
            return Err(ConfigError::Message(
                "buffer_pool.expected_insertions must be > 0".to_string(),
            ));
        }
        if !(bp.bloom_fpp > 0.0 && bp.bloom_fpp < 1.0) {
            return Err(ConfigError::Message(
                "buffer_pool.bloom_fpp must be in (0, 1)".to_string(),
            ));
        }

        if self.wal.segment_size_bytes == 0 {
            return Err(ConfigError::Message(
                "wal.segment_size_bytes must be > 0".to_string(),
            ));
        }
        if self.wal.max_segments < 2 {
            return Err(ConfigError::Message(
                "wal.max_segments must be >= 2".to_string(),
            ));
        }
        // The active segment plus the kept ones must leave one slot to reclaim.
        if self.wal.keep_sealed_segments + 2 > self.wal.max_segments {
            return Err(ConfigError::Message(
                "wal.keep_sealed_segments must be <= wal.max_segments - 2".to_string(),
            ));
        }
        match self.wal.fsync_policy {
            FsyncPolicy::Bytes if self.wal.fsync_bytes == 0 => {
                return Err(ConfigError::Message(
                    "wal.fsync_bytes must be > 0 with the bytes policy".to_string(),
                ));
            }
            FsyncPolicy::Interval if self.wal.fsync_interval_ms == 0 => {
                return Err(ConfigError::Message(
                    "wal.fsync_interval_ms must be > 0 with the interval policy".to_string(),
                ));
            }
            _ => {}
        }

        if self.storage.idx_expiry_duration_ms == 0 {
            return Err(ConfigError::Message(
                "storage.idx_expiry_duration_ms must be > 0".to_string(),
            ));
        }
        if self.storage.disk_retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "storage.disk_retry.max_attempts must be > 0".to_string(),
            ));
        }

        if self.upload.base_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Message(
                "upload.base_prefix must not be empty".to_string(),
            ));
        }
        if self.upload.concurrency == 0 {
            return Err(ConfigError::Message(
                "upload.concurrency must be > 0".to_string(),
            ));
        }
        if self.upload.attempt_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "upload.attempt_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: BrookConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Page sizing, sealing and eviction limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferPoolConfig {
    /// Seal a page once its records reach this many bytes
    pub max_page_bytes: usize,

    /// Seal a page once it has been open this long
    pub max_page_window_ms: u64,

    /// Maximum number of sealed pages held in memory across all streams
    pub sealed_page_cap: usize,

    /// Minimum time a flushed page stays local after its flush
    pub sealed_page_ttl_ms: u64,

    /// Background evaluation interval
    pub flush_eval_millis: u64,

    /// Bloom filter sizing: expected index keys per page
    pub expected_insertions: usize,

    /// Bloom filter sizing: target false positive rate
    pub bloom_fpp: f64,

    /// Gzip page bodies before writing them
    #[serde(default)]
    pub compress_bodies: bool,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_page_bytes: 1024 * 1024,
            max_page_window_ms: 60_000,
            sealed_page_cap: 64,
            sealed_page_ttl_ms: 60_000,
            flush_eval_millis: 1_000,
            expected_insertions: 10_000,
            bloom_fpp: 0.01,
            compress_bodies: false,
        }
    }
}

impl BufferPoolConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_eval_millis)
    }
}

/// When an append forces the active WAL segment to disk.
///
/// Only `EveryRecord` makes each acknowledged record durable on its own. The
/// other policies trade a bounded window of acknowledged records for
/// throughput; a rotation and an explicit `Wal::sync` always force.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// fsync before every append returns
    #[default]
    EveryRecord,
    /// fsync once `fsync_bytes` have been written since the last one
    Bytes,
    /// fsync on the first append after `fsync_interval_ms` has passed
    Interval,
    /// Never fsync on append
    Manual,
}

/// Write-ahead log segment ring.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalConfig {
    /// Rotate to a new segment before a frame would push the current one past this size
    pub segment_size_bytes: u64,

    /// Maximum number of live segment files per stream
    pub max_segments: usize,

    #[serde(default)]
    pub fsync_policy: FsyncPolicy,

    /// Threshold for `FsyncPolicy::Bytes`
    #[serde(default = "default_fsync_bytes")]
    pub fsync_bytes: u64,

    /// Period for `FsyncPolicy::Interval`
    #[serde(default = "default_fsync_interval_ms")]
    pub fsync_interval_ms: u64,

    /// Newest sealed segments kept on disk even once fully checkpointed
    #[serde(default)]
    pub keep_sealed_segments: usize,
}

fn default_fsync_bytes() -> u64 {
    1024 * 1024
}

fn default_fsync_interval_ms() -> u64 {
    1_000
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size_bytes: 64 * 1024 * 1024,
            max_segments: 16,
            fsync_policy: FsyncPolicy::EveryRecord,
            fsync_bytes: default_fsync_bytes(),
            fsync_interval_ms: default_fsync_interval_ms(),
            keep_sealed_segments: 0,
        }
    }
}

impl WalConfig {
    pub fn fsync_interval(&self) -> Duration {
        Duration::from_millis(self.fsync_interval_ms)
    }
}

/// Local disk layout and flush retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for WALs and flushed pages
    pub data_dir: PathBuf,

    /// Partition width; artifacts in the same bucket are collected together
    pub idx_expiry_duration_ms: u64,

    /// Bounded retries for writing flushed pages
    #[serde(default)]
    pub disk_retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            idx_expiry_duration_ms: 3_600_000,
            disk_retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 50,
                max_backoff_ms: 1_000,
                backoff_multiplier: 2.0,
            },
        }
    }
}

/// Remote upload pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Disable to keep flushed pages local only
    pub enabled: bool,

    /// Key prefix for every uploaded object
    pub base_prefix: String,

    /// Shard (or node) component of remote keys
    pub shard: String,

    /// How long a checkpointed artifact stays on local disk
    pub upload_grace_ms: u64,

    /// Deadline for a single upload attempt
    pub attempt_timeout_ms: u64,

    /// Uploads in flight per scheduler cycle
    pub concurrency: usize,

    /// Backoff between failed attempts. `max_attempts` is ignored: uploads are never abandoned.
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_prefix: "brook".to_string(),
            shard: "0".to_string(),
            upload_grace_ms: 300_000,
            attempt_timeout_ms: 30_000,
            concurrency: 4,
            retry: RetryConfig {
                max_attempts: 0,
                initial_backoff_ms: 500,
                max_backoff_ms: 60_000,
                backoff_multiplier: 2.0,
            },
            remote: RemoteStoreConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStoreKind {
    Local,
    S3,
}

/// Upload target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteStoreConfig {
    pub kind: RemoteStoreKind,

    /// S3 bucket name
    pub bucket: String,

    /// S3 region
    pub region: String,

    /// Custom S3 endpoint (MinIO, LocalStack)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Root directory when `kind = local`
    pub local_dir: PathBuf,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            kind: RemoteStoreKind::Local,
            bucket: "brook".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            local_dir: PathBuf::from("./data/remote"),
        }
    }
}

/// Retry configuration for operations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff delay for a given retry attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt.min(63) as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configuration() {
        let config = BrookConfig::default();

        assert_eq!(config.buffer_pool.max_page_bytes, 1024 * 1024);
        assert_eq!(config.buffer_pool.sealed_page_cap, 64);
        assert_eq!(config.buffer_pool.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.wal.max_segments, 16);
        assert_eq!(config.wal.fsync_policy, FsyncPolicy::EveryRecord);
        assert_eq!(config.wal.keep_sealed_segments, 0);
        assert_eq!(config.storage.idx_expiry_duration_ms, 3_600_000);
        assert_eq!(config.storage.disk_retry.max_attempts, 3);
        assert_eq!(config.upload.base_prefix, "brook");
        assert_eq!(config.upload.remote.kind, RemoteStoreKind::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_backoff() {
        let retry = RetryConfig::default();

        assert_eq!(retry.backoff_for_attempt(0).as_millis(), 100);
        assert_eq!(retry.backoff_for_attempt(1).as_millis(), 200);
        assert_eq!(retry.backoff_for_attempt(2).as_millis(), 400);
        assert!(retry.backoff_for_attempt(10).as_millis() <= 5000);
        assert!(retry.backoff_for_attempt(u32::MAX).as_millis() <= 5000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = BrookConfig::default();

        config.buffer_pool.sealed_page_cap = 0;
        assert!(config.validate().is_err());
        config.buffer_pool.sealed_page_cap = 2;
        assert!(config.validate().is_ok());

        config.buffer_pool.bloom_fpp = 1.5;
        assert!(config.validate().is_err());
        config.buffer_pool.bloom_fpp = 0.05;

        config.wal.max_segments = 1;
        assert!(config.validate().is_err());
        config.wal.max_segments = 4;

        config.wal.keep_sealed_segments = 3;
        assert!(config.validate().is_err());
        config.wal.keep_sealed_segments = 2;
        assert!(config.validate().is_ok());

        config.wal.fsync_policy = FsyncPolicy::Bytes;
        config.wal.fsync_bytes = 0;
        assert!(config.validate().is_err());
        config.wal.fsync_policy = FsyncPolicy::Manual;
        assert!(config.validate().is_ok());

        config.upload.base_prefix = "/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brook.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "buffer_pool:\n  max_page_bytes: 100\n  max_page_window_ms: 5000\n  sealed_page_cap: 2\n  sealed_page_ttl_ms: 10\n  flush_eval_millis: 50\n  expected_insertions: 100\n  bloom_fpp: 0.01\nwal:\n  segment_size_bytes: 4096\n  max_segments: 4\n  fsync_policy: interval\n  fsync_interval_ms: 250\n  keep_sealed_segments: 1\n"
        )
        .unwrap();

        let config = BrookConfig::from_file(&path).unwrap();
        assert_eq!(config.buffer_pool.max_page_bytes, 100);
        assert_eq!(config.buffer_pool.sealed_page_cap, 2);
        assert_eq!(config.wal.segment_size_bytes, 4096);
        assert_eq!(config.wal.fsync_policy, FsyncPolicy::Interval);
        assert_eq!(config.wal.fsync_interval(), Duration::from_millis(250));
        assert_eq!(config.wal.keep_sealed_segments, 1);
        assert_eq!(config.wal.fsync_bytes, 1024 * 1024);
        // Sections absent from the file fall back to their defaults.
        assert_eq!(config.upload.shard, "0");
    }
}
