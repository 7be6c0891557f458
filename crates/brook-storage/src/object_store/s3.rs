//! AWS S3 implementation of ObjectStore
//!
//! Supports standard AWS S3 and S3-compatible endpoints (MinIO, Wasabi, etc.).
//! SDK failures are classified so the upload pipeline can tell a throttled or
//! unavailable backend (`CoreError::Transient`) from a misconfiguration.

use super::{ObjectMetadata, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{config::Credentials, primitives::ByteStream, Client, Config};
use brook_core::{CoreError, CoreResult, RemoteStoreConfig};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Error codes S3 (and compatible stores) return for conditions that clear up on their own.
const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "Throttling",
    "ThrottlingException",
];

/// S3 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region (e.g., "us-west-2")
    pub region: String,
    /// Optional custom endpoint URL (MinIO: "http://localhost:9000")
    pub endpoint: Option<String>,
    /// Optional access key (for custom S3 endpoints)
    pub access_key: Option<String>,
    /// Optional secret key (for custom S3 endpoints)
    pub secret_key: Option<String>,
    /// Optional key prefix applied to every key
    pub prefix: Option<String>,
}

impl S3Config {
    /// Standard AWS S3 using ambient credentials
    pub fn aws(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            prefix: None,
        }
    }

    /// MinIO or another S3-compatible endpoint with static credentials
    pub fn custom(
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            prefix: None,
        }
    }

    /// Builds from the upload section of the service configuration.
    ///
    /// Static credentials are read from `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY` only when a custom endpoint is set.
    pub fn from_remote(remote: &RemoteStoreConfig) -> Self {
        let mut config = Self::aws(&remote.bucket, &remote.region);
        if let Some(endpoint) = &remote.endpoint {
            config.endpoint = Some(endpoint.clone());
            config.access_key = std::env::var("AWS_ACCESS_KEY_ID").ok();
            config.secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        }
        config
    }
}

/// AWS S3 object store
///
/// ```rust,no_run
/// use brook_storage::object_store::{S3Config, S3ObjectStore, ObjectStore};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() -> brook_core::CoreResult<()> {
///     let config = S3Config::custom(
///         "brook",
///         "us-east-1",
///         "http://localhost:9000",
///         "minioadmin",
///         "minioadmin",
///     );
///     let store = S3ObjectStore::new(config).await?;
///     store.put("health/check", Bytes::from("data")).await?;
///     assert_eq!(store.head("health/check").await?.size_bytes, 4);
///     Ok(())
/// }
/// ```
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> CoreResult<Self> {
        let client = match (&config.endpoint, &config.access_key, &config.secret_key) {
            (Some(endpoint), Some(access), Some(secret)) => {
                let creds = Credentials::new(access, secret, None, None, "brook-static");
                let s3_config = Config::builder()
                    .endpoint_url(endpoint)
                    .credentials_provider(creds)
                    .region(aws_sdk_s3::config::Region::new(config.region.clone()))
                    .force_path_style(true) // Required for MinIO
                    .behavior_version(BehaviorVersion::latest())
                    .build();
                Client::from_conf(s3_config)
            }
            (endpoint, _, _) => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(config.region.clone()));
                if let Some(endpoint) = endpoint {
                    loader = loader.endpoint_url(endpoint);
                }
                Client::new(&loader.load().await)
            }
        };

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        }
    }
}

/// Maps an SDK failure to `Transient` when retrying can succeed, `StorageError` otherwise.
fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> CoreError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => err
            .code()
            .is_some_and(|code| TRANSIENT_CODES.contains(&code)),
        _ => false,
    };
    let message = format!("S3 {operation} failed: {err}");
    if transient {
        CoreError::Transient(message)
    } else {
        CoreError::StorageError(message)
    }
}

fn is_not_found<E, R>(err: &SdkError<E, R>) -> bool
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    matches!(err.code(), Some("NoSuchKey" | "NotFound"))
        || matches!(err, SdkError::ServiceError(_) if err.to_string().contains("404"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::ValidationError("Key cannot be empty".to_string()));
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify("put", e))?;

        Ok(())
    }

    async fn head(&self, key: &str) -> CoreResult<ObjectMetadata> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    CoreError::not_found("object", key)
                } else {
                    classify("head", e)
                }
            })?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size_bytes: resp.content_length().unwrap_or(0) as u64,
            last_modified: resp
                .last_modified()
                .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                .unwrap_or_else(Utc::now),
            etag: resp.e_tag().map(|s| s.to_string()),
        })
    }
}
