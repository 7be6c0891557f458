use thiserror::Error;

/// Canonical error type for the ingestion engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"stream"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// A WAL frame or persisted page failed integrity checks.
    #[error("corrupted record in {location} at offset {offset}: {reason}")]
    CorruptedRecord {
        /// File (or logical source) holding the bad record.
        location: String,
        /// Byte offset of the first invalid byte.
        offset: u64,
        /// What check failed.
        reason: String,
    },

    /// The WAL segment ring is full and nothing can be reclaimed.
    #[error("no more WAL slots: all {max_segments} segments hold unreclaimed data")]
    NoMoreWalSlots {
        /// Configured segment cap.
        max_segments: usize,
    },

    /// Backpressure: the stream cannot accept the record right now.
    #[error("cannot buffer record for stream {stream}: {reason}")]
    CannotBuffer {
        /// Stream that rejected the write.
        stream: String,
        /// Why the write was rejected.
        reason: String,
    },

    /// Another process already owns the WAL directory.
    #[error("failed to lock {path}: {message}")]
    FileLock {
        /// Lock file path.
        path: String,
        /// Underlying failure.
        message: String,
    },

    /// The stream hit an unrecoverable failure and stopped accepting writes.
    #[error("stream {stream} unavailable: {message}")]
    StreamUnavailable {
        /// Affected stream.
        stream: String,
        /// Cause of the escalation.
        message: String,
    },

    /// A retryable failure (remote store hiccup, throttling).
    #[error("transient error: {0}")]
    Transient(String),

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {millis}ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline that elapsed.
        millis: u64,
    },

    /// I/O error occurred during file or network operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a `CannotBuffer` variant.
    #[must_use]
    pub fn cannot_buffer(stream: impl ToString, reason: impl Into<String>) -> Self {
        Self::CannotBuffer {
            stream: stream.to_string(),
            reason: reason.into(),
        }
    }

    /// Wraps a failure to encode a value.
    #[must_use]
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::SerializationError(err.to_string())
    }

    /// Creates a `CorruptedRecord` variant.
    #[must_use]
    pub fn corrupted(location: impl Into<String>, offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptedRecord {
            location: location.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_)
                | Self::Timeout { .. }
                | Self::IoError(_)
                | Self::CannotBuffer { .. }
                | Self::NoMoreWalSlots { .. }
        )
    }

    /// Whether this error is a backpressure signal rather than a failure.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::CannotBuffer { .. } | Self::NoMoreWalSlots { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        // Encoding failures go through `CoreError::serialization` at the call site.
        if err.is_io() {
            Self::IoError(err.into())
        } else {
            Self::DeserializationError(err.to_string())
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
