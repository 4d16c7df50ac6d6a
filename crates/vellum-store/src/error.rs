use std::fmt;

use vellum_codec::CodecError;

/// Errors from reservation and backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record does not exist (or is not committed yet).
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Commit attempted without a live reservation held by the caller.
    #[error("id has not been reserved for insert: {0}")]
    IdNotReserved(String),

    /// The payload passed to commit carries a different ID than the reservation.
    #[error("payload id {payload} does not match reserved id {reserved}")]
    IdMismatch { reserved: String, payload: String },

    /// Stored bytes violate an invariant (chunk set, size, compression).
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// The operation's deadline passed before it completed.
    #[error("operation timed out")]
    Timeout,

    /// The reserve loop hit its attempt cap without claiming an ID.
    #[error("could not reserve an id starting from {candidate} after {attempts} attempts")]
    ReservationExhausted { candidate: String, attempts: u32 },

    /// A record exceeds the backend's per-record size limit.
    #[error("record in {collection} is {size} bytes, limit is {limit}")]
    RecordTooLarge {
        collection: &'static str,
        size: u64,
        limit: u64,
    },

    /// A unique key already exists in a collection.
    #[error("duplicate key in {collection}: {key}")]
    DuplicateKey {
        collection: &'static str,
        key: String,
    },

    /// Backend configuration is unusable.
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock guarding backend state was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// A background chunk writer panicked before finishing.
    #[error("chunk writer thread panicked")]
    WriterPanicked,

    /// Compression or chunking failure other than corruption.
    #[error("codec error: {0}")]
    Codec(CodecError),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns `true` for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status a routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Timeout => 504,
            _ => 500,
        }
    }
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::CorruptData(reason) => Self::CorruptData(reason),
            other => Self::Codec(other),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
