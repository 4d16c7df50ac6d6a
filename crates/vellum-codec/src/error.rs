use std::io;

/// Errors from hashing, compression, and chunk codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input stream failed while being read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A chunk set or compressed payload violates its invariants.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Compression of a payload failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Chunk size must be at least one byte.
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    /// The payload needs more chunks than a `u32` index can address.
    #[error("payload of {len} bytes needs too many chunks of {chunk_size} bytes")]
    TooManyChunks { len: usize, chunk_size: usize },
}

impl CodecError {
    /// Shorthand for a [`CodecError::CorruptData`] with a formatted reason.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptData(reason.into())
    }
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
