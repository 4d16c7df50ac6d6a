use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use vellum_types::StoreId;

use crate::compression::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{CodecError, CodecResult};

const READ_BUF_LEN: usize = 64 * 1024;

/// Streaming CRC-32 content checksum.
///
/// The checksum is the `hash` half of a [`StoreId`]. It only narrows the set
/// of dedup candidates; content equality is always decided by comparing
/// bytes.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: crc32fast::Hasher,
    len: u64,
}

impl ContentHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more content.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if nothing has been fed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Final checksum value.
    pub fn finalize(self) -> u32 {
        self.inner.finalize()
    }

    /// Checksum of an in-memory slice.
    pub fn checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    /// Checksum a reader to exhaustion, returning `(checksum, bytes_read)`.
    pub fn checksum_reader<R: Read>(reader: &mut R) -> io::Result<(u32, u64)> {
        let mut hasher = Self::new();
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        let len = hasher.len();
        Ok((hasher.finalize(), len))
    }
}

/// Stamp seeded from a coarse time value.
///
/// Only spreads first-try stamps apart; it carries no uniqueness guarantee.
pub fn seed_stamp() -> u16 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u16)
        .unwrap_or_default()
}

/// Compute a candidate [`StoreId`] by reading `reader` once end-to-end.
pub fn compute_store_id<R: Read>(reader: &mut R) -> CodecResult<StoreId> {
    compute_store_id_with_stamp(reader, seed_stamp())
}

/// Compute a candidate [`StoreId`] with an explicit stamp.
pub fn compute_store_id_with_stamp<R: Read>(reader: &mut R, stamp: u16) -> CodecResult<StoreId> {
    let (hash, _) = ContentHasher::checksum_reader(reader)?;
    Ok(StoreId::new(hash, stamp))
}

/// Result of a single hash-and-compress pass over a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDigest {
    /// Checksum of the uncompressed bytes.
    pub hash: u32,
    /// Length of the uncompressed bytes.
    pub size: u64,
    /// zstd-compressed bytes.
    pub compressed: Vec<u8>,
}

impl ContentDigest {
    /// Hash and compress `reader` in one pass at the default level.
    pub fn from_reader<R: Read>(reader: &mut R) -> CodecResult<Self> {
        Self::from_reader_with_level(reader, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Hash and compress `reader` in one pass at an explicit zstd level.
    pub fn from_reader_with_level<R: Read>(reader: &mut R, level: i32) -> CodecResult<Self> {
        let mut hasher = ContentHasher::new();
        let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), level)
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            encoder
                .write_all(&buf[..n])
                .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        }
        let compressed = encoder
            .finish()
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        let size = hasher.len();
        Ok(Self {
            hash: hasher.finalize(),
            size,
            compressed,
        })
    }

    /// Hash and compress an in-memory slice.
    pub fn from_slice(data: &[u8], level: i32) -> CodecResult<Self> {
        Self::from_reader_with_level(&mut &data[..], level)
    }

    /// Candidate store ID for this content with the given stamp.
    pub fn store_id(&self, stamp: u16) -> StoreId {
        StoreId::new(self.hash, stamp)
    }
}
