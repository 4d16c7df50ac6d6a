use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Encoded length of a [`StoreId`] in bytes (4 hash + 2 stamp).
pub const STORE_ID_LEN: usize = 6;

/// Content address of one unique compressed blob.
///
/// `hash` is a 32-bit checksum of the uncompressed content. Two different
/// blobs may share a hash; they are told apart by `stamp`, which is mutated
/// whenever a reservation for the candidate ID collides. Equal `StoreId`s
/// always reference byte-identical content, but equal hashes do not.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId {
    pub hash: u32,
    pub stamp: u16,
}

impl StoreId {
    /// Create a `StoreId` from an explicit hash and stamp.
    pub const fn new(hash: u32, stamp: u16) -> Self {
        Self { hash, stamp }
    }

    /// A new ID with the same hash and the next stamp.
    ///
    /// The stamp wraps, so 65 536 distinct IDs are visited before the
    /// sequence repeats.
    #[must_use]
    pub fn mutate(&self) -> Self {
        Self {
            hash: self.hash,
            stamp: self.stamp.wrapping_add(1),
        }
    }

    /// Pack into a single integer: `stamp << 32 | hash`.
    pub fn to_num(&self) -> i64 {
        (i64::from(self.stamp) << 32) | i64::from(self.hash)
    }

    /// Little-endian wire bytes: hash followed by stamp.
    pub fn to_bytes(&self) -> [u8; STORE_ID_LEN] {
        let mut out = [0u8; STORE_ID_LEN];
        out[..4].copy_from_slice(&self.hash.to_le_bytes());
        out[4..].copy_from_slice(&self.stamp.to_le_bytes());
        out
    }

    /// Parse the first [`STORE_ID_LEN`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() < STORE_ID_LEN {
            return Err(TypeError::InvalidLength {
                expected: STORE_ID_LEN,
                actual: bytes.len(),
            });
        }
        let hash = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let stamp = u16::from_le_bytes([bytes[4], bytes[5]]);
        Ok(Self { hash, stamp })
    }

    /// Printable token (12 hex characters).
    pub fn encode(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Inverse of [`StoreId::encode`].
    pub fn decode(token: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(token).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != STORE_ID_LEN {
            return Err(TypeError::InvalidLength {
                expected: STORE_ID_LEN,
                actual: bytes.len(),
            });
        }
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({:08x}/{})", self.hash, self.stamp)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for StoreId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
