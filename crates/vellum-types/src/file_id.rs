use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;
use crate::stamp::next_stamp_byte;
use crate::store_id::{StoreId, STORE_ID_LEN};

/// Identifier of a user-facing file entity.
///
/// A `FileId` always references the [`StoreId`] whose blob holds the file's
/// bytes; many files may share one blob. The variable-length `stamp`
/// disambiguates files over the same content and grows by one byte on every
/// [`mutate`](FileId::mutate).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub store: StoreId,
    pub stamp: Vec<u8>,
}

impl FileId {
    /// A fresh candidate ID for a file over `store`, with one stamp byte.
    pub fn new(store: StoreId) -> Self {
        Self {
            store,
            stamp: vec![next_stamp_byte()],
        }
    }

    /// Create a `FileId` with an explicit stamp.
    pub fn with_stamp(store: StoreId, stamp: Vec<u8>) -> Self {
        Self { store, stamp }
    }

    /// A new ID over the same store with one more stamp byte.
    #[must_use]
    pub fn mutate(&self) -> Self {
        let mut stamp = self.stamp.clone();
        stamp.push(next_stamp_byte());
        Self {
            store: self.store,
            stamp,
        }
    }

    /// Printable token: hex of the store ID bytes followed by the stamp.
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(STORE_ID_LEN + self.stamp.len());
        bytes.extend_from_slice(&self.store.to_bytes());
        bytes.extend_from_slice(&self.stamp);
        hex::encode(bytes)
    }

    /// Inverse of [`FileId::encode`].
    pub fn decode(token: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(token).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let store = StoreId::from_bytes(&bytes)?;
        if bytes.len() == STORE_ID_LEN {
            return Err(TypeError::EmptyStamp);
        }
        Ok(Self {
            store,
            stamp: bytes[STORE_ID_LEN..].to_vec(),
        })
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.encode())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for FileId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::decode(&token).map_err(serde::de::Error::custom)
    }
}
