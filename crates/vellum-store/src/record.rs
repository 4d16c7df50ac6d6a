use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vellum_codec::decompress_exact;
use vellum_types::{FileId, ProcessingStatus, StoreId};

use crate::error::StoreResult;

/// A stored blob: compressed content plus its metadata.
///
/// `content` holds the zstd-compressed bytes; `file_size` is the length of the
/// original, uncompressed content. The record is keyed by `id` once committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStore {
    pub id: StoreId,
    pub content: Vec<u8>,
    pub content_type: String,
    pub file_size: u64,
    pub status: ProcessingStatus,
}

impl FileStore {
    /// A freshly ingested record, status [`ProcessingStatus::InProgress`].
    pub fn new(
        id: StoreId,
        content: Vec<u8>,
        content_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            id,
            content,
            content_type: content_type.into(),
            file_size,
            status: ProcessingStatus::InProgress,
        }
    }

    /// Same record under a different ID.
    #[must_use]
    pub fn with_id(mut self, id: StoreId) -> Self {
        self.id = id;
        self
    }

    pub fn compressed_len(&self) -> u64 {
        self.content.len() as u64
    }

    /// Decompress `content`, checking the length against `file_size`.
    pub fn decompressed(&self) -> StoreResult<Vec<u8>> {
        Ok(decompress_exact(&self.content, self.file_size)?)
    }
}

/// Opaque reference to the principal that owns a file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(pub String);

impl OwnerRef {
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-facing file over a stored blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub name: String,
    pub owner: OwnerRef,
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    /// A file record stamped with the current time.
    pub fn new(id: FileId, name: impl Into<String>, owner: OwnerRef) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            uploaded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: FileId) -> Self {
        self.id = id;
        self
    }

    /// The blob this file's bytes live in.
    pub fn store_id(&self) -> StoreId {
        self.id.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use vellum_codec::{compress, DEFAULT_COMPRESSION_LEVEL};

    #[test]
    fn new_file_store_is_in_progress() {
        let record = FileStore::new(StoreId::new(1, 2), vec![], "text/plain", 0);
        assert!(record.status.is_in_progress());
        assert_eq!(record.content_type, "text/plain");
    }

    #[test]
    fn decompressed_round_trip() {
        let data = b"hello world".to_vec();
        let content = compress(&data, DEFAULT_COMPRESSION_LEVEL).unwrap();
        let record = FileStore::new(StoreId::new(1, 2), content, "text/plain", data.len() as u64);
        assert_eq!(record.decompressed().unwrap(), data);
    }

    #[test]
    fn decompressed_rejects_size_mismatch() {
        let content = compress(b"hello world", DEFAULT_COMPRESSION_LEVEL).unwrap();
        let record = FileStore::new(StoreId::new(1, 2), content, "text/plain", 4);
        assert!(matches!(
            record.decompressed().unwrap_err(),
            StoreError::CorruptData(_)
        ));
    }

    #[test]
    fn file_record_points_at_its_store() {
        let store = StoreId::new(0xabcd, 7);
        let record = FileRecord::new(
            FileId::with_stamp(store, vec![1]),
            "notes.txt",
            OwnerRef::new("user-1"),
        );
        assert_eq!(record.store_id(), store);
        assert_eq!(record.owner.to_string(), "user-1");
    }
}
