use vellum_types::{FileId, ProcessingStatus, StoreId};

use crate::error::{StoreError, StoreResult};
use crate::record::{FileRecord, FileStore};
use crate::reservation::Reservations;

/// Backend for content records keyed by [`StoreId`].
///
/// All implementations must satisfy these invariants:
/// - Only committed records are visible to reads. A reserved ID reads as
///   absent.
/// - Returned records are private copies; mutating them never changes
///   stored state.
/// - Once committed, a record's content is never rewritten. Only its
///   status may change.
pub trait ContentBackend: Reservations<StoreId, Payload = FileStore> {
    /// Read a committed record.
    ///
    /// Returns `Ok(None)` if the ID is free or only reserved.
    fn get_store(&self, id: &StoreId) -> StoreResult<Option<FileStore>>;

    /// Every committed record whose ID carries `hash`, possibly empty.
    /// Records whose stored form cannot be read back are left out.
    fn match_hash(&self, hash: u32) -> StoreResult<Vec<FileStore>>;

    /// Replace the processing status of a committed record.
    ///
    /// Fails with [`StoreError::NotFound`] if no committed record exists.
    fn update_status(&self, id: &StoreId, status: ProcessingStatus) -> StoreResult<()>;

    /// Read a committed record or fail with [`StoreError::NotFound`].
    fn require_store(&self, id: &StoreId) -> StoreResult<FileStore> {
        self.get_store(id)?
            .ok_or_else(|| StoreError::not_found("file store", id))
    }

    /// Read several records in one call.
    ///
    /// Default implementation calls `get_store()` for each ID.
    fn get_stores(&self, ids: &[StoreId]) -> StoreResult<Vec<Option<FileStore>>> {
        ids.iter().map(|id| self.get_store(id)).collect()
    }
}

/// Backend for file records keyed by [`FileId`].
pub trait FileBackend: Reservations<FileId, Payload = FileRecord> {
    /// Read a committed file record. Reserved IDs read as absent.
    fn get_file(&self, id: &FileId) -> StoreResult<Option<FileRecord>>;

    /// Replace a committed file record. The record's ID selects the slot.
    fn update_file(&self, record: &FileRecord) -> StoreResult<()>;

    /// Delete a committed file record.
    ///
    /// The referenced blob is left in place; other files may share it.
    fn remove_file(&self, id: &FileId) -> StoreResult<()>;

    /// All committed files whose bytes live in `store`.
    fn files_for_store(&self, store: &StoreId) -> StoreResult<Vec<FileRecord>>;

    fn require_file(&self, id: &FileId) -> StoreResult<FileRecord> {
        self.get_file(id)?
            .ok_or_else(|| StoreError::not_found("file", id))
    }
}
