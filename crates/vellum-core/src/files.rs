use std::sync::Arc;

use tracing::debug;
use vellum_store::{Clock, FileBackend, FileRecord, OwnerRef, Reservation, Reserver, SystemClock};
use vellum_types::{Deadline, FileId, StoreId};

use crate::config::StoreConfig;
use crate::error::CoreResult;

/// The naming layer: user-facing file records over stored blobs.
///
/// File IDs go through the same reserve/commit protocol as blobs. A file
/// only references its blob; removing the file leaves the blob in place.
pub struct FileIndex<B> {
    backend: Arc<B>,
    reserver: Reserver,
}

impl<B: FileBackend> FileIndex<B> {
    pub fn new(backend: Arc<B>, config: &StoreConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<B>, config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            reserver: Reserver::new(config.reservation_policy(), clock),
        }
    }

    /// A fresh candidate ID for a file over `store`.
    pub fn new_file_id(&self, store: StoreId) -> FileId {
        FileId::new(store)
    }

    pub fn reserve(
        &self,
        candidate: FileId,
        deadline: &Deadline,
    ) -> CoreResult<Reservation<FileId>> {
        Ok(self
            .reserver
            .reserve(self.backend.as_ref(), candidate, deadline)?)
    }

    /// Commit a file record under `reservation`.
    pub fn insert(
        &self,
        reservation: &Reservation<FileId>,
        name: &str,
        owner: OwnerRef,
    ) -> CoreResult<FileRecord> {
        let record = FileRecord::new(reservation.id.clone(), name, owner);
        self.reserver
            .commit(self.backend.as_ref(), reservation, record.clone())?;
        debug!(id = %record.id, name = %record.name, "inserted file record");
        Ok(record)
    }

    /// Give up a reservation without inserting.
    pub fn release(&self, reservation: &Reservation<FileId>) -> CoreResult<bool> {
        Ok(self.reserver.release(self.backend.as_ref(), reservation)?)
    }

    pub fn get(&self, id: &FileId) -> CoreResult<FileRecord> {
        Ok(self.backend.require_file(id)?)
    }

    pub fn rename(&self, id: &FileId, name: &str) -> CoreResult<FileRecord> {
        let mut record = self.backend.require_file(id)?;
        record.name = name.to_string();
        self.backend.update_file(&record)?;
        Ok(record)
    }

    pub fn remove(&self, id: &FileId) -> CoreResult<()> {
        self.backend.remove_file(id)?;
        debug!(id = %id, "removed file record");
        Ok(())
    }

    /// Files whose bytes live in `store`.
    pub fn files_for_store(&self, store: &StoreId) -> CoreResult<Vec<FileRecord>> {
        Ok(self.backend.files_for_store(store)?)
    }
}

impl<B> std::fmt::Debug for FileIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndex")
            .field("reserver", &self.reserver)
            .finish()
    }
}
