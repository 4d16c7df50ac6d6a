use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use vellum_types::{FileId, ProcessingStatus, StoreId};

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::record::{FileRecord, FileStore};
use crate::reservation::{Lease, Reservable, Reservation, Reservations, Slot};
use crate::traits::{ContentBackend, FileBackend};

/// In-memory backend for tests and embedding.
///
/// Both ID spaces sit behind one coarse `Mutex`, so every claim, commit and
/// read is linearizable. Records are cloned on the way in and out.
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    stores: HashMap<StoreId, Slot<FileStore>>,
    files: HashMap<FileId, Slot<FileRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory backend"))
    }

    /// Number of committed content records.
    pub fn store_count(&self) -> StoreResult<usize> {
        Ok(self
            .lock()?
            .stores
            .values()
            .filter(|slot| slot.committed().is_some())
            .count())
    }

    /// Number of committed file records.
    pub fn file_count(&self) -> StoreResult<usize> {
        Ok(self
            .lock()?
            .files
            .values()
            .filter(|slot| slot.committed().is_some())
            .count())
    }

    /// Compressed bytes across all committed content records.
    pub fn total_bytes(&self) -> StoreResult<u64> {
        Ok(self
            .lock()?
            .stores
            .values()
            .filter_map(Slot::committed)
            .map(FileStore::compressed_len)
            .sum())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn claim<K: Reservable, P>(
    slots: &mut HashMap<K, Slot<P>>,
    id: &K,
    lease: &Lease,
    now_ms: u64,
) -> bool {
    match slots.get_mut(id) {
        None => {
            slots.insert(id.clone(), Slot::Reserved(*lease));
            true
        }
        Some(slot) if slot.is_claimable(now_ms) => {
            debug!(id = %id, "reclaiming expired reservation");
            *slot = Slot::Reserved(*lease);
            true
        }
        Some(_) => false,
    }
}

fn commit<K: Reservable, P>(
    slots: &mut HashMap<K, Slot<P>>,
    reservation: &Reservation<K>,
    payload: P,
    now_ms: u64,
) -> StoreResult<()> {
    match slots.get_mut(&reservation.id) {
        Some(slot) if slot.is_held_by(reservation.lease.token, now_ms) => {
            *slot = Slot::Committed(payload);
            Ok(())
        }
        _ => Err(reservation.not_reserved()),
    }
}

fn release<K: Reservable, P>(
    slots: &mut HashMap<K, Slot<P>>,
    reservation: &Reservation<K>,
) -> bool {
    let held = matches!(
        slots.get(&reservation.id),
        Some(Slot::Reserved(lease)) if lease.token == reservation.lease.token
    );
    if held {
        slots.remove(&reservation.id);
    }
    held
}

impl Reservations<StoreId> for InMemoryBackend {
    type Payload = FileStore;

    fn try_claim(&self, id: &StoreId, lease: &Lease, now_ms: u64) -> StoreResult<bool> {
        Ok(claim(&mut self.lock()?.stores, id, lease, now_ms))
    }

    fn commit(
        &self,
        reservation: &Reservation<StoreId>,
        payload: FileStore,
        clock: &dyn Clock,
    ) -> StoreResult<()> {
        if payload.id != reservation.id {
            return Err(StoreError::IdMismatch {
                reserved: reservation.id.to_string(),
                payload: payload.id.to_string(),
            });
        }
        let mut state = self.lock()?;
        commit(&mut state.stores, reservation, payload, clock.now_ms())
    }

    fn release(&self, reservation: &Reservation<StoreId>) -> StoreResult<bool> {
        Ok(release(&mut self.lock()?.stores, reservation))
    }
}

impl ContentBackend for InMemoryBackend {
    fn get_store(&self, id: &StoreId) -> StoreResult<Option<FileStore>> {
        Ok(self
            .lock()?
            .stores
            .get(id)
            .and_then(Slot::committed)
            .cloned())
    }

    fn match_hash(&self, hash: u32) -> StoreResult<Vec<FileStore>> {
        let state = self.lock()?;
        let mut matches: Vec<FileStore> = state
            .stores
            .iter()
            .filter(|(id, _)| id.hash == hash)
            .filter_map(|(_, slot)| slot.committed().cloned())
            .collect();
        matches.sort_by_key(|record| record.id);
        Ok(matches)
    }

    fn update_status(&self, id: &StoreId, status: ProcessingStatus) -> StoreResult<()> {
        let mut state = self.lock()?;
        match state.stores.get_mut(id) {
            Some(Slot::Committed(record)) => {
                record.status = status;
                Ok(())
            }
            _ => Err(StoreError::not_found("file store", id)),
        }
    }
}

impl Reservations<FileId> for InMemoryBackend {
    type Payload = FileRecord;

    fn try_claim(&self, id: &FileId, lease: &Lease, now_ms: u64) -> StoreResult<bool> {
        Ok(claim(&mut self.lock()?.files, id, lease, now_ms))
    }

    fn commit(
        &self,
        reservation: &Reservation<FileId>,
        payload: FileRecord,
        clock: &dyn Clock,
    ) -> StoreResult<()> {
        if payload.id != reservation.id {
            return Err(StoreError::IdMismatch {
                reserved: reservation.id.to_string(),
                payload: payload.id.to_string(),
            });
        }
        let mut state = self.lock()?;
        commit(&mut state.files, reservation, payload, clock.now_ms())
    }

    fn release(&self, reservation: &Reservation<FileId>) -> StoreResult<bool> {
        Ok(release(&mut self.lock()?.files, reservation))
    }
}

impl FileBackend for InMemoryBackend {
    fn get_file(&self, id: &FileId) -> StoreResult<Option<FileRecord>> {
        Ok(self
            .lock()?
            .files
            .get(id)
            .and_then(Slot::committed)
            .cloned())
    }

    fn update_file(&self, record: &FileRecord) -> StoreResult<()> {
        let mut state = self.lock()?;
        match state.files.get_mut(&record.id) {
            Some(Slot::Committed(existing)) => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(StoreError::not_found("file", &record.id)),
        }
    }

    fn remove_file(&self, id: &FileId) -> StoreResult<()> {
        let mut state = self.lock()?;
        match state.files.get(id) {
            Some(Slot::Committed(_)) => {
                state.files.remove(id);
                Ok(())
            }
            _ => Err(StoreError::not_found("file", id)),
        }
    }

    fn files_for_store(&self, store: &StoreId) -> StoreResult<Vec<FileRecord>> {
        let state = self.lock()?;
        let mut files: Vec<FileRecord> = state
            .files
            .iter()
            .filter(|(id, _)| id.store == *store)
            .filter_map(|(_, slot)| slot.committed().cloned())
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (stores, files) = match self.state.lock() {
            Ok(state) => (state.stores.len(), state.files.len()),
            Err(_) => (0, 0),
        };
        f.debug_struct("InMemoryBackend")
            .field("store_slots", &stores)
            .field("file_slots", &files)
            .finish()
    }
}
