//! Backend over a document store with a per-record size limit.
//!
//! Content records are split across three collections:
//!
//! - `stores`: one metadata document per [`StoreId`] holding the lease while
//!   reserved, and content type, sizes, status, chunk count and writer
//!   token once committed.
//! - `chunks`: the compressed content, split into bounded chunk documents
//!   keyed by `(store id, writer token, index)`.
//! - `files`: one document per [`FileId`].
//!
//! A commit writes every chunk before the conditional metadata update that
//! marks the record committed, so a committed record always has its full
//! chunk set. Chunks carry the token of the reservation that wrote them and
//! reads only consider chunks whose token matches the committed writer, so
//! leftovers from a writer whose lease lapsed never leak into a read.

use std::collections::HashMap;
use std::thread;

use serde::Serialize;
use tracing::{debug, warn};
use vellum_codec::{group_by_owner, reassemble, split, Chunk};
use vellum_types::{FileId, ProcessingStatus, StoreId};

use crate::clock::Clock;
use crate::document::Collection;
use crate::error::{StoreError, StoreResult};
use crate::record::{FileRecord, FileStore};
use crate::reservation::{Lease, Reservation, Reservations};
use crate::traits::{ContentBackend, FileBackend};

/// Largest chunk payload by default (15 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 15 << 20;

/// Per-record limit of the underlying document store by default (16 MiB).
pub const DEFAULT_MAX_RECORD_BYTES: u64 = 16 << 20;

/// Encoded bytes a chunk document spends on fields other than its data.
const CHUNK_OVERHEAD: u64 = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkedConfig {
    pub chunk_size: usize,
    pub max_record_bytes: u64,
    /// Threads used to write one record's chunks.
    pub write_parallelism: usize,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            write_parallelism: 4,
        }
    }
}

impl ChunkedConfig {
    pub fn validate(&self) -> StoreResult<()> {
        if self.chunk_size == 0 {
            return Err(StoreError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.chunk_size as u64 + CHUNK_OVERHEAD > self.max_record_bytes {
            return Err(StoreError::InvalidConfig(format!(
                "chunk_size {} plus {CHUNK_OVERHEAD} bytes of overhead exceeds the record limit {}",
                self.chunk_size, self.max_record_bytes
            )));
        }
        if self.write_parallelism == 0 {
            return Err(StoreError::InvalidConfig(
                "write_parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ChunkKey {
    store: StoreId,
    writer: u64,
    index: u32,
}

impl ChunkKey {
    fn first(store: StoreId, writer: u64) -> Self {
        Self {
            store,
            writer,
            index: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ChunkDoc {
    store: StoreId,
    writer: u64,
    index: u32,
    data: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
struct StoreMeta {
    content_type: String,
    file_size: u64,
    status: ProcessingStatus,
    compressed_len: u64,
    chunk_count: u32,
    writer: u64,
}

#[derive(Clone, Debug, Serialize)]
struct StoreDoc {
    id: StoreId,
    reserve: Option<Lease>,
    meta: Option<StoreMeta>,
}

impl StoreDoc {
    fn reserved(id: StoreId, lease: Lease) -> Self {
        Self {
            id,
            reserve: Some(lease),
            meta: None,
        }
    }

    fn is_claimable(&self, now_ms: u64) -> bool {
        self.meta.is_none() && self.reserve.map_or(true, |lease| !lease.is_live(now_ms))
    }

    fn is_held_by(&self, token: u64, now_ms: u64) -> bool {
        self.meta.is_none()
            && self
                .reserve
                .is_some_and(|lease| lease.token == token && lease.is_live(now_ms))
    }
}

#[derive(Clone, Debug, Serialize)]
struct FileDoc {
    id: FileId,
    reserve: Option<Lease>,
    record: Option<FileRecord>,
}

impl FileDoc {
    fn is_claimable(&self, now_ms: u64) -> bool {
        self.record.is_none() && self.reserve.map_or(true, |lease| !lease.is_live(now_ms))
    }

    fn is_held_by(&self, token: u64, now_ms: u64) -> bool {
        self.record.is_none()
            && self
                .reserve
                .is_some_and(|lease| lease.token == token && lease.is_live(now_ms))
    }
}

/// Content and file backend over size-limited document collections.
#[derive(Debug)]
pub struct ChunkedBackend {
    config: ChunkedConfig,
    stores: Collection<StoreId, StoreDoc>,
    chunks: Collection<ChunkKey, ChunkDoc>,
    files: Collection<FileId, FileDoc>,
}

impl ChunkedBackend {
    pub fn new(config: ChunkedConfig) -> StoreResult<Self> {
        config.validate()?;
        let limit = config.max_record_bytes;
        Ok(Self {
            config,
            stores: Collection::new("stores", limit),
            chunks: Collection::new("chunks", limit),
            files: Collection::new("files", limit),
        })
    }

    pub fn config(&self) -> &ChunkedConfig {
        &self.config
    }

    /// Number of chunk documents currently held, committed or not.
    pub fn chunk_count(&self) -> StoreResult<usize> {
        self.chunks.len()
    }

    /// Number of file slots held, reserved or committed.
    pub fn file_slot_count(&self) -> StoreResult<usize> {
        self.files.len()
    }

    fn write_chunks(&self, id: StoreId, writer: u64, pieces: Vec<Chunk>) -> StoreResult<()> {
        if pieces.is_empty() {
            return Ok(());
        }
        let lanes = self.config.write_parallelism.min(pieces.len());
        let mut batches: Vec<Vec<(ChunkKey, ChunkDoc)>> = (0..lanes).map(|_| Vec::new()).collect();
        for (i, piece) in pieces.into_iter().enumerate() {
            let key = ChunkKey {
                store: id,
                writer,
                index: piece.index,
            };
            let doc = ChunkDoc {
                store: id,
                writer,
                index: piece.index,
                data: piece.data,
            };
            batches[i % lanes].push((key, doc));
        }

        thread::scope(|s| {
            let handles: Vec<_> = batches
                .into_iter()
                .map(|batch| {
                    s.spawn(move || {
                        batch
                            .into_iter()
                            .try_for_each(|(key, doc)| self.chunks.insert(key, doc))
                    })
                })
                .collect();
            let mut result = Ok(());
            for handle in handles {
                let outcome = handle.join().unwrap_or(Err(StoreError::WriterPanicked));
                if result.is_ok() {
                    result = outcome;
                }
            }
            result
        })
    }

    /// Delete chunks for `id` written by tokens `doomed` accepts.
    fn purge_chunks<F>(&self, id: &StoreId, doomed: F) -> StoreResult<usize>
    where
        F: Fn(u64) -> bool,
    {
        self.chunks.delete_range_where(
            &ChunkKey::first(*id, 0),
            |key| key.store == *id,
            |key, _| doomed(key.writer),
        )
    }

    /// Best-effort cleanup of a failed writer's chunks.
    fn discard_chunks(&self, id: &StoreId, writer: u64) {
        if let Err(err) = self.purge_chunks(id, |w| w == writer) {
            warn!(id = %id, error = %err, "failed to discard chunks of abandoned write");
        }
    }

    fn load_content(&self, id: &StoreId, meta: &StoreMeta) -> StoreResult<Vec<u8>> {
        let found = self.chunks.scan_from(&ChunkKey::first(*id, meta.writer), |key| {
            key.store == *id && key.writer == meta.writer
        })?;
        let pieces = found
            .into_iter()
            .map(|(key, doc)| Chunk::new(key.index, doc.data))
            .collect();
        assemble(id, meta, pieces)
    }
}

fn assemble(id: &StoreId, meta: &StoreMeta, pieces: Vec<Chunk>) -> StoreResult<Vec<u8>> {
    if pieces.len() != meta.chunk_count as usize {
        return Err(StoreError::CorruptData(format!(
            "{id}: expected {} chunks, found {}",
            meta.chunk_count,
            pieces.len()
        )));
    }
    let content = reassemble(pieces)?;
    if content.len() as u64 != meta.compressed_len {
        return Err(StoreError::CorruptData(format!(
            "{id}: expected {} content bytes, found {}",
            meta.compressed_len,
            content.len()
        )));
    }
    Ok(content)
}

fn to_record(id: StoreId, meta: StoreMeta, content: Vec<u8>) -> FileStore {
    FileStore {
        id,
        content,
        content_type: meta.content_type,
        file_size: meta.file_size,
        status: meta.status,
    }
}

impl Reservations<StoreId> for ChunkedBackend {
    type Payload = FileStore;

    fn try_claim(&self, id: &StoreId, lease: &Lease, now_ms: u64) -> StoreResult<bool> {
        let claimed = self
            .stores
            .upsert_if(*id, StoreDoc::reserved(*id, *lease), |doc| {
                doc.is_claimable(now_ms)
            })?;
        if claimed {
            let token = lease.token;
            let purged = self.purge_chunks(id, |w| w != token)?;
            if purged > 0 {
                debug!(id = %id, purged, "purged chunks of expired reservation");
            }
        }
        Ok(claimed)
    }

    fn commit(
        &self,
        reservation: &Reservation<StoreId>,
        payload: FileStore,
        clock: &dyn Clock,
    ) -> StoreResult<()> {
        let id = reservation.id;
        let token = reservation.lease.token;
        if payload.id != id {
            return Err(StoreError::IdMismatch {
                reserved: id.to_string(),
                payload: payload.id.to_string(),
            });
        }
        match self.stores.find(&id)? {
            Some(doc) if doc.is_held_by(token, clock.now_ms()) => {}
            _ => return Err(reservation.not_reserved()),
        }

        let pieces = split(&payload.content, self.config.chunk_size)?;
        let chunk_count = pieces.len() as u32;
        if let Err(err) = self.write_chunks(id, token, pieces) {
            self.discard_chunks(&id, token);
            return Err(err);
        }

        let meta = StoreMeta {
            content_type: payload.content_type,
            file_size: payload.file_size,
            status: payload.status,
            compressed_len: payload.content.len() as u64,
            chunk_count,
            writer: token,
        };
        let committed = self.stores.update_if(
            &id,
            |doc| doc.is_held_by(token, clock.now_ms()),
            |doc| {
                doc.reserve = None;
                doc.meta = Some(meta);
            },
        );
        match committed {
            Ok(true) => {
                debug!(id = %id, chunks = chunk_count, "committed content record");
                Ok(())
            }
            Ok(false) => {
                warn!(id = %id, "reservation lost before commit, discarding chunks");
                self.discard_chunks(&id, token);
                Err(reservation.not_reserved())
            }
            Err(err) => {
                self.discard_chunks(&id, token);
                Err(err)
            }
        }
    }

    fn release(&self, reservation: &Reservation<StoreId>) -> StoreResult<bool> {
        let token = reservation.lease.token;
        let released = self.stores.delete_if(&reservation.id, |doc| {
            doc.meta.is_none() && doc.reserve.is_some_and(|lease| lease.token == token)
        })?;
        if released {
            self.discard_chunks(&reservation.id, token);
        }
        Ok(released)
    }
}

impl ContentBackend for ChunkedBackend {
    fn get_store(&self, id: &StoreId) -> StoreResult<Option<FileStore>> {
        let Some(meta) = self.stores.find(id)?.and_then(|doc| doc.meta) else {
            return Ok(None);
        };
        let content = self.load_content(id, &meta)?;
        Ok(Some(to_record(*id, meta, content)))
    }

    fn match_hash(&self, hash: u32) -> StoreResult<Vec<FileStore>> {
        let committed: Vec<(StoreId, StoreMeta)> = self
            .stores
            .scan_from(&StoreId::new(hash, 0), |key| key.hash == hash)?
            .into_iter()
            .filter_map(|(id, doc)| doc.meta.map(|meta| (id, meta)))
            .collect();
        if committed.is_empty() {
            return Ok(Vec::new());
        }

        let writers: HashMap<StoreId, u64> =
            committed.iter().map(|(id, meta)| (*id, meta.writer)).collect();
        let found = self
            .chunks
            .scan_from(&ChunkKey::first(StoreId::new(hash, 0), 0), |key| {
                key.store.hash == hash
            })?;
        let mut groups = group_by_owner(
            found
                .into_iter()
                .filter(|(key, _)| writers.get(&key.store) == Some(&key.writer))
                .map(|(key, doc)| (key.store, Chunk::new(key.index, doc.data))),
        );

        let mut records = Vec::with_capacity(committed.len());
        for (id, meta) in committed {
            let pieces = groups.remove(&id).unwrap_or_default();
            match assemble(&id, &meta, pieces) {
                Ok(content) => records.push(to_record(id, meta, content)),
                Err(err) => {
                    warn!(id = %id, error = %err, "skipping unreadable record in hash match");
                }
            }
        }
        Ok(records)
    }

    fn update_status(&self, id: &StoreId, status: ProcessingStatus) -> StoreResult<()> {
        let updated = self.stores.update_if(
            id,
            |doc| doc.meta.is_some(),
            |doc| {
                if let Some(meta) = doc.meta.as_mut() {
                    meta.status = status;
                }
            },
        )?;
        if !updated {
            return Err(StoreError::not_found("file store", id));
        }
        debug!(id = %id, "updated processing status");
        Ok(())
    }
}

impl Reservations<FileId> for ChunkedBackend {
    type Payload = FileRecord;

    fn try_claim(&self, id: &FileId, lease: &Lease, now_ms: u64) -> StoreResult<bool> {
        let doc = FileDoc {
            id: id.clone(),
            reserve: Some(*lease),
            record: None,
        };
        self.files
            .upsert_if(id.clone(), doc, |doc| doc.is_claimable(now_ms))
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
        let token = reservation.lease.token;
        let committed = self.files.update_if(
            &reservation.id,
            |doc| doc.is_held_by(token, clock.now_ms()),
            |doc| {
                doc.reserve = None;
                doc.record = Some(payload);
            },
        )?;
        if !committed {
            return Err(reservation.not_reserved());
        }
        Ok(())
    }

    fn release(&self, reservation: &Reservation<FileId>) -> StoreResult<bool> {
        let token = reservation.lease.token;
        self.files.delete_if(&reservation.id, |doc| {
            doc.record.is_none() && doc.reserve.is_some_and(|lease| lease.token == token)
        })
    }
}

impl FileBackend for ChunkedBackend {
    fn get_file(&self, id: &FileId) -> StoreResult<Option<FileRecord>> {
        Ok(self.files.find(id)?.and_then(|doc| doc.record))
    }

    fn update_file(&self, record: &FileRecord) -> StoreResult<()> {
        let updated = self.files.update_if(
            &record.id,
            |doc| doc.record.is_some(),
            |doc| doc.record = Some(record.clone()),
        )?;
        if !updated {
            return Err(StoreError::not_found("file", &record.id));
        }
        Ok(())
    }

    fn remove_file(&self, id: &FileId) -> StoreResult<()> {
        if !self.files.delete_if(id, |doc| doc.record.is_some())? {
            return Err(StoreError::not_found("file", id));
        }
        Ok(())
    }

    fn files_for_store(&self, store: &StoreId) -> StoreResult<Vec<FileRecord>> {
        let start = FileId::with_stamp(*store, Vec::new());
        Ok(self
            .files
            .scan_from(&start, |key| key.store == *store)?
            .into_iter()
            .filter_map(|(_, doc)| doc.record)
            .collect())
    }
}
