//! Ingest, dedup and retrieval of content blobs.

use std::io::Read;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use vellum_codec::{seed_stamp, ContentDigest};
use vellum_store::{
    Clock, ContentBackend, FileStore, Reservation, Reserver, StoreError, SystemClock,
};
use vellum_types::{Deadline, ProcessingStatus, StoreId};

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};

/// Outcome of an ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ingested {
    pub record: FileStore,
    /// `true` when the content was already stored and nothing was written.
    pub deduped: bool,
}

impl Ingested {
    pub fn id(&self) -> StoreId {
        self.record.id
    }

    pub fn file_size(&self) -> u64 {
        self.record.file_size
    }
}

/// Decompressed content with its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retrieved {
    pub id: StoreId,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_size: u64,
    pub status: ProcessingStatus,
}

fn check(deadline: &Deadline) -> CoreResult<()> {
    if deadline.is_expired() {
        return Err(StoreError::Timeout.into());
    }
    Ok(())
}

/// Number of per-hash ingest locks.
const INGEST_STRIPES: usize = 64;

/// Content-addressed blob store over a [`ContentBackend`].
///
/// Identical content is stored once. Content whose checksum collides with a
/// different blob is stored under a mutated [`StoreId`], so equal IDs always
/// mean equal bytes.
///
/// Ingests of content with the same checksum are serialized within one
/// `ContentStore`, so concurrent uploads of the same bytes produce a single
/// record. Separate stores sharing a backend only have the late re-check.
pub struct ContentStore<B> {
    backend: Arc<B>,
    reserver: Reserver,
    compression_level: i32,
    ingest_locks: Box<[Mutex<()>]>,
}

impl<B: ContentBackend> ContentStore<B> {
    pub fn new(backend: Arc<B>, config: &StoreConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<B>, config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            reserver: Reserver::new(config.reservation_policy(), clock),
            compression_level: config.compression_level,
            ingest_locks: (0..INGEST_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Store `data` unless identical content is already present.
    ///
    /// Hashing and compression happen in one pass over the input. Existing
    /// records with the same checksum are compared byte for byte; only an
    /// exact match counts as a duplicate.
    pub fn ingest(
        &self,
        data: &[u8],
        content_type: &str,
        deadline: &Deadline,
    ) -> CoreResult<Ingested> {
        check(deadline)?;
        let digest = ContentDigest::from_slice(data, self.compression_level)?;
        let candidate = digest.store_id(seed_stamp());
        debug!(
            hash = format_args!("{:08x}", candidate.hash),
            size = digest.size,
            compressed = digest.compressed.len(),
            "hashed content"
        );

        check(deadline)?;
        let _guard = self.ingest_locks[candidate.hash as usize % self.ingest_locks.len()]
            .lock()
            .map_err(|_| StoreError::LockPoisoned("ingest"))?;
        if let Some(existing) = self.find_duplicate(candidate.hash, data, &digest.compressed)? {
            info!(id = %existing.id, "content already stored");
            return Ok(Ingested {
                record: existing,
                deduped: true,
            });
        }

        let reservation = self
            .reserver
            .reserve(self.backend.as_ref(), candidate, deadline)?;

        // A writer on another store may have committed the same bytes.
        let late = self.find_duplicate(candidate.hash, data, &digest.compressed);
        match late {
            Ok(Some(existing)) => {
                self.abandon(&reservation);
                info!(id = %existing.id, "content stored concurrently, releasing reservation");
                return Ok(Ingested {
                    record: existing,
                    deduped: true,
                });
            }
            Ok(None) => {}
            Err(err) => {
                self.abandon(&reservation);
                return Err(err);
            }
        }
        if deadline.is_expired() {
            self.abandon(&reservation);
            return Err(StoreError::Timeout.into());
        }

        let record = FileStore::new(reservation.id, digest.compressed, content_type, digest.size);
        if let Err(err) = self
            .reserver
            .commit(self.backend.as_ref(), &reservation, record.clone())
        {
            self.abandon(&reservation);
            return Err(err.into());
        }
        info!(
            id = %record.id,
            size = record.file_size,
            content_type = %record.content_type,
            "stored new content"
        );
        Ok(Ingested {
            record,
            deduped: false,
        })
    }

    /// Read `reader` to the end and ingest the result.
    pub fn ingest_reader<R: Read>(
        &self,
        mut reader: R,
        content_type: &str,
        deadline: &Deadline,
    ) -> CoreResult<Ingested> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| CoreError::Codec(e.into()))?;
        self.ingest(&data, content_type, deadline)
    }

    /// Fetch and decompress a blob.
    pub fn get(&self, id: &StoreId, deadline: &Deadline) -> CoreResult<Retrieved> {
        check(deadline)?;
        let record = self.backend.require_store(id)?;
        check(deadline)?;
        let bytes = record.decompressed()?;
        debug!(id = %id, size = bytes.len(), "retrieved content");
        Ok(Retrieved {
            id: record.id,
            bytes,
            content_type: record.content_type,
            file_size: record.file_size,
            status: record.status,
        })
    }

    /// The stored record with its content still compressed.
    pub fn record(&self, id: &StoreId) -> CoreResult<FileStore> {
        Ok(self.backend.require_store(id)?)
    }

    pub fn update_status(
        &self,
        id: &StoreId,
        status: ProcessingStatus,
        deadline: &Deadline,
    ) -> CoreResult<()> {
        check(deadline)?;
        debug!(id = %id, status = %status, "updating processing status");
        Ok(self.backend.update_status(id, status)?)
    }

    /// Every stored blob whose checksum is `hash`.
    pub fn match_hash(&self, hash: u32, deadline: &Deadline) -> CoreResult<Vec<FileStore>> {
        check(deadline)?;
        Ok(self.backend.match_hash(hash)?)
    }

    fn find_duplicate(
        &self,
        hash: u32,
        data: &[u8],
        compressed: &[u8],
    ) -> CoreResult<Option<FileStore>> {
        for existing in self.backend.match_hash(hash)? {
            if existing.file_size != data.len() as u64 {
                continue;
            }
            if existing.content == compressed {
                return Ok(Some(existing));
            }
            match existing.decompressed() {
                Ok(bytes) if bytes == data => return Ok(Some(existing)),
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        id = %existing.id,
                        error = %err,
                        "skipping unreadable record during dedup"
                    );
                }
            }
        }
        Ok(None)
    }

    fn abandon(&self, reservation: &Reservation<StoreId>) {
        if let Err(err) = self.reserver.release(self.backend.as_ref(), reservation) {
            warn!(id = %reservation.id, error = %err, "failed to release reservation");
        }
    }
}

impl<B> std::fmt::Debug for ContentStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("reserver", &self.reserver)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}
