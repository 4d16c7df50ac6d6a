use std::sync::Arc;

use tracing::{info, warn};
use vellum_store::{
    ChunkedBackend, Clock, ContentBackend, FileBackend, FileRecord, InMemoryBackend, OwnerRef,
    SystemClock,
};
use vellum_types::{FileId, StoreId};

use crate::config::StoreConfig;
use crate::content::{ContentStore, Ingested, Retrieved};
use crate::error::{CoreError, CoreResult};
use crate::files::FileIndex;

/// Result of [`Vault::upload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Uploaded {
    pub file: FileRecord,
    pub store_id: StoreId,
    pub file_size: u64,
    /// `true` when the bytes were already stored under `store_id`.
    pub deduped: bool,
}

/// A content store and its naming layer over one shared backend.
pub struct Vault<B> {
    config: StoreConfig,
    content: ContentStore<B>,
    files: FileIndex<B>,
}

impl Vault<InMemoryBackend> {
    pub fn in_memory(config: StoreConfig) -> CoreResult<Self> {
        Self::new(InMemoryBackend::new(), config)
    }
}

impl Vault<ChunkedBackend> {
    pub fn chunked(config: StoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let backend = ChunkedBackend::new(config.chunked()).map_err(CoreError::Store)?;
        Self::new(backend, config)
    }
}

impl<B: ContentBackend + FileBackend> Vault<B> {
    pub fn new(backend: B, config: StoreConfig) -> CoreResult<Self> {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: B, config: StoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        config.validate()?;
        let backend = Arc::new(backend);
        Ok(Self {
            content: ContentStore::with_clock(backend.clone(), &config, clock.clone()),
            files: FileIndex::with_clock(backend, &config, clock),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn content(&self) -> &ContentStore<B> {
        &self.content
    }

    pub fn files(&self) -> &FileIndex<B> {
        &self.files
    }

    /// Store `bytes` (deduplicated) and register a new file over them.
    ///
    /// Both steps share one deadline taken from the configured timeout.
    pub fn upload(
        &self,
        name: &str,
        owner: OwnerRef,
        bytes: &[u8],
        content_type: &str,
    ) -> CoreResult<Uploaded> {
        let deadline = self.config.deadline();
        let Ingested { record, deduped } = self.content.ingest(bytes, content_type, &deadline)?;
        let reservation = self
            .files
            .reserve(self.files.new_file_id(record.id), &deadline)?;
        let file = match self.files.insert(&reservation, name, owner) {
            Ok(file) => file,
            Err(err) => {
                if let Err(release) = self.files.release(&reservation) {
                    warn!(
                        id = %reservation.id,
                        error = %release,
                        "failed to release file reservation"
                    );
                }
                return Err(err);
            }
        };
        info!(
            file = %file.id,
            store = %record.id,
            deduped,
            "uploaded file"
        );
        Ok(Uploaded {
            file,
            store_id: record.id,
            file_size: record.file_size,
            deduped,
        })
    }

    /// The file record and its decompressed content.
    pub fn download(&self, id: &FileId) -> CoreResult<(FileRecord, Retrieved)> {
        let deadline = self.config.deadline();
        let file = self.files.get(id)?;
        let content = self.content.get(&file.store_id(), &deadline)?;
        Ok((file, content))
    }

    /// Download by printable file token.
    pub fn download_token(&self, token: &str) -> CoreResult<(FileRecord, Retrieved)> {
        let id: FileId = token.parse()?;
        self.download(&id)
    }
}

impl<B> std::fmt::Debug for Vault<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
