//! Content-addressed file store for the Vellum document manager.
//!
//! This is the main entry point for applications embedding Vellum:
//!
//! - [`ContentStore`] -- ingest with exact-match dedup, retrieval, processing
//!   status, hash lookup
//! - [`FileIndex`] -- user-facing file records over stored blobs
//! - [`Vault`] -- both over one backend, with the end-to-end upload path
//! - [`StoreConfig`] -- tunables, loadable from TOML
//!
//! Logging goes through `tracing`; the library never installs a subscriber.

pub mod config;
pub mod content;
pub mod error;
pub mod files;
pub mod vault;

pub use config::StoreConfig;
pub use content::{ContentStore, Ingested, Retrieved};
pub use error::{CoreError, CoreResult};
pub use files::FileIndex;
pub use vault::{Uploaded, Vault};

// Re-export key types
pub use vellum_store::{
    ChunkedBackend, ContentBackend, FileBackend, FileRecord, FileStore, InMemoryBackend, OwnerRef,
};
pub use vellum_types::{Deadline, FileId, FileMap, ProcessingStatus, StoreId};
