//! Foundation types for the Vellum content store.
//!
//! Every other Vellum crate depends on `vellum-types`.
//!
//! # Key Types
//!
//! - [`StoreId`] -- Content address of a unique compressed blob (checksum + stamp)
//! - [`FileId`] -- User-facing file identifier referencing a `StoreId`
//! - [`ProcessingStatus`] -- Post-ingest enrichment state
//! - [`FileMap`] -- Grouping of file IDs by the blob they reference
//! - [`Deadline`] -- Cancellation point accepted by every store operation
//! - [`StampGenerator`] -- Shuffled byte source for `FileId` stamps

pub mod deadline;
pub mod error;
pub mod file_id;
pub mod file_map;
pub mod stamp;
pub mod status;
pub mod store_id;

pub use deadline::Deadline;
pub use error::TypeError;
pub use file_id::FileId;
pub use file_map::FileMap;
pub use stamp::{next_stamp_byte, StampGenerator};
pub use status::{ProcessingStatus, IN_PROGRESS_CODE};
pub use store_id::{StoreId, STORE_ID_LEN};
