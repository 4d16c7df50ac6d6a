//! Reservation protocol and storage backends for the Vellum content store.
//!
//! Blobs are keyed by [`StoreId`](vellum_types::StoreId) and files by
//! [`FileId`](vellum_types::FileId). Both ID spaces are allocated through the
//! same two-phase protocol: [`Reserver::reserve`] claims a free ID (mutating
//! the candidate on collision), and [`Reserver::commit`] writes the payload
//! only while the caller's reservation is still live.
//!
//! # Backends
//!
//! All backends implement [`ContentBackend`] and [`FileBackend`]:
//!
//! - [`InMemoryBackend`] -- one coarse lock over two maps, for tests and
//!   embedding
//! - [`ChunkedBackend`] -- content split across size-limited document
//!   collections, with chunk writes gated behind the metadata commit
//!
//! # Rules
//!
//! 1. Reads see committed records only.
//! 2. A committed ID is never reclaimed; an expired reservation is.
//! 3. Committed content is immutable. Only the processing status changes.
//! 4. Expiry is evaluated lazily against a [`Clock`].

pub mod chunked;
pub mod clock;
pub mod document;
pub mod error;
pub mod memory;
pub mod record;
pub mod reservation;
pub mod traits;

#[cfg(test)]
mod conformance;

pub use chunked::{ChunkedBackend, ChunkedConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RECORD_BYTES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBackend;
pub use record::{FileRecord, FileStore, OwnerRef};
pub use reservation::{
    Lease, Reservable, Reservation, ReservationPolicy, Reservations, Reserver, Slot,
};
pub use traits::{ContentBackend, FileBackend};
