//! Byte-level codecs for the Vellum content store.
//!
//! - [`ContentHasher`] / [`ContentDigest`] -- CRC-32 content checksum, optionally
//!   combined with zstd compression in a single read pass
//! - [`compression`] -- zstd compress/decompress with corruption reporting
//! - [`chunk`] -- order-independent split/reassemble for size-limited backends
//!
//! Nothing here touches storage; every function is pure over its inputs.

pub mod chunk;
pub mod compression;
pub mod error;
pub mod hasher;

pub use chunk::{group_by_owner, reassemble, split, Chunk};
pub use compression::{compress, decompress, decompress_exact, DEFAULT_COMPRESSION_LEVEL};
pub use error::{CodecError, CodecResult};
pub use hasher::{
    compute_store_id, compute_store_id_with_stamp, seed_stamp, ContentDigest, ContentHasher,
};
