//! Splitting payloads into bounded chunks and putting them back together.
//!
//! Chunks may be written and fetched in any order, possibly concurrently, so
//! [`reassemble`] depends only on the set of chunks it is given. The index
//! set must be exactly `0..N` with no duplicates; anything else is corrupt.

use std::collections::BTreeMap;

use crate::error::{CodecError, CodecResult};

/// One bounded fragment of a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(index: u32, data: Vec<u8>) -> Self {
        Self { index, data }
    }
}

/// Split `payload` into chunks of at most `max_chunk_bytes`.
///
/// Indices are contiguous from zero. Every chunk except the last is exactly
/// `max_chunk_bytes` long; an empty payload yields no chunks.
pub fn split(payload: &[u8], max_chunk_bytes: usize) -> CodecResult<Vec<Chunk>> {
    if max_chunk_bytes == 0 {
        return Err(CodecError::InvalidChunkSize(max_chunk_bytes));
    }
    let count = payload.len().div_ceil(max_chunk_bytes);
    if count > u32::MAX as usize {
        return Err(CodecError::TooManyChunks {
            len: payload.len(),
            chunk_size: max_chunk_bytes,
        });
    }
    Ok(payload
        .chunks(max_chunk_bytes)
        .enumerate()
        .map(|(i, data)| Chunk::new(i as u32, data.to_vec()))
        .collect())
}

/// Rebuild the payload from an unordered chunk set.
pub fn reassemble(mut chunks: Vec<Chunk>) -> CodecResult<Vec<u8>> {
    chunks.sort_by_key(|c| c.index);
    for (pos, chunk) in chunks.iter().enumerate() {
        let expected = pos as u32;
        if chunk.index != expected {
            let reason = if chunk.index < expected {
                format!("duplicate chunk index {}", chunk.index)
            } else {
                format!("missing chunk index {expected}")
            };
            return Err(CodecError::CorruptData(reason));
        }
    }
    let total = chunks.iter().map(|c| c.data.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in &chunks {
        out.extend_from_slice(&chunk.data);
    }
    Ok(out)
}

/// Partition chunks belonging to several payloads by their owner key.
pub fn group_by_owner<K, I>(chunks: I) -> BTreeMap<K, Vec<Chunk>>
where
    K: Ord,
    I: IntoIterator<Item = (K, Chunk)>,
{
    let mut groups: BTreeMap<K, Vec<Chunk>> = BTreeMap::new();
    for (owner, chunk) in chunks {
        groups.entry(owner).or_default().push(chunk);
    }
    groups
}
