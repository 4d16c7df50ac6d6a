use crate::error::{CodecError, CodecResult};

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Compress a byte slice with zstd.
pub fn compress(data: &[u8], level: i32) -> CodecResult<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| CodecError::CompressionFailed(e.to_string()))
}

/// Decompress a zstd payload.
///
/// Any decoding failure is reported as corrupt data: compressed bytes only
/// ever come from the store itself.
pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| CodecError::corrupt(format!("decompression failed: {e}")))
}

/// Decompress and check the output length against the recorded size.
pub fn decompress_exact(data: &[u8], expected_len: u64) -> CodecResult<Vec<u8>> {
    let out = decompress(data)?;
    if out.len() as u64 != expected_len {
        return Err(CodecError::corrupt(format!(
            "size mismatch: expected {expected_len}, got {}",
            out.len()
        )));
    }
    Ok(out)
}
