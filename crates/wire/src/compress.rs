//! Block compression for frame payloads.
//!
//! The compressed form is a `u32` big-endian decompressed length followed by
//! one record per input block of `block_size` bytes:
//!
//! ```text
//! [4 bytes BE: compressed block length][zstd-compressed block]
//! ```

use crate::error::WireError;

/// zstd level used for every block; balanced speed/ratio.
const ZSTD_LEVEL: i32 = 3;

/// Compresses `data` block-wise with the given block size.
pub fn compress(data: &[u8], block_size: usize) -> Result<Vec<u8>, WireError> {
    let block_size = block_size.max(1);
    let mut out = Vec::with_capacity(8 + data.len() / 2);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());

    for block in data.chunks(block_size) {
        let compressed = zstd::encode_all(block, ZSTD_LEVEL)
            .map_err(|e| WireError::DecompressFailed(format!("compress: {e}")))?;
        out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        out.extend_from_slice(&compressed);
    }

    Ok(out)
}

/// Reverses [`compress`]; verifies the decompressed length prefix.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    if data.len() < 4 {
        return Err(WireError::DecompressFailed("short prefix".into()));
    }

    let expected = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let mut out = Vec::with_capacity(expected);
    let mut rest = &data[4..];

    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(WireError::DecompressFailed("truncated block header".into()));
        }
        let block_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < block_len {
            return Err(WireError::DecompressFailed("truncated block".into()));
        }

        let block = zstd::decode_all(&rest[..block_len])
            .map_err(|e| WireError::DecompressFailed(e.to_string()))?;
        out.extend_from_slice(&block);
        rest = &rest[block_len..];
    }

    if out.len() != expected {
        return Err(WireError::DecompressFailed(format!(
            "length mismatch: expected {expected}, got {}",
            out.len()
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_COMPRESS_BLOCK_SIZE;

    #[test]
    fn roundtrip_multi_block() {
        let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .take(10_000)
            .copied()
            .collect();

        let packed = compress(&data, DEFAULT_COMPRESS_BLOCK_SIZE).unwrap();
        assert!(packed.len() < data.len(), "repetitive data should shrink");

        let unpacked = decompress(&packed).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn roundtrip_empty() {
        let packed = compress(b"", DEFAULT_COMPRESS_BLOCK_SIZE).unwrap();
        let unpacked = decompress(&packed).unwrap();
        assert!(unpacked.is_empty());
    }

    #[test]
    fn roundtrip_smaller_than_block() {
        let packed = compress(b"tiny", 1024).unwrap();
        assert_eq!(decompress(&packed).unwrap(), b"tiny");
    }

    #[test]
    fn block_size_changes_record_count_not_content() {
        let data = vec![7u8; 4096];
        for block_size in [64usize, 1024, 8192] {
            let packed = compress(&data, block_size).unwrap();
            assert_eq!(decompress(&packed).unwrap(), data);
        }
    }

    #[test]
    fn corrupt_block_fails() {
        let data = vec![3u8; 2048];
        let mut packed = compress(&data, 1024).unwrap();
        let last = packed.len() - 1;
        packed[last] ^= 0xFF;
        assert!(matches!(
            decompress(&packed),
            Err(WireError::DecompressFailed(_))
        ));
    }

    #[test]
    fn truncated_input_fails() {
        let packed = compress(&vec![1u8; 2048], 1024).unwrap();
        assert!(decompress(&packed[..packed.len() - 8]).is_err());
        assert!(decompress(&packed[..2]).is_err());
    }
}
