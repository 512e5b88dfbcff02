//! zlib (DEFLATE) helpers for application batch packets
//!
//! Batches arrive as a zlib stream. Inflation is bounded so a small hostile
//! stream cannot expand into an unbounded allocation.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};

/// Default ceiling for inflated batch size (16 MB)
pub const MAX_DECOMPRESSION_SIZE: usize = 16 * 1024 * 1024;

/// First byte of a zlib stream with the default window (CMF = 0x78)
pub const ZLIB_MARKER: u8 = 0x78;

/// Compress `data` into a zlib stream
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if the encoder fails
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|_| ProtocolError::CompressionFailure)?;
    encoder.finish().map_err(|_| ProtocolError::CompressionFailure)
}

/// Inflate a zlib stream, refusing output larger than `limit`
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - the stream is malformed or truncated
/// - the output grows past `limit`
pub fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut reader = ZlibDecoder::new(data);
    let mut out = Vec::new();

    // Read in chunks to enforce size limit
    let mut buffer = [0u8; 8192];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&buffer[..n]);
                if out.len() > limit {
                    return Err(ProtocolError::DecompressionFailure);
                }
            }
            Err(_) => return Err(ProtocolError::DecompressionFailure),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zlib_roundtrip() {
        let original = b"Hello, World! This is a test of zlib compression.";
        let compressed = deflate(original, 6).unwrap();
        assert_eq!(compressed[0], ZLIB_MARKER);
        let decompressed = inflate(&compressed, MAX_DECOMPRESSION_SIZE).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_inflate_limit_enforcement() {
        // 1 MB of zeros compresses to a few KB
        let bomb = deflate(&vec![0u8; 1024 * 1024], 9).unwrap();
        assert!(bomb.len() < 16 * 1024);
        let result = inflate(&bomb, 64 * 1024);
        assert!(
            matches!(result, Err(ProtocolError::DecompressionFailure)),
            "Should reject output larger than the limit"
        );
    }

    #[test]
    fn test_malformed_stream() {
        let malformed = vec![ZLIB_MARKER, 0x9c, 0xff, 0xff, 0xff, 0x00];
        assert!(inflate(&malformed, MAX_DECOMPRESSION_SIZE).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_truncated_stream() {
        let compressed = deflate(&[7u8; 4096], 6).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(inflate(truncated, MAX_DECOMPRESSION_SIZE).is_err());
    }
}
