//! zlib compression for binary array properties.
//!
//! FBX binary arrays carry an encoding flag: 0 for raw little-endian
//! element data, 1 for a zlib deflate stream. The 12-byte array header
//! (element count, encoding, compressed byte length) is written by the
//! binary codec; this module only handles the payload bytes.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::util::Result;

/// Arrays whose raw encoding is at least this many bytes are candidates
/// for compression on write.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// Compress raw array bytes with zlib.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a zlib stream into exactly `expected_len` bytes.
pub fn inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Whether an array of this raw size should be compressed, given how well
/// it actually compressed. Compression that does not save space is skipped.
#[inline]
pub fn worth_compressing(raw_len: usize, compressed_len: usize) -> bool {
    raw_len >= COMPRESS_THRESHOLD && compressed_len < raw_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_inflate() {
        let original: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let compressed = deflate(&original).unwrap();
        assert!(compressed.len() < original.len());

        let restored = inflate(&compressed, original.len()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_small_arrays_stay_raw() {
        let raw = [0u8; 64];
        let compressed = deflate(&raw).unwrap();
        assert!(!worth_compressing(raw.len(), compressed.len()));
    }

    #[test]
    fn test_incompressible_stays_raw() {
        // already-deflated bytes will not shrink again
        let base: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761u32) >> 24) as u8).collect();
        let once = deflate(&base).unwrap();
        let twice = deflate(&once).unwrap();
        assert!(!worth_compressing(once.len(), twice.len()) || twice.len() < once.len());
    }
}
