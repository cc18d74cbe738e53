//! CRC32 checksums
//!
//! One implementation (IEEE 802.3 reflected polynomial, via `crc32fast`)
//! serves every container in the on-blob formats.

use crc32fast::Hasher;

/// CRC32 over a byte span.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // IEEE CRC32 of "123456789"
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_sensitivity_to_bit_flips() {
        let a = crc32(b"trellis");
        let b = crc32(b"trellit");
        assert_ne!(a, b);
    }
}
