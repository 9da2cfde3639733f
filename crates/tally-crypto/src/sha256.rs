//! SHA-256 helpers.

use sha2::{Digest, Sha256};

use crate::{CryptoError, Result};

/// Shortest prefix a hash-prefix list may store.
pub const MIN_PREFIX_SIZE: usize = 4;

/// Longest prefix, i.e. a full SHA-256 digest.
pub const MAX_PREFIX_SIZE: usize = 32;

/// SHA-256 digest of `data`.
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// First `size` bytes of the SHA-256 digest of `data`.
///
/// # Errors
///
/// [`CryptoError::InvalidInput`] if `size` is outside
/// `MIN_PREFIX_SIZE..=MAX_PREFIX_SIZE`.
pub fn prefix(data: &[u8], size: usize) -> Result<Vec<u8>> {
    if !(MIN_PREFIX_SIZE..=MAX_PREFIX_SIZE).contains(&size) {
        return Err(CryptoError::InvalidInput(format!(
            "prefix size {size} outside [{MIN_PREFIX_SIZE}, {MAX_PREFIX_SIZE}]"
        )));
    }
    Ok(hash(data)[..size].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let digest = hash(b"abc");
        assert_eq!(
            digest[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(abc) starts with ba7816bf"
        );
    }

    #[test]
    fn test_prefix_truncates() {
        let full = hash(b"test-value-1");
        let short = prefix(b"test-value-1", 4).expect("prefix");
        assert_eq!(short, full[..4]);
    }

    #[test]
    fn test_prefix_size_bounds() {
        assert!(prefix(b"x", 3).is_err());
        assert!(prefix(b"x", 33).is_err());
        assert_eq!(prefix(b"x", 32).expect("full").len(), 32);
    }
}
