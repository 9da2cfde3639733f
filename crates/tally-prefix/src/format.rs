//! Prefix file format.
//!
//! ```text
//! offset 0   u32 version        (1)
//! offset 4   u32 prefix_size    (4..=32)
//! offset 8   u64 prefix_count
//! offset 16  prefix_count * prefix_size bytes, sorted ascending
//! ```
//!
//! All integers are little-endian.

use crate::list::PrefixList;

pub use tally_crypto::sha256::{MAX_PREFIX_SIZE, MIN_PREFIX_SIZE};

/// Header length in bytes.
pub const HEADER_LEN: usize = 16;

/// The only format version written or accepted.
pub const FORMAT_VERSION: u32 = 1;

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prefix_size: u32,
    pub prefix_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("{0} bytes is too short for a header")]
    Truncated(usize),

    #[error("unsupported format version {0}")]
    BadVersion(u32),

    #[error("prefix size {0} outside [4, 32]")]
    BadSize(u64),

    #[error("{len} bytes of prefix data is not a multiple of prefix size {prefix_size}")]
    Misaligned { len: usize, prefix_size: usize },

    #[error("header declares {declared} prefixes but data holds {actual}")]
    CountMismatch { declared: u64, actual: u64 },

    #[error("prefixes are not sorted ascending")]
    Unsorted,
}

/// Check a prefix size against the supported range.
pub fn check_prefix_size(prefix_size: usize) -> Result<(), FormatError> {
    if (MIN_PREFIX_SIZE..=MAX_PREFIX_SIZE).contains(&prefix_size) {
        Ok(())
    } else {
        Err(FormatError::BadSize(prefix_size as u64))
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

/// Decode the header and check its fields in isolation.
pub fn parse_header(bytes: &[u8]) -> Result<Header, FormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(FormatError::Truncated(bytes.len()));
    }

    let header = Header {
        version: read_u32(bytes, 0),
        prefix_size: read_u32(bytes, 4),
        prefix_count: read_u64(bytes, 8),
    };

    if header.version != FORMAT_VERSION {
        return Err(FormatError::BadVersion(header.version));
    }
    check_prefix_size(header.prefix_size as usize)?;

    Ok(header)
}

/// Validate a complete file image: header plus the data that follows it.
///
/// Sortedness is not checked here; it is enforced when the file is written.
pub fn validate(bytes: &[u8]) -> Result<Header, FormatError> {
    let header = parse_header(bytes)?;
    let data_len = bytes.len() - HEADER_LEN;
    let prefix_size = header.prefix_size as usize;

    if data_len % prefix_size != 0 {
        return Err(FormatError::Misaligned {
            len: data_len,
            prefix_size,
        });
    }

    let actual = (data_len / prefix_size) as u64;
    if actual != header.prefix_count {
        return Err(FormatError::CountMismatch {
            declared: header.prefix_count,
            actual,
        });
    }

    Ok(header)
}

/// The prefix data of a validated file image.
pub fn prefix_data(bytes: &[u8]) -> &[u8] {
    bytes.get(HEADER_LEN..).unwrap_or_default()
}

/// Build a file image from raw, concatenated prefixes.
///
/// # Errors
///
/// Rejects a bad prefix size, data that is not a whole number of prefixes,
/// and prefixes that are not sorted ascending.
pub fn encode(prefixes: &[u8], prefix_size: usize) -> Result<Vec<u8>, FormatError> {
    let list = PrefixList::new(prefixes, prefix_size)?;
    if !list.is_sorted() {
        return Err(FormatError::Unsorted);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + prefixes.len());
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(prefix_size as u32).to_le_bytes());
    out.extend_from_slice(&(list.len() as u64).to_le_bytes());
    out.extend_from_slice(prefixes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(version: u32, prefix_size: u32, count: u64, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&prefix_size.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_encode_then_validate() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let bytes = encode(&data, 4).expect("encode");
        assert_eq!(bytes.len(), HEADER_LEN + 8);

        let header = validate(&bytes).expect("validate");
        assert_eq!(
            header,
            Header {
                version: 1,
                prefix_size: 4,
                prefix_count: 2
            }
        );
        assert_eq!(prefix_data(&bytes), &data);
    }

    #[test]
    fn test_empty_list() {
        let bytes = encode(&[], 4).expect("encode");
        let header = validate(&bytes).expect("validate");
        assert_eq!(header.prefix_count, 0);
        assert!(prefix_data(&bytes).is_empty());
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(parse_header(&[1, 0, 0]), Err(FormatError::Truncated(3)));
        assert_eq!(parse_header(&[]), Err(FormatError::Truncated(0)));
    }

    #[test]
    fn test_bad_version() {
        let bytes = image(2, 4, 0, &[]);
        assert_eq!(validate(&bytes), Err(FormatError::BadVersion(2)));
    }

    #[test]
    fn test_bad_prefix_size() {
        assert_eq!(
            validate(&image(1, 1024, 0, &[])),
            Err(FormatError::BadSize(1024))
        );
        assert_eq!(validate(&image(1, 3, 0, &[])), Err(FormatError::BadSize(3)));
        assert_eq!(validate(&image(1, 0, 0, &[])), Err(FormatError::BadSize(0)));
    }

    #[test]
    fn test_misaligned_data() {
        let bytes = image(1, 4, 1, &[1, 2, 3, 4, 5]);
        assert_eq!(
            validate(&bytes),
            Err(FormatError::Misaligned {
                len: 5,
                prefix_size: 4
            })
        );
    }

    #[test]
    fn test_count_mismatch() {
        let bytes = image(1, 4, 3, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            validate(&bytes),
            Err(FormatError::CountMismatch {
                declared: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_encode_rejects_unsorted() {
        let data = [9u8, 9, 9, 9, 1, 1, 1, 1];
        assert_eq!(encode(&data, 4), Err(FormatError::Unsorted));
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        assert_eq!(encode(&[0u8; 8], 2), Err(FormatError::BadSize(2)));
        assert!(matches!(
            encode(&[0u8; 7], 4),
            Err(FormatError::Misaligned { .. })
        ));
    }
}
