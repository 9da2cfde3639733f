//! Fixed-stride view over concatenated prefixes.

use std::cmp::Ordering;

use crate::format::{check_prefix_size, FormatError};

/// Random-access view of `len()` prefixes, each `stride` bytes wide.
#[derive(Debug, Clone, Copy)]
pub struct PrefixList<'a> {
    data: &'a [u8],
    stride: usize,
}

impl<'a> PrefixList<'a> {
    pub fn new(data: &'a [u8], stride: usize) -> Result<Self, FormatError> {
        check_prefix_size(stride)?;
        if data.len() % stride != 0 {
            return Err(FormatError::Misaligned {
                len: data.len(),
                prefix_size: stride,
            });
        }
        Ok(Self { data, stride })
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn get(&self, index: usize) -> Option<&'a [u8]> {
        let start = index.checked_mul(self.stride)?;
        self.data.get(start..start + self.stride)
    }

    pub fn iter(&self) -> std::slice::ChunksExact<'a, u8> {
        self.data.chunks_exact(self.stride)
    }

    /// Whether entries are in non-decreasing order.
    pub fn is_sorted(&self) -> bool {
        self.iter().zip(self.iter().skip(1)).all(|(a, b)| a <= b)
    }

    /// Binary search for an exact entry. Needles of the wrong width never match.
    pub fn contains(&self, needle: &[u8]) -> bool {
        if needle.len() != self.stride {
            return false;
        }

        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let Some(entry) = self.get(mid) else {
                return false;
            };
            match entry.cmp(needle) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return true,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_data() -> Vec<u8> {
        (0u8..50).flat_map(|i| [i * 2, 0, 0, 1]).collect()
    }

    #[test]
    fn test_len_and_get() {
        let data = sorted_data();
        let list = PrefixList::new(&data, 4).expect("list");
        assert_eq!(list.len(), 50);
        assert_eq!(list.get(1), Some(&[2u8, 0, 0, 1][..]));
        assert_eq!(list.get(50), None);
    }

    #[test]
    fn test_contains_every_member() {
        let data = sorted_data();
        let list = PrefixList::new(&data, 4).expect("list");
        for entry in list.iter() {
            assert!(list.contains(entry));
        }
    }

    #[test]
    fn test_missing_entries() {
        let data = sorted_data();
        let list = PrefixList::new(&data, 4).expect("list");
        assert!(!list.contains(&[1, 0, 0, 1]));
        assert!(!list.contains(&[255, 255, 255, 255]));
        assert!(!list.contains(&[0, 0, 0, 0]));
        assert!(!list.contains(&[0, 0, 1]));
    }

    #[test]
    fn test_empty_list_contains_nothing() {
        let list = PrefixList::new(&[], 4).expect("list");
        assert!(list.is_empty());
        assert!(!list.contains(&[0, 0, 0, 0]));
    }

    #[test]
    fn test_is_sorted() {
        let data = sorted_data();
        assert!(PrefixList::new(&data, 4).expect("list").is_sorted());

        let dupes = [1u8, 1, 1, 1, 1, 1, 1, 1];
        assert!(PrefixList::new(&dupes, 4).expect("list").is_sorted());

        let unsorted = [2u8, 0, 0, 0, 1, 0, 0, 0];
        assert!(!PrefixList::new(&unsorted, 4).expect("list").is_sorted());
    }

    #[test]
    fn test_rejects_bad_stride() {
        assert!(PrefixList::new(&[0u8; 64], 64).is_err());
        assert!(PrefixList::new(&[0u8; 10], 4).is_err());
    }
}
