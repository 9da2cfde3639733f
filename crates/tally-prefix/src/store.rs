//! File-backed hash-prefix index.
//!
//! The store owns one prefix file. It is opened lazily on the first query,
//! rewritten wholesale by [`HashPrefixStore::update_prefixes`], and queried
//! through a read-only memory map. All calls do blocking file I/O.
//!
//! A file that cannot be opened or fails validation makes every query
//! answer `false`: an unreadable list behaves as an empty one. Callers that
//! gate a security decision on membership should call
//! [`HashPrefixStore::open`] first and treat its error as a hard failure.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::format::{self, FormatError, Header};
use crate::list::PrefixList;

#[derive(Debug, thiserror::Error)]
pub enum PrefixStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid prefix file: {0}")]
    Format(#[from] FormatError),
}

pub type Result<T> = std::result::Result<T, PrefixStoreError>;

struct Mapping {
    mmap: Mmap,
    header: Header,
}

impl Mapping {
    fn prefixes(&self) -> Option<PrefixList<'_>> {
        PrefixList::new(
            format::prefix_data(&self.mmap),
            self.header.prefix_size as usize,
        )
        .ok()
    }
}

/// Sorted, fixed-width list of SHA-256 prefixes backed by a mapped file.
///
/// Every operation takes `&mut self`, so one owner drives the store at a
/// time. Two stores must not write the same path concurrently.
pub struct HashPrefixStore {
    path: PathBuf,
    mapping: Option<Mapping>,
}

impl HashPrefixStore {
    /// A closed store over `path`. Nothing is read until the first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mapping: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// Header of the open file.
    pub fn header(&self) -> Option<Header> {
        self.mapping.as_ref().map(|m| m.header)
    }

    /// Map and validate the backing file. No-op when already open.
    ///
    /// # Errors
    ///
    /// I/O errors (including a missing file) and every [`FormatError`].
    pub fn open(&mut self) -> Result<()> {
        if self.mapping.is_some() {
            return Ok(());
        }

        let file = File::open(&self.path)?;
        // SAFETY: The mapping is read-only. The store only replaces the file
        // by renaming a new one over it after dropping its own mapping.
        let mmap = unsafe { Mmap::map(&file)? };
        let header = format::validate(&mmap)?;
        #[cfg(unix)]
        {
            mmap.advise(memmap2::Advice::Random)
                .unwrap_or_else(|e| warn!("madvise(RANDOM) failed: {}", e));
        }

        debug!(
            path = %self.path.display(),
            prefix_size = header.prefix_size,
            prefix_count = header.prefix_count,
            "Opened prefix store"
        );
        self.mapping = Some(Mapping { mmap, header });
        Ok(())
    }

    /// Drop the mapping. Safe to call when closed.
    pub fn close(&mut self) {
        if self.mapping.take().is_some() {
            debug!(path = %self.path.display(), "Closed prefix store");
        }
    }

    /// Replace the whole list.
    ///
    /// `prefixes` is the concatenation of `prefix_size`-byte entries, sorted
    /// ascending. The new file is written next to the old one and renamed
    /// over it; the store reopens on the next query.
    ///
    /// # Errors
    ///
    /// A bad prefix size, misaligned or unsorted input, or an I/O failure.
    /// On error the previous file is left in place.
    pub fn update_prefixes(&mut self, prefixes: &[u8], prefix_size: usize) -> Result<()> {
        self.close();
        let image = format::encode(prefixes, prefix_size)?;

        let staging = staging_path(&self.path);
        {
            let mut file = File::create(&staging)?;
            file.write_all(&image)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        info!(
            path = %self.path.display(),
            prefix_size,
            prefix_count = prefixes.len() / prefix_size,
            "Updated prefix store"
        );
        Ok(())
    }

    /// Whether the truncated SHA-256 of `value` is in the list.
    ///
    /// Opens the store if needed. Answers `false` when the store cannot be
    /// opened.
    pub fn contains_prefix(&mut self, value: &str) -> bool {
        if let Err(e) = self.open() {
            warn!(path = %self.path.display(), "Prefix store unavailable: {e}");
            return false;
        }
        let Some(mapping) = &self.mapping else {
            return false;
        };
        let Some(prefixes) = mapping.prefixes() else {
            return false;
        };

        let digest = tally_crypto::sha256::hash(value.as_bytes());
        prefixes.contains(&digest[..prefixes.stride()])
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".new");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_prefixes(values: &[&str], size: usize) -> Vec<u8> {
        let mut prefixes: Vec<Vec<u8>> = values
            .iter()
            .map(|v| tally_crypto::sha256::hash(v.as_bytes())[..size].to_vec())
            .collect();
        prefixes.sort();
        prefixes.concat()
    }

    fn test_values() -> Vec<String> {
        (1..=9).map(|i| format!("test-value-{i}")).collect()
    }

    #[test]
    fn test_update_then_contains() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HashPrefixStore::new(dir.path().join("prefixes.bin"));
        let values = test_values();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();

        store
            .update_prefixes(&sorted_prefixes(&refs, 4), 4)
            .expect("update");

        assert!(store.contains_prefix("test-value-4"));
        for value in &refs {
            assert!(store.contains_prefix(value), "{value} should be listed");
        }
        assert!(!store.contains_prefix("test-value-0"));
        assert!(store.is_open());
    }

    #[test]
    fn test_fresh_store_reads_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefixes.bin");
        HashPrefixStore::new(&path)
            .update_prefixes(&sorted_prefixes(&["alpha", "beta"], 8), 8)
            .expect("update");

        let mut store = HashPrefixStore::new(&path);
        store.open().expect("open");
        assert_eq!(store.header().map(|h| h.prefix_count), Some(2));
        assert!(store.contains_prefix("alpha"));
        assert!(!store.contains_prefix("gamma"));
    }

    #[test]
    fn test_update_replaces_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HashPrefixStore::new(dir.path().join("prefixes.bin"));

        store
            .update_prefixes(&sorted_prefixes(&["old"], 4), 4)
            .expect("first update");
        assert!(store.contains_prefix("old"));

        store
            .update_prefixes(&sorted_prefixes(&["new"], 32), 32)
            .expect("second update");
        assert!(!store.is_open(), "update closes the mapping");
        assert!(store.contains_prefix("new"));
        assert!(!store.contains_prefix("old"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HashPrefixStore::new(dir.path().join("absent.bin"));
        assert!(matches!(store.open(), Err(PrefixStoreError::Io(_))));
        assert!(!store.contains_prefix("anything"));
    }

    #[test]
    fn test_corrupt_files_fail_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefixes.bin");

        let mut wrong_version = Vec::new();
        wrong_version.extend_from_slice(&7u32.to_le_bytes());
        wrong_version.extend_from_slice(&4u32.to_le_bytes());
        wrong_version.extend_from_slice(&0u64.to_le_bytes());

        let mut huge_prefix = Vec::new();
        huge_prefix.extend_from_slice(&1u32.to_le_bytes());
        huge_prefix.extend_from_slice(&1024u32.to_le_bytes());
        huge_prefix.extend_from_slice(&1u64.to_le_bytes());
        huge_prefix.extend_from_slice(&[0u8; 1024]);

        let mut misaligned = Vec::new();
        misaligned.extend_from_slice(&1u32.to_le_bytes());
        misaligned.extend_from_slice(&4u32.to_le_bytes());
        misaligned.extend_from_slice(&1u64.to_le_bytes());
        misaligned.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

        for image in [wrong_version, huge_prefix, misaligned, vec![1, 2, 3]] {
            fs::write(&path, &image).expect("write corrupt file");
            let mut store = HashPrefixStore::new(&path);
            assert!(matches!(store.open(), Err(PrefixStoreError::Format(_))));
            assert!(!store.is_open());
            for value in ["", "test-value-1", "anything"] {
                assert!(!store.contains_prefix(value));
            }
        }
    }

    #[test]
    fn test_rejected_update_keeps_old_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HashPrefixStore::new(dir.path().join("prefixes.bin"));
        store
            .update_prefixes(&sorted_prefixes(&["kept"], 4), 4)
            .expect("update");

        assert!(store.update_prefixes(&[0u8; 6], 4).is_err());
        assert!(store.update_prefixes(&[0u8; 8], 64).is_err());
        assert!(store.update_prefixes(&[2, 2, 2, 2, 1, 1, 1, 1], 4).is_err());

        assert!(store.contains_prefix("kept"));
    }

    #[test]
    fn test_open_is_idempotent_and_close_is_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HashPrefixStore::new(dir.path().join("prefixes.bin"));
        store.close();
        store.update_prefixes(&[], 4).expect("update");
        store.open().expect("first open");
        store.open().expect("second open");
        assert!(!store.contains_prefix("anything"));
        store.close();
        store.close();
        assert!(!store.is_open());
    }
}
