//! `prefix update` and `prefix contains`.
//!
//! The prefix store does blocking file I/O, so both commands run it on the
//! blocking pool.

use std::path::{Path, PathBuf};

use tally_prefix::HashPrefixStore;
use tracing::info;

/// Sorted, deduplicated SHA-256 prefixes of every non-empty line.
///
/// # Errors
///
/// Fails if `prefix_size` is outside the supported range.
pub fn prefixes_from_values(text: &str, prefix_size: usize) -> anyhow::Result<Vec<u8>> {
    tally_prefix::format::check_prefix_size(prefix_size)?;
    let mut prefixes: Vec<[u8; 32]> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| tally_crypto::sha256::hash(line.as_bytes()))
        .collect();
    prefixes.sort_unstable_by(|a, b| a[..prefix_size].cmp(&b[..prefix_size]));
    prefixes.dedup_by(|a, b| a[..prefix_size] == b[..prefix_size]);
    Ok(prefixes
        .iter()
        .flat_map(|digest| digest[..prefix_size].iter().copied())
        .collect())
}

/// Replace the prefix list from `source`.
///
/// With `hash_values` the file holds one value per line and is hashed
/// here; otherwise it holds raw, sorted, concatenated prefixes. Returns
/// the number of prefixes written.
pub async fn update(
    store_path: &Path,
    source: &Path,
    prefix_size: usize,
    hash_values: bool,
) -> anyhow::Result<usize> {
    tally_prefix::format::check_prefix_size(prefix_size)?;
    let store_path = store_path.to_path_buf();
    let source: PathBuf = source.to_path_buf();

    let count = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let prefixes = if hash_values {
            prefixes_from_values(&std::fs::read_to_string(&source)?, prefix_size)?
        } else {
            std::fs::read(&source)?
        };
        let mut store = HashPrefixStore::new(store_path);
        store.update_prefixes(&prefixes, prefix_size)?;
        Ok(prefixes.len() / prefix_size)
    })
    .await??;

    info!(count, prefix_size, "Prefix list replaced");
    Ok(count)
}

/// Whether `value` is listed. An unreadable store lists nothing.
pub async fn contains(store_path: &Path, value: &str) -> anyhow::Result<bool> {
    let store_path = store_path.to_path_buf();
    let value = value.to_string();
    let listed = tokio::task::spawn_blocking(move || {
        HashPrefixStore::new(store_path).contains_prefix(&value)
    })
    .await?;
    Ok(listed)
}
