//! # tally-prefix
//!
//! Memory-mapped membership index over truncated SHA-256 hashes.
//!
//! A prefix file holds a sorted, fixed-width list of hash prefixes. Looking
//! up a value hashes it, truncates the digest to the file's prefix size and
//! binary-searches the mapped bytes, so queries cost O(log n) time and no
//! heap beyond the mapping.
//!
//! ## Modules
//!
//! - [`format`] — on-disk header and validation, no I/O
//! - [`list`] — fixed-stride view with binary search
//! - [`store`] — [`HashPrefixStore`], the file-backed index

pub mod format;
pub mod list;
pub mod store;

pub use format::{FormatError, Header};
pub use list::PrefixList;
pub use store::{HashPrefixStore, PrefixStoreError};
