//! # tally-crypto
//!
//! Cryptographic primitives for the Tally ledger.
//!
//! ## Modules
//!
//! - [`sha256`] — SHA-256 digests and truncated hash prefixes
//! - [`blinded`] — VOPRF blinded tokens with batch DLEQ proofs

pub mod blinded;
pub mod sha256;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid key or element length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Bytes do not encode a valid group element or scalar.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decoding failed.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Batch DLEQ proof did not verify.
    #[error("batch proof verification failed")]
    ProofVerification,

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
