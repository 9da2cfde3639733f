//! # tally-tokens
//!
//! Anonymous confirmation tokens: keeping a local pool of unblinded tokens
//! topped up from a remote issuer, and spending them.
//!
//! The issuer signs blinded tokens and proves the whole batch with one DLEQ
//! proof, so it cannot link a later redemption to the request that
//! produced the token.
//!
//! ## Modules
//!
//! - [`wallet`] — wallet identity and issuer keys
//! - [`issuer`] — the [`TokenIssuer`] seam and its HTTP implementation
//! - [`generator`] — token generation
//! - [`delegate`] — refill progress callbacks
//! - [`pool`] — [`TokenPool`], the persisted pool of unblinded tokens
//! - [`refill`] — [`RefillUnblindedTokens`], the refill state machine

use std::time::Duration;

pub mod delegate;
pub mod generator;
pub mod issuer;
pub mod pool;
pub mod refill;
pub mod wallet;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use delegate::RefillDelegate;
pub use generator::{RandomTokenGenerator, TokenGenerator};
pub use issuer::{HttpTokenIssuer, IssuerError, SignedTokensReply, SignedTokensResponse, TokenIssuer};
pub use pool::TokenPool;
pub use refill::{RefillConfig, RefillOutcome, RefillUnblindedTokens};
pub use wallet::{IssuersInfo, WalletInfo};

/// Below this many spendable tokens a refill is started.
pub const MINIMUM_UNBLINDED_TOKENS: usize = 20;

/// A refill tops the pool up to this many tokens.
pub const MAXIMUM_UNBLINDED_TOKENS: usize = 50;

/// Delay before a failed refill step is retried.
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Token pool and wallet errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("database error: {0}")]
    Database(#[from] tally_db::DbError),

    #[error("no spendable tokens")]
    Exhausted,

    #[error("invalid wallet: {0}")]
    InvalidWallet(String),
}

/// Refill cycle errors.
#[derive(Debug, thiserror::Error)]
pub enum RefillError {
    #[error("no confirmation issuer public keys")]
    MissingIssuers,

    #[error("wallet is not valid")]
    InvalidWallet,

    #[error("issuer request failed: {0}")]
    Issuer(#[from] IssuerError),

    #[error("issuer signed with unknown public key {0}")]
    UnknownPublicKey(String),

    #[error("signed tokens failed verification: {0}")]
    Verification(#[from] tally_crypto::CryptoError),

    #[error("stored batch is unreadable: {0}")]
    CorruptBatch(String),

    #[error("token pool error: {0}")]
    Pool(#[from] TokenError),

    #[error("database error: {0}")]
    Database(#[from] tally_db::DbError),
}

impl RefillError {
    /// Whether the failed step should be retried after [`RETRY_DELAY`].
    pub fn is_retryable(&self) -> bool {
        match self {
            RefillError::Issuer(e) => e.is_retryable(),
            _ => false,
        }
    }
}
