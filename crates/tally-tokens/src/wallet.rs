//! Wallet identity and issuer keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::TokenError;

/// Length of the wallet recovery seed.
pub const SEED_LENGTH: usize = 32;

/// The wallet requesting tokens.
///
/// Requests to the issuer are addressed by `payment_id` and signed with an
/// ed25519 key derived from the recovery seed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WalletInfo {
    payment_id: String,
    recovery_seed: Vec<u8>,
}

impl std::fmt::Debug for WalletInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletInfo")
            .field("payment_id", &self.payment_id)
            .finish_non_exhaustive()
    }
}

impl WalletInfo {
    pub fn new(payment_id: impl Into<String>, recovery_seed: Vec<u8>) -> Self {
        Self {
            payment_id: payment_id.into(),
            recovery_seed,
        }
    }

    /// Build a wallet from a base64 recovery seed.
    ///
    /// # Errors
    ///
    /// [`TokenError::InvalidWallet`] if the seed is not base64.
    pub fn from_base64(payment_id: impl Into<String>, seed: &str) -> Result<Self, TokenError> {
        let recovery_seed = BASE64
            .decode(seed.trim())
            .map_err(|e| TokenError::InvalidWallet(format!("recovery seed: {e}")))?;
        Ok(Self::new(payment_id, recovery_seed))
    }

    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }

    /// A wallet needs a payment id and a full-length seed.
    pub fn is_valid(&self) -> bool {
        !self.payment_id.is_empty() && self.recovery_seed.len() == SEED_LENGTH
    }

    /// Request signing key. `None` for an invalid seed.
    pub fn signing_key(&self) -> Option<SigningKey> {
        let seed: [u8; SEED_LENGTH] = self.recovery_seed.as_slice().try_into().ok()?;
        Some(SigningKey::from_bytes(&seed))
    }
}

/// Public keys the confirmation issuer currently signs with, base64.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IssuersInfo {
    pub public_keys: Vec<String>,
}

impl IssuersInfo {
    pub fn new(public_keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            public_keys: public_keys.into_iter().collect(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.public_keys.iter().any(|key| !key.is_empty())
    }

    pub fn contains(&self, public_key: &str) -> bool {
        !public_key.is_empty() && self.public_keys.iter().any(|key| key == public_key)
    }
}
