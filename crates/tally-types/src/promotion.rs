//! Promotions, credential batches and unblinded tokens.

use serde::{Deserialize, Serialize};

use crate::contribution::RewardsType;
use crate::Timestamp;

int_enum! {
    pub enum PromotionType {
        Ugp = 0,
        Ads = 1,
    }
}

int_enum! {
    #[derive(Default)]
    pub enum PromotionStatus {
        #[default]
        Active = 0,
        Attested = 1,
        Finished = 4,
        Over = 5,
        Corrupted = 6,
    }
}

/// A grant offered to the wallet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: String,
    pub version: u32,
    pub promotion_type: PromotionType,
    /// JSON array of issuer public keys.
    pub public_keys: String,
    pub suggestions: u64,
    pub approximate_value: f64,
    pub status: PromotionStatus,
    pub created_at: Timestamp,
    pub claimable_until: Timestamp,
    pub expires_at: Timestamp,
    pub claimed_at: Timestamp,
    pub claim_id: String,
    pub legacy_claimed: bool,
}

int_enum! {
    /// What triggered a credential batch.
    pub enum CredsBatchType {
        None = 0,
        Promotion = 1,
        Sku = 2,
        /// Anonymous confirmation token refill.
        Confirmation = 3,
    }
}

int_enum! {
    #[derive(Default)]
    pub enum CredsBatchStatus {
        #[default]
        None = 0,
        Blinded = 1,
        Claimed = 2,
        Signed = 3,
        Finished = 4,
        Corrupted = 5,
    }
}

/// Tokens, their blinded form and the issuer's answer for one trigger.
///
/// List-valued fields hold JSON arrays of base64 strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredsBatch {
    pub creds_id: String,
    pub trigger_id: String,
    pub trigger_type: CredsBatchType,
    pub creds: String,
    pub blinded_creds: String,
    pub signed_creds: String,
    pub public_key: String,
    pub batch_proof: String,
    pub status: CredsBatchStatus,
}

/// A persisted unblinded token.
///
/// State is derived from the timestamps: spendable while both `redeemed_at`
/// and `reserved_at` are zero, reserved once `reserved_at` is set, spent once
/// `redeemed_at` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnblindedTokenRecord {
    /// Assigned by the store; ignored on insert.
    pub id: i64,
    pub token_value: String,
    pub public_key: String,
    pub value: f64,
    pub creds_id: String,
    pub expires_at: Timestamp,
    pub redeemed_at: Timestamp,
    pub redeem_id: String,
    pub redeem_type: Option<RewardsType>,
    pub reserved_at: Timestamp,
}

impl UnblindedTokenRecord {
    /// A fresh spendable token.
    pub fn new(
        token_value: impl Into<String>,
        public_key: impl Into<String>,
        value: f64,
        creds_id: impl Into<String>,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            id: 0,
            token_value: token_value.into(),
            public_key: public_key.into(),
            value,
            creds_id: creds_id.into(),
            expires_at,
            redeemed_at: 0,
            redeem_id: String::new(),
            redeem_type: None,
            reserved_at: 0,
        }
    }

    pub fn is_spendable(&self) -> bool {
        self.redeemed_at == 0 && self.reserved_at == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_spendable() {
        let token = UnblindedTokenRecord::new("value", "key", 0.25, "creds", 0);
        assert!(token.is_spendable());
        assert_eq!(token.redeem_type, None);
    }

    #[test]
    fn test_token_serde() {
        let token = UnblindedTokenRecord::new("value", "key", 0.25, "creds", 10);
        let json = serde_json::to_string(&token).expect("serialize");
        let parsed: UnblindedTokenRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, token);
    }
}
