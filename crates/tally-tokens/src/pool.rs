//! Persisted pool of confirmation tokens.
//!
//! A redemption reserves a token, spends it once the confirmation is
//! accepted, and finally confirms the spend, which deletes the token. A
//! redemption that fails releases its token back to the pool.

use std::sync::Arc;

use tally_db::Database;
use tally_types::contribution::RewardsType;
use tally_types::promotion::{CredsBatchType, UnblindedTokenRecord};
use tracing::debug;

use crate::TokenError;

/// Unblinded tokens minted by confirmation refills.
#[derive(Clone)]
pub struct TokenPool {
    database: Arc<Database>,
}

impl TokenPool {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Spendable confirmation tokens.
    pub async fn count(&self) -> Result<usize, TokenError> {
        Ok(self
            .database
            .count_spendable_unblinded_tokens(CredsBatchType::Confirmation)
            .await?)
    }

    /// Store tokens. Returns how many were new.
    pub async fn add(&self, tokens: &[UnblindedTokenRecord]) -> Result<usize, TokenError> {
        Ok(self.database.save_unblinded_token_list(tokens).await?)
    }

    /// Reserve the oldest spendable token for `redeem_id`.
    ///
    /// # Errors
    ///
    /// [`TokenError::Exhausted`] when no token is spendable.
    pub async fn reserve(&self, redeem_id: &str) -> Result<UnblindedTokenRecord, TokenError> {
        let token = self
            .database
            .reserve_oldest_spendable_unblinded_token(CredsBatchType::Confirmation, redeem_id)
            .await?
            .ok_or(TokenError::Exhausted)?;
        debug!(token_id = token.id, redeem_id, "Reserved token");
        Ok(token)
    }

    /// Mark the tokens reserved for `redeem_id` as spent.
    pub async fn spend(&self, redeem_id: &str, redeem_type: RewardsType) -> Result<usize, TokenError> {
        let ids = self.reserved_ids(redeem_id).await?;
        let spent = self
            .database
            .mark_unblinded_tokens_as_spent(&ids, redeem_type, redeem_id)
            .await?;
        debug!(redeem_id, spent, "Spent tokens");
        Ok(spent)
    }

    /// Return the tokens reserved for `redeem_id` to the pool.
    pub async fn release(&self, redeem_id: &str) -> Result<usize, TokenError> {
        let released = self
            .database
            .mark_unblinded_tokens_as_spendable(redeem_id)
            .await?;
        debug!(redeem_id, released, "Released tokens");
        Ok(released)
    }

    /// Delete the spent tokens of a finished redemption.
    pub async fn confirm(&self, redeem_id: &str) -> Result<usize, TokenError> {
        let ids: Vec<i64> = self
            .database
            .get_spent_unblinded_tokens(redeem_id)
            .await?
            .iter()
            .map(|t| t.id)
            .collect();
        Ok(self.database.delete_unblinded_tokens(&ids).await?)
    }

    async fn reserved_ids(&self, redeem_id: &str) -> Result<Vec<i64>, TokenError> {
        Ok(self
            .database
            .get_reserved_unblinded_tokens(redeem_id)
            .await?
            .iter()
            .map(|t| t.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::promotion::{CredsBatch, CredsBatchStatus};
    use tally_types::CONFIRMATION_TOKEN_VALUE;

    async fn pool_with_tokens(count: usize) -> TokenPool {
        let database = Arc::new(Database::open_memory().expect("open db"));
        database
            .save_creds_batch(&CredsBatch {
                creds_id: "creds-1".into(),
                trigger_id: "nonce-1".into(),
                trigger_type: CredsBatchType::Confirmation,
                creds: "[]".into(),
                blinded_creds: "[]".into(),
                signed_creds: String::new(),
                public_key: String::new(),
                batch_proof: String::new(),
                status: CredsBatchStatus::Finished,
            })
            .await
            .expect("save batch");

        let pool = TokenPool::new(database);
        if count > 0 {
            let tokens: Vec<UnblindedTokenRecord> = (0..count)
                .map(|i| {
                    UnblindedTokenRecord::new(
                        format!("token-{i}"),
                        "pk",
                        CONFIRMATION_TOKEN_VALUE,
                        "creds-1",
                        0,
                    )
                })
                .collect();
            assert_eq!(pool.add(&tokens).await.expect("add"), count);
        }
        pool
    }

    #[tokio::test]
    async fn test_count_and_add() {
        let pool = pool_with_tokens(3).await;
        assert_eq!(pool.count().await.expect("count"), 3);

        let duplicate = UnblindedTokenRecord::new("token-0", "pk", 0.25, "creds-1", 0);
        assert_eq!(pool.add(&[duplicate]).await.expect("add"), 0);
        assert_eq!(pool.count().await.expect("count"), 3);
    }

    #[tokio::test]
    async fn test_redemption_lifecycle() {
        let pool = pool_with_tokens(2).await;

        let token = pool.reserve("confirmation-1").await.expect("reserve");
        assert_eq!(token.token_value, "token-0");
        assert_eq!(token.redeem_id, "confirmation-1");
        assert_eq!(pool.count().await.expect("count"), 1);

        assert_eq!(
            pool.spend("confirmation-1", RewardsType::Confirmation)
                .await
                .expect("spend"),
            1
        );
        assert_eq!(pool.confirm("confirmation-1").await.expect("confirm"), 1);
        assert_eq!(pool.confirm("confirmation-1").await.expect("confirm again"), 0);
        assert_eq!(pool.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_release_returns_token() {
        let pool = pool_with_tokens(1).await;
        pool.reserve("confirmation-1").await.expect("reserve");
        assert_eq!(pool.count().await.expect("count"), 0);

        assert_eq!(pool.release("confirmation-1").await.expect("release"), 1);
        assert_eq!(pool.count().await.expect("count"), 1);

        let again = pool.reserve("confirmation-2").await.expect("reserve again");
        assert_eq!(again.token_value, "token-0");
    }

    #[tokio::test]
    async fn test_concurrent_reserves_take_distinct_tokens() {
        let pool = pool_with_tokens(2).await;
        let (a, b) = tokio::join!(pool.reserve("confirmation-a"), pool.reserve("confirmation-b"));
        let a = a.expect("reserve a");
        let b = b.expect("reserve b");
        assert_ne!(a.id, b.id);
        assert_eq!(pool.count().await.expect("count"), 0);
        assert!(matches!(
            pool.reserve("confirmation-c").await,
            Err(TokenError::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_reserve_from_empty_pool() {
        let pool = pool_with_tokens(0).await;
        assert!(matches!(
            pool.reserve("confirmation-1").await,
            Err(TokenError::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_spend_without_reservation() {
        let pool = pool_with_tokens(1).await;
        assert_eq!(
            pool.spend("nothing-reserved", RewardsType::Confirmation)
                .await
                .expect("spend"),
            0
        );
        assert_eq!(pool.count().await.expect("count"), 1);
    }
}
