//! `tokens status`: a snapshot of the confirmation token pool.

use std::sync::Arc;

use serde::Serialize;
use tally_db::Database;
use tally_tokens::{RefillConfig, TokenPool};
use tally_types::promotion::{CredsBatchStatus, CredsBatchType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub spendable: usize,
    pub minimum: usize,
    pub maximum: usize,
    pub needs_refill: bool,
    /// Nonces of batches requested but not yet stored as tokens.
    pub outstanding_batches: Vec<String>,
}

pub async fn status(database: Arc<Database>, config: &RefillConfig) -> anyhow::Result<TokenStatus> {
    let pool = TokenPool::new(database.clone());
    let spendable = pool.count().await?;
    let outstanding_batches = database
        .get_creds_batches_by_status(CredsBatchType::Confirmation, CredsBatchStatus::Blinded)
        .await?
        .into_iter()
        .map(|batch| batch.trigger_id)
        .collect();

    Ok(TokenStatus {
        spendable,
        minimum: config.minimum,
        maximum: config.maximum,
        needs_refill: spendable < config.minimum,
        outstanding_batches,
    })
}
