//! Confirmation token refill.
//!
//! ```text
//! maybe_refill ─ guards ─> request signed tokens ─nonce─> get signed tokens
//!                                                            │      │
//!                                                     captcha│      │signed
//!                                                            v      v
//!                                                       suspended  verify ─> persist
//! ```
//!
//! One cycle runs at a time. A transport failure waits [`RETRY_DELAY`] and
//! resumes at the step that failed: a batch whose nonce is known is fetched
//! again rather than requested anew. The outstanding batch is recorded in
//! `creds_batch` as soon as the nonce arrives, so a cycle cut short by a
//! restart resumes from the newest `Blinded` confirmation batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rand::RngCore;
use tally_crypto::blinded::{BatchDleqProof, BlindedToken, PublicKey, SignedToken, Token};
use tally_types::promotion::{CredsBatch, CredsBatchStatus, CredsBatchType, UnblindedTokenRecord};
use tally_types::CONFIRMATION_TOKEN_VALUE;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::delegate::RefillDelegate;
use crate::generator::{RandomTokenGenerator, TokenGenerator};
use crate::issuer::{SignedTokensReply, SignedTokensResponse, TokenIssuer};
use crate::pool::TokenPool;
use crate::wallet::{IssuersInfo, WalletInfo};
use crate::{RefillError, MAXIMUM_UNBLINDED_TOKENS, MINIMUM_UNBLINDED_TOKENS, RETRY_DELAY};

/// Pool bounds and retry timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefillConfig {
    pub minimum: usize,
    pub maximum: usize,
    pub retry_delay: Duration,
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            minimum: MINIMUM_UNBLINDED_TOKENS,
            maximum: MAXIMUM_UNBLINDED_TOKENS,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// How a call to [`RefillUnblindedTokens::maybe_refill`] ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
    /// New tokens were verified and stored.
    Refilled { added: usize },
    /// The pool already held enough tokens.
    NotNeeded { available: usize },
    /// Another cycle is running or waiting to retry.
    AlreadyProcessing,
    /// The issuer wants a captcha solved; the batch is kept for next time.
    CaptchaRequired { captcha_id: String },
}

/// A batch submitted for signing and not yet stored as tokens.
struct PendingBatch {
    creds_id: String,
    nonce: String,
    tokens: Vec<Token>,
    blinded: Vec<BlindedToken>,
}

impl PendingBatch {
    fn to_record(&self) -> Result<CredsBatch, RefillError> {
        let tokens: Vec<String> = self.tokens.iter().map(Token::encode_base64).collect();
        let blinded: Vec<String> = self.blinded.iter().map(BlindedToken::encode_base64).collect();
        Ok(CredsBatch {
            creds_id: self.creds_id.clone(),
            trigger_id: self.nonce.clone(),
            trigger_type: CredsBatchType::Confirmation,
            creds: to_json(&tokens)?,
            blinded_creds: to_json(&blinded)?,
            signed_creds: String::new(),
            public_key: String::new(),
            batch_proof: String::new(),
            status: CredsBatchStatus::Blinded,
        })
    }

    fn from_record(record: &CredsBatch) -> Result<Self, RefillError> {
        let tokens = from_json(&record.creds)?
            .iter()
            .map(|t| Token::decode_base64(t))
            .collect::<Result<Vec<_>, _>>()?;
        let blinded = from_json(&record.blinded_creds)?
            .iter()
            .map(|b| BlindedToken::decode_base64(b))
            .collect::<Result<Vec<_>, _>>()?;
        if tokens.is_empty() || tokens.len() != blinded.len() {
            return Err(RefillError::CorruptBatch(format!(
                "{} tokens for {} blinded tokens",
                tokens.len(),
                blinded.len()
            )));
        }
        Ok(Self {
            creds_id: record.creds_id.clone(),
            nonce: record.trigger_id.clone(),
            tokens,
            blinded,
        })
    }
}

fn to_json(values: &[String]) -> Result<String, RefillError> {
    serde_json::to_string(values).map_err(|e| RefillError::CorruptBatch(e.to_string()))
}

fn from_json(json: &str) -> Result<Vec<String>, RefillError> {
    serde_json::from_str(json).map_err(|e| RefillError::CorruptBatch(e.to_string()))
}

fn new_creds_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Clears the processing flag when a cycle ends or its future is dropped.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the confirmation token pool between its minimum and maximum.
pub struct RefillUnblindedTokens<I, G = RandomTokenGenerator> {
    pool: TokenPool,
    issuer: I,
    generator: G,
    config: RefillConfig,
    processing: AtomicBool,
    pending: Mutex<Option<PendingBatch>>,
    delegate: RwLock<Option<Arc<dyn RefillDelegate>>>,
}

impl<I: TokenIssuer> RefillUnblindedTokens<I> {
    pub fn new(pool: TokenPool, issuer: I) -> Self {
        Self::with_generator(pool, issuer, RandomTokenGenerator)
    }
}

impl<I: TokenIssuer, G: TokenGenerator> RefillUnblindedTokens<I, G> {
    pub fn with_generator(pool: TokenPool, issuer: I, generator: G) -> Self {
        Self {
            pool,
            issuer,
            generator,
            config: RefillConfig::default(),
            processing: AtomicBool::new(false),
            pending: Mutex::new(None),
            delegate: RwLock::new(None),
        }
    }

    /// Replace the bounds. A maximum below the minimum is raised to it.
    pub fn with_config(mut self, mut config: RefillConfig) -> Self {
        if config.maximum < config.minimum {
            warn!(
                minimum = config.minimum,
                maximum = config.maximum,
                "Refill maximum below minimum; using the minimum"
            );
            config.maximum = config.minimum;
        }
        self.config = config;
        self
    }

    pub fn config(&self) -> &RefillConfig {
        &self.config
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    /// Install or clear the delegate.
    pub fn set_delegate(&self, delegate: Option<Arc<dyn RefillDelegate>>) {
        *self.delegate.write().unwrap_or_else(PoisonError::into_inner) = delegate;
    }

    /// Whether a cycle is running or waiting to retry.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    fn notify(&self, f: impl FnOnce(&dyn RefillDelegate)) {
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delegate) = delegate {
            f(delegate.as_ref());
        }
    }

    /// Refill the pool if it has fallen below the minimum.
    ///
    /// The returned future covers the whole cycle including retry waits.
    /// Dropping it abandons the cycle; the outstanding batch stays recorded
    /// and is picked up by the next call.
    ///
    /// # Errors
    ///
    /// Invalid issuers or wallet, and every failure that is not retried:
    /// a malformed issuer response, an unknown public key, a batch proof
    /// that does not verify, or a storage error.
    pub async fn maybe_refill(
        &self,
        wallet: &WalletInfo,
        issuers: &IssuersInfo,
    ) -> Result<RefillOutcome, RefillError> {
        if !issuers.is_valid() {
            warn!("Missing confirmation issuer public keys");
            self.notify(|d| d.on_failed_to_refill_unblinded_tokens());
            return Err(RefillError::MissingIssuers);
        }
        if !wallet.is_valid() {
            warn!("Refill requested with an invalid wallet");
            self.notify(|d| d.on_failed_to_refill_unblinded_tokens());
            return Err(RefillError::InvalidWallet);
        }
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            info!("Already refilling unblinded tokens");
            return Ok(RefillOutcome::AlreadyProcessing);
        };

        let available = self.pool.count().await?;
        if available >= self.config.minimum {
            info!(
                available,
                minimum = self.config.minimum,
                "No need to refill unblinded tokens"
            );
            return Ok(RefillOutcome::NotNeeded { available });
        }

        info!(available, "Refilling unblinded tokens");
        match self.run_cycle(wallet, issuers).await {
            Ok(outcome) => {
                match &outcome {
                    RefillOutcome::Refilled { added } => {
                        info!(added, "Successfully refilled unblinded tokens");
                        self.notify(|d| d.on_did_refill_unblinded_tokens());
                    }
                    RefillOutcome::CaptchaRequired { captcha_id } => {
                        info!(captcha_id = %captcha_id, "Captcha required to refill unblinded tokens");
                        self.notify(|d| d.on_captcha_required_to_refill_unblinded_tokens(captcha_id));
                    }
                    _ => {}
                }
                Ok(outcome)
            }
            Err(e) => {
                error!("Failed to refill unblinded tokens: {e}");
                self.notify(|d| d.on_failed_to_refill_unblinded_tokens());
                Err(e)
            }
        }
    }

    async fn run_cycle(
        &self,
        wallet: &WalletInfo,
        issuers: &IssuersInfo,
    ) -> Result<RefillOutcome, RefillError> {
        let mut pending = self.pending.lock().await;
        loop {
            match self.step(wallet, issuers, &mut pending).await {
                Err(e) if e.is_retryable() => {
                    let delay = self.config.retry_delay;
                    warn!(
                        delay_secs = delay.as_secs(),
                        resume_at_fetch = pending.is_some(),
                        "Refill step failed, retrying: {e}"
                    );
                    self.notify(|d| d.on_will_retry_refilling_unblinded_tokens(delay));
                    tokio::time::sleep(delay).await;
                    info!("Retrying unblinded token refill");
                    self.notify(|d| d.on_did_retry_refilling_unblinded_tokens());
                }
                result => return result,
            }
        }
    }

    async fn step(
        &self,
        wallet: &WalletInfo,
        issuers: &IssuersInfo,
        pending: &mut Option<PendingBatch>,
    ) -> Result<RefillOutcome, RefillError> {
        if pending.is_none() {
            *pending = self.load_pending_batch().await?;
        }
        if pending.is_none() {
            *pending = Some(self.request_signed_tokens(wallet).await?);
        }
        let Some(batch) = pending.as_ref() else {
            return Err(RefillError::CorruptBatch("no outstanding batch".into()));
        };

        info!(nonce = %batch.nonce, "Get signed tokens");
        let reply = match self.issuer.get_signed_tokens(wallet, &batch.nonce).await {
            Ok(reply) => reply,
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                self.abandon(pending, CredsBatchStatus::Corrupted).await;
                return Err(e.into());
            }
        };
        let response = match reply {
            SignedTokensReply::CaptchaRequired { captcha_id } => {
                return Ok(RefillOutcome::CaptchaRequired { captcha_id });
            }
            SignedTokensReply::Signed(response) => response,
        };

        match self.store_signed_tokens(batch, &response, issuers).await {
            Ok(added) => {
                *pending = None;
                Ok(RefillOutcome::Refilled { added })
            }
            Err(e @ (RefillError::UnknownPublicKey(_) | RefillError::Verification(_))) => {
                self.abandon(pending, CredsBatchStatus::Corrupted).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Newest outstanding confirmation batch left by an earlier cycle.
    async fn load_pending_batch(&self) -> Result<Option<PendingBatch>, RefillError> {
        let database = self.pool.database();
        let batches = database
            .get_creds_batches_by_status(CredsBatchType::Confirmation, CredsBatchStatus::Blinded)
            .await?;
        let Some(record) = batches.into_iter().next() else {
            return Ok(None);
        };

        match PendingBatch::from_record(&record) {
            Ok(batch) => {
                info!(nonce = %batch.nonce, "Resuming outstanding refill batch");
                Ok(Some(batch))
            }
            Err(e) => {
                warn!(nonce = %record.trigger_id, "Discarding unreadable refill batch: {e}");
                database
                    .update_creds_batch_status(
                        &record.trigger_id,
                        CredsBatchType::Confirmation,
                        CredsBatchStatus::Corrupted,
                    )
                    .await?;
                Ok(None)
            }
        }
    }

    async fn request_signed_tokens(&self, wallet: &WalletInfo) -> Result<PendingBatch, RefillError> {
        let available = self.pool.count().await?;
        let count = self.config.maximum.saturating_sub(available);
        let tokens = self.generator.generate(count);
        let blinded: Vec<BlindedToken> = tokens.iter().map(Token::blind).collect();

        info!(count, "Request signed tokens");
        let nonce = self.issuer.request_signed_tokens(wallet, &blinded).await?;

        let batch = PendingBatch {
            creds_id: new_creds_id(),
            nonce,
            tokens,
            blinded,
        };
        self.pool.database().save_creds_batch(&batch.to_record()?).await?;
        Ok(batch)
    }

    async fn store_signed_tokens(
        &self,
        batch: &PendingBatch,
        response: &SignedTokensResponse,
        issuers: &IssuersInfo,
    ) -> Result<usize, RefillError> {
        let database = self.pool.database();
        let mut record = batch.to_record()?;
        record.signed_creds = to_json(&response.signed_tokens)?;
        record.public_key = response.public_key.clone();
        record.batch_proof = response.batch_proof.clone();
        database.save_signed_creds(&record).await?;

        if !issuers.contains(&response.public_key) {
            return Err(RefillError::UnknownPublicKey(response.public_key.clone()));
        }
        let public_key = PublicKey::decode_base64(&response.public_key)?;
        let proof = BatchDleqProof::decode_base64(&response.batch_proof)?;
        let signed = response
            .signed_tokens
            .iter()
            .map(|s| SignedToken::decode_base64(s))
            .collect::<Result<Vec<_>, _>>()?;
        let unblinded = proof.verify_and_unblind(&batch.tokens, &batch.blinded, &signed, &public_key)?;

        let records: Vec<UnblindedTokenRecord> = unblinded
            .iter()
            .map(|token| {
                UnblindedTokenRecord::new(
                    token.encode_base64(),
                    response.public_key.clone(),
                    CONFIRMATION_TOKEN_VALUE,
                    batch.creds_id.clone(),
                    0,
                )
            })
            .collect();
        let added = self.pool.add(&records).await?;
        database
            .update_creds_batch_status(
                &batch.nonce,
                CredsBatchType::Confirmation,
                CredsBatchStatus::Finished,
            )
            .await?;
        Ok(added)
    }

    /// Drop the outstanding batch and record why.
    async fn abandon(&self, pending: &mut Option<PendingBatch>, status: CredsBatchStatus) {
        let Some(batch) = pending.take() else {
            return;
        };
        if let Err(e) = self
            .pool
            .database()
            .update_creds_batch_status(&batch.nonce, CredsBatchType::Confirmation, status)
            .await
        {
            warn!(nonce = %batch.nonce, "Failed to mark refill batch {status:?}: {e}");
        }
    }
}
