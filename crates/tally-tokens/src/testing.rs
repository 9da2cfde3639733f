//! In-process issuer and helpers for exercising refills without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use tally_crypto::blinded::{BlindedToken, SigningKey, Token};

use crate::delegate::RefillDelegate;
use crate::generator::TokenGenerator;
use crate::issuer::{IssuerError, SignedTokensReply, SignedTokensResponse, TokenIssuer};
use crate::wallet::{IssuersInfo, WalletInfo};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A wallet with a fixed payment id and seed.
pub fn test_wallet() -> WalletInfo {
    WalletInfo::new("27a39b2f-9b2e-4eb0-bbb2-2f84447496e7", vec![7; 32])
}

/// A scripted failure for the next issuer call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// HTTP 503.
    Unavailable,
    /// A body that does not parse.
    Malformed,
    /// HTTP 401 with a captcha id. Requests treat it as a plain 401.
    Captcha(String),
    /// Tokens signed by a key the wallet does not know.
    WrongPublicKey,
    /// Tokens signed by another key but reported under the real one.
    TamperedProof,
}

impl Fault {
    fn into_error(self) -> IssuerError {
        match self {
            Fault::Malformed => IssuerError::MalformedResponse("scripted".into()),
            Fault::Captcha(_) => IssuerError::Status(401),
            _ => IssuerError::Status(503),
        }
    }
}

#[derive(Default)]
struct MockState {
    batches: HashMap<String, Vec<BlindedToken>>,
    request_faults: VecDeque<Fault>,
    fetch_faults: VecDeque<Fault>,
    requested_sizes: Vec<usize>,
    fetched_nonces: Vec<String>,
}

/// Issuer that signs with a local key and records every call.
///
/// Nonces are `nonce-1`, `nonce-2`, ... in order of successful requests.
pub struct MockIssuer {
    key: SigningKey,
    requests: AtomicUsize,
    fetches: AtomicUsize,
    state: Mutex<MockState>,
}

impl Default for MockIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIssuer {
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
            requests: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// Base64 public key the issuer signs with.
    pub fn public_key(&self) -> String {
        self.key.public_key().encode_base64()
    }

    pub fn issuers_info(&self) -> IssuersInfo {
        IssuersInfo::new([self.public_key()])
    }

    pub fn fail_next_request(&self, fault: Fault) {
        lock(&self.state).request_faults.push_back(fault);
    }

    pub fn fail_next_fetch(&self, fault: Fault) {
        lock(&self.state).fetch_faults.push_back(fault);
    }

    /// Requests received, failed ones included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Fetches received, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Batch sizes of successful requests.
    pub fn requested_sizes(&self) -> Vec<usize> {
        lock(&self.state).requested_sizes.clone()
    }

    /// Nonces of every fetch, in order.
    pub fn fetched_nonces(&self) -> Vec<String> {
        lock(&self.state).fetched_nonces.clone()
    }

    fn sign(&self, blinded: &[BlindedToken], fault: Option<Fault>) -> Result<SignedTokensReply, IssuerError> {
        let mut rng = OsRng;
        let (signed, proof, public_key) = match fault {
            None => {
                let (signed, proof) = self.sign_batch(&self.key, blinded)?;
                (signed, proof, self.public_key())
            }
            Some(Fault::WrongPublicKey) => {
                let other = SigningKey::random(&mut rng);
                let (signed, proof) = self.sign_batch(&other, blinded)?;
                (signed, proof, other.public_key().encode_base64())
            }
            Some(Fault::TamperedProof) => {
                let other = SigningKey::random(&mut rng);
                let (signed, proof) = self.sign_batch(&other, blinded)?;
                (signed, proof, self.public_key())
            }
            Some(Fault::Captcha(captcha_id)) => {
                return Ok(SignedTokensReply::CaptchaRequired { captcha_id });
            }
            Some(other) => return Err(other.into_error()),
        };
        Ok(SignedTokensReply::Signed(SignedTokensResponse {
            public_key,
            batch_proof: proof,
            signed_tokens: signed,
        }))
    }

    fn sign_batch(
        &self,
        key: &SigningKey,
        blinded: &[BlindedToken],
    ) -> Result<(Vec<String>, String), IssuerError> {
        let (signed, proof) = key
            .sign_batch(&mut OsRng, blinded)
            .map_err(|e| IssuerError::MalformedResponse(e.to_string()))?;
        Ok((
            signed.iter().map(|s| s.encode_base64()).collect(),
            proof.encode_base64(),
        ))
    }
}

impl TokenIssuer for MockIssuer {
    async fn request_signed_tokens(
        &self,
        _wallet: &WalletInfo,
        blinded: &[BlindedToken],
    ) -> Result<String, IssuerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if let Some(fault) = state.request_faults.pop_front() {
            return Err(fault.into_error());
        }
        state.requested_sizes.push(blinded.len());
        let nonce = format!("nonce-{}", state.requested_sizes.len());
        state.batches.insert(nonce.clone(), blinded.to_vec());
        Ok(nonce)
    }

    async fn get_signed_tokens(
        &self,
        _wallet: &WalletInfo,
        nonce: &str,
    ) -> Result<SignedTokensReply, IssuerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (blinded, fault) = {
            let mut state = lock(&self.state);
            state.fetched_nonces.push(nonce.to_string());
            let fault = state.fetch_faults.pop_front();
            let blinded = state.batches.get(nonce).cloned();
            (blinded, fault)
        };
        let blinded = blinded.ok_or(IssuerError::Status(404))?;
        self.sign(&blinded, fault)
    }
}

/// Reproducible tokens from a seeded RNG.
pub struct DeterministicTokenGenerator {
    rng: Mutex<StdRng>,
}

impl DeterministicTokenGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl TokenGenerator for DeterministicTokenGenerator {
    fn generate(&self, count: usize) -> Vec<Token> {
        let mut rng = lock(&self.rng);
        (0..count).map(|_| Token::random(&mut *rng)).collect()
    }
}

/// A delegate callback, as recorded by [`RecordingDelegate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelegateEvent {
    DidRefill,
    Failed,
    CaptchaRequired(String),
    WillRetry(Duration),
    DidRetry,
}

/// Delegate that remembers every callback.
#[derive(Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<DelegateEvent>>,
}

impl RecordingDelegate {
    pub fn events(&self) -> Vec<DelegateEvent> {
        lock(&self.events).clone()
    }

    fn record(&self, event: DelegateEvent) {
        lock(&self.events).push(event);
    }
}

impl RefillDelegate for RecordingDelegate {
    fn on_did_refill_unblinded_tokens(&self) {
        self.record(DelegateEvent::DidRefill);
    }

    fn on_failed_to_refill_unblinded_tokens(&self) {
        self.record(DelegateEvent::Failed);
    }

    fn on_captcha_required_to_refill_unblinded_tokens(&self, captcha_id: &str) {
        self.record(DelegateEvent::CaptchaRequired(captcha_id.to_string()));
    }

    fn on_will_retry_refilling_unblinded_tokens(&self, delay: Duration) {
        self.record(DelegateEvent::WillRetry(delay));
    }

    fn on_did_retry_refilling_unblinded_tokens(&self) {
        self.record(DelegateEvent::DidRetry);
    }
}
