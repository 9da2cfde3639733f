//! Blinded confirmation tokens on the RFC 9497 VOPRF (ristretto255, SHA-512).
//!
//! An issuer signs tokens it never sees in the clear, and proves in one
//! batch that every signature was made with the key it publishes. The
//! holder can later present an unblinded token that the issuer cannot link
//! back to the signing request.
//!
//! ## Protocol Flow
//!
//! 1. Client: `Token::random()` then `token.blind()` -> `BlindedToken`
//! 2. Issuer: `SigningKey::sign_batch(blinded)` -> `(Vec<SignedToken>, BatchDleqProof)`
//! 3. Client: `proof.verify_and_unblind(tokens, blinded, signed, public_key)`
//!    -> `Vec<UnblindedToken>`
//!
//! The group arithmetic and the batch proof come from the `voprf` crate.
//! This module owns the wire encodings and the pairing of tokens with
//! their blinded form.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand_core::{CryptoRng, RngCore};
use voprf::{
    BlindedElement, EvaluationElement, Group, Proof, Ristretto255, VoprfClient, VoprfServer,
};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

type Suite = Ristretto255;
type Element = <Suite as Group>::Elem;

/// Length of the random token preimage.
pub const TOKEN_PREIMAGE_LENGTH: usize = 64;

/// Length of a compressed group element or scalar.
pub const ELEMENT_LENGTH: usize = 32;

/// Length of the VOPRF output bound into an unblinded token.
pub const OUTPUT_LENGTH: usize = 64;

const TOKEN_HEADER_LENGTH: usize = TOKEN_PREIMAGE_LENGTH + ELEMENT_LENGTH;
const UNBLINDED_LENGTH: usize = TOKEN_PREIMAGE_LENGTH + OUTPUT_LENGTH;
const PROOF_LENGTH: usize = 2 * ELEMENT_LENGTH;

const KEY_INFO: &[u8] = b"tally-confirmation-token-key";

fn voprf_error(error: voprf::Error) -> CryptoError {
    CryptoError::InvalidEncoding(format!("{error:?}"))
}

fn check_length(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(CryptoError::InvalidLength {
            expected,
            actual: bytes.len(),
        })
    }
}

/// A token blinded by the client, safe to send to the issuer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedToken(BlindedElement<Suite>);

impl BlindedToken {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.serialize().to_vec()
    }

    /// # Errors
    ///
    /// Fails on wrong length or bytes that are not a valid element.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, ELEMENT_LENGTH)?;
        BlindedElement::deserialize(bytes)
            .map(Self)
            .map_err(voprf_error)
    }

    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.0.serialize())
    }

    /// # Errors
    ///
    /// Fails on invalid base64 or an invalid element.
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }
}

/// The issuer's evaluation of a blinded token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedToken(EvaluationElement<Suite>);

impl SignedToken {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.serialize().to_vec()
    }

    /// # Errors
    ///
    /// Fails on wrong length or bytes that are not a valid element.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, ELEMENT_LENGTH)?;
        EvaluationElement::deserialize(bytes)
            .map(Self)
            .map_err(voprf_error)
    }

    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.0.serialize())
    }

    /// # Errors
    ///
    /// Fails on invalid base64 or an invalid element.
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }
}

/// Issuer public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(Element);

impl PublicKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        Suite::serialize_elem(self.0).to_vec()
    }

    /// # Errors
    ///
    /// Fails on wrong length or bytes that are not a valid element.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, ELEMENT_LENGTH)?;
        Suite::deserialize_elem(bytes)
            .map(Self)
            .map_err(voprf_error)
    }

    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// # Errors
    ///
    /// Fails on invalid base64 or an invalid element.
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }
}

/// A client-held token: random preimage, its blinded form and the
/// blinding state needed to finalize it.
#[derive(Clone)]
pub struct Token {
    preimage: [u8; TOKEN_PREIMAGE_LENGTH],
    blinded: BlindedElement<Suite>,
    state: VoprfClient<Suite>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(..)")
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.preimage.zeroize();
    }
}

impl Token {
    /// Generate a token with a fresh preimage and blinding factor.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut preimage = [0u8; TOKEN_PREIMAGE_LENGTH];
        // Blinding only fails when the preimage hashes to the identity.
        loop {
            rng.fill_bytes(&mut preimage);
            if let Ok(result) = VoprfClient::<Suite>::blind(&preimage, rng) {
                return Self {
                    preimage,
                    blinded: result.message.clone(),
                    state: result.state.clone(),
                };
            }
        }
    }

    pub fn blind(&self) -> BlindedToken {
        BlindedToken(self.blinded.clone())
    }

    /// `preimage || blinded || client state`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.preimage.to_vec();
        out.extend_from_slice(&self.blinded.serialize());
        out.extend_from_slice(&self.state.serialize());
        out
    }

    /// # Errors
    ///
    /// Fails on wrong length or an invalid blinded element or state.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= TOKEN_HEADER_LENGTH {
            return Err(CryptoError::InvalidEncoding(format!(
                "token of {} bytes is truncated",
                bytes.len()
            )));
        }
        let (preimage_bytes, rest) = bytes.split_at(TOKEN_PREIMAGE_LENGTH);
        let (blinded_bytes, state_bytes) = rest.split_at(ELEMENT_LENGTH);
        let mut preimage = [0u8; TOKEN_PREIMAGE_LENGTH];
        preimage.copy_from_slice(preimage_bytes);
        Ok(Self {
            preimage,
            blinded: BlindedElement::deserialize(blinded_bytes).map_err(voprf_error)?,
            state: VoprfClient::deserialize(state_bytes).map_err(voprf_error)?,
        })
    }

    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// # Errors
    ///
    /// Fails on invalid base64 or an invalid token encoding.
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }
}

/// A spendable token: the preimage and its VOPRF output under the issuer key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnblindedToken {
    preimage: [u8; TOKEN_PREIMAGE_LENGTH],
    output: [u8; OUTPUT_LENGTH],
}

impl UnblindedToken {
    pub fn preimage(&self) -> &[u8; TOKEN_PREIMAGE_LENGTH] {
        &self.preimage
    }

    /// `preimage || output`.
    pub fn to_bytes(&self) -> [u8; UNBLINDED_LENGTH] {
        let mut out = [0u8; UNBLINDED_LENGTH];
        out[..TOKEN_PREIMAGE_LENGTH].copy_from_slice(&self.preimage);
        out[TOKEN_PREIMAGE_LENGTH..].copy_from_slice(&self.output);
        out
    }

    /// # Errors
    ///
    /// Fails on wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, UNBLINDED_LENGTH)?;
        let mut preimage = [0u8; TOKEN_PREIMAGE_LENGTH];
        let mut output = [0u8; OUTPUT_LENGTH];
        preimage.copy_from_slice(&bytes[..TOKEN_PREIMAGE_LENGTH]);
        output.copy_from_slice(&bytes[TOKEN_PREIMAGE_LENGTH..]);
        Ok(Self { preimage, output })
    }

    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// # Errors
    ///
    /// Fails on invalid base64 or an invalid token encoding.
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }
}

/// Issuer signing key.
#[derive(Clone)]
pub struct SigningKey {
    server: VoprfServer<Suite>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; ELEMENT_LENGTH];
        // Key derivation only fails on a zero scalar.
        loop {
            rng.fill_bytes(&mut seed);
            if let Ok(server) = VoprfServer::new_from_seed(&seed, KEY_INFO) {
                seed.zeroize();
                return Self { server };
            }
        }
    }

    /// # Errors
    ///
    /// Fails on wrong length, a non-canonical or a zero scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, ELEMENT_LENGTH)?;
        VoprfServer::new_with_key(bytes)
            .map(|server| Self { server })
            .map_err(voprf_error)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.server.get_public_key())
    }

    /// Sign every blinded token and prove the batch.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidInput`] if `blinded` is empty.
    pub fn sign_batch<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        blinded: &[BlindedToken],
    ) -> Result<(Vec<SignedToken>, BatchDleqProof)> {
        if blinded.is_empty() {
            return Err(CryptoError::InvalidInput("empty batch".into()));
        }
        let elements: Vec<BlindedElement<Suite>> = blinded.iter().map(|b| b.0.clone()).collect();
        let result = self
            .server
            .batch_blind_evaluate(rng, &elements)
            .map_err(|e| CryptoError::InvalidInput(format!("{e:?}")))?;
        let signed = result.messages.iter().cloned().map(SignedToken).collect();
        Ok((signed, BatchDleqProof(result.proof.clone())))
    }

    /// Check a redeemed token against this key.
    pub fn verify_unblinded(&self, token: &UnblindedToken) -> bool {
        self.server
            .evaluate(&token.preimage)
            .map(|output| output.as_slice() == token.output.as_slice())
            .unwrap_or(false)
    }
}

/// Proof that a batch of signed tokens was produced with one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchDleqProof(Proof<Suite>);

impl BatchDleqProof {
    /// Verify the proof, then unblind every signed token with its token.
    ///
    /// Nothing is unblinded unless the whole batch verifies.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidInput`] if the batch is empty or `tokens`,
    /// `blinded` and `signed` do not line up;
    /// [`CryptoError::ProofVerification`] if the proof does not hold for
    /// this batch and key.
    pub fn verify_and_unblind(
        &self,
        tokens: &[Token],
        blinded: &[BlindedToken],
        signed: &[SignedToken],
        public_key: &PublicKey,
    ) -> Result<Vec<UnblindedToken>> {
        if tokens.is_empty() {
            return Err(CryptoError::InvalidInput("empty batch".into()));
        }
        if tokens.len() != blinded.len() || blinded.len() != signed.len() {
            return Err(CryptoError::InvalidInput(format!(
                "{} tokens, {} blinded tokens, {} signed tokens",
                tokens.len(),
                blinded.len(),
                signed.len()
            )));
        }
        if tokens.iter().zip(blinded).any(|(token, b)| token.blinded != b.0) {
            return Err(CryptoError::InvalidInput(
                "blinded tokens do not belong to these tokens".into(),
            ));
        }

        let inputs: Vec<[u8; TOKEN_PREIMAGE_LENGTH]> = tokens.iter().map(|t| t.preimage).collect();
        let clients: Vec<VoprfClient<Suite>> = tokens.iter().map(|t| t.state.clone()).collect();
        let messages: Vec<EvaluationElement<Suite>> = signed.iter().map(|s| s.0.clone()).collect();
        let outputs = VoprfClient::<Suite>::batch_finalize(
            &inputs,
            &clients,
            &messages,
            &self.0,
            public_key.0,
        )
        .map_err(|_| CryptoError::ProofVerification)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| CryptoError::ProofVerification)?;

        Ok(tokens
            .iter()
            .zip(outputs)
            .map(|(token, digest)| {
                let mut output = [0u8; OUTPUT_LENGTH];
                output.copy_from_slice(digest.as_slice());
                UnblindedToken {
                    preimage: token.preimage,
                    output,
                }
            })
            .collect())
    }

    /// `challenge || response`.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.serialize().to_vec()
    }

    /// # Errors
    ///
    /// Fails on wrong length or non-canonical scalars.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes, PROOF_LENGTH)?;
        Proof::deserialize(bytes).map(Self).map_err(voprf_error)
    }

    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.0.serialize())
    }

    /// # Errors
    ///
    /// Fails on invalid base64 or an invalid proof encoding.
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }
}
