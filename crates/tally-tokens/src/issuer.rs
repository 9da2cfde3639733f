//! Token issuer seam and its HTTP implementation.
//!
//! ```text
//! POST {base}/v2/confirmation/token/{payment_id}   {"blindedTokens": [..]} -> {"nonce"}
//! GET  {base}/v2/confirmation/token/{payment_id}?nonce=..
//!        200 -> {"publicKey", "batchProof", "signedTokens": [..]}
//!        401 -> {"captcha_id"}
//! ```
//!
//! The POST is signed with the wallet key: a `digest` header carries the
//! SHA-256 of the body and a `signature` header an ed25519 signature over
//! the `digest` header line.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tally_crypto::blinded::BlindedToken;
use tracing::debug;

use crate::wallet::WalletInfo;

/// Key id sent in the `signature` header.
pub const SIGNATURE_KEY_ID: &str = "primary";

#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("issuer responded with status {0}")]
    Status(u16),

    #[error("malformed issuer response: {0}")]
    MalformedResponse(String),

    #[error("wallet cannot sign requests")]
    InvalidWallet,
}

impl IssuerError {
    /// Transport failures and unexpected statuses are worth retrying. A body
    /// that does not parse will not parse next time either.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IssuerError::Http(_) | IssuerError::Status(_))
    }
}

/// The issuer's answer to a signing request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTokensResponse {
    pub public_key: String,
    pub batch_proof: String,
    pub signed_tokens: Vec<String>,
}

/// Result of fetching signed tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignedTokensReply {
    Signed(SignedTokensResponse),
    /// The issuer wants a captcha solved before it releases the tokens.
    CaptchaRequired { captcha_id: String },
}

/// Remote service that blind-signs confirmation tokens.
pub trait TokenIssuer: Send + Sync {
    /// Submit blinded tokens for signing. Returns the nonce to fetch them by.
    fn request_signed_tokens(
        &self,
        wallet: &WalletInfo,
        blinded: &[BlindedToken],
    ) -> impl Future<Output = Result<String, IssuerError>> + Send;

    /// Fetch the signed tokens for a nonce.
    fn get_signed_tokens(
        &self,
        wallet: &WalletInfo,
        nonce: &str,
    ) -> impl Future<Output = Result<SignedTokensReply, IssuerError>> + Send;
}

impl<T: TokenIssuer> TokenIssuer for Arc<T> {
    fn request_signed_tokens(
        &self,
        wallet: &WalletInfo,
        blinded: &[BlindedToken],
    ) -> impl Future<Output = Result<String, IssuerError>> + Send {
        (**self).request_signed_tokens(wallet, blinded)
    }

    fn get_signed_tokens(
        &self,
        wallet: &WalletInfo,
        nonce: &str,
    ) -> impl Future<Output = Result<SignedTokensReply, IssuerError>> + Send {
        (**self).get_signed_tokens(wallet, nonce)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestSignedTokensBody {
    blinded_tokens: Vec<String>,
}

#[derive(Deserialize)]
struct NonceBody {
    nonce: String,
}

#[derive(Deserialize)]
struct CaptchaBody {
    captcha_id: String,
}

/// `SHA-256=<base64 digest>` for a request body.
pub fn digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(tally_crypto::sha256::hash(body)))
}

/// `signature` header value over the `digest` header line.
pub fn signature_header(key: &SigningKey, digest: &str) -> String {
    let signature = key.sign(format!("digest: {digest}").as_bytes());
    format!(
        "keyId=\"{SIGNATURE_KEY_ID}\",algorithm=\"ed25519\",headers=\"digest\",signature=\"{}\"",
        BASE64.encode(signature.to_bytes())
    )
}

fn parse_body<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, IssuerError> {
    serde_json::from_slice(bytes).map_err(|e| IssuerError::MalformedResponse(e.to_string()))
}

/// [`TokenIssuer`] over HTTPS.
pub struct HttpTokenIssuer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTokenIssuer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IssuerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token_url(&self, payment_id: &str) -> String {
        format!(
            "{}/v2/confirmation/token/{payment_id}",
            self.base_url.trim_end_matches('/')
        )
    }
}

impl TokenIssuer for HttpTokenIssuer {
    async fn request_signed_tokens(
        &self,
        wallet: &WalletInfo,
        blinded: &[BlindedToken],
    ) -> Result<String, IssuerError> {
        let key = wallet.signing_key().ok_or(IssuerError::InvalidWallet)?;
        let body = serde_json::to_vec(&RequestSignedTokensBody {
            blinded_tokens: blinded.iter().map(BlindedToken::encode_base64).collect(),
        })
        .map_err(|e| IssuerError::MalformedResponse(e.to_string()))?;
        let digest = digest_header(&body);
        let signature = signature_header(&key, &digest);

        let url = self.token_url(wallet.payment_id());
        debug!(%url, count = blinded.len(), "Requesting signed tokens");
        let response = self
            .client
            .post(&url)
            .header("digest", digest)
            .header("signature", signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IssuerError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        let NonceBody { nonce } = parse_body(&bytes)?;
        if nonce.is_empty() {
            return Err(IssuerError::MalformedResponse("empty nonce".into()));
        }
        Ok(nonce)
    }

    async fn get_signed_tokens(
        &self,
        wallet: &WalletInfo,
        nonce: &str,
    ) -> Result<SignedTokensReply, IssuerError> {
        let url = self.token_url(wallet.payment_id());
        debug!(%url, nonce, "Fetching signed tokens");
        let response = self
            .client
            .get(&url)
            .query(&[("nonce", nonce)])
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status == StatusCode::UNAUTHORIZED {
            return match serde_json::from_slice::<CaptchaBody>(&bytes) {
                Ok(CaptchaBody { captcha_id }) if !captcha_id.is_empty() => {
                    Ok(SignedTokensReply::CaptchaRequired { captcha_id })
                }
                _ => Err(IssuerError::Status(status.as_u16())),
            };
        }
        if !status.is_success() {
            return Err(IssuerError::Status(status.as_u16()));
        }

        let response: SignedTokensResponse = parse_body(&bytes)?;
        if response.public_key.is_empty() || response.batch_proof.is_empty() {
            return Err(IssuerError::MalformedResponse(
                "missing public key or batch proof".into(),
            ));
        }
        Ok(SignedTokensReply::Signed(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn test_digest_header() {
        // SHA-256 of the empty string.
        assert_eq!(
            digest_header(b""),
            "SHA-256=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_signature_header_verifies() {
        let wallet = WalletInfo::new("payment", vec![3; 32]);
        let key = wallet.signing_key().expect("signing key");
        let digest = digest_header(br#"{"blindedTokens":[]}"#);
        let header = signature_header(&key, &digest);

        assert!(header.starts_with(
            "keyId=\"primary\",algorithm=\"ed25519\",headers=\"digest\",signature=\""
        ));
        let encoded = header
            .rsplit("signature=\"")
            .next()
            .and_then(|s| s.strip_suffix('"'))
            .expect("signature value");
        let bytes: [u8; 64] = BASE64
            .decode(encoded)
            .expect("base64")
            .try_into()
            .expect("64 bytes");
        let signature = Signature::from_bytes(&bytes);
        key.verifying_key()
            .verify(format!("digest: {digest}").as_bytes(), &signature)
            .expect("signature verifies");
    }

    #[test]
    fn test_token_url() {
        let issuer = HttpTokenIssuer::new("https://issuer.example/", Duration::from_secs(5))
            .expect("client");
        assert_eq!(
            issuer.token_url("abc"),
            "https://issuer.example/v2/confirmation/token/abc"
        );
        assert_eq!(issuer.base_url(), "https://issuer.example/");
    }

    #[test]
    fn test_response_wire_format() {
        let json = r#"{"batchProof":"proof","signedTokens":["a","b"],"publicKey":"pk"}"#;
        let parsed: SignedTokensResponse = parse_body(json.as_bytes()).expect("parse");
        assert_eq!(parsed.public_key, "pk");
        assert_eq!(parsed.signed_tokens, vec!["a".to_string(), "b".to_string()]);

        let missing: Result<SignedTokensResponse, _> = parse_body(br#"{"publicKey":"pk"}"#);
        assert!(matches!(missing, Err(IssuerError::MalformedResponse(_))));

        let nonce: Result<NonceBody, _> = parse_body(b"not json");
        assert!(matches!(nonce, Err(IssuerError::MalformedResponse(_))));
    }

    #[test]
    fn test_request_body_wire_format() {
        let body = serde_json::to_string(&RequestSignedTokensBody {
            blinded_tokens: vec!["x".into()],
        })
        .expect("serialize");
        assert_eq!(body, r#"{"blindedTokens":["x"]}"#);
    }

    #[test]
    fn test_retry_classification() {
        assert!(IssuerError::Status(500).is_retryable());
        assert!(!IssuerError::MalformedResponse("bad".into()).is_retryable());
        assert!(!IssuerError::InvalidWallet.is_retryable());
    }
}
