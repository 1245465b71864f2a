// token.rs - Trust tokens: short-lived signed assertions of a decision.
//
// Format is a compact JWS, each segment base64url without padding:
//
//   {"alg":..,"typ":"JWT","kid":..} . claims . signature
//
// Signing is delegated to a Signer (local key, Vault Transit, cloud KMS).
// Remote signers can be slow, so every call is bounded by a deadline; a
// missed deadline is a minting failure, never a stalled decision.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::DecisionError;

/// Signing collaborator for trust tokens.
#[async_trait]
pub trait Signer: Send + Sync {
    /// JWS `alg` value (e.g. "EdDSA").
    fn algorithm(&self) -> &str;

    /// Key id placed in the JWS header.
    fn key_id(&self) -> &str;

    /// Public key as a JWK, for offline verifiers.
    async fn public_jwk(&self) -> Result<Value, DecisionError>;

    /// Sign `header.payload` bytes.
    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, DecisionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JwsHeader {
    alg: String,
    typ: String,
    kid: String,
}

/// Claims carried by a trust token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustClaims {
    pub org_id: String,
    pub agent_id: String,
    pub policy_id: String,
    pub policy_version: u32,
    pub allow: bool,
    pub reason: String,
    /// base64url(SHA-256(canonical evaluation context)), no padding.
    pub context_hash: String,
    pub trace_id: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Unique token id for replay detection.
    pub jti: String,
}

/// Fields of a decision that a token asserts.
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub org_id: &'a str,
    pub agent_id: &'a str,
    pub policy_id: &'a str,
    pub policy_version: u32,
    pub allow: bool,
    pub reason: &'a str,
    pub trace_id: &'a str,
}

impl TrustClaims {
    /// Claims expiring `ttl` from now, with a fresh `jti`.
    pub fn issue(subject: &TokenSubject<'_>, canonical_context: &[u8], ttl: Duration) -> Self {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            org_id: subject.org_id.to_string(),
            agent_id: subject.agent_id.to_string(),
            policy_id: subject.policy_id.to_string(),
            policy_version: subject.policy_version,
            allow: subject.allow,
            reason: subject.reason.to_string(),
            context_hash: context_hash(canonical_context),
            trace_id: subject.trace_id.to_string(),
            exp: chrono::Utc::now().timestamp().saturating_add(ttl_secs),
            jti: Uuid::new_v4().to_string(),
        }
    }
}

/// base64url-no-pad SHA-256 of the canonical context bytes.
pub fn context_hash(canonical_context: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical_context))
}

/// Sign claims into a compact JWS, bounded by `timeout`.
pub async fn mint(
    signer: &dyn Signer,
    claims: &TrustClaims,
    timeout: Duration,
) -> Result<String, DecisionError> {
    let header = JwsHeader {
        alg: signer.algorithm().to_string(),
        typ: "JWT".to_string(),
        kid: signer.key_id().to_string(),
    };
    let header = serde_json::to_vec(&header).map_err(|e| DecisionError::Signing(e.to_string()))?;
    let payload = serde_json::to_vec(claims).map_err(|e| DecisionError::Signing(e.to_string()))?;
    let unsigned = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );

    let signature = tokio::time::timeout(timeout, signer.sign(unsigned.as_bytes()))
        .await
        .map_err(|_| {
            DecisionError::SignerTimeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
        })??;

    Ok(format!("{}.{}", unsigned, URL_SAFE_NO_PAD.encode(signature)))
}

/// Split a token and decode its claims without checking the signature.
pub fn decode_claims(token: &str) -> Result<TrustClaims, DecisionError> {
    let (_, payload, _) = split(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| DecisionError::InvalidToken(format!("payload: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| DecisionError::InvalidToken(format!("claims: {}", e)))
}

/// Verify an EdDSA token against a raw Ed25519 public key and check expiry.
pub fn verify_ed25519(token: &str, public_key: &[u8]) -> Result<TrustClaims, DecisionError> {
    let (header, payload, signature) = split(token)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| DecisionError::InvalidToken(format!("signature: {}", e)))?;
    let unsigned = format!("{}.{}", header, payload);
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(unsigned.as_bytes(), &signature)
        .map_err(|_| DecisionError::InvalidToken("signature mismatch".into()))?;

    let claims = decode_claims(token)?;
    if claims.exp <= chrono::Utc::now().timestamp() {
        return Err(DecisionError::InvalidToken("expired".into()));
    }
    Ok(claims)
}

fn split(token: &str) -> Result<(&str, &str, &str), DecisionError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => {
            Ok((h, p, s))
        }
        _ => Err(DecisionError::InvalidToken(
            "expected three dot-separated segments".into(),
        )),
    }
}

/// Ed25519 signer holding its key in process.
pub struct LocalEd25519Signer {
    key_pair: Ed25519KeyPair,
    kid: String,
}

impl LocalEd25519Signer {
    /// Generate a fresh key. Returns the signer and its PKCS#8 document so
    /// the key can be persisted.
    pub fn generate(kid: impl Into<String>) -> Result<(Self, Vec<u8>), DecisionError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| DecisionError::Signing("ed25519 key generation failed".into()))?;
        let signer = Self::from_pkcs8(kid, pkcs8.as_ref())?;
        Ok((signer, pkcs8.as_ref().to_vec()))
    }

    pub fn from_pkcs8(kid: impl Into<String>, pkcs8: &[u8]) -> Result<Self, DecisionError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| DecisionError::Signing(format!("rejected ed25519 key: {}", e)))?;
        Ok(Self {
            key_pair,
            kid: kid.into(),
        })
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }
}

#[async_trait]
impl Signer for LocalEd25519Signer {
    fn algorithm(&self) -> &str {
        "EdDSA"
    }

    fn key_id(&self) -> &str {
        &self.kid
    }

    async fn public_jwk(&self) -> Result<Value, DecisionError> {
        Ok(json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(self.public_key()),
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
        }))
    }

    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, DecisionError> {
        Ok(self.key_pair.sign(unsigned).as_ref().to_vec())
    }
}
