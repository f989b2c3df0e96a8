// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Subscriber bearer token generation and peppered hashing.
//!
//! # Security model
//!
//! Raw tokens are **never persisted**. [`issueWsToken`](crate::actor) hands the
//! caller a [`RawToken`] exactly once; the actor immediately converts it with
//! [`RawToken::into_stored`] and only the digest is kept on the participant
//! record. The digest is an HMAC-SHA256 of the raw token keyed by a
//! deployment-wide pepper, not a bare SHA-256, so a leaked participant table
//! cannot be brute-forced offline without also knowing the pepper.
//!
//! All comparisons use [`subtle::ConstantTimeEq`] to prevent timing oracles.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Deployment-wide key used to pepper every token hash. Loaded once from
/// configuration at startup and threaded through to wherever tokens are
/// issued or verified.
#[derive(Clone)]
pub struct TokenPepper(Vec<u8>);

impl TokenPepper {
    pub fn new(bytes: Vec<u8>) -> Self {
        TokenPepper(bytes)
    }

    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        Ok(TokenPepper(hex::decode(s)?))
    }
}

/// A raw bearer token — returned to the caller of `issueWsToken` **exactly
/// once**. Call [`RawToken::into_stored`] immediately after handing it back;
/// the plaintext never reaches the participant store.
#[derive(Debug)]
#[must_use = "return this token to the caller once, then store only into_stored()"]
pub struct RawToken(String);

impl RawToken {
    /// Generate a cryptographically random 256-bit token, encoded as 43
    /// base64url characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        RawToken(base64url_encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash the token with the deployment pepper and discard the plaintext.
    pub fn into_stored(self, pepper: &TokenPepper) -> StoredToken {
        StoredToken(hmac_sha256(pepper, self.0.as_bytes()))
    }
}

impl std::fmt::Display for RawToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stored form of a subscriber token: a 32-byte HMAC-SHA256 digest,
/// serialized as 64 lowercase hex characters (`ws_auth_token` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken(#[serde(with = "hex_bytes")] [u8; 32]);

impl StoredToken {
    /// Verify a provided token string in constant time against this digest.
    pub fn verify(&self, provided: &str, pepper: &TokenPepper) -> bool {
        let provided_hash = hmac_sha256(pepper, provided.as_bytes());
        bool::from(provided_hash.ct_eq(&self.0))
    }

    /// Hex-encoded digest, 64 characters, matching the on-disk/wire format.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[cfg(test)]
    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_str)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("wrong length"))?;
        Ok(StoredToken(arr))
    }
}

fn hmac_sha256(pepper: &TokenPepper, data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(&pepper.0).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn base64url_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32-byte hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pepper() -> TokenPepper {
        TokenPepper::new(b"test-pepper-0123456789".to_vec())
    }

    #[test]
    fn generated_token_is_43_chars() {
        let t = RawToken::generate();
        assert_eq!(t.as_str().len(), 43);
    }

    #[test]
    fn stored_token_is_64_hex_chars() {
        let stored = RawToken::generate().into_stored(&pepper());
        assert_eq!(stored.to_hex().len(), 64);
    }

    #[test]
    fn stored_token_verifies_correct_raw() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored(&pepper());
        assert!(stored.verify(&raw_str, &pepper()));
    }

    #[test]
    fn stored_token_rejects_wrong_value() {
        let stored = RawToken::generate().into_stored(&pepper());
        assert!(!stored.verify("wrong-token", &pepper()));
    }

    #[test]
    fn stored_token_rejects_wrong_pepper() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored(&pepper());
        let other = TokenPepper::new(b"different-pepper".to_vec());
        assert!(!stored.verify(&raw_str, &other));
    }

    #[test]
    fn two_generated_tokens_are_different() {
        let t1 = RawToken::generate().into_stored(&pepper());
        let t2 = RawToken::generate().into_stored(&pepper());
        assert_ne!(t1, t2);
    }

    #[test]
    fn raw_token_never_equals_stored_hex() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored(&pepper());
        assert_ne!(raw_str, stored.to_hex());
    }
}
