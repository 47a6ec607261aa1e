// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Token generation and constant-time verification.
//!
//! Raw tokens are never persisted. They are generated, shown once (to an
//! operator completing a pairing, or as the initial bearer token for the
//! local RPC surface), then immediately hashed; only the SHA-256 digest is
//! stored. All comparisons use [`subtle::ConstantTimeEq`] to avoid timing
//! oracles.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A raw token; display it to the operator exactly once, then call
/// [`RawToken::into_stored`].
#[derive(Debug)]
#[must_use = "display this token once, then call into_stored()"]
pub struct RawToken(String);

impl RawToken {
    /// Generate a cryptographically random 256-bit token, base64url-encoded
    /// (43 characters, no padding).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        RawToken(base64url_encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_stored(self) -> StoredToken {
        StoredToken(sha256(self.0.as_bytes()))
    }
}

impl std::fmt::Display for RawToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The persisted form of a token: only the SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken(#[serde(with = "hex_bytes")] [u8; 32]);

impl StoredToken {
    pub fn verify(&self, provided: &str) -> bool {
        let provided_hash = sha256(provided.as_bytes());
        bool::from(provided_hash.ct_eq(&self.0))
    }
}

/// A map of peer/daemon ID to its stored token, the shape embedded in the
/// peer registry record for each paired peer. Verification always runs in
/// constant time and a lookup miss is treated the same as a mismatch.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PeerTokenStore(HashMap<String, StoredToken>);

impl PeerTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, peer_id: impl Into<String>, token: StoredToken) {
        self.0.insert(peer_id.into(), token);
    }

    pub fn remove(&mut self, peer_id: &str) {
        self.0.remove(peer_id);
    }

    /// Verify `provided` against the token on file for `peer_id`. A peer
    /// with no token on file always fails verification.
    pub fn verify(&self, peer_id: &str, provided: &str) -> bool {
        match self.0.get(peer_id) {
            Some(stored) => stored.verify(provided),
            None => false,
        }
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
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

    #[test]
    fn generated_token_is_43_chars() {
        let t = RawToken::generate();
        assert_eq!(t.as_str().len(), 43);
    }

    #[test]
    fn stored_token_verifies_correct_raw() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored();
        assert!(stored.verify(&raw_str));
    }

    #[test]
    fn stored_token_rejects_wrong_value() {
        let raw = RawToken::generate();
        let stored = raw.into_stored();
        assert!(!stored.verify("wrong-token"));
    }

    #[test]
    fn peer_token_store_round_trips_through_yaml() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let mut store = PeerTokenStore::new();
        store.set("d_peer1", raw.into_stored());
        let yaml = serde_yaml::to_string(&store).unwrap();
        let back: PeerTokenStore = serde_yaml::from_str(&yaml).unwrap();
        assert!(back.verify("d_peer1", &raw_str));
    }

    #[test]
    fn peer_token_store_rejects_unknown_peer() {
        let store = PeerTokenStore::new();
        assert!(!store.verify("d_unknown", "anything"));
    }

    #[test]
    fn peer_token_store_remove_revokes_access() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let mut store = PeerTokenStore::new();
        store.set("d_peer1", raw.into_stored());
        store.remove("d_peer1");
        assert!(!store.verify("d_peer1", &raw_str));
    }
}
