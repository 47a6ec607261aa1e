// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid signature encoding: {0}")]
    Encoding(String),
    #[error("invalid signature format: {0}")]
    Format(String),
}

/// Build the canonical signing payload for an event: exactly
/// `event_id|type|timestamp|origin_daemon`. Every other field is not
/// covered by the signature.
pub fn canonical_payload(event_id: &str, event_type: &str, timestamp: &str, origin_daemon: &str) -> Vec<u8> {
    format!("{event_id}|{event_type}|{timestamp}|{origin_daemon}").into_bytes()
}

/// Sign the canonical payload, returning the base64-encoded signature.
pub fn sign_event(
    key: &SigningKey,
    event_id: &str,
    event_type: &str,
    timestamp: &str,
    origin_daemon: &str,
) -> String {
    let payload = canonical_payload(event_id, event_type, timestamp, origin_daemon);
    let signature = key.sign(&payload);
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
}

/// Verify a base64-encoded signature against the canonical payload built from
/// the given fields, using the pinned public key for the claimed origin.
pub fn verify_event(
    verifying_key: &VerifyingKey,
    event_id: &str,
    event_type: &str,
    timestamp: &str,
    origin_daemon: &str,
    signature_b64: &str,
) -> Result<bool, SigningError> {
    let sig_bytes = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| SigningError::Encoding(e.to_string()))?
    };
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|e| SigningError::Format(e.to_string()))?;
    let payload = canonical_payload(event_id, event_type, timestamp, origin_daemon);
    Ok(verifying_key.verify(&payload, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = SigningKey::generate(&mut OsRng);
        let sig = sign_event(&key, "evt_1", "message.create", "2026-01-01T00:00:00Z", "d_1");
        assert!(verify_event(
            &key.verifying_key(),
            "evt_1",
            "message.create",
            "2026-01-01T00:00:00Z",
            "d_1",
            &sig
        )
        .unwrap());
    }

    #[test]
    fn mutating_canonical_field_breaks_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let sig = sign_event(&key, "evt_1", "message.create", "2026-01-01T00:00:00Z", "d_1");
        assert!(!verify_event(
            &key.verifying_key(),
            "evt_1",
            "message.create",
            "2026-01-01T00:00:00Z",
            "d_2", // origin_daemon tampered
            &sig
        )
        .unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let sig = sign_event(&key, "evt_1", "message.create", "2026-01-01T00:00:00Z", "d_1");
        assert!(!verify_event(
            &other.verifying_key(),
            "evt_1",
            "message.create",
            "2026-01-01T00:00:00Z",
            "d_1",
            &sig
        )
        .unwrap());
    }
}
