// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use base64::Engine;
use ed25519_dalek::VerifyingKey;

use crate::error::SyncError;

/// Decode a base64-standard-encoded Ed25519 public key, the form pinned
/// keys and `sync.peer_info` responses both use on the wire.
pub fn decode_verifying_key(b64: &str) -> Result<VerifyingKey, SyncError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| SyncError::Transport(format!("invalid public key encoding: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SyncError::Transport("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&array).map_err(|e| SyncError::Transport(format!("invalid public key: {e}")))
}

pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn round_trips_through_base64() {
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        let encoded = encode_verifying_key(&key);
        let decoded = decode_verifying_key(&encoded).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(decode_verifying_key("not-base64!!").is_err());
    }
}
