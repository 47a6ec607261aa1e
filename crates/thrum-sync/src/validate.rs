// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{Duration as ChronoDuration, Utc};
use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use thrum_eventlog::{Event, EventType};

/// Which of the three stages rejected an incoming event. Recorded verbatim
/// in the quarantine row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Schema,
    Signature,
    BusinessLogic,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Signature => "signature",
            Stage::BusinessLogic => "business_logic",
        }
    }
}

pub struct Rejection {
    pub stage: Stage,
    pub reason: String,
}

/// Settings the pipeline is parameterized over, mirroring `SecurityConfig`
/// without this crate depending on `thrum-config`'s schema module directly.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_event_size: usize,
    pub max_message_size: usize,
    pub require_signatures: bool,
}

/// Run the three-stage pipeline against one already-deserialized event.
/// Schema's "event type in the known set" and "required fields present"
/// checks are satisfied by the caller having deserialized into [`Event`] at
/// all; a payload missing those fields, or naming an unknown type, never
/// reaches this function as a parsed `Event`. What remains here is the size
/// bound, signature verification, and the business-logic checks.
///
/// `peer_key` is the TOFU-pinned public key for `event.origin_daemon`; it
/// must be `Some` for the signature stage to ever succeed.
pub fn validate(event: &Event, raw_len: usize, peer_key: Option<&VerifyingKey>, limits: &ValidationLimits) -> Result<(), Rejection> {
    if raw_len > limits.max_event_size {
        return Err(Rejection {
            stage: Stage::Schema,
            reason: format!("event size {raw_len} exceeds max {}", limits.max_event_size),
        });
    }

    match &event.signature {
        Some(sig) => {
            let Some(key) = peer_key else {
                return Err(Rejection {
                    stage: Stage::Signature,
                    reason: "no pinned key for this peer".to_string(),
                });
            };
            let ok = thrum_security::signing::verify_event(
                key,
                &event.event_id,
                event.event_type.as_str(),
                &event.timestamp.to_rfc3339(),
                &event.origin_daemon,
                sig,
            )
            .unwrap_or(false);
            if !ok {
                return Err(Rejection {
                    stage: Stage::Signature,
                    reason: "signature verification failed".to_string(),
                });
            }
        }
        None if limits.require_signatures => {
            return Err(Rejection {
                stage: Stage::Signature,
                reason: "unsigned event rejected under signature enforcement".to_string(),
            });
        }
        None => {}
    }

    let now = Utc::now();
    if event.timestamp > now + ChronoDuration::hours(24) {
        return Err(Rejection {
            stage: Stage::BusinessLogic,
            reason: "timestamp more than 24h in the future".to_string(),
        });
    }

    if event.event_type == EventType::MessageCreate {
        if let Some(content) = event.payload.get("content").and_then(Value::as_str) {
            if content.len() > limits.max_message_size {
                return Err(Rejection {
                    stage: Stage::BusinessLogic,
                    reason: format!("message content {} bytes exceeds max {}", content.len(), limits.max_message_size),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as CD;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;

    fn limits() -> ValidationLimits {
        ValidationLimits {
            max_event_size: 1_048_576,
            max_message_size: 100 * 1024,
            require_signatures: false,
        }
    }

    fn signed_event(key: &SigningKey, origin: &str) -> Event {
        let event_id = "evt_1".to_string();
        let timestamp = Utc::now();
        let sig = thrum_security::signing::sign_event(key, &event_id, "session.start", &timestamp.to_rfc3339(), origin);
        Event {
            event_id,
            event_type: EventType::SessionStart,
            timestamp,
            origin_daemon: origin.to_string(),
            sequence: 1,
            signature: Some(sig),
            payload: json!({}),
        }
    }

    #[test]
    fn valid_signed_event_passes() {
        let key = SigningKey::generate(&mut OsRng);
        let event = signed_event(&key, "d_1");
        assert!(validate(&event, 100, Some(&key.verifying_key()), &limits()).is_ok());
    }

    #[test]
    fn unsigned_event_rejected_when_signatures_required() {
        let mut event = signed_event(&SigningKey::generate(&mut OsRng), "d_1");
        event.signature = None;
        let mut l = limits();
        l.require_signatures = true;
        let rejection = validate(&event, 100, None, &l).unwrap_err();
        assert_eq!(rejection.stage, Stage::Signature);
    }

    #[test]
    fn unsigned_event_accepted_when_enforcement_disabled() {
        let mut event = signed_event(&SigningKey::generate(&mut OsRng), "d_1");
        event.signature = None;
        assert!(validate(&event, 100, None, &limits()).is_ok());
    }

    #[test]
    fn tampered_origin_fails_signature_stage() {
        let key = SigningKey::generate(&mut OsRng);
        let mut event = signed_event(&key, "d_1");
        event.origin_daemon = "d_2".to_string();
        let rejection = validate(&event, 100, Some(&key.verifying_key()), &limits()).unwrap_err();
        assert_eq!(rejection.stage, Stage::Signature);
    }

    #[test]
    fn future_timestamp_over_24h_fails_business_logic() {
        let key = SigningKey::generate(&mut OsRng);
        let mut event = signed_event(&key, "d_1");
        event.timestamp = Utc::now() + CD::hours(25);
        // re-sign so the signature stage passes and only business logic fails
        event.signature = Some(thrum_security::signing::sign_event(
            &key,
            &event.event_id,
            event.event_type.as_str(),
            &event.timestamp.to_rfc3339(),
            &event.origin_daemon,
        ));
        let rejection = validate(&event, 100, Some(&key.verifying_key()), &limits()).unwrap_err();
        assert_eq!(rejection.stage, Stage::BusinessLogic);
    }

    #[test]
    fn timestamp_just_under_24h_is_accepted() {
        let key = SigningKey::generate(&mut OsRng);
        let mut event = signed_event(&key, "d_1");
        event.timestamp = Utc::now() + CD::hours(23) + CD::minutes(59);
        event.signature = Some(thrum_security::signing::sign_event(
            &key,
            &event.event_id,
            event.event_type.as_str(),
            &event.timestamp.to_rfc3339(),
            &event.origin_daemon,
        ));
        assert!(validate(&event, 100, Some(&key.verifying_key()), &limits()).is_ok());
    }

    #[test]
    fn oversized_event_fails_schema_stage() {
        let key = SigningKey::generate(&mut OsRng);
        let event = signed_event(&key, "d_1");
        let rejection = validate(&event, 2_000_000, Some(&key.verifying_key()), &limits()).unwrap_err();
        assert_eq!(rejection.stage, Stage::Schema);
    }

    #[test]
    fn oversized_message_content_fails_business_logic() {
        let key = SigningKey::generate(&mut OsRng);
        let mut event = signed_event(&key, "d_1");
        event.event_type = EventType::MessageCreate;
        event.payload = json!({"content": "x".repeat(200 * 1024)});
        event.signature = Some(thrum_security::signing::sign_event(
            &key,
            &event.event_id,
            event.event_type.as_str(),
            &event.timestamp.to_rfc3339(),
            &event.origin_daemon,
        ));
        let rejection = validate(&event, 100, Some(&key.verifying_key()), &limits()).unwrap_err();
        assert_eq!(rejection.stage, Stage::BusinessLogic);
    }
}
