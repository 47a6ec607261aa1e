// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{Duration, Utc};
use ed25519_dalek::VerifyingKey;
use thrum_eventlog::Event;
use thrum_projection::Projection;
use thrum_writer::{Intent, WriterHandle};
use tracing::warn;

use crate::error::SyncError;
use crate::validate::{self, ValidationLimits};

#[derive(Debug, Clone, Copy)]
pub struct ApplierLimits {
    pub validation: ValidationLimits,
    pub quarantine_warn_threshold: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub skipped: usize,
    pub quarantined: usize,
}

/// Validate and commit one pulled batch. Never aborts partway: a rejected
/// event is quarantined and the cursor still advances past it, so one
/// poisoned record from a peer cannot stall convergence for the rest of
/// the batch.
pub async fn apply_batch(
    peer_daemon_id: &str,
    events: Vec<Event>,
    writer: &WriterHandle,
    projection: &Projection,
    peer_key: Option<&VerifyingKey>,
    limits: &ApplierLimits,
) -> Result<ApplyOutcome, SyncError> {
    let mut outcome = ApplyOutcome::default();

    for event in events {
        let raw_len = serde_json::to_vec(&event).map(|v| v.len()).unwrap_or(usize::MAX);

        if let Err(rejection) = validate::validate(&event, raw_len, peer_key, &limits.validation) {
            let raw_json = serde_json::to_string(&event).unwrap_or_default();
            let received_at = Utc::now().to_rfc3339();
            projection.quarantine(&event.event_id, peer_daemon_id, &received_at, rejection.stage.as_str(), &rejection.reason, &raw_json)?;
            outcome.quarantined += 1;

            let since = (Utc::now() - Duration::hours(1)).to_rfc3339();
            let count = projection.quarantine_count_since(peer_daemon_id, &since)?;
            if count == limits.quarantine_warn_threshold + 1 {
                warn!(peer = peer_daemon_id, count, "peer has exceeded the quarantine warning threshold for the last hour");
            }
            continue;
        }

        let result = writer.commit(Intent::ApplyRemote { event }).await?;
        if result.applied {
            outcome.applied += 1;
        } else {
            outcome.skipped += 1;
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;
    use std::sync::Arc;
    use thrum_dispatcher::Dispatcher;
    use thrum_eventlog::{EventLog, EventType};
    use thrum_security::key::DaemonKey;
    use thrum_writer::{NoopHook, Writer, WriterLimits};

    fn limits() -> ApplierLimits {
        ApplierLimits {
            validation: ValidationLimits {
                max_event_size: 1_048_576,
                max_message_size: 100 * 1024,
                require_signatures: false,
            },
            quarantine_warn_threshold: 10,
        }
    }

    async fn spawn_writer(dir: &std::path::Path) -> (WriterHandle, Arc<Projection>) {
        let log = Arc::new(EventLog::open(&dir.join("log")).unwrap());
        let projection = Arc::new(Projection::open(&dir.join("proj.sqlite3")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new());
        let key = Arc::new(DaemonKey::generate());
        let (writer, handle) = Writer::new(log, projection.clone(), dispatcher, key, "d_local".to_string(), WriterLimits::default(), Arc::new(NoopHook));
        tokio::spawn(writer.run());
        (handle, projection)
    }

    fn signed_event(key: &SigningKey, origin: &str, id: &str, seq: u64) -> Event {
        let timestamp = Utc::now();
        let sig = thrum_security::signing::sign_event(key, id, "session.start", &timestamp.to_rfc3339(), origin);
        Event {
            event_id: id.to_string(),
            event_type: EventType::SessionStart,
            timestamp,
            origin_daemon: origin.to_string(),
            sequence: seq,
            signature: Some(sig),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn valid_batch_commits_and_quarantine_stays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, projection) = spawn_writer(dir.path()).await;
        let key = SigningKey::generate(&mut OsRng);
        let events = vec![signed_event(&key, "d_peer", "evt_1", 1), signed_event(&key, "d_peer", "evt_2", 2)];

        let outcome = apply_batch("d_peer", events, &writer, &projection, Some(&key.verifying_key()), &limits()).await.unwrap();
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.quarantined, 0);
    }

    #[tokio::test]
    async fn reapplying_the_same_batch_is_fully_deduped() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, projection) = spawn_writer(dir.path()).await;
        let key = SigningKey::generate(&mut OsRng);
        let events = vec![signed_event(&key, "d_peer", "evt_1", 1), signed_event(&key, "d_peer", "evt_2", 2)];

        apply_batch("d_peer", events.clone(), &writer, &projection, Some(&key.verifying_key()), &limits())
            .await
            .unwrap();
        let outcome = apply_batch("d_peer", events, &writer, &projection, Some(&key.verifying_key()), &limits()).await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.skipped, 2);
    }

    #[tokio::test]
    async fn tampered_event_is_quarantined_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, projection) = spawn_writer(dir.path()).await;
        let key = SigningKey::generate(&mut OsRng);
        let mut event = signed_event(&key, "d_peer", "evt_1", 1);
        event.origin_daemon = "d_other".to_string();

        let outcome = apply_batch("d_peer", vec![event.clone()], &writer, &projection, Some(&key.verifying_key()), &limits())
            .await
            .unwrap();
        assert_eq!(outcome.quarantined, 1);
        assert_eq!(outcome.applied, 0);
        let rows = projection.list_quarantine("d_peer", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stage, "signature");
    }
}
