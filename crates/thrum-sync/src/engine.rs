// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde_json::{json, Value};
use thrum_eventlog::{Event, EventLog, ReadAfter};
use thrum_projection::{Projection, SyncStatus};
use thrum_rpc::{JsonRpcError, SyncBackend, HANDLER_ERROR};
use thrum_security::key::DaemonKey;
use thrum_writer::{CommitHook, WriterHandle};
use tracing::{info, warn};

use crate::applier::{self, ApplierLimits};
use crate::client;
use crate::error::SyncError;
use crate::keys::{decode_verifying_key, encode_verifying_key};
use crate::pairing::PairingManager;
use crate::registry::{PeerRecord, PeerRegistry};
use crate::validate::Stage;

/// Minimum spacing between two `sync.notify` calls to the same peer. Several
/// commits landing in the same instant collapse into one notification; the
/// peer pulls everything new regardless of how many notifications it saw.
const NOTIFY_DEBOUNCE: Duration = Duration::from_secs(2);

/// Everything the pull/apply path needs, held separately from pairing state
/// so it can be cloned cheaply into a spawned task (the `sync.notify`
/// handler answers the caller immediately and pulls in the background).
struct PullContext {
    daemon_id: String,
    registry: Arc<PeerRegistry>,
    log: Arc<EventLog>,
    projection: Arc<Projection>,
    writer: WriterHandle,
    limits: ApplierLimits,
    pull_batch_size: usize,
}

impl PullContext {
    /// The key pinned for `peer`, fetching and pinning it via
    /// `sync.peer_info` on first contact. Best-effort: a peer that cannot be
    /// reached yet simply yields no key, and signed events from it stay
    /// unverifiable (rejected, not crashed) until the next attempt succeeds.
    async fn ensure_pinned_key(&self, peer: &PeerRecord) -> Result<VerifyingKey, SyncError> {
        if let Some(b64) = &peer.pinned_key {
            return decode_verifying_key(b64);
        }
        let info = client::peer_info(&peer.address).await?;
        let key_b64 = info
            .get("public_key")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Transport("peer_info response missing public_key".to_string()))?;
        self.registry.pin_key(&peer.daemon_id, key_b64)?;
        decode_verifying_key(key_b64)
    }

    /// Pull everything new from one peer, looping until `more_available` is
    /// false, applying each batch as it arrives.
    async fn pull_from(&self, daemon_id: &str) -> Result<(), SyncError> {
        let peer = self.registry.get(daemon_id).ok_or_else(|| SyncError::UnknownPeer(daemon_id.to_string()))?;
        let peer_key = self.ensure_pinned_key(&peer).await.ok();

        let checkpoint = self.projection.get_checkpoint(daemon_id)?;
        let mut cursor = checkpoint.map(|c| c.highest_sequence).unwrap_or(0);
        self.projection.set_checkpoint(daemon_id, cursor, SyncStatus::Syncing, Some(Utc::now().timestamp()))?;

        let result = self.drain(daemon_id, &peer, peer_key.as_ref(), &mut cursor).await;
        if result.is_err() {
            let _ = self.projection.set_checkpoint(daemon_id, cursor, SyncStatus::Error, Some(Utc::now().timestamp()));
        }
        result
    }

    async fn drain(&self, daemon_id: &str, peer: &PeerRecord, peer_key: Option<&VerifyingKey>, cursor: &mut u64) -> Result<(), SyncError> {
        loop {
            let batch = client::pull(&peer.address, &peer.token, *cursor, self.pull_batch_size).await?;
            let fetched = batch.events.len();

            for bad in &batch.rejected {
                let received_at = Utc::now().to_rfc3339();
                self.projection
                    .quarantine(&bad.event_id, daemon_id, &received_at, Stage::Schema.as_str(), &bad.reason, &bad.raw_json)?;
            }

            let outcome = applier::apply_batch(daemon_id, batch.events, &self.writer, &self.projection, peer_key, &self.limits).await?;
            info!(
                peer = daemon_id,
                fetched,
                applied = outcome.applied,
                skipped = outcome.skipped,
                quarantined = outcome.quarantined + batch.rejected.len(),
                undecodable = batch.rejected.len(),
                "pulled batch from peer"
            );
            *cursor = batch.next_sequence;
            self.projection.set_checkpoint(daemon_id, *cursor, SyncStatus::Idle, Some(Utc::now().timestamp()))?;
            if !batch.more_available {
                return Ok(());
            }
        }
    }
}

/// Ties the peer registry, pairing sessions, and the pull/apply pipeline
/// together. Implements both halves of the protocol: the outbound
/// [`CommitHook`] that fires `sync.notify` after local writes, and the
/// inbound [`SyncBackend`] the RPC layer dispatches `sync.*`/`peer.*` calls
/// into.
pub struct SyncEngine {
    name: String,
    /// The address peers should dial to reach this daemon's sync listener.
    /// Set at construction from configuration; [`SyncEngine::set_our_address`]
    /// corrects it once the listener has actually bound, since the listener
    /// scans a port range and the bound port may differ from the configured
    /// low end.
    our_address: Mutex<String>,
    key: Arc<DaemonKey>,
    pairing: PairingManager,
    ctx: Arc<PullContext>,
    last_notify: Mutex<HashMap<String, Instant>>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        daemon_id: String,
        name: String,
        our_address: String,
        key: Arc<DaemonKey>,
        registry: Arc<PeerRegistry>,
        pairing_timeout: Duration,
        pairing_max_attempts: u32,
        log: Arc<EventLog>,
        projection: Arc<Projection>,
        writer: WriterHandle,
        limits: ApplierLimits,
        pull_batch_size: usize,
    ) -> Self {
        SyncEngine {
            name,
            our_address: Mutex::new(our_address),
            key,
            pairing: PairingManager::new(pairing_timeout, pairing_max_attempts),
            ctx: Arc::new(PullContext {
                daemon_id,
                registry,
                log,
                projection,
                writer,
                limits,
                pull_batch_size,
            }),
            last_notify: Mutex::new(HashMap::new()),
        }
    }

    /// Pull everything new from one peer right now. Exposed directly for
    /// `tsync.force` and the periodic scheduler.
    pub async fn pull_from(&self, daemon_id: &str) -> Result<(), SyncError> {
        self.ctx.pull_from(daemon_id).await
    }

    /// Correct the advertised dial-back address once the real sync listener
    /// port is known.
    pub fn set_our_address(&self, address: String) {
        *self.our_address.lock().unwrap() = address;
    }

    fn registry(&self) -> &PeerRegistry {
        &self.ctx.registry
    }
}

#[async_trait]
impl CommitHook for SyncEngine {
    async fn on_commit(&self, event: &Event) {
        if event.origin_daemon != self.ctx.daemon_id {
            return;
        }
        let peers = self.registry().list();
        if peers.is_empty() {
            return;
        }
        let latest_seq = self.ctx.log.max_sequence(&self.ctx.daemon_id);

        for peer in peers {
            let due = {
                let mut last = self.last_notify.lock().unwrap();
                let now = Instant::now();
                let due = last.get(&peer.daemon_id).map(|t| now.duration_since(*t) >= NOTIFY_DEBOUNCE).unwrap_or(true);
                if due {
                    last.insert(peer.daemon_id.clone(), now);
                }
                due
            };
            if !due {
                continue;
            }
            let daemon_id = self.ctx.daemon_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client::notify(&peer.address, &peer.token, &daemon_id, latest_seq, 1).await {
                    warn!(peer = peer.daemon_id, error = %e, "sync.notify delivery failed");
                }
            });
        }
    }
}

fn to_jsonrpc_err(e: SyncError) -> JsonRpcError {
    match &e {
        SyncError::PairingRejected { attempts_remaining } => {
            JsonRpcError::with_data(HANDLER_ERROR, e.to_string(), json!({"attempts_remaining": attempts_remaining}))
        }
        _ => JsonRpcError::new(HANDLER_ERROR, e.to_string()),
    }
}

#[async_trait]
impl SyncBackend for SyncEngine {
    async fn pull(&self, peer_token: &str, after_sequence: u64, max_batch: usize) -> Result<ReadAfter, JsonRpcError> {
        if self.registry().find_by_token(peer_token).is_none() {
            return Err(JsonRpcError::new(HANDLER_ERROR, "unknown peer token"));
        }
        Ok(self.ctx.log.read_after(&self.ctx.daemon_id, after_sequence, max_batch))
    }

    async fn peer_info(&self) -> Value {
        json!({
            "daemon_id": self.ctx.daemon_id,
            "name": self.name,
            "public_key": encode_verifying_key(&self.key.verifying_key()),
        })
    }

    async fn notify(&self, peer_token: &str, daemon_id: &str, latest_seq: u64, event_count: u64) -> Result<(), JsonRpcError> {
        let Some(peer) = self.registry().find_by_token(peer_token) else {
            return Err(JsonRpcError::new(HANDLER_ERROR, "unknown peer token"));
        };
        if peer.daemon_id != daemon_id {
            return Err(JsonRpcError::new(HANDLER_ERROR, "token does not match claimed daemon id"));
        }
        info!(peer = daemon_id, latest_seq, event_count, "notified of new events, scheduling pull");

        // Acknowledge immediately; the pull itself runs in the background so
        // a slow or stalled pull never holds up the caller's connection.
        let ctx = self.ctx.clone();
        let daemon_id = daemon_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = ctx.pull_from(&daemon_id).await {
                warn!(peer = daemon_id, error = %e, "notify-triggered pull failed");
            }
        });
        Ok(())
    }

    async fn pair_request(&self, code: &str, daemon_id: &str, name: &str, address: &str) -> Result<Value, JsonRpcError> {
        let token = self.pairing.attempt(code).map_err(to_jsonrpc_err)?;
        let record = PeerRecord {
            daemon_id: daemon_id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            token: token.clone(),
            pinned_key: None,
        };
        self.registry().insert(record).map_err(to_jsonrpc_err)?;
        Ok(json!({"token": token, "daemon_id": self.ctx.daemon_id, "name": self.name}))
    }

    async fn pair_add(&self) -> Result<Value, JsonRpcError> {
        let started = self.pairing.begin();
        Ok(json!({
            "code": started.code,
            "address": *self.our_address.lock().unwrap(),
            "expires_in_secs": started.expires_in_secs,
        }))
    }

    async fn pair_join(&self, address: &str, code: &str) -> Result<Value, JsonRpcError> {
        let our_address = self.our_address.lock().unwrap().clone();
        let result = client::pair_request(address, code, &self.ctx.daemon_id, &self.name, &our_address)
            .await
            .map_err(to_jsonrpc_err)?;
        let token = result
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(HANDLER_ERROR, "peer did not return a token"))?
            .to_string();
        let peer_daemon_id = result.get("daemon_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let peer_name = result.get("name").and_then(Value::as_str).unwrap_or_default().to_string();

        let record = PeerRecord {
            daemon_id: peer_daemon_id.clone(),
            name: peer_name.clone(),
            address: address.to_string(),
            token,
            pinned_key: None,
        };
        self.registry().insert(record).map_err(to_jsonrpc_err)?;
        Ok(json!({"daemon_id": peer_daemon_id, "name": peer_name, "address": address}))
    }

    async fn peer_list(&self) -> Value {
        let peers: Vec<Value> = self
            .registry()
            .list()
            .into_iter()
            .map(|p| {
                json!({
                    "daemon_id": p.daemon_id,
                    "name": p.name,
                    "address": p.address,
                    "key_pinned": p.pinned_key.is_some(),
                })
            })
            .collect();
        json!(peers)
    }

    async fn peer_remove(&self, daemon_id: &str) -> Result<(), JsonRpcError> {
        match self.registry().remove(daemon_id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(JsonRpcError::new(HANDLER_ERROR, format!("no such peer: {daemon_id}"))),
            Err(e) => Err(to_jsonrpc_err(e)),
        }
    }

    async fn peer_status(&self, daemon_id: &str) -> Result<Value, JsonRpcError> {
        let peer = self
            .registry()
            .get(daemon_id)
            .ok_or_else(|| JsonRpcError::new(HANDLER_ERROR, format!("no such peer: {daemon_id}")))?;
        let checkpoint = self
            .ctx
            .projection
            .get_checkpoint(daemon_id)
            .map_err(|e| JsonRpcError::new(HANDLER_ERROR, e.to_string()))?;
        Ok(json!({
            "daemon_id": peer.daemon_id,
            "name": peer.name,
            "address": peer.address,
            "key_pinned": peer.pinned_key.is_some(),
            "highest_sequence": checkpoint.as_ref().map(|c| c.highest_sequence).unwrap_or(0),
            "last_sync_time": checkpoint.as_ref().and_then(|c| c.last_sync_time),
            "status": checkpoint.map(|c| c.status).unwrap_or_else(|| "idle".to_string()),
        }))
    }

    async fn force_sync(&self) -> Result<Value, JsonRpcError> {
        let mut synced = Vec::new();
        let mut errors = Vec::new();
        for peer in self.registry().list() {
            match self.pull_from(&peer.daemon_id).await {
                Ok(()) => synced.push(peer.daemon_id),
                Err(e) => errors.push(json!({"daemon_id": peer.daemon_id, "error": e.to_string()})),
            }
        }
        Ok(json!({"synced": synced, "errors": errors}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ValidationLimits;
    use std::sync::Arc;
    use thrum_dispatcher::Dispatcher;
    use thrum_writer::{NoopHook, Writer, WriterLimits};

    async fn spawn_engine(dir: &std::path::Path, daemon_id: &str) -> Arc<SyncEngine> {
        let log = Arc::new(EventLog::open(&dir.join("log")).unwrap());
        let projection = Arc::new(Projection::open(&dir.join("proj.sqlite3")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new());
        let key = Arc::new(DaemonKey::generate());
        let (writer, handle) = Writer::new(
            log.clone(),
            projection.clone(),
            dispatcher,
            key.clone(),
            daemon_id.to_string(),
            WriterLimits::default(),
            Arc::new(NoopHook),
        );
        tokio::spawn(writer.run());
        let registry = Arc::new(PeerRegistry::load(dir.join("peers.json")).unwrap());
        let limits = ApplierLimits {
            validation: ValidationLimits {
                max_event_size: 1_048_576,
                max_message_size: 100 * 1024,
                require_signatures: false,
            },
            quarantine_warn_threshold: 10,
        };
        Arc::new(SyncEngine::new(
            daemon_id.to_string(),
            "test-daemon".to_string(),
            "127.0.0.1:42100".to_string(),
            key,
            registry,
            Duration::from_secs(300),
            3,
            log,
            projection,
            handle,
            limits,
            1000,
        ))
    }

    #[tokio::test]
    async fn peer_info_reports_daemon_id_and_encodable_key() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(dir.path(), "d_1").await;
        let info = engine.peer_info().await;
        assert_eq!(info.get("daemon_id").and_then(Value::as_str), Some("d_1"));
        let key_b64 = info.get("public_key").and_then(Value::as_str).unwrap();
        assert!(decode_verifying_key(key_b64).is_ok());
    }

    #[tokio::test]
    async fn pair_request_with_wrong_code_is_rejected_and_counts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(dir.path(), "d_1").await;
        let started = engine.pair_add().await.unwrap();
        let code = started.get("code").and_then(Value::as_str).unwrap().to_string();
        let bad_code = if code == "0000" { "1111".to_string() } else { "0000".to_string() };

        let err = engine.pair_request(&bad_code, "d_2", "peer-two", "127.0.0.1:42101").await.unwrap_err();
        assert_eq!(err.data.and_then(|d| d.get("attempts_remaining").cloned()), Some(json!(2)));

        let ok = engine.pair_request(&code, "d_2", "peer-two", "127.0.0.1:42101").await.unwrap();
        assert_eq!(ok.get("daemon_id").and_then(Value::as_str), Some("d_1"));

        let listed = engine.peer_list().await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn peer_remove_of_unknown_daemon_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(dir.path(), "d_1").await;
        assert!(engine.peer_remove("d_nobody").await.is_err());
    }

    #[tokio::test]
    async fn pull_rejects_unknown_token() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(dir.path(), "d_1").await;
        assert!(engine.pull("wrong-token", 0, 100).await.is_err());
    }
}
