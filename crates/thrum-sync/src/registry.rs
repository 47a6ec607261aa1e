// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::error::SyncError;

/// A paired remote daemon, as persisted in `var/peers.json`.
///
/// Unlike the local bearer token (`thrum_security::token::StoredToken`,
/// hash-only because only this daemon ever presents it), a peer token is a
/// shared capability both sides present to each other on every `sync.*`
/// call; pairing hands the *same* random value to both daemons, it is not
/// derived from anything either side can re-derive from a hash. So the raw
/// value has to be kept on disk here, not just its digest; the file still
/// gets the same 0600 treatment as the signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub daemon_id: String,
    pub name: String,
    pub address: String,
    pub token: String,
    /// TOFU-pinned Ed25519 public key, base64, set the first time
    /// `sync.peer_info` is observed for this peer. `None` until then.
    pub pinned_key: Option<String>,
}

/// Peer registry, persisted as a single JSON array. A reader-writer lock
/// with persistence inside write-held critical sections keeps every
/// mutation durable before the lock releases.
pub struct PeerRegistry {
    path: PathBuf,
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerRegistry {
    /// Load the registry from `path`, or start empty if it doesn't exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let peers = if path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(|source| SyncError::Registry {
                path: path.display().to_string(),
                source,
            })?;
            let records: Vec<PeerRecord> = serde_json::from_str(&text).unwrap_or_default();
            records.into_iter().map(|p| (p.daemon_id.clone(), p)).collect()
        } else {
            HashMap::new()
        };
        Ok(PeerRegistry {
            path,
            peers: RwLock::new(peers),
        })
    }

    pub fn get(&self, daemon_id: &str) -> Option<PeerRecord> {
        self.peers.read().unwrap().get(daemon_id).cloned()
    }

    pub fn list(&self) -> Vec<PeerRecord> {
        let mut v: Vec<PeerRecord> = self.peers.read().unwrap().values().cloned().collect();
        v.sort_by(|a, b| a.daemon_id.cmp(&b.daemon_id));
        v
    }

    /// The peer whose token matches `provided`, if any, compared in
    /// constant time. A token is a shared capability, not an index key, so
    /// identifying the caller means checking each candidate in turn.
    pub fn find_by_token(&self, provided: &str) -> Option<PeerRecord> {
        self.peers
            .read()
            .unwrap()
            .values()
            .find(|p| bool::from(p.token.as_bytes().ct_eq(provided.as_bytes())))
            .cloned()
    }

    pub fn insert(&self, record: PeerRecord) -> Result<(), SyncError> {
        self.peers.write().unwrap().insert(record.daemon_id.clone(), record);
        self.save_locked()
    }

    pub fn remove(&self, daemon_id: &str) -> Result<bool, SyncError> {
        let removed = self.peers.write().unwrap().remove(daemon_id).is_some();
        if removed {
            self.save_locked()?;
        }
        Ok(removed)
    }

    /// TOFU pin (or re-affirm) `key` for `daemon_id`. First observation pins
    /// silently; a later call with a different key is rejected; the caller
    /// must go through `force_update_key` to override.
    pub fn pin_key(&self, daemon_id: &str, key_b64: &str) -> Result<(), SyncError> {
        let mut peers = self.peers.write().unwrap();
        let peer = peers.get_mut(daemon_id).ok_or_else(|| SyncError::UnknownPeer(daemon_id.to_string()))?;
        match &peer.pinned_key {
            None => {
                peer.pinned_key = Some(key_b64.to_string());
            }
            Some(pinned) if pinned == key_b64 => {}
            Some(_) => {
                return Err(SyncError::KeyMismatch {
                    daemon_id: daemon_id.to_string(),
                })
            }
        }
        drop(peers);
        self.save_locked()
    }

    /// Explicit manual override of a peer's pinned key, bypassing the TOFU
    /// mismatch rejection. Not reachable over RPC; an operator invokes it by
    /// removing and re-pairing the peer, which re-pins from scratch.
    pub fn force_update_key(&self, daemon_id: &str, key_b64: &str) -> Result<(), SyncError> {
        let mut peers = self.peers.write().unwrap();
        let peer = peers.get_mut(daemon_id).ok_or_else(|| SyncError::UnknownPeer(daemon_id.to_string()))?;
        peer.pinned_key = Some(key_b64.to_string());
        drop(peers);
        self.save_locked()
    }

    fn save_locked(&self) -> Result<(), SyncError> {
        let records = self.list();
        let json = serde_json::to_vec_pretty(&records).expect("peer records are always serializable");
        write_atomic(&self.path, &json).map_err(|source| SyncError::Registry {
            path: self.path.display().to_string(),
            source,
        })?;
        info!(count = records.len(), "peer registry saved");
        Ok(())
    }
}

/// Write-temp-then-rename, the same publish idiom used for the signing key
/// and the pid/port files: a reader never observes a partial write.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    {
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(&tmp, data)?;
        }
    }
    std::fs::rename(&tmp, path)
}
