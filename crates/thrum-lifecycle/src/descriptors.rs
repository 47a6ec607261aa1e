// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use thrum_config::IdentityDescriptor;
use thrum_eventlog::{Event, EventType};
use thrum_writer::CommitHook;
use tracing::warn;

/// Owns `identities/<agent_id>.json`: writes it on every `agent.register`,
/// deletes it on `agent.cleanup`. Wired into the writer as a [`CommitHook`]
/// so the descriptor file and the projection row never drift; both are
/// updated from the same committed event, never from the RPC request that
/// triggered it.
pub struct IdentityFileSync {
    identities_dir: PathBuf,
}

impl IdentityFileSync {
    pub fn new(identities_dir: PathBuf) -> Self {
        IdentityFileSync { identities_dir }
    }

    fn path_for(&self, agent_id: &str) -> PathBuf {
        self.identities_dir.join(format!("{agent_id}.json"))
    }
}

#[async_trait]
impl CommitHook for IdentityFileSync {
    async fn on_commit(&self, event: &Event) {
        match event.event_type {
            EventType::AgentRegister => {
                let Some(agent_id) = event.payload.get("agent_id").and_then(|v| v.as_str()) else {
                    return;
                };
                let descriptor = IdentityDescriptor {
                    agent_id: agent_id.to_string(),
                    role: field_str(event, "role"),
                    module: field_str(event, "module"),
                    display: event.payload.get("display").and_then(|v| v.as_str()).map(str::to_string),
                    hostname: event.payload.get("hostname").and_then(|v| v.as_str()).map(str::to_string),
                };
                let path = self.path_for(agent_id);
                let body = match serde_json::to_vec_pretty(&descriptor) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(%agent_id, "failed to serialize identity descriptor: {e}");
                        return;
                    }
                };
                if let Err(e) = std::fs::write(&path, body) {
                    warn!(path = %path.display(), "failed to write identity descriptor: {e}");
                }
            }
            EventType::AgentCleanup => {
                let Some(agent_id) = event.payload.get("agent_id").and_then(|v| v.as_str()) else {
                    return;
                };
                let _ = std::fs::remove_file(self.path_for(agent_id));
            }
            _ => {}
        }
    }
}

fn field_str(event: &Event, field: &str) -> String {
    event.payload.get(field).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn evt(typ: EventType, payload: serde_json::Value) -> Event {
        Event {
            event_id: "evt_1".into(),
            event_type: typ,
            timestamp: Utc::now(),
            origin_daemon: "d_1".into(),
            sequence: 1,
            signature: None,
            payload,
        }
    }

    #[tokio::test]
    async fn register_writes_descriptor_file() {
        let dir = tempfile::tempdir().unwrap();
        let sync = IdentityFileSync::new(dir.path().to_path_buf());
        sync.on_commit(&evt(
            EventType::AgentRegister,
            json!({"agent_id": "furiosa", "role": "impl", "module": "auth"}),
        ))
        .await;
        let path = dir.path().join("furiosa.json");
        assert!(path.is_file());
        let descriptor: IdentityDescriptor = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(descriptor.role, "impl");
    }

    #[tokio::test]
    async fn cleanup_removes_descriptor_file() {
        let dir = tempfile::tempdir().unwrap();
        let sync = IdentityFileSync::new(dir.path().to_path_buf());
        sync.on_commit(&evt(
            EventType::AgentRegister,
            json!({"agent_id": "furiosa", "role": "impl", "module": "auth"}),
        ))
        .await;
        sync.on_commit(&evt(EventType::AgentCleanup, json!({"agent_id": "furiosa"})))
            .await;
        assert!(!dir.path().join("furiosa.json").is_file());
    }

    #[tokio::test]
    async fn unrelated_event_types_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sync = IdentityFileSync::new(dir.path().to_path_buf());
        sync.on_commit(&evt(EventType::SessionHeartbeat, json!({"agent_id": "furiosa"})))
            .await;
        assert!(!dir.path().join("furiosa.json").is_file());
    }
}
