// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The known event type enumeration. Implementations must reject unknown
/// types at the schema validation stage; `serde`'s untagged fallback is
/// deliberately not used here so an unrecognized string fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "agent.register")]
    AgentRegister,
    #[serde(rename = "agent.cleanup")]
    AgentCleanup,
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.end")]
    SessionEnd,
    #[serde(rename = "session.heartbeat")]
    SessionHeartbeat,
    #[serde(rename = "message.create")]
    MessageCreate,
    #[serde(rename = "message.edit")]
    MessageEdit,
    #[serde(rename = "message.delete")]
    MessageDelete,
    #[serde(rename = "message.read")]
    MessageRead,
    #[serde(rename = "group.create")]
    GroupCreate,
    #[serde(rename = "group.delete")]
    GroupDelete,
    #[serde(rename = "group.add_member")]
    GroupAddMember,
    #[serde(rename = "group.remove_member")]
    GroupRemoveMember,
    #[serde(rename = "peer.pair")]
    PeerPair,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegister => "agent.register",
            EventType::AgentCleanup => "agent.cleanup",
            EventType::SessionStart => "session.start",
            EventType::SessionEnd => "session.end",
            EventType::SessionHeartbeat => "session.heartbeat",
            EventType::MessageCreate => "message.create",
            EventType::MessageEdit => "message.edit",
            EventType::MessageDelete => "message.delete",
            EventType::MessageRead => "message.read",
            EventType::GroupCreate => "group.create",
            EventType::GroupDelete => "group.delete",
            EventType::GroupAddMember => "group.add_member",
            EventType::GroupRemoveMember => "group.remove_member",
            EventType::PeerPair => "peer.pair",
        }
    }
}

/// The only source of truth. Immutable once appended; edits and deletions
/// are new events referring to an earlier `message_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub origin_daemon: String,
    pub sequence: u64,
    /// Base64 Ed25519 signature over `event_id|type|timestamp|origin_daemon`.
    /// Optional during migration; mandatory once enforcement is enabled.
    pub signature: Option<String>,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// The canonical signing payload bytes for this event.
    pub fn canonical_payload(&self) -> Vec<u8> {
        thrum_security::canonical_payload(
            &self.event_id,
            self.event_type.as_str(),
            &self.timestamp.to_rfc3339(),
            &self.origin_daemon,
        )
    }
}

/// Which on-disk shard an event belongs to. Events whose primary target is
/// a specific agent are routed to that agent's shard; everything else goes
/// to the shared process-wide stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    Stream,
    Agent(String),
}

impl ShardKey {
    pub fn file_name(&self) -> String {
        match self {
            ShardKey::Stream => "events.jsonl".to_string(),
            ShardKey::Agent(agent) => format!("messages/{agent}.jsonl"),
        }
    }
}

/// Route an event to its shard. `message.create` events with exactly one
/// `to:<agent>` scope (not a group) are routed to that agent's shard; all
/// other events, and messages with zero or multiple direct recipients, go
/// to the shared stream.
pub fn shard_for(event: &Event) -> ShardKey {
    if event.event_type != EventType::MessageCreate {
        return ShardKey::Stream;
    }
    let Some(scopes) = event.payload.get("scopes").and_then(|v| v.as_array()) else {
        return ShardKey::Stream;
    };
    let recipients: Vec<&str> = scopes
        .iter()
        .filter_map(|s| {
            let kind = s.get("kind")?.as_str()?;
            let value = s.get("value")?.as_str()?;
            if kind == "to" && !value.starts_with('@') {
                Some(value)
            } else {
                None
            }
        })
        .collect();
    match recipients.as_slice() {
        [only] => ShardKey::Agent(only.to_string()),
        _ => ShardKey::Stream,
    }
}
