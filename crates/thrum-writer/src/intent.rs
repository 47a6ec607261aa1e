// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;
use thrum_eventlog::{Event, EventType};

/// A validated request to mutate repository state. Everything but
/// [`Intent::ApplyRemote`] is built into a brand new, locally originated
/// event; `ApplyRemote` carries an already-signed event from a peer,
/// arriving through the sync applier.
#[derive(Debug, Clone)]
pub enum Intent {
    RegisterAgent {
        agent_id: String,
        role: String,
        module: String,
        display: Option<String>,
        hostname: Option<String>,
        worktree_path: Option<String>,
        force: bool,
    },
    CleanupAgent {
        agent_id: String,
    },
    StartSession {
        session_token: String,
        agent_id: String,
        intent: Option<String>,
        transport: String,
    },
    EndSession {
        session_token: String,
    },
    Heartbeat {
        agent_id: String,
        intent: Option<String>,
    },
    CreateMessage {
        message_id: String,
        agent_id: String,
        authored_by: String,
        content: String,
        format: String,
        scopes: Value,
        mentions: Value,
        priority: i64,
        reply_to: Option<String>,
        thread_id: Option<String>,
    },
    EditMessage {
        message_id: String,
        content: Option<String>,
        format: Option<String>,
    },
    DeleteMessage {
        message_id: String,
    },
    MarkRead {
        message_id: String,
        agent_id: String,
    },
    CreateGroup {
        name: String,
        members: Vec<String>,
    },
    DeleteGroup {
        name: String,
    },
    AddMember {
        name: String,
        member: String,
    },
    RemoveMember {
        name: String,
        member: String,
    },
    /// Pre-validated event from the sync applier. Its `sequence` is
    /// trusted verbatim; the writer only deduplicates and applies.
    ApplyRemote {
        event: Event,
    },
}

impl Intent {
    /// The `(type, payload)` pair for locally originated intents. Returns
    /// `None` for [`Intent::ApplyRemote`], which already carries a complete
    /// event.
    pub fn to_event_parts(&self) -> Option<(EventType, Value)> {
        use serde_json::json;
        let parts = match self {
            Intent::RegisterAgent {
                agent_id,
                role,
                module,
                display,
                hostname,
                worktree_path,
                force,
            } => (
                EventType::AgentRegister,
                json!({
                    "agent_id": agent_id,
                    "role": role,
                    "module": module,
                    "display": display,
                    "hostname": hostname,
                    "worktree_path": worktree_path,
                    "force": force,
                }),
            ),
            Intent::CleanupAgent { agent_id } => (
                EventType::AgentCleanup,
                json!({ "agent_id": agent_id }),
            ),
            Intent::StartSession {
                session_token,
                agent_id,
                intent,
                transport,
            } => (
                EventType::SessionStart,
                json!({
                    "session_token": session_token,
                    "agent_id": agent_id,
                    "intent": intent,
                    "transport": transport,
                }),
            ),
            Intent::EndSession { session_token } => (
                EventType::SessionEnd,
                json!({ "session_token": session_token }),
            ),
            Intent::Heartbeat { agent_id, intent } => (
                EventType::SessionHeartbeat,
                json!({ "agent_id": agent_id, "intent": intent }),
            ),
            Intent::CreateMessage {
                message_id,
                agent_id,
                authored_by,
                content,
                format,
                scopes,
                mentions,
                priority,
                reply_to,
                thread_id,
            } => (
                EventType::MessageCreate,
                json!({
                    "message_id": message_id,
                    "agent_id": agent_id,
                    "authored_by": authored_by,
                    "content": content,
                    "format": format,
                    "scopes": scopes,
                    "mentions": mentions,
                    "priority": priority,
                    "reply_to": reply_to,
                    "thread_id": thread_id,
                }),
            ),
            Intent::EditMessage {
                message_id,
                content,
                format,
            } => (
                EventType::MessageEdit,
                json!({ "message_id": message_id, "content": content, "format": format }),
            ),
            Intent::DeleteMessage { message_id } => (
                EventType::MessageDelete,
                json!({ "message_id": message_id }),
            ),
            Intent::MarkRead { message_id, agent_id } => (
                EventType::MessageRead,
                json!({ "message_id": message_id, "agent_id": agent_id }),
            ),
            Intent::CreateGroup { name, members } => (
                EventType::GroupCreate,
                json!({ "name": name, "members": members }),
            ),
            Intent::DeleteGroup { name } => (
                EventType::GroupDelete,
                json!({ "name": name }),
            ),
            Intent::AddMember { name, member } => (
                EventType::GroupAddMember,
                json!({ "name": name, "member": member }),
            ),
            Intent::RemoveMember { name, member } => (
                EventType::GroupRemoveMember,
                json!({ "name": name, "member": member }),
            ),
            Intent::ApplyRemote { .. } => return None,
        };
        Some(parts)
    }
}
