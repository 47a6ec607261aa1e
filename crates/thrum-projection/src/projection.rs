// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use thrum_eventlog::{Event, EventLog, EventType};
use tracing::warn;

use crate::error::ProjectionError;
use crate::schema;
use crate::types::{AgentRow, CheckpointRow, MessageRow, QuarantineRow, SessionRow, SubscriptionRow, SyncStatus};

fn row_to_quarantine(row: &rusqlite::Row) -> rusqlite::Result<QuarantineRow> {
    Ok(QuarantineRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        peer: row.get(2)?,
        received_at: row.get(3)?,
        stage: row.get(4)?,
        reason: row.get(5)?,
        raw_json: row.get(6)?,
    })
}

/// Relational snapshot derived from the event log. Reads are shared; writes
/// are exclusively the writer's, serialized through the connection mutex so
/// long inbox-page reads never stall behind it for longer than one
/// statement, and the mutex is never held across network or filesystem I/O
/// outside this file.
pub struct Projection {
    conn: Mutex<Connection>,
}

impl Projection {
    pub fn open(path: &Path) -> Result<Self, ProjectionError> {
        let conn = Connection::open(path)?;
        schema::init(&conn)?;
        Ok(Projection {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_memory() -> Result<Self, ProjectionError> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Projection {
            conn: Mutex::new(conn),
        })
    }

    /// Drop and recreate the schema, then replay every event held in `log`,
    /// ordered by `timestamp` with `sequence` as a tiebreaker, since
    /// cross-origin ordering is otherwise undefined.
    pub fn rebuild(&self, log: &EventLog) -> Result<(), ProjectionError> {
        self.rebuild_from(log.all_events())
    }

    /// Replay an explicit, already-gathered set of events. Events are
    /// ordered by `timestamp` with `sequence` as a tiebreaker.
    pub fn rebuild_from(&self, mut events: Vec<Event>) -> Result<(), ProjectionError> {
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        {
            let conn = self.conn.lock().unwrap();
            schema::drop_all(&conn)?;
            schema::init(&conn)?;
        }
        for event in &events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    /// Apply one event's derivation rule and insert its canonical row into
    /// the `events` table, in a single transaction.
    pub fn apply_event(&self, event: &Event) -> Result<(), ProjectionError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO events (event_id, sequence, type, timestamp, origin_daemon, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.event_id,
                event.sequence as i64,
                event.event_type.as_str(),
                event.timestamp.to_rfc3339(),
                event.origin_daemon,
                event.payload.to_string(),
            ],
        )?;

        apply_derivation(&tx, event)?;
        tx.commit()?;
        Ok(())
    }

    // ── Agent queries ──────────────────────────────────────────────────

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT agent_id, role, module, display, hostname, worktree_path, last_seen, intent, session_token, heartbeat_status
             FROM agents WHERE agent_id = ?1",
            [agent_id],
            row_to_agent,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn find_agent_by_role_module(
        &self,
        role: &str,
        module: &str,
    ) -> Result<Option<AgentRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT agent_id, role, module, display, hostname, worktree_path, last_seen, intent, session_token, heartbeat_status
             FROM agents WHERE role = ?1 AND module = ?2",
            params![role, module],
            row_to_agent,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_agents(&self) -> Result<Vec<AgentRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT agent_id, role, module, display, hostname, worktree_path, last_seen, intent, session_token, heartbeat_status
             FROM agents ORDER BY agent_id",
        )?;
        let rows = stmt.query_map([], row_to_agent)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Agents whose `last_seen` is older than `threshold_rfc3339`, for the
    /// heartbeat sweeper's orphan cleanup.
    pub fn stale_agents(&self, threshold_rfc3339: &str) -> Result<Vec<AgentRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT agent_id, role, module, display, hostname, worktree_path, last_seen, intent, session_token, heartbeat_status
             FROM agents WHERE last_seen IS NOT NULL AND last_seen < ?1",
        )?;
        let rows = stmt.query_map([threshold_rfc3339], row_to_agent)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Session queries ────────────────────────────────────────────────

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT session_token, agent_id, start_time, end_time, intent, transport FROM sessions WHERE session_token = ?1",
            [token],
            row_to_session,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn active_sessions(&self) -> Result<Vec<SessionRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_token, agent_id, start_time, end_time, intent, transport FROM sessions WHERE end_time IS NULL",
        )?;
        let rows = stmt.query_map([], row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Message queries ────────────────────────────────────────────────

    pub fn get_message(&self, message_id: &str) -> Result<Option<MessageRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT message_id, thread_id, agent_id, authored_by, disclosed, scopes, mentions, priority, format, content, reply_to, created_at, deleted_at
             FROM messages WHERE message_id = ?1",
            [message_id],
            row_to_message,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Messages addressed (directly or via a resolved group) to `agent_id`,
    /// newest first.
    pub fn list_messages_for(&self, agent_id: &str, limit: usize) -> Result<Vec<MessageRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.message_id, m.thread_id, m.agent_id, m.authored_by, m.disclosed, m.scopes, m.mentions, m.priority, m.format, m.content, m.reply_to, m.created_at, m.deleted_at
             FROM messages m
             JOIN message_reads r ON r.message_id = m.message_id
             WHERE r.recipient_agent = ?1
             ORDER BY m.created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], row_to_message)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Group queries ───────────────────────────────────────────────────

    pub fn list_groups(&self) -> Result<Vec<String>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM groups ORDER BY name")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn group_members(&self, name: &str) -> Result<Vec<String>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT member FROM group_members WHERE group_name = ?1 ORDER BY member")?;
        let rows = stmt.query_map([name], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Subscription queries ──────────────────────────────────────────

    pub fn subscriptions_for_session(&self, session_id: &str) -> Result<Vec<SubscriptionRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT subscription_id, session_id, scope, mention, match_all FROM subscriptions WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map([session_id], row_to_subscription)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn all_subscriptions(&self) -> Result<Vec<SubscriptionRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subscription_id, session_id, scope, mention, match_all FROM subscriptions")?;
        let rows = stmt.query_map([], row_to_subscription)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn add_subscription(&self, row: &SubscriptionRow) -> Result<(), ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO subscriptions (subscription_id, session_id, scope, mention, match_all) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(subscription_id) DO UPDATE SET scope=excluded.scope, mention=excluded.mention, match_all=excluded.match_all",
            params![
                row.subscription_id,
                row.session_id,
                row.scope.as_ref().map(|v| v.to_string()),
                row.mention.as_ref().map(|v| v.to_string()),
                row.match_all as i64,
            ],
        )?;
        Ok(())
    }

    pub fn remove_subscription(&self, subscription_id: &str) -> Result<(), ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM subscriptions WHERE subscription_id = ?1", [subscription_id])?;
        Ok(())
    }

    // ── Checkpoint queries (owned operationally by the sync engine) ────

    pub fn get_checkpoint(&self, peer_daemon_id: &str) -> Result<Option<CheckpointRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT peer_daemon_id, highest_sequence, last_sync_time, status FROM checkpoints WHERE peer_daemon_id = ?1",
            [peer_daemon_id],
            row_to_checkpoint,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_checkpoint(&self, peer_daemon_id: &str, highest_sequence: u64, status: SyncStatus, last_sync_time: Option<i64>) -> Result<(), ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checkpoints (peer_daemon_id, highest_sequence, last_sync_time, status) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(peer_daemon_id) DO UPDATE SET highest_sequence=excluded.highest_sequence, last_sync_time=excluded.last_sync_time, status=excluded.status",
            params![peer_daemon_id, highest_sequence as i64, last_sync_time, status.as_str()],
        )?;
        Ok(())
    }

    // ── Quarantine ──────────────────────────────────────────────────────

    pub fn quarantine(&self, event_id: &str, peer: &str, received_at: &str, stage: &str, reason: &str, raw_json: &str) -> Result<(), ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quarantine (event_id, peer, received_at, stage, reason, raw_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![event_id, peer, received_at, stage, reason, raw_json],
        )?;
        Ok(())
    }

    /// Count of quarantined events from `peer` with `received_at >= since_rfc3339`.
    pub fn quarantine_count_since(&self, peer: &str, since_rfc3339: &str) -> Result<u32, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM quarantine WHERE peer = ?1 AND received_at >= ?2",
            params![peer, since_rfc3339],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }

    pub fn list_quarantine(&self, peer: &str, limit: usize) -> Result<Vec<QuarantineRow>, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_id, peer, received_at, stage, reason, raw_json
             FROM quarantine WHERE peer = ?1 ORDER BY received_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![peer, limit as i64], row_to_quarantine)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn has_event(&self, event_id: &str) -> Result<bool, ProjectionError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE event_id = ?1",
            [event_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}

fn apply_derivation(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    match event.event_type {
        EventType::AgentRegister => apply_agent_register(tx, event),
        EventType::AgentCleanup => apply_agent_cleanup(tx, event),
        EventType::SessionStart => apply_session_start(tx, event),
        EventType::SessionEnd => apply_session_end(tx, event),
        EventType::SessionHeartbeat => apply_session_heartbeat(tx, event),
        EventType::MessageCreate => apply_message_create(tx, event),
        EventType::MessageEdit => apply_message_edit(tx, event),
        EventType::MessageDelete => apply_message_delete(tx, event),
        EventType::MessageRead => apply_message_read(tx, event),
        EventType::GroupCreate => apply_group_create(tx, event),
        EventType::GroupDelete => apply_group_delete(tx, event),
        EventType::GroupAddMember => apply_group_add_member(tx, event),
        EventType::GroupRemoveMember => apply_group_remove_member(tx, event),
        EventType::PeerPair => Ok(()), // peer registry lives outside the projection
    }
}

fn field<'a>(payload: &'a Value, name: &'static str, event_type: &str) -> Result<&'a str, ProjectionError> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .ok_or(ProjectionError::MissingField(name, event_type.to_string()))
}

fn apply_agent_register(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let agent_id = field(p, "agent_id", "agent.register")?;
    let role = field(p, "role", "agent.register")?;
    let module = field(p, "module", "agent.register")?;
    let display = p.get("display").and_then(Value::as_str);
    let hostname = p.get("hostname").and_then(Value::as_str);
    let worktree_path = p.get("worktree_path").and_then(Value::as_str);
    let force = p.get("force").and_then(Value::as_bool).unwrap_or(false);

    if force {
        tx.execute(
            "DELETE FROM agents WHERE (role = ?1 AND module = ?2 AND agent_id != ?3)",
            params![role, module, agent_id],
        )?;
    }

    tx.execute(
        "INSERT INTO agents (agent_id, role, module, display, hostname, worktree_path, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(agent_id) DO UPDATE SET role=excluded.role, module=excluded.module, display=excluded.display, hostname=excluded.hostname, worktree_path=excluded.worktree_path, last_seen=excluded.last_seen",
        params![agent_id, role, module, display, hostname, worktree_path, event.timestamp.to_rfc3339()],
    )?;
    Ok(())
}

fn apply_agent_cleanup(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let agent_id = field(&event.payload, "agent_id", "agent.cleanup")?;
    tx.execute("DELETE FROM agents WHERE agent_id = ?1", [agent_id])?;
    Ok(())
}

fn apply_session_start(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let token = field(p, "session_token", "session.start")?;
    let agent_id = field(p, "agent_id", "session.start")?;
    let intent = p.get("intent").and_then(Value::as_str);
    let transport = p.get("transport").and_then(Value::as_str).unwrap_or("local");

    tx.execute(
        "INSERT INTO sessions (session_token, agent_id, start_time, end_time, intent, transport)
         VALUES (?1, ?2, ?3, NULL, ?4, ?5)
         ON CONFLICT(session_token) DO UPDATE SET agent_id=excluded.agent_id, intent=excluded.intent, transport=excluded.transport",
        params![token, agent_id, event.timestamp.to_rfc3339(), intent, transport],
    )?;
    tx.execute(
        "UPDATE agents SET session_token = ?1, intent = ?2, last_seen = ?3 WHERE agent_id = ?4",
        params![token, intent, event.timestamp.to_rfc3339(), agent_id],
    )?;
    Ok(())
}

fn apply_session_end(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let token = field(&event.payload, "session_token", "session.end")?;
    tx.execute(
        "UPDATE sessions SET end_time = ?1 WHERE session_token = ?2",
        params![event.timestamp.to_rfc3339(), token],
    )?;
    tx.execute("DELETE FROM subscriptions WHERE session_id = ?1", [token])?;
    Ok(())
}

fn apply_session_heartbeat(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let agent_id = field(p, "agent_id", "session.heartbeat")?;
    tx.execute(
        "UPDATE agents SET last_seen = ?1, heartbeat_status = 'alive' WHERE agent_id = ?2",
        params![event.timestamp.to_rfc3339(), agent_id],
    )?;
    if let Some(intent) = p.get("intent").and_then(Value::as_str) {
        tx.execute("UPDATE agents SET intent = ?1 WHERE agent_id = ?2", params![intent, agent_id])?;
    }
    Ok(())
}

fn apply_message_create(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let message_id = field(p, "message_id", "message.create")?;
    let agent_id = field(p, "agent_id", "message.create")?;
    let authored_by = p.get("authored_by").and_then(Value::as_str).unwrap_or(agent_id);
    let disclosed = p.get("disclosed").and_then(Value::as_bool).unwrap_or(true);
    let scopes = p.get("scopes").cloned().unwrap_or(Value::Array(vec![]));
    let mentions = p.get("mentions").cloned().unwrap_or(Value::Array(vec![]));
    let priority = p.get("priority").and_then(Value::as_i64).unwrap_or(0);
    let format = p.get("format").and_then(Value::as_str).unwrap_or("markdown");
    let content = p.get("content").and_then(Value::as_str).unwrap_or_default();
    let reply_to = p.get("reply_to").and_then(Value::as_str);
    let thread_id = p.get("thread_id").and_then(Value::as_str);

    tx.execute(
        "INSERT OR IGNORE INTO messages (message_id, thread_id, agent_id, authored_by, disclosed, scopes, mentions, priority, format, content, reply_to, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            message_id,
            thread_id,
            agent_id,
            authored_by,
            disclosed as i64,
            scopes.to_string(),
            mentions.to_string(),
            priority,
            format,
            content,
            reply_to,
            event.timestamp.to_rfc3339(),
        ],
    )?;

    for recipient in direct_recipients(&scopes, tx) {
        tx.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, recipient_agent, is_read) VALUES (?1, ?2, 0)",
            params![message_id, recipient],
        )?;
    }
    Ok(())
}

/// Resolve `to:<agent>` and `to:@<group>` scopes to a flat set of agent IDs.
fn direct_recipients(scopes: &Value, tx: &rusqlite::Transaction) -> Vec<String> {
    let mut out = Vec::new();
    let Some(arr) = scopes.as_array() else {
        return out;
    };
    for s in arr {
        let (Some(kind), Some(value)) = (
            s.get("kind").and_then(Value::as_str),
            s.get("value").and_then(Value::as_str),
        ) else {
            continue;
        };
        if kind != "to" {
            continue;
        }
        if let Some(group) = value.strip_prefix('@') {
            let mut stmt = match tx.prepare("SELECT member FROM group_members WHERE group_name = ?1") {
                Ok(s) => s,
                Err(_) => continue,
            };
            let members = stmt
                .query_map([group], |r| r.get::<_, String>(0))
                .map(|rows| rows.flatten().collect::<Vec<_>>())
                .unwrap_or_default();
            out.extend(members);
        } else {
            out.push(value.to_string());
        }
    }
    out
}

fn apply_message_edit(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let message_id = field(p, "message_id", "message.edit")?;
    if let Some(content) = p.get("content").and_then(Value::as_str) {
        tx.execute(
            "UPDATE messages SET content = ?1 WHERE message_id = ?2",
            params![content, message_id],
        )?;
    }
    if let Some(format) = p.get("format").and_then(Value::as_str) {
        tx.execute(
            "UPDATE messages SET format = ?1 WHERE message_id = ?2",
            params![format, message_id],
        )?;
    }
    Ok(())
}

fn apply_message_delete(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let message_id = field(&event.payload, "message_id", "message.delete")?;
    tx.execute(
        "UPDATE messages SET deleted_at = ?1 WHERE message_id = ?2",
        params![event.timestamp.to_rfc3339(), message_id],
    )?;
    Ok(())
}

fn apply_message_read(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let message_id = field(p, "message_id", "message.read")?;
    let agent_id = field(p, "agent_id", "message.read")?;
    tx.execute(
        "INSERT INTO message_reads (message_id, recipient_agent, is_read) VALUES (?1, ?2, 1)
         ON CONFLICT(message_id, recipient_agent) DO UPDATE SET is_read = 1",
        params![message_id, agent_id],
    )?;
    Ok(())
}

fn apply_group_create(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let name = field(p, "name", "group.create")?;
    tx.execute("INSERT OR IGNORE INTO groups (name) VALUES (?1)", [name])?;
    if let Some(members) = p.get("members").and_then(Value::as_array) {
        for m in members {
            if let Some(member) = m.as_str() {
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (group_name, member) VALUES (?1, ?2)",
                    params![name, member],
                )?;
            }
        }
    }
    Ok(())
}

fn apply_group_delete(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let name = field(&event.payload, "name", "group.delete")?;
    if name == "everyone" {
        warn!("ignoring group.delete for @everyone, which cannot be destroyed");
        return Ok(());
    }
    tx.execute("DELETE FROM group_members WHERE group_name = ?1", [name])?;
    tx.execute("DELETE FROM groups WHERE name = ?1", [name])?;
    Ok(())
}

fn apply_group_add_member(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let name = field(p, "name", "group.add_member")?;
    let member = field(p, "member", "group.add_member")?;
    tx.execute(
        "INSERT OR IGNORE INTO group_members (group_name, member) VALUES (?1, ?2)",
        params![name, member],
    )?;
    Ok(())
}

fn apply_group_remove_member(tx: &rusqlite::Transaction, event: &Event) -> Result<(), ProjectionError> {
    let p = &event.payload;
    let name = field(p, "name", "group.remove_member")?;
    let member = field(p, "member", "group.remove_member")?;
    tx.execute(
        "DELETE FROM group_members WHERE group_name = ?1 AND member = ?2",
        params![name, member],
    )?;
    Ok(())
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<AgentRow> {
    Ok(AgentRow {
        agent_id: row.get(0)?,
        role: row.get(1)?,
        module: row.get(2)?,
        display: row.get(3)?,
        hostname: row.get(4)?,
        worktree_path: row.get(5)?,
        last_seen: row.get(6)?,
        intent: row.get(7)?,
        session_token: row.get(8)?,
        heartbeat_status: row.get(9)?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_token: row.get(0)?,
        agent_id: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        intent: row.get(4)?,
        transport: row.get(5)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    let scopes: String = row.get(5)?;
    let mentions: String = row.get(6)?;
    Ok(MessageRow {
        message_id: row.get(0)?,
        thread_id: row.get(1)?,
        agent_id: row.get(2)?,
        authored_by: row.get(3)?,
        disclosed: row.get::<_, i64>(4)? != 0,
        scopes: serde_json::from_str(&scopes).unwrap_or(Value::Array(vec![])),
        mentions: serde_json::from_str(&mentions).unwrap_or(Value::Array(vec![])),
        priority: row.get(7)?,
        format: row.get(8)?,
        content: row.get(9)?,
        reply_to: row.get(10)?,
        created_at: row.get(11)?,
        deleted_at: row.get(12)?,
    })
}

fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<SubscriptionRow> {
    let scope: Option<String> = row.get(2)?;
    let mention: Option<String> = row.get(3)?;
    Ok(SubscriptionRow {
        subscription_id: row.get(0)?,
        session_id: row.get(1)?,
        scope: scope.and_then(|s| serde_json::from_str(&s).ok()),
        mention: mention.and_then(|s| serde_json::from_str(&s).ok()),
        match_all: row.get::<_, i64>(4)? != 0,
    })
}

fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<CheckpointRow> {
    Ok(CheckpointRow {
        peer_daemon_id: row.get(0)?,
        highest_sequence: row.get::<_, i64>(1)? as u64,
        last_sync_time: row.get(2)?,
        status: row.get(3)?,
    })
}
