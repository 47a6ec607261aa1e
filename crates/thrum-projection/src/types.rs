// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRow {
    pub agent_id: String,
    pub role: String,
    pub module: String,
    pub display: Option<String>,
    pub hostname: Option<String>,
    pub worktree_path: Option<String>,
    pub last_seen: Option<String>,
    pub intent: Option<String>,
    pub session_token: Option<String>,
    pub heartbeat_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRow {
    pub session_token: String,
    pub agent_id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub intent: Option<String>,
    pub transport: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub agent_id: String,
    pub authored_by: String,
    pub disclosed: bool,
    pub scopes: serde_json::Value,
    pub mentions: serde_json::Value,
    pub priority: i64,
    pub format: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRow {
    pub subscription_id: String,
    pub session_id: String,
    pub scope: Option<serde_json::Value>,
    pub mention: Option<serde_json::Value>,
    pub match_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRow {
    pub peer_daemon_id: String,
    pub highest_sequence: u64,
    pub last_sync_time: Option<i64>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarantineRow {
    pub id: i64,
    pub event_id: String,
    pub peer: String,
    pub received_at: String,
    pub stage: String,
    pub reason: String,
    pub raw_json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}
