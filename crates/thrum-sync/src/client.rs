// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Outbound JSON-RPC line client for the sync transport.
//!
//! Mirrors the framing `thrum-rpc::server` speaks on the accepting side:
//! one newline-delimited JSON object per request, one per response. There
//! is no persistent connection pool; each call opens, writes one line,
//! reads one line, and closes. Sync traffic is low-frequency enough
//! (notify, periodic pull) that connection reuse isn't worth the
//! bookkeeping.
use serde_json::{json, Value};
use thrum_eventlog::Event;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::SyncError;

pub struct PulledBatch {
    pub events: Vec<Event>,
    /// Array elements that failed to deserialize as `Event` (unknown
    /// `type`, missing field, wrong shape). Kept separately rather than
    /// failing the whole pull: one corrupt or tampered record in a batch
    /// must not block every other event in it.
    pub rejected: Vec<RejectedRaw>,
    pub next_sequence: u64,
    pub more_available: bool,
}

pub struct RejectedRaw {
    pub event_id: String,
    pub raw_json: String,
    pub reason: String,
}

async fn call(address: &str, method: &str, params: Value) -> Result<Value, SyncError> {
    let stream = TcpStream::connect(address).await.map_err(|source| SyncError::Connect {
        address: address.to_string(),
        source,
    })?;
    let (reader, mut writer) = stream.into_split();
    let request = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
    let line = serde_json::to_string(&request).expect("request is always serializable");
    writer.write_all(line.as_bytes()).await.map_err(|source| SyncError::Connect {
        address: address.to_string(),
        source,
    })?;
    writer.write_all(b"\n").await.map_err(|source| SyncError::Connect {
        address: address.to_string(),
        source,
    })?;
    writer.flush().await.map_err(|source| SyncError::Connect {
        address: address.to_string(),
        source,
    })?;

    let mut lines = BufReader::new(reader).lines();
    let response_line = lines
        .next_line()
        .await
        .map_err(|source| SyncError::Connect {
            address: address.to_string(),
            source,
        })?
        .ok_or_else(|| SyncError::Transport("peer closed the connection without replying".to_string()))?;

    let response: Value = serde_json::from_str(&response_line).map_err(|e| SyncError::Transport(e.to_string()))?;
    if let Some(error) = response.get("error") {
        return Err(SyncError::Remote(error.to_string()));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

pub async fn pull(address: &str, token: &str, after_sequence: u64, max_batch: usize) -> Result<PulledBatch, SyncError> {
    let result = call(
        address,
        "sync.pull",
        json!({"token": token, "after_sequence": after_sequence, "max_batch": max_batch}),
    )
    .await?;
    let raw_events: Vec<Value> = serde_json::from_value(result.get("events").cloned().unwrap_or(Value::Array(vec![])))
        .map_err(|e| SyncError::Transport(e.to_string()))?;

    let mut events = Vec::with_capacity(raw_events.len());
    let mut rejected = Vec::new();
    for raw in raw_events {
        match serde_json::from_value::<Event>(raw.clone()) {
            Ok(event) => events.push(event),
            Err(e) => {
                let event_id = raw.get("event_id").and_then(Value::as_str).unwrap_or("unknown").to_string();
                let raw_json = serde_json::to_string(&raw).unwrap_or_default();
                rejected.push(RejectedRaw {
                    event_id,
                    raw_json,
                    reason: e.to_string(),
                });
            }
        }
    }

    let next_sequence = result.get("next_sequence").and_then(Value::as_u64).unwrap_or(after_sequence);
    let more_available = result.get("more_available").and_then(Value::as_bool).unwrap_or(false);
    Ok(PulledBatch {
        events,
        rejected,
        next_sequence,
        more_available,
    })
}

pub async fn peer_info(address: &str) -> Result<Value, SyncError> {
    call(address, "sync.peer_info", Value::Null).await
}

pub async fn notify(address: &str, token: &str, daemon_id: &str, latest_seq: u64, event_count: u64) -> Result<(), SyncError> {
    call(
        address,
        "sync.notify",
        json!({"token": token, "daemon_id": daemon_id, "latest_seq": latest_seq, "event_count": event_count}),
    )
    .await
    .map(|_| ())
}

pub async fn pair_request(address: &str, code: &str, daemon_id: &str, name: &str, our_address: &str) -> Result<Value, SyncError> {
    call(
        address,
        "pair.request",
        json!({"code": code, "daemon_id": daemon_id, "name": name, "address": our_address}),
    )
    .await
}
