// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Outbound JSON-RPC line client for the local control socket.
//!
//! Mirrors the framing `thrum-sync::client` speaks against the sync
//! transport, but over a Unix-domain socket: one newline-delimited JSON
//! object per request, one per response, no connection reuse. CLI
//! subcommands that need to observe or mutate a running daemon's state
//! (peer registry, pairing) go through this rather than touching the
//! control directory's files directly, since that state lives in memory
//! inside the daemon process.
use anyhow::{bail, Context};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub async fn call(sock_path: &std::path::Path, method: &str, params: Value) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(sock_path)
        .await
        .with_context(|| format!("connecting to {}", sock_path.display()))?;
    let (reader, mut writer) = stream.into_split();

    let request = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
    let line = serde_json::to_string(&request).expect("request is always serializable");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    let response_line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("daemon closed the connection without replying"))?;

    let response: Value = serde_json::from_str(&response_line)?;
    if let Some(error) = response.get("error") {
        bail!("daemon returned an error: {error}");
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

/// True if something is listening on the control socket, i.e. a daemon is
/// running for this repository.
pub async fn is_running(sock_path: &std::path::Path) -> bool {
    call(sock_path, "ping", Value::Null).await.is_ok()
}
