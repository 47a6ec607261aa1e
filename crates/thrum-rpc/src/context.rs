// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thrum_dispatcher::Dispatcher;
use thrum_eventlog::ReadAfter;
use thrum_projection::Projection;
use thrum_writer::WriterHandle;
use tokio::sync::Mutex;

use crate::protocol::JsonRpcError;

/// Sync-engine operations reachable from the RPC surface. Implemented by
/// `thrum-sync`; this crate only depends on the trait, not the
/// implementation, so `thrum-rpc` never depends on `thrum-sync`.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn pull(&self, peer_token: &str, after_sequence: u64, max_batch: usize) -> Result<ReadAfter, JsonRpcError>;
    async fn peer_info(&self) -> Value;
    async fn notify(&self, peer_token: &str, daemon_id: &str, latest_seq: u64, event_count: u64) -> Result<(), JsonRpcError>;
    async fn pair_request(&self, code: &str, daemon_id: &str, name: &str, address: &str) -> Result<Value, JsonRpcError>;
    async fn pair_add(&self) -> Result<Value, JsonRpcError>;
    async fn pair_join(&self, address: &str, code: &str) -> Result<Value, JsonRpcError>;
    async fn peer_list(&self) -> Value;
    async fn peer_remove(&self, daemon_id: &str) -> Result<(), JsonRpcError>;
    async fn peer_status(&self, daemon_id: &str) -> Result<Value, JsonRpcError>;
    async fn force_sync(&self) -> Result<Value, JsonRpcError>;
}

/// Shared state every RPC handler call reads or mutates through.
pub struct RpcContext {
    pub daemon_id: String,
    pub writer: WriterHandle,
    pub projection: Arc<Projection>,
    pub dispatcher: Arc<Dispatcher>,
    pub sync_backend: Arc<dyn SyncBackend>,
    /// `context/<name>.md` and `<name>_preamble.md` are opaque per-agent
    /// narrative blobs the core only stores and retrieves; rendering is an
    /// external collaborator's concern.
    pub context_dir: PathBuf,
    /// Per-session notification receivers registered at `session.start`,
    /// drained by the `wait` handler.
    pub waiters: Mutex<HashMap<String, tokio::sync::mpsc::Receiver<Value>>>,
    /// Upper bound a single handler call may run for. `server::handle_line`
    /// wraps every `dispatch` call in a timeout against this; exceeding it
    /// fails that one call, not the connection.
    pub call_deadline: Duration,
}

impl RpcContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        daemon_id: String,
        writer: WriterHandle,
        projection: Arc<Projection>,
        dispatcher: Arc<Dispatcher>,
        sync_backend: Arc<dyn SyncBackend>,
        context_dir: PathBuf,
        call_deadline: Duration,
    ) -> Self {
        RpcContext {
            daemon_id,
            writer,
            projection,
            dispatcher,
            sync_backend,
            context_dir,
            waiters: Mutex::new(HashMap::new()),
            call_deadline,
        }
    }
}
