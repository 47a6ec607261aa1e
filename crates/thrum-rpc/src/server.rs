// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, warn};

use crate::context::RpcContext;
use crate::handlers::dispatch;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, DEADLINE_EXCEEDED, INVALID_REQUEST, PARSE_ERROR, QUEUE_FULL, RATE_LIMITED};
use crate::transport::Transport;

/// Global in-flight request cap across the whole sync listener. Requests
/// beyond this are rejected with 503 rather than queued indefinitely.
const GLOBAL_QUEUE_DEPTH: usize = 1000;

type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Per-peer token-bucket rate limiting for the sync transport: default
/// 10 rps, burst 20.
pub fn default_peer_limiter() -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(10).unwrap()).allow_burst(NonZeroU32::new(20).unwrap());
    Arc::new(RateLimiter::direct(quota))
}

/// Bind the local IPC socket at `path`, permission 0600, accepting the
/// full method set. Runs until the listener errors or the process exits.
pub async fn serve_local(path: &std::path::Path, ctx: Arc<RpcContext>) -> std::io::Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    loop {
        let (stream, _addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let (r, w) = stream.into_split();
            if let Err(e) = serve_connection(r, w, Transport::Local, ctx, None).await {
                debug!(error = %e, "local connection ended");
            }
        });
    }
}

/// Bind the sync TCP listener on the first available port in
/// `[port_low, port_high]`, returning the bound port. Accepts only the
/// whitelisted sync method subset, with per-connection rate limiting.
pub async fn serve_sync(port_low: u16, port_high: u16, ctx: Arc<RpcContext>) -> std::io::Result<u16> {
    let mut last_err = None;
    for port in port_low..=port_high {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                let bound_port = listener.local_addr()?.port();
                let in_flight = Arc::new(AtomicUsize::new(0));
                tokio::spawn(accept_loop(listener, ctx, in_flight));
                return Ok(bound_port);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free sync port")))
}

async fn accept_loop(listener: TcpListener, ctx: Arc<RpcContext>, in_flight: Arc<AtomicUsize>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "sync listener accept failed");
                continue;
            }
        };
        let ctx = ctx.clone();
        let in_flight = in_flight.clone();
        let limiter = default_peer_limiter();
        tokio::spawn(async move {
            if in_flight.fetch_add(1, Ordering::SeqCst) >= GLOBAL_QUEUE_DEPTH {
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let (_r, mut w) = stream.into_split();
                let response = JsonRpcResponse::err(None, JsonRpcError::new(QUEUE_FULL, "global queue depth exceeded"));
                let _ = write_response(&mut w, &response).await;
                return;
            }
            let (r, w) = stream.into_split();
            if let Err(e) = serve_connection(r, w, Transport::Sync, ctx, Some(limiter)).await {
                debug!(error = %e, "sync connection ended");
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn serve_connection<R, W>(
    reader: R,
    mut writer: W,
    transport: Transport,
    ctx: Arc<RpcContext>,
    limiter: Option<Arc<Limiter>>,
) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(limiter) = &limiter {
            if limiter.check().is_err() {
                let response = JsonRpcResponse::err(None, JsonRpcError::new(RATE_LIMITED, "rate limit exceeded"));
                write_response(&mut writer, &response).await?;
                continue;
            }
        }

        let responses = handle_line(&line, transport, &ctx).await;
        for response in responses {
            write_response(&mut writer, &response).await?;
        }
    }
    Ok(())
}

async fn handle_line(line: &str, transport: Transport, ctx: &RpcContext) -> Vec<JsonRpcResponse> {
    let parsed: Result<Value, _> = serde_json::from_str(line);
    let value = match parsed {
        Ok(v) => v,
        Err(e) => return vec![JsonRpcResponse::err(None, JsonRpcError::new(PARSE_ERROR, e.to_string()))],
    };

    let requests: Vec<Value> = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut responses = Vec::with_capacity(requests.len());
    for item in requests {
        let request: JsonRpcRequest = match serde_json::from_value(item) {
            Ok(r) => r,
            Err(e) => {
                responses.push(JsonRpcResponse::err(None, JsonRpcError::new(INVALID_REQUEST, e.to_string())));
                continue;
            }
        };

        if !transport.allows(&request.method) {
            responses.push(JsonRpcResponse::err(request.id.clone(), JsonRpcError::method_not_found(&request.method)));
            continue;
        }

        let result = tokio::time::timeout(ctx.call_deadline, dispatch(ctx, &request.method, request.params)).await;
        let response = match result {
            Ok(Ok(value)) => JsonRpcResponse::ok(request.id, value),
            Ok(Err(error)) => JsonRpcResponse::err(request.id, error),
            Err(_elapsed) => JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(DEADLINE_EXCEEDED, format!("{} exceeded the {:?} call deadline", request.method, ctx.call_deadline)),
            ),
        };
        responses.push(response);
    }
    responses
}

async fn write_response<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> std::io::Result<()> {
    let line = serde_json::to_string(response).unwrap_or_else(|_| {
        "{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32000,\"message\":\"serialization failure\"},\"id\":null}".to_string()
    });
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SyncBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use thrum_dispatcher::Dispatcher;
    use thrum_eventlog::{EventLog, ReadAfter};
    use thrum_projection::Projection;
    use thrum_security::key::DaemonKey;
    use thrum_writer::{NoopHook, Writer, WriterLimits};

    #[test]
    fn queue_depth_constant_matches_default() {
        assert_eq!(GLOBAL_QUEUE_DEPTH, 1000);
    }

    struct StubSyncBackend;

    #[async_trait]
    impl SyncBackend for StubSyncBackend {
        async fn pull(&self, _peer_token: &str, _after_sequence: u64, _max_batch: usize) -> Result<ReadAfter, JsonRpcError> {
            Ok(ReadAfter {
                events: vec![],
                next_sequence: 0,
                more_available: false,
            })
        }
        async fn peer_info(&self) -> Value {
            json!({})
        }
        async fn notify(&self, _peer_token: &str, _daemon_id: &str, _latest_seq: u64, _event_count: u64) -> Result<(), JsonRpcError> {
            Ok(())
        }
        async fn pair_request(&self, _code: &str, _daemon_id: &str, _name: &str, _address: &str) -> Result<Value, JsonRpcError> {
            Ok(json!({}))
        }
        async fn pair_add(&self) -> Result<Value, JsonRpcError> {
            Ok(json!({}))
        }
        async fn pair_join(&self, _address: &str, _code: &str) -> Result<Value, JsonRpcError> {
            Ok(json!({}))
        }
        async fn peer_list(&self) -> Value {
            json!([])
        }
        async fn peer_remove(&self, _daemon_id: &str) -> Result<(), JsonRpcError> {
            Ok(())
        }
        async fn peer_status(&self, _daemon_id: &str) -> Result<Value, JsonRpcError> {
            Ok(json!({}))
        }
        async fn force_sync(&self) -> Result<Value, JsonRpcError> {
            Ok(json!({}))
        }
    }

    async fn test_context(dir: &std::path::Path, call_deadline: Duration) -> RpcContext {
        let log = Arc::new(EventLog::open(&dir.join("log")).unwrap());
        let projection = Arc::new(Projection::open(&dir.join("proj.sqlite3")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new());
        let key = Arc::new(DaemonKey::generate());
        let (writer, handle) = Writer::new(log, projection.clone(), dispatcher.clone(), key, "d_test".to_string(), WriterLimits::default(), Arc::new(NoopHook));
        tokio::spawn(writer.run());
        RpcContext::new(
            "d_test".to_string(),
            handle,
            projection,
            dispatcher,
            Arc::new(StubSyncBackend),
            dir.join("context"),
            call_deadline,
        )
    }

    #[tokio::test]
    async fn a_call_that_outlives_its_deadline_fails_only_that_call() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), Duration::from_millis(20)).await;

        // Register a waiter nobody ever signals, so `wait` blocks on its own
        // internal timeout (5s) far longer than the context's 20ms deadline.
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        ctx.waiters.lock().await.insert("s1".to_string(), rx);

        let line = r#"{"jsonrpc":"2.0","method":"wait","params":{"session_id":"s1","timeout_ms":5000},"id":1}"#;
        let responses = handle_line(line, Transport::Local, &ctx).await;
        assert_eq!(responses.len(), 1);
        let error = responses[0].error.as_ref().expect("expected a deadline error");
        assert_eq!(error.code, DEADLINE_EXCEEDED);

        // The connection (and the context) is still usable for the next call.
        let ping = handle_line(r#"{"jsonrpc":"2.0","method":"ping","id":2}"#, Transport::Local, &ctx).await;
        assert_eq!(ping[0].result.as_ref().unwrap(), &json!("pong"));
    }
}
