// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Dual-transport JSON-RPC surface.
//!
//! The local Unix-domain socket accepts the full method set and trusts the
//! filesystem (mode 0600 inside the repository control directory). The
//! sync TCP listener accepts only a small whitelisted subset and applies
//! per-peer rate limiting and a global in-flight request cap; every other
//! method there is rejected with "method not found" as a security
//! boundary, not convenience filtering.
mod context;
mod handlers;
mod protocol;
mod server;
mod transport;

pub use context::{RpcContext, SyncBackend};
pub use protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, HANDLER_ERROR, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, QUEUE_FULL, RATE_LIMITED,
};
pub use server::{default_peer_limiter, serve_local, serve_sync};
pub use transport::Transport;
