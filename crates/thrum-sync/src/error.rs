// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown peer token")]
    UnknownToken,
    #[error("peer {daemon_id} key mismatch: pinned key does not match the presented key")]
    KeyMismatch { daemon_id: String },
    #[error("no peer record for daemon {0}")]
    UnknownPeer(String),
    #[error("pairing code invalid or expired")]
    PairingRejected { attempts_remaining: u32 },
    #[error("no pairing session in progress")]
    NoPairingInProgress,
    #[error("connecting to peer at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("peer returned a transport-level error: {0}")]
    Transport(String),
    #[error("peer replied with a JSON-RPC error: {0}")]
    Remote(String),
    #[error("reading or writing the peer registry at {path}: {source}")]
    Registry {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Projection(#[from] thrum_projection::ProjectionError),
    #[error(transparent)]
    Writer(#[from] thrum_writer::WriterError),
}
