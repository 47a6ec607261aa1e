// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another thrum daemon already holds the lock at {path}")]
    AlreadyRunning { path: String },
    #[error("{what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error("signing key unreadable: {0}")]
    Key(#[from] thrum_security::KeyError),
    #[error("projection migration failed: {0}")]
    Projection(#[from] thrum_projection::ProjectionError),
    #[error("event log open failed: {0}")]
    EventLog(#[from] thrum_eventlog::EventLogError),
}
