// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("role/module already registered to {existing_agent_id}")]
    Conflict { existing_agent_id: String },

    #[error("event payload of {actual} bytes exceeds the {limit} byte limit")]
    EventTooLarge { limit: usize, actual: usize },

    #[error("message content of {actual} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { limit: usize, actual: usize },

    #[error("event log error: {0}")]
    Log(#[from] thrum_eventlog::EventLogError),

    #[error("projection error: {0}")]
    Projection(#[from] thrum_projection::ProjectionError),

    #[error("the writer has shut down")]
    ShuttingDown,
}
