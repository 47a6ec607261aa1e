// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Relational projection of the event log.
//!
//! [`Projection`] holds the derived, queryable state (agents, sessions,
//! messages, groups, subscriptions, sync checkpoints, quarantine) behind a
//! single sqlite connection. It is a pure function of the event log: the
//! same sequence of events, replayed through [`Projection::rebuild`],
//! always produces the same rows, regardless of how many times any event is
//! re-applied.
mod error;
mod projection;
mod schema;
mod types;

pub use error::ProjectionError;
pub use projection::Projection;
pub use types::{AgentRow, CheckpointRow, MessageRow, QuarantineRow, SessionRow, SubscriptionRow, SyncStatus};
