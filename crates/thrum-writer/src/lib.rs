// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The sole mutating path through the daemon.
//!
//! A handler builds an [`Intent`], sends it to the [`Writer`] over a
//! [`WriterHandle`], and the writer validates it, builds and signs an
//! event, commits it to the log, updates the projection, fans it out
//! through the dispatcher, and finally notifies the sync engine; in that
//! exact order, sequentially, since the writer is the single privileged
//! mutator.
mod error;
mod intent;
mod writer;

pub use error::WriterError;
pub use intent::Intent;
pub use writer::{CommitHook, CommitResult, NoopHook, Writer, WriterHandle, WriterLimits};
