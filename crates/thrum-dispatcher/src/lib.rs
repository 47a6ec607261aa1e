// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subscription matching and notification fanout.
//!
//! The dispatcher is invoked once per committed event, after the writer has
//! updated the log and the projection. It never decides whether an event
//! happened; it only decides who should be told.
mod dispatcher;
mod matching;
mod registry;

pub use dispatcher::Dispatcher;
pub use matching::matches;
pub use registry::{ClientRegistry, SendOutcome, DEFAULT_QUEUE_DEPTH};
