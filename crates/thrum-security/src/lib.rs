// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Daemon signing key, event signature canonicalization, and token handling.
//!
//! # Security model
//!
//! The daemon's Ed25519 private key is generated once on first start and
//! never rotated automatically. It is persisted as a PEM-framed file with
//! mode 0600 inside a directory created mode 0700. Raw bearer/peer tokens
//! are shown to an operator exactly once, then hashed; only the SHA-256
//! digest is ever persisted, and all comparisons run in constant time via
//! [`subtle::ConstantTimeEq`].

pub mod key;
pub mod signing;
pub mod token;

pub use key::{DaemonKey, KeyError};
pub use signing::{canonical_payload, sign_event, verify_event, SigningError};
pub use token::{PeerTokenStore, RawToken, StoredToken};
