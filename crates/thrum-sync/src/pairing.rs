// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use thrum_security::token::RawToken;

use crate::error::SyncError;

struct PendingPairing {
    code: String,
    raw_token: String,
    expires_at: Instant,
    attempts_remaining: u32,
}

/// One *pair add* session at a time: a 4-digit code and a 32-byte capability
/// token, live for a bounded window and a bounded number of wrong-code
/// attempts. This is the human-mediated first-contact step; bare mesh
/// connectivity from a peer is not itself proof of trust.
pub struct PairingManager {
    pending: Mutex<Option<PendingPairing>>,
    timeout: Duration,
    max_attempts: u32,
}

/// What to show the operator after starting a pairing session.
pub struct PairingStarted {
    pub code: String,
    pub token: String,
    pub expires_in_secs: u64,
}

impl PairingManager {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        PairingManager {
            pending: Mutex::new(None),
            timeout,
            max_attempts,
        }
    }

    /// Start (or restart) a pairing session. A fresh code and token replace
    /// any session already in progress.
    pub fn begin(&self) -> PairingStarted {
        let code = format!("{:04}", rand::thread_rng().gen_range(0..10_000));
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        *self.pending.lock().unwrap() = Some(PendingPairing {
            code: code.clone(),
            raw_token: raw_str.clone(),
            expires_at: Instant::now() + self.timeout,
            attempts_remaining: self.max_attempts,
        });
        PairingStarted {
            code,
            token: raw_str,
            expires_in_secs: self.timeout.as_secs(),
        }
    }

    /// Validate a `pair.request(code, ...)` attempt. On success, the pending
    /// session is consumed and the capability token is returned for the
    /// caller to hand to the new peer. On a wrong code, the attempt is
    /// debited and the session is dropped once attempts are exhausted or the
    /// window has passed.
    pub fn attempt(&self, code: &str) -> Result<String, SyncError> {
        let mut guard = self.pending.lock().unwrap();
        let Some(pending) = guard.as_mut() else {
            return Err(SyncError::NoPairingInProgress);
        };

        if Instant::now() > pending.expires_at {
            *guard = None;
            return Err(SyncError::NoPairingInProgress);
        }

        if pending.code == code {
            let token = pending.raw_token.clone();
            *guard = None;
            return Ok(token);
        }

        pending.attempts_remaining -= 1;
        let attempts_remaining = pending.attempts_remaining;
        if attempts_remaining == 0 {
            *guard = None;
        }
        Err(SyncError::PairingRejected { attempts_remaining })
    }
}
