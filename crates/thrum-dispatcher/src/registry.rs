// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// How long a notification send is allowed to block before the client is
/// treated as unresponsive and disconnected.
const SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Default bound on a client's outgoing notification queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Whether a registry accepted and queued a notification for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    NotRegistered,
    Disconnected,
}

/// A bounded per-session outgoing queue, keyed by session ID. One registry
/// exists for the local-socket client pool and a second for the sync-mesh
/// client pool; the dispatcher tries one, then the other.
pub struct ClientRegistry {
    senders: Mutex<HashMap<String, mpsc::Sender<Value>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Register `session_id`, returning the receiving half the connection
    /// handler should drain. A prior registration for the same session is
    /// replaced (the old receiver is simply dropped).
    pub fn register(&self, session_id: &str, queue_depth: usize) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        self.senders.lock().unwrap().insert(session_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.senders.lock().unwrap().remove(session_id);
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.senders.lock().unwrap().contains_key(session_id)
    }

    /// Attempt delivery, disconnecting the client if it doesn't drain
    /// within [`SEND_TIMEOUT`].
    pub async fn send(&self, session_id: &str, payload: Value) -> SendOutcome {
        let sender = { self.senders.lock().unwrap().get(session_id).cloned() };
        let Some(sender) = sender else {
            return SendOutcome::NotRegistered;
        };

        match tokio::time::timeout(SEND_TIMEOUT, sender.send(payload)).await {
            Ok(Ok(())) => SendOutcome::Delivered,
            Ok(Err(_)) => {
                self.unregister(session_id);
                SendOutcome::Disconnected
            }
            Err(_) => {
                debug!(session_id, "client queue did not drain in time, disconnecting");
                self.unregister(session_id);
                SendOutcome::Disconnected
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unregistered_session_is_not_an_error() {
        let registry = ClientRegistry::new();
        let outcome = registry.send("ses_ghost", json!({})).await;
        assert_eq!(outcome, SendOutcome::NotRegistered);
    }

    #[tokio::test]
    async fn registered_session_receives_payload() {
        let registry = ClientRegistry::new();
        let mut rx = registry.register("ses_1", 8);
        let outcome = registry.send("ses_1", json!({"hello": "world"})).await;
        assert_eq!(outcome, SendOutcome::Delivered);
        let received = rx.recv().await.unwrap();
        assert_eq!(received, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn full_queue_disconnects_the_client() {
        let registry = ClientRegistry::new();
        let _rx = registry.register("ses_1", 1);
        // Fill the single slot; nobody is draining it.
        assert_eq!(registry.send("ses_1", json!(1)).await, SendOutcome::Delivered);
        let outcome = registry.send("ses_1", json!(2)).await;
        assert_eq!(outcome, SendOutcome::Disconnected);
        assert!(!registry.is_registered("ses_1"));
    }
}
