// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{json, Value};
use thrum_eventlog::Event;
use thrum_projection::SubscriptionRow;
use tracing::debug;

use crate::matching::matches;
use crate::registry::{ClientRegistry, SendOutcome};

/// Fans a newly committed event out to every session whose subscriptions
/// match it. Does not know which transport a session uses: it tries the
/// local-socket registry first, then the sync-mesh registry, and treats a
/// miss on both as unremarkable (the event is already durable; the client
/// will see it on reconnect, per the notifier contract).
pub struct Dispatcher {
    local: ClientRegistry,
    sync_mesh: ClientRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            local: ClientRegistry::new(),
            sync_mesh: ClientRegistry::new(),
        }
    }

    pub fn local_registry(&self) -> &ClientRegistry {
        &self.local
    }

    pub fn sync_registry(&self) -> &ClientRegistry {
        &self.sync_mesh
    }

    /// Scan `subscriptions` for matches against `event` and notify each
    /// matching session. Returns the number of sessions actually reached,
    /// for metrics/tests; a session with no live client is not an error.
    pub async fn dispatch(&self, event: &Event, subscriptions: &[SubscriptionRow]) -> usize {
        let mut delivered = 0;
        for subscription in subscriptions.iter().filter(|s| matches(s, event)) {
            let payload = notification_payload(event);
            let outcome = match self.local.send(&subscription.session_id, payload.clone()).await {
                SendOutcome::NotRegistered => self.sync_mesh.send(&subscription.session_id, payload).await,
                other => other,
            };
            match outcome {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::NotRegistered => {
                    debug!(session_id = %subscription.session_id, "no live client for subscription, will catch up on reconnect");
                }
                SendOutcome::Disconnected => {
                    debug!(session_id = %subscription.session_id, "client disconnected on backpressure");
                }
            }
        }
        delivered
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn notification_payload(event: &Event) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "thrum.event",
        "params": {
            "event_id": event.event_id,
            "type": event.event_type.as_str(),
            "timestamp": event.timestamp.to_rfc3339(),
            "origin_daemon": event.origin_daemon,
            "sequence": event.sequence,
            "payload": event.payload,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use thrum_eventlog::EventType;

    fn event() -> Event {
        Event {
            event_id: "evt_1".into(),
            event_type: EventType::MessageCreate,
            timestamp: Utc::now(),
            origin_daemon: "d_1".into(),
            sequence: 1,
            signature: None,
            payload: json!({"scopes": [{"kind": "to", "value": "furiosa"}], "mentions": []}),
        }
    }

    #[tokio::test]
    async fn delivers_to_registered_matching_subscriber() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.local_registry().register("ses_1", 8);
        let subs = vec![SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_1".into(),
            scope: None,
            mention: None,
            match_all: true,
        }];
        let delivered = dispatcher.dispatch(&event(), &subs).await;
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn missing_client_is_not_an_error() {
        let dispatcher = Dispatcher::new();
        let subs = vec![SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_ghost".into(),
            scope: None,
            mention: None,
            match_all: true,
        }];
        let delivered = dispatcher.dispatch(&event(), &subs).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn falls_back_to_sync_mesh_registry() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.sync_registry().register("ses_1", 8);
        let subs = vec![SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_1".into(),
            scope: None,
            mention: None,
            match_all: true,
        }];
        let delivered = dispatcher.dispatch(&event(), &subs).await;
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn non_matching_subscription_is_skipped() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.local_registry().register("ses_1", 8);
        let subs = vec![SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_1".into(),
            scope: Some(json!({"kind": "to", "value": "nux"})),
            mention: None,
            match_all: false,
        }];
        let delivered = dispatcher.dispatch(&event(), &subs).await;
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }
}
