// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;
use thrum_eventlog::Event;
use thrum_projection::SubscriptionRow;

/// Whether `subscription` matches `event`, per the dispatcher's contract:
/// a `match_all` subscription matches every event; otherwise a `scope` or
/// `mention` filter must be present in the event's payload.
pub fn matches(subscription: &SubscriptionRow, event: &Event) -> bool {
    if subscription.match_all {
        return true;
    }

    if let Some(scope) = &subscription.scope {
        if payload_array_contains(&event.payload, "scopes", scope) {
            return true;
        }
    }

    if let Some(mention) = &subscription.mention {
        if payload_array_contains(&event.payload, "mentions", mention) {
            return true;
        }
    }

    false
}

fn payload_array_contains(payload: &Value, field: &str, needle: &Value) -> bool {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|arr| arr.contains(needle))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use thrum_eventlog::EventType;

    fn message_event(scopes: Value, mentions: Value) -> Event {
        Event {
            event_id: "evt_1".into(),
            event_type: EventType::MessageCreate,
            timestamp: Utc::now(),
            origin_daemon: "d_1".into(),
            sequence: 1,
            signature: None,
            payload: json!({"scopes": scopes, "mentions": mentions}),
        }
    }

    #[test]
    fn match_all_matches_any_event() {
        let sub = SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_1".into(),
            scope: None,
            mention: None,
            match_all: true,
        };
        let event = message_event(json!([]), json!([]));
        assert!(matches(&sub, &event));
    }

    #[test]
    fn scope_filter_matches_only_identical_scope() {
        let sub = SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_1".into(),
            scope: Some(json!({"kind": "to", "value": "furiosa"})),
            mention: None,
            match_all: false,
        };
        let matching = message_event(json!([{"kind": "to", "value": "furiosa"}]), json!([]));
        let not_matching = message_event(json!([{"kind": "to", "value": "nux"}]), json!([]));
        assert!(matches(&sub, &matching));
        assert!(!matches(&sub, &not_matching));
    }

    #[test]
    fn mention_filter_matches_mention_list() {
        let sub = SubscriptionRow {
            subscription_id: "sub_1".into(),
            session_id: "ses_1".into(),
            scope: None,
            mention: Some(json!("furiosa")),
            match_all: false,
        };
        let matching = message_event(json!([]), json!(["furiosa"]));
        let not_matching = message_event(json!([]), json!(["nux"]));
        assert!(matches(&sub, &matching));
        assert!(!matches(&sub, &not_matching));
    }
}
