// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use thrum_eventlog::Event;
use thrum_writer::CommitHook;
use tokio::sync::OnceCell;

/// Runs every hook in order against each commit. `Writer::new` wants its
/// commit hook up front, but the sync engine's hook needs a `WriterHandle`
/// that doesn't exist until after the writer is constructed; so the
/// writer is wired to a [`DeferredHook`] first, and [`DeferredHook::bind`]
/// supplies the real combined hook once everything downstream exists.
pub struct CombinedHook(Vec<Arc<dyn CommitHook>>);

impl CombinedHook {
    pub fn new(hooks: Vec<Arc<dyn CommitHook>>) -> Self {
        CombinedHook(hooks)
    }
}

#[async_trait]
impl CommitHook for CombinedHook {
    async fn on_commit(&self, event: &Event) {
        for hook in &self.0 {
            hook.on_commit(event).await;
        }
    }
}

pub struct DeferredHook(OnceCell<Arc<dyn CommitHook>>);

impl Default for DeferredHook {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredHook {
    pub fn new() -> Self {
        DeferredHook(OnceCell::new())
    }

    /// Supply the real hook. Called exactly once, before any commit can
    /// reach the writer's command channel.
    pub fn bind(&self, hook: Arc<dyn CommitHook>) {
        let _ = self.0.set(hook);
    }
}

#[async_trait]
impl CommitHook for DeferredHook {
    async fn on_commit(&self, event: &Event) {
        if let Some(hook) = self.0.get() {
            hook.on_commit(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thrum_eventlog::{Event, EventType};

    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl CommitHook for CountingHook {
        async fn on_commit(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_event() -> Event {
        Event {
            event_id: "01J0000000000000000000EVNT".to_string(),
            event_type: EventType::SessionHeartbeat,
            origin_daemon: "d1".to_string(),
            sequence: 1,
            timestamp: chrono::Utc::now(),
            payload: serde_json::json!({}),
            signature: None,
        }
    }

    #[tokio::test]
    async fn combined_hook_runs_every_member() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let combined = CombinedHook::new(vec![Arc::new(CountingHook(a.clone())), Arc::new(CountingHook(b.clone()))]);
        combined.on_commit(&sample_event()).await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deferred_hook_before_bind_is_a_noop() {
        let deferred = DeferredHook::new();
        deferred.on_commit(&sample_event()).await;
    }

    #[tokio::test]
    async fn deferred_hook_after_bind_delegates() {
        let count = Arc::new(AtomicUsize::new(0));
        let deferred = DeferredHook::new();
        deferred.bind(Arc::new(CountingHook(count.clone())));
        deferred.on_commit(&sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
