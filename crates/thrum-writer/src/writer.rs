// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thrum_dispatcher::Dispatcher;
use thrum_eventlog::{Event, EventLog};
use thrum_projection::Projection;
use thrum_security::key::DaemonKey;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::error::WriterError;
use crate::intent::Intent;

/// Outcome of committing an intent: the final event (with its assigned
/// sequence and signature) and whether this was a fresh commit or a
/// deduplicated replay of an event already on file.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub event: Event,
    pub applied: bool,
}

/// Notified after every successful local or remote commit. The sync engine
/// implements this to fire `sync.notify` to peers; the writer itself never
/// depends on the sync crate.
#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn on_commit(&self, event: &Event);
}

pub struct NoopHook;

#[async_trait]
impl CommitHook for NoopHook {
    async fn on_commit(&self, _event: &Event) {}
}

/// Size limits enforced on locally originated writes, mirroring
/// `SecurityConfig`'s `max_event_size`/`max_message_size` without this
/// crate depending on the config schema directly.
#[derive(Debug, Clone, Copy)]
pub struct WriterLimits {
    pub max_event_size: usize,
    pub max_message_size: usize,
}

impl Default for WriterLimits {
    fn default() -> Self {
        WriterLimits {
            max_event_size: 1_048_576,
            max_message_size: 102_400,
        }
    }
}

enum Command {
    Commit(Intent, oneshot::Sender<Result<CommitResult, WriterError>>),
}

/// Cheap-to-clone handle distributed to every RPC handler and the sync
/// applier. The only way to mutate repository state is through this.
#[derive(Clone)]
pub struct WriterHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl WriterHandle {
    pub async fn commit(&self, intent: Intent) -> Result<CommitResult, WriterError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Commit(intent, tx))
            .await
            .map_err(|_| WriterError::ShuttingDown)?;
        rx.await.map_err(|_| WriterError::ShuttingDown)?
    }
}

/// Owns the log, the projection, the dispatcher, and the signing key.
/// Runs as a single long-lived task; every mutation is processed
/// sequentially through its command channel, which is what makes it the
/// sole mutator.
pub struct Writer {
    cmd_rx: mpsc::Receiver<Command>,
    log: Arc<EventLog>,
    projection: Arc<Projection>,
    dispatcher: Arc<Dispatcher>,
    key: Arc<DaemonKey>,
    origin_daemon: String,
    limits: WriterLimits,
    commit_hook: Arc<dyn CommitHook>,
}

impl Writer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Arc<EventLog>,
        projection: Arc<Projection>,
        dispatcher: Arc<Dispatcher>,
        key: Arc<DaemonKey>,
        origin_daemon: String,
        limits: WriterLimits,
        commit_hook: Arc<dyn CommitHook>,
    ) -> (Self, WriterHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        (
            Writer {
                cmd_rx,
                log,
                projection,
                dispatcher,
                key,
                origin_daemon,
                limits,
                commit_hook,
            },
            WriterHandle { cmd_tx },
        )
    }

    /// Drive the writer until every handle has been dropped.
    pub async fn run(mut self) {
        info!("writer started");
        while let Some(Command::Commit(intent, reply)) = self.cmd_rx.recv().await {
            let result = self.commit(intent).await;
            let _ = reply.send(result);
        }
        info!("writer shut down");
    }

    async fn commit(&mut self, intent: Intent) -> Result<CommitResult, WriterError> {
        let event = match intent {
            Intent::ApplyRemote { event } => {
                if self.log.has(&event.event_id) {
                    return Ok(CommitResult { event, applied: false });
                }
                event
            }
            local => {
                self.validate(&local)?;
                self.build_event(local)?
            }
        };

        let was_duplicate = self.log.has(&event.event_id);
        let sequence = self.log.append(event.clone())?;
        let mut event = event;
        event.sequence = sequence;

        if was_duplicate {
            return Ok(CommitResult { event, applied: false });
        }

        self.projection.apply_event(&event)?;

        let subs = self.projection.all_subscriptions().unwrap_or_default();
        self.dispatcher.dispatch(&event, &subs).await;
        self.commit_hook.on_commit(&event).await;

        Ok(CommitResult { event, applied: true })
    }

    fn validate(&self, intent: &Intent) -> Result<(), WriterError> {
        if let Intent::RegisterAgent {
            agent_id,
            role,
            module,
            force,
            ..
        } = intent
        {
            if !force {
                if let Ok(Some(existing)) = self.projection.find_agent_by_role_module(role, module) {
                    if existing.agent_id != *agent_id {
                        return Err(WriterError::Conflict {
                            existing_agent_id: existing.agent_id,
                        });
                    }
                }
            }
        }

        if let Intent::CreateMessage { content, .. } = intent {
            if content.len() > self.limits.max_message_size {
                return Err(WriterError::MessageTooLarge {
                    limit: self.limits.max_message_size,
                    actual: content.len(),
                });
            }
        }

        Ok(())
    }

    fn build_event(&self, intent: Intent) -> Result<Event, WriterError> {
        let (event_type, payload) = intent
            .to_event_parts()
            .expect("local intents always produce event parts");

        let event_id = thrum_ids::new_event_id();
        let timestamp = Utc::now();

        let estimated_size = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0);
        if estimated_size > self.limits.max_event_size {
            return Err(WriterError::EventTooLarge {
                limit: self.limits.max_event_size,
                actual: estimated_size,
            });
        }

        let signature = thrum_security::signing::sign_event(
            self.key.signing_key(),
            &event_id,
            event_type.as_str(),
            &timestamp.to_rfc3339(),
            &self.origin_daemon,
        );

        Ok(Event {
            event_id,
            event_type,
            timestamp,
            origin_daemon: self.origin_daemon.clone(),
            sequence: 0,
            signature: Some(signature),
            payload,
        })
    }
}
