// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thrum_eventlog::EventLog;
use thrum_projection::Projection;
use thrum_security::DaemonKey;
use tokio::sync::watch;
use tracing::info;

use crate::error::LifecycleError;
use crate::lock::RepoLock;
use crate::paths::ControlDir;
use crate::pidfile::PidFile;

/// The pieces of startup order this crate owns directly:
/// lock → projection open/migrate → event log open → identity key ensure →
/// pid file publish. Binding the RPC listeners, registering handlers, and
/// starting the sync engine's background loops are owned by `thrum-rpc`
/// and `thrum-sync` respectively; the root binary sequences all of it,
/// this type just gives it the pieces in the right shape.
pub struct DaemonHandles {
    pub control_dir: ControlDir,
    pub lock: RepoLock,
    pub event_log: Arc<EventLog>,
    pub projection: Arc<Projection>,
    pub key: Arc<DaemonKey>,
    pub key_was_generated: bool,
    pub daemon_id: String,
    /// Send `true` to begin a coordinated shutdown of every background loop
    /// that was handed a receiver (sync scheduler, heartbeat sweeper, peer
    /// discovery). Every loop must observe it and return within the grace
    /// period configured for drain.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Acquire the lock, open (and migrate) the projection, open the event log,
/// and ensure the daemon's signing key exists, in that order.
/// Fails fast on the first step that can't succeed; nothing past the lock
/// is attempted if the lock itself is held by another process.
pub fn start(repo_root: impl Into<std::path::PathBuf>) -> Result<DaemonHandles, LifecycleError> {
    let control_dir = ControlDir::new(repo_root);
    control_dir.ensure_dirs().map_err(|source| LifecycleError::Io {
        what: "creating control directory layout".to_string(),
        source,
    })?;

    let lock = RepoLock::acquire(&control_dir.lock_path())?;
    info!(path = %control_dir.lock_path().display(), "acquired repository lock");

    let projection = Arc::new(Projection::open(&control_dir.projection_path())?);
    info!("projection store opened");

    let event_log = Arc::new(EventLog::open(&control_dir.event_log_dir())?);
    info!("event log opened");

    let (key, key_was_generated) = DaemonKey::ensure(&control_dir.key_path())?;
    if key_was_generated {
        info!(fingerprint = %key.fingerprint(), "generated new daemon signing key");
    } else {
        info!(fingerprint = %key.fingerprint(), "loaded daemon signing key");
    }

    let daemon_id = crate::daemon_id::ensure_daemon_id(&control_dir.daemon_id_path())?;
    info!(%daemon_id, "daemon identity resolved");

    let (shutdown_tx, _rx) = watch::channel(false);

    Ok(DaemonHandles {
        control_dir,
        lock,
        event_log,
        projection,
        key: Arc::new(key),
        key_was_generated,
        daemon_id,
        shutdown_tx,
    })
}

/// Publish the residual pid file and the chosen sync port, to be called
/// once both listeners are bound; "announce ready" at the tail of the
/// startup order.
pub fn announce_ready(control_dir: &ControlDir, sync_port: u16) -> Result<(), LifecycleError> {
    crate::portfile::write_port(&control_dir.port_path(), sync_port)?;
    let pidfile = PidFile::current(control_dir.root(), &control_dir.sock_path(), Utc::now());
    pidfile.write(&control_dir.pid_path())?;
    info!(port = sync_port, "daemon ready");
    Ok(())
}

/// Begin drain: stop accepting new connections is the caller's
/// responsibility (it owns the listeners); this broadcasts the
/// cancellation signal to every background loop and waits up to `grace`
/// for them to finish, then proceeds regardless; shutdown is bounded, not
/// blocking forever on a stuck loop.
pub async fn drain(handles: &DaemonHandles, grace: Duration) {
    let _ = handles.shutdown_tx.send(true);
    tokio::time::sleep(grace).await;
}

/// Remove the socket/port/pid files and release the lock. Idempotent: a
/// second call against files that are already gone is a no-op, matching
/// "a double shutdown is a no-op".
pub fn cleanup(handles: DaemonHandles) {
    PidFile::remove(&handles.control_dir.pid_path());
    let _ = std::fs::remove_file(handles.control_dir.port_path());
    let _ = std::fs::remove_file(handles.control_dir.sock_path());
    info!("control files removed, lock released");
    drop(handles.lock);
}
