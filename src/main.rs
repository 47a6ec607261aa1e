// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;
mod hooks;
mod ipc;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, PeerCommands};
use thrum_dispatcher::Dispatcher;
use thrum_lifecycle::{announce_ready, cleanup, drain, start, HeartbeatSweeper, IdentityFileSync};
use thrum_rpc::{serve_local, serve_sync, RpcContext, SyncBackend};
use thrum_sync::{ApplierLimits, DiscoveryLoop, NoopDiscovery, PeerRegistry, PeriodicSync, SyncEngine, ValidationLimits};
use thrum_writer::{CommitHook, Writer, WriterLimits};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let repo_root = match &cli.repo {
        Some(p) => p.clone(),
        None => std::env::current_dir().context("resolving current directory")?,
    };

    match &cli.command {
        Commands::Start => run_start(repo_root, cli.config.clone()).await,
        Commands::Stop => run_stop(&repo_root).await,
        Commands::Status => run_status(&repo_root).await,
        Commands::Peer { command } => run_peer(&repo_root, command).await,
        Commands::Sync => {
            let result = ipc_call(&repo_root, "tsync.force", Value::Null).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::ShowConfig => {
            let config = thrum_config::load(&repo_root, cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn sock_path(repo_root: &Path) -> PathBuf {
    thrum_lifecycle::ControlDir::new(repo_root).sock_path()
}

async fn ipc_call(repo_root: &Path, method: &str, params: Value) -> anyhow::Result<Value> {
    let sock = sock_path(repo_root);
    ipc::call(&sock, method, params)
        .await
        .with_context(|| format!("is a thrum daemon running for {}? (socket {})", repo_root.display(), sock.display()))
}

/// Assemble every subsystem and run until interrupted.
///
/// Order: acquire lock → open projection → open event log →
/// ensure signing key → ensure daemon id → build the writer (with a
/// deferred commit hook, since the sync engine's hook needs a
/// `WriterHandle` that doesn't exist yet) → build the sync engine and bind
/// the real hook → bind the sync listener → bind the local socket →
/// register handlers → start the periodic sync sweep, heartbeat sweeper,
/// and peer discovery loop → announce ready.
async fn run_start(repo_root: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = thrum_config::load(&repo_root, config_path.as_deref())?;
    let handles = start(&repo_root)?;

    if handles.key_was_generated {
        info!("=======================================================");
        info!("new daemon signing key generated");
        info!("fingerprint: {}", handles.key.fingerprint());
        info!("=======================================================");
    }

    let dispatcher = Arc::new(Dispatcher::new());
    let registry = Arc::new(PeerRegistry::load(handles.control_dir.peers_path())?);

    let writer_limits = WriterLimits {
        max_event_size: config.security.max_event_size,
        max_message_size: config.security.max_message_size,
    };

    let deferred_hook = Arc::new(hooks::DeferredHook::new());
    let (writer, writer_handle) = Writer::new(
        handles.event_log.clone(),
        handles.projection.clone(),
        dispatcher.clone(),
        handles.key.clone(),
        handles.daemon_id.clone(),
        writer_limits,
        deferred_hook.clone() as Arc<dyn CommitHook>,
    );
    tokio::spawn(writer.run());

    let sync_engine = Arc::new(SyncEngine::new(
        handles.daemon_id.clone(),
        config.identity.display.clone().unwrap_or_else(|| handles.daemon_id.clone()),
        format!("127.0.0.1:{}", config.rpc.sync_port_low),
        handles.key.clone(),
        registry.clone(),
        Duration::from_secs(config.sync.pairing_timeout_secs),
        config.sync.pairing_max_attempts,
        handles.event_log.clone(),
        handles.projection.clone(),
        writer_handle.clone(),
        ApplierLimits {
            validation: ValidationLimits {
                max_event_size: config.security.max_event_size,
                max_message_size: config.security.max_message_size,
                require_signatures: config.security.require_signatures,
            },
            quarantine_warn_threshold: 10,
        },
        config.sync.pull_batch_size,
    ));

    deferred_hook.bind(Arc::new(hooks::CombinedHook::new(vec![
        Arc::new(IdentityFileSync::new(handles.control_dir.identities_dir())),
        sync_engine.clone() as Arc<dyn CommitHook>,
    ])));

    let rpc_ctx = Arc::new(RpcContext::new(
        handles.daemon_id.clone(),
        writer_handle.clone(),
        handles.projection.clone(),
        dispatcher.clone(),
        sync_engine.clone() as Arc<dyn SyncBackend>,
        handles.control_dir.context_dir(),
        Duration::from_secs(config.rpc.request_deadline_secs),
    ));

    let sync_port = serve_sync(config.rpc.sync_port_low, config.rpc.sync_port_high, rpc_ctx.clone()).await?;
    sync_engine.set_our_address(format!("127.0.0.1:{sync_port}"));
    info!(port = sync_port, "sync listener bound");

    let local_sock = handles.control_dir.sock_path();
    let local_ctx = rpc_ctx.clone();
    let local_sock_path = local_sock.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_local(&local_sock_path, local_ctx).await {
            warn!(error = %e, "local control socket listener exited");
        }
    });
    info!(path = %local_sock.display(), "local control socket bound");

    let periodic = PeriodicSync::new(
        sync_engine.clone(),
        registry.clone(),
        handles.projection.clone(),
        Duration::from_secs(config.sync.periodic_interval_secs),
        Duration::from_secs(config.sync.recency_threshold_secs),
    );
    tokio::spawn(periodic.run(handles.shutdown_tx.subscribe()));

    let sweeper = HeartbeatSweeper::new(
        handles.projection.clone(),
        writer_handle.clone(),
        Duration::from_secs(config.lifecycle.heartbeat_timeout_secs),
        Duration::from_secs(30),
    );
    tokio::spawn(sweeper.run(handles.shutdown_tx.subscribe()));

    // No mesh control plane is wired into this build, so discovery never
    // yields a peer; the loop still runs so its shutdown behavior matches
    // the other background loops.
    let discovery = DiscoveryLoop::new(NoopDiscovery, registry.clone());
    tokio::spawn(discovery.run(handles.shutdown_tx.subscribe()));

    announce_ready(&handles.control_dir, sync_port)?;
    info!(daemon_id = %handles.daemon_id, "thrumd ready");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining");
    drain(&handles, Duration::from_secs(config.lifecycle.shutdown_grace_secs)).await;
    cleanup(handles);
    Ok(())
}

async fn run_stop(repo_root: &Path) -> anyhow::Result<()> {
    let pid_path = thrum_lifecycle::ControlDir::new(repo_root).pid_path();
    let pidfile = thrum_lifecycle::PidFile::read(&pid_path).context("no running daemon found for this repository")?;
    if !pidfile.process_is_alive() {
        println!("daemon pid {} is not running (stale pid file)", pidfile.pid);
        return Ok(());
    }
    #[cfg(unix)]
    {
        // SAFETY: sends SIGTERM to a pid we just confirmed is alive.
        let rc = unsafe { libc::kill(pidfile.pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            anyhow::bail!("failed to signal pid {}: {}", pidfile.pid, std::io::Error::last_os_error());
        }
    }
    println!("sent shutdown signal to pid {}", pidfile.pid);
    Ok(())
}

async fn run_status(repo_root: &Path) -> anyhow::Result<()> {
    let sock = sock_path(repo_root);
    if !ipc::is_running(&sock).await {
        println!("no daemon running for {}", repo_root.display());
        return Ok(());
    }
    let info = ipc_call(repo_root, "sync.peer_info", Value::Null).await?;
    println!("daemon running, socket {}", sock.display());
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn run_peer(repo_root: &Path, command: &PeerCommands) -> anyhow::Result<()> {
    match command {
        PeerCommands::Add => {
            let result = ipc_call(repo_root, "peer.add", Value::Null).await?;
            println!("pairing code: {}", result.get("code").and_then(Value::as_str).unwrap_or("?"));
            println!("share this code and this daemon's sync address with the other side");
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        PeerCommands::Join { address, code } => {
            let result = ipc_call(repo_root, "peer.join", json!({"address": address, "code": code})).await?;
            println!("paired: {}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        PeerCommands::List => {
            let result = ipc_call(repo_root, "peer.list", Value::Null).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        PeerCommands::Remove { daemon_id } => {
            ipc_call(repo_root, "peer.remove", json!({"daemon_id": daemon_id})).await?;
            println!("removed peer {daemon_id}");
            Ok(())
        }
        PeerCommands::Status { daemon_id } => {
            let result = ipc_call(repo_root, "peer.status", json!({"daemon_id": daemon_id})).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
