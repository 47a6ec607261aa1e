// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Mesh-network peer auto-discovery.
//!
//! The mesh transport itself, and how it asserts a peer's hostname/tags,
//! is an external collaborator's concern; the core only consumes the
//! narrow contract this module names: "tell me about tagged peers as they
//! appear." No mesh crate exists in this workspace, so [`NoopDiscovery`]
//! is the only implementor; a real one would be supplied by whatever
//! wires the daemon to an actual mesh control plane.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::client;
use crate::registry::PeerRegistry;

/// One sighting reported by the mesh control plane.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub address: String,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait MeshDiscovery: Send + Sync {
    /// Block until a new tagged peer is seen. Returns `None` once
    /// discovery is permanently unavailable (no mesh configured), which
    /// ends the loop; peers still arrive the human-mediated way via
    /// `peer add`/`peer join`.
    async fn next_discovered(&mut self) -> Option<DiscoveredPeer>;
}

/// No mesh control plane wired up: discovery never yields a peer.
pub struct NoopDiscovery;

#[async_trait]
impl MeshDiscovery for NoopDiscovery {
    async fn next_discovered(&mut self) -> Option<DiscoveredPeer> {
        std::future::pending().await
    }
}

/// Watches for mesh-reported peers and resolves their stable daemon ID via
/// `sync.peer_info`. Sighting a peer is not the same as trusting it: a
/// mesh-asserted identity carries no shared token, so a discovered peer is
/// only logged here, not added to the registry; pairing's code exchange is
/// still the one path that grants a peer a token.
pub struct DiscoveryLoop<D> {
    discovery: D,
    registry: Arc<PeerRegistry>,
}

impl<D: MeshDiscovery> DiscoveryLoop<D> {
    pub fn new(discovery: D, registry: Arc<PeerRegistry>) -> Self {
        DiscoveryLoop { discovery, registry }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                discovered = self.discovery.next_discovered() => {
                    match discovered {
                        Some(peer) => self.handle(peer).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, peer: DiscoveredPeer) {
        if self.registry.list().iter().any(|p| p.address == peer.address) {
            return;
        }
        match client::peer_info(&peer.address).await {
            Ok(info_value) => {
                let daemon_id = info_value.get("daemon_id").and_then(|v| v.as_str()).unwrap_or("unknown");
                info!(address = %peer.address, daemon_id, tags = ?peer.tags, "discovered mesh peer, not yet paired");
            }
            Err(e) => {
                info!(address = %peer.address, error = %e, "discovered mesh peer but sync.peer_info failed");
            }
        }
    }
}
