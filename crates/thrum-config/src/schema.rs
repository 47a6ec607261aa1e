// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Static identity defaults; the runtime resolution chain may still
/// override these with environment variables and CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub name: Option<String>,
    pub role: Option<String>,
    pub module: Option<String>,
    pub display: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Reject unsigned incoming events once true.
    #[serde(default)]
    pub require_signatures: bool,
    /// Maximum serialized event size, in bytes, accepted at the schema stage.
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,
    /// Maximum message body size, in bytes, accepted at the business-logic stage.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Per-peer token-bucket rate: requests per second.
    #[serde(default = "default_max_rps")]
    pub max_rps: u32,
    /// Per-peer token-bucket burst size.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Global in-flight request queue depth before 503s are returned.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Allow-list of peer hostnames/tags accepted at the mesh-identity layer.
    /// Empty means "allow any mesh-asserted identity."
    #[serde(default)]
    pub allowed_peers: Vec<String>,
    /// Mesh tags required for auto-discovery eligibility.
    #[serde(default)]
    pub required_tags: Vec<String>,
    /// Restrict mesh-asserted login domain, if the mesh collaborator supports one.
    pub allowed_domain: Option<String>,
    /// Require mesh-layer authentication before any sync RPC is served.
    #[serde(default = "default_true")]
    pub require_auth: bool,
    /// Number of quarantined events from a single peer within a rolling hour
    /// that triggers exactly one warning log.
    #[serde(default = "default_quarantine_warn_threshold")]
    pub quarantine_warn_threshold: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            require_signatures: false,
            max_event_size: default_max_event_size(),
            max_message_size: default_max_message_size(),
            max_rps: default_max_rps(),
            burst_size: default_burst_size(),
            max_queue_depth: default_max_queue_depth(),
            allowed_peers: Vec::new(),
            required_tags: Vec::new(),
            allowed_domain: None,
            require_auth: true,
            quarantine_warn_threshold: default_quarantine_warn_threshold(),
        }
    }
}

fn default_max_event_size() -> usize {
    1024 * 1024
}
fn default_max_message_size() -> usize {
    100 * 1024
}
fn default_max_rps() -> u32 {
    10
}
fn default_burst_size() -> u32 {
    20
}
fn default_max_queue_depth() -> usize {
    1000
}
fn default_quarantine_warn_threshold() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum events returned by a single `sync.pull` batch.
    #[serde(default = "default_pull_batch_size")]
    pub pull_batch_size: usize,
    /// Periodic scheduler wake interval, in seconds.
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,
    /// A peer whose checkpoint is older than this many seconds is eligible
    /// for a periodic safety-net pull.
    #[serde(default = "default_recency_threshold_secs")]
    pub recency_threshold_secs: u64,
    /// Pairing session timeout, in seconds.
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,
    /// Maximum wrong-code attempts during pairing before the session closes.
    #[serde(default = "default_pairing_max_attempts")]
    pub pairing_max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            pull_batch_size: default_pull_batch_size(),
            periodic_interval_secs: default_periodic_interval_secs(),
            recency_threshold_secs: default_recency_threshold_secs(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            pairing_max_attempts: default_pairing_max_attempts(),
        }
    }
}

fn default_pull_batch_size() -> usize {
    1000
}
fn default_periodic_interval_secs() -> u64 {
    300
}
fn default_recency_threshold_secs() -> u64 {
    120
}
fn default_pairing_timeout_secs() -> u64 {
    300
}
fn default_pairing_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-request handler deadline, in seconds.
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    /// Low end of the port range the sync TCP listener may bind.
    #[serde(default = "default_sync_port_low")]
    pub sync_port_low: u16,
    /// High end of the port range the sync TCP listener may bind.
    #[serde(default = "default_sync_port_high")]
    pub sync_port_high: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            request_deadline_secs: default_request_deadline_secs(),
            sync_port_low: default_sync_port_low(),
            sync_port_high: default_sync_port_high(),
        }
    }
}

fn default_request_deadline_secs() -> u64 {
    10
}
fn default_sync_port_low() -> u16 {
    42100
}
fn default_sync_port_high() -> u16 {
    42199
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Grace period for in-flight handlers to finish during drain, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// A session with no heartbeat for this many seconds is swept on restart
    /// and by the periodic heartbeat sweeper.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            shutdown_grace_secs: default_shutdown_grace_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_heartbeat_timeout_secs() -> u64 {
    120
}
