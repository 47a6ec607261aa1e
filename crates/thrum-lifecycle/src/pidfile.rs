// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::LifecycleError;

/// Residual confirmation of "a daemon for this repository was running as of
/// `started_at`". Never the source of truth for the single-writer
/// invariant; the advisory lock in [`crate::lock`] is. Useful for an
/// operator running `thrum status` against a repository they didn't start
/// the daemon in themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidFile {
    pub pid: u32,
    pub repo_path: String,
    pub started_at: String,
    pub socket_path: String,
}

impl PidFile {
    pub fn current(repo_path: &Path, socket_path: &Path, started_at: chrono::DateTime<chrono::Utc>) -> Self {
        PidFile {
            pid: std::process::id(),
            repo_path: repo_path.display().to_string(),
            started_at: started_at.to_rfc3339(),
            socket_path: socket_path.display().to_string(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), LifecycleError> {
        let body = serde_json::to_vec_pretty(self).expect("PidFile always serializes");
        write_atomic(path, &body).map_err(|source| LifecycleError::Io {
            what: format!("writing pid file {}", path.display()),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, LifecycleError> {
        let text = std::fs::read_to_string(path).map_err(|source| LifecycleError::Io {
            what: format!("reading pid file {}", path.display()),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| LifecycleError::Io {
            what: format!("parsing pid file {}", path.display()),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }

    pub fn remove(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    /// Whether `self.pid` still names a live process. Best-effort: on a
    /// permission error we assume it's alive rather than risk treating a
    /// live daemon as dead.
    #[cfg(unix)]
    pub fn process_is_alive(&self) -> bool {
        // SAFETY: signal 0 sends no signal, only checks existence/permission.
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, 0) };
        rc == 0 || std::io::Error::last_os_error().kind() == std::io::ErrorKind::PermissionDenied
    }
}
