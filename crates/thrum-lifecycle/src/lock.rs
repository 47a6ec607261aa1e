// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::FileExt;

use crate::error::LifecycleError;

/// Advisory exclusive lock scoped to one repository's control directory.
///
/// Held for the lifetime of the daemon process; the OS releases it the
/// moment the file descriptor closes, including on a crash, which is what
/// makes "exactly one writer per repository" enforceable without a
/// heartbeat or a PID check. The residual PID file (see [`crate::pidfile`])
/// is a convenience for operators, never consulted to decide whether the
/// lock is actually held.
pub struct RepoLock {
    file: File,
}

impl RepoLock {
    /// Try to acquire the lock at `path`, creating the file if needed.
    /// Fails immediately with [`LifecycleError::AlreadyRunning`] if another
    /// process holds it; this daemon never waits or attempts to evict the
    /// incumbent.
    pub fn acquire(path: &Path) -> Result<Self, LifecycleError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|source| LifecycleError::Io {
                what: format!("opening lock file {}", path.display()),
                source,
            })?;

        file.try_lock_exclusive().map_err(|_| LifecycleError::AlreadyRunning {
            path: path.display().to_string(),
        })?;

        Ok(RepoLock { file })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = fs4::FileExt::unlock(&self.file);
    }
}
