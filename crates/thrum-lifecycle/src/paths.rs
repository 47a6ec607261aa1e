// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

/// Layout of a repository's `.thrum/` control directory.
///
/// Every other crate that touches the filesystem is handed an already
/// resolved path by the caller; this is the one place that knows the
/// directory shape.
#[derive(Debug, Clone)]
pub struct ControlDir {
    root: PathBuf,
}

impl ControlDir {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        ControlDir {
            root: repo_root.into().join(".thrum"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identities_dir(&self) -> PathBuf {
        self.root.join("identities")
    }

    pub fn context_dir(&self) -> PathBuf {
        self.root.join("context")
    }

    pub fn var_dir(&self) -> PathBuf {
        self.root.join("var")
    }

    pub fn sock_path(&self) -> PathBuf {
        self.var_dir().join("thrum.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.var_dir().join("thrum.pid")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.var_dir().join("thrum.lock")
    }

    pub fn port_path(&self) -> PathBuf {
        self.var_dir().join("ws.port")
    }

    pub fn peers_path(&self) -> PathBuf {
        self.var_dir().join("peers.json")
    }

    pub fn key_path(&self) -> PathBuf {
        self.var_dir().join("identity.key")
    }

    pub fn daemon_id_path(&self) -> PathBuf {
        self.var_dir().join("daemon_id")
    }

    pub fn projection_path(&self) -> PathBuf {
        self.var_dir().join("projection.sqlite3")
    }

    pub fn event_log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    /// Create every directory this layout names. Called once at startup,
    /// before the lock is acquired (the lock file itself must already have
    /// somewhere to live).
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.identities_dir())?;
        std::fs::create_dir_all(self.context_dir())?;
        std::fs::create_dir_all(self.var_dir())?;
        std::fs::create_dir_all(self.event_log_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dirs_creates_full_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cd = ControlDir::new(dir.path());
        cd.ensure_dirs().unwrap();
        assert!(cd.identities_dir().is_dir());
        assert!(cd.context_dir().is_dir());
        assert!(cd.var_dir().is_dir());
        assert!(cd.event_log_dir().is_dir());
    }

    #[test]
    fn paths_are_scoped_under_dot_thrum() {
        let cd = ControlDir::new("/repo");
        assert_eq!(cd.sock_path(), Path::new("/repo/.thrum/var/thrum.sock"));
        assert_eq!(cd.lock_path(), Path::new("/repo/.thrum/var/thrum.lock"));
        assert_eq!(cd.key_path(), Path::new("/repo/.thrum/var/identity.key"));
    }
}
