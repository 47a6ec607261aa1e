// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use crate::atomic::write_atomic;
use crate::error::LifecycleError;

/// Load the daemon's process-local ID from `path`, generating and
/// persisting a fresh one on first start. This is the `origin_daemon`
/// stamped on every locally authored event and the identity this daemon
/// presents to peers during sync; it is never regenerated once assigned.
pub fn ensure_daemon_id(path: &Path) -> Result<String, LifecycleError> {
    if path.is_file() {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|source| LifecycleError::Io {
                what: format!("reading daemon id file {}", path.display()),
                source,
            })
    } else {
        let id = thrum_ids::new_id("d");
        write_atomic(path, format!("{id}\n").as_bytes()).map_err(|source| LifecycleError::Io {
            what: format!("writing daemon id file {}", path.display()),
            source,
        })?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_generates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon_id");
        let id = ensure_daemon_id(&path).unwrap();
        assert!(id.starts_with("d_"));
        assert!(path.is_file());
    }

    #[test]
    fn second_call_reuses_persisted_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon_id");
        let first = ensure_daemon_id(&path).unwrap();
        let second = ensure_daemon_id(&path).unwrap();
        assert_eq!(first, second);
    }
}
