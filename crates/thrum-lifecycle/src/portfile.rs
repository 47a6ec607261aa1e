// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use crate::atomic::write_atomic;
use crate::error::LifecycleError;

/// Publish the chosen sync-transport port so clients outside this process
/// (the CLI, another tool) can discover it without parsing daemon logs.
pub fn write_port(path: &Path, port: u16) -> Result<(), LifecycleError> {
    write_atomic(path, format!("{port}\n").as_bytes()).map_err(|source| LifecycleError::Io {
        what: format!("writing port file {}", path.display()),
        source,
    })
}

pub fn read_port(path: &Path) -> Result<u16, LifecycleError> {
    let text = std::fs::read_to_string(path).map_err(|source| LifecycleError::Io {
        what: format!("reading port file {}", path.display()),
        source,
    })?;
    text.trim().parse().map_err(|_| LifecycleError::Io {
        what: format!("parsing port file {}", path.display()),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "not a valid port number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.port");
        write_port(&path, 42123).unwrap();
        assert_eq!(read_port(&path).unwrap(), 42123);
    }

    #[test]
    fn read_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.port");
        assert!(read_port(&path).is_err());
    }
}
