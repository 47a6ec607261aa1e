// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("reading key file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("writing key file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("creating key directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed key PEM: {0}")]
    MalformedPem(String),
    #[error("invalid key bytes: {0}")]
    InvalidKey(String),
}

const PEM_HEADER: &str = "-----BEGIN THRUM ED25519 PRIVATE KEY-----";
const PEM_FOOTER: &str = "-----END THRUM ED25519 PRIVATE KEY-----";

/// The daemon's Ed25519 signing identity.
///
/// Owned once at daemon-data-root scope. Manual rotation is an explicit
/// operation (overwrite the key file and restart); there is no automatic
/// rotation path.
pub struct DaemonKey {
    signing_key: SigningKey,
}

impl DaemonKey {
    /// Generate a fresh key pair using the OS CSPRNG.
    pub fn generate() -> Self {
        DaemonKey {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the key from `path`, generating and persisting a new one if the
    /// file does not yet exist. Returns whether a new key was generated.
    pub fn ensure(path: &Path) -> Result<(Self, bool), KeyError> {
        if path.is_file() {
            Ok((Self::load(path)?, false))
        } else {
            let key = Self::generate();
            key.save(path)?;
            Ok((key, true))
        }
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let text = std::fs::read_to_string(path).map_err(|source| KeyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let body = text
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect::<String>();
        let bytes = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(body.trim())
                .map_err(|e| KeyError::MalformedPem(e.to_string()))?
        };
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidKey("expected 32-byte seed".into()))?;
        Ok(DaemonKey {
            signing_key: SigningKey::from_bytes(&arr),
        })
    }

    /// Persist the key as a PEM-framed file, mode 0600, in a directory
    /// created mode 0700. Never logs the private material.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        if let Some(parent) = path.parent() {
            create_secret_dir(parent)?;
        }
        let body = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(self.signing_key.to_bytes())
        };
        let pem = format!("{PEM_HEADER}\n{body}\n{PEM_FOOTER}\n");
        write_secret_file(path, pem.as_bytes()).map_err(|source| KeyError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// SSH-style fingerprint of the public key: `SHA256:<base64>`. Safe to
    /// log for human verification; never reveals the private key.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.verifying_key())
    }
}

/// Compute the SSH-style `SHA256:<base64>` fingerprint of any verifying key,
/// e.g. one received from a peer over `sync.peer_info`.
pub fn fingerprint_of(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    use base64::Engine;
    format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)
    )
}

fn create_secret_dir(path: &Path) -> Result<(), KeyError> {
    std::fs::create_dir_all(path).map_err(|source| KeyError::CreateDir {
        path: path.display().to_string(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(path, perms).map_err(|source| KeyError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

fn write_secret_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        f.write_all(data)
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let key = DaemonKey::generate();
        key.save(&path).unwrap();
        let loaded = DaemonKey::load(&path).unwrap();
        assert_eq!(key.verifying_key(), loaded.verifying_key());
    }

    #[test]
    fn ensure_generates_once_and_reuses_after() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.key");
        let (first, generated) = DaemonKey::ensure(&path).unwrap();
        assert!(generated);
        let (second, generated_again) = DaemonKey::ensure(&path).unwrap();
        assert!(!generated_again);
        assert_eq!(first.verifying_key(), second.verifying_key());
    }

    #[test]
    fn fingerprint_is_stable_and_ssh_style() {
        let key = DaemonKey::generate();
        let a = key.fingerprint();
        let b = key.fingerprint();
        assert_eq!(a, b);
        assert!(a.starts_with("SHA256:"));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_has_0600_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        DaemonKey::generate().save(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
