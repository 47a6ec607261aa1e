// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Time-sortable ID generation and deterministic fingerprinting.
//!
//! IDs are 26-character Crockford base32 strings carrying a 48-bit
//! millisecond timestamp followed by 80 bits of randomness, the same shape
//! as a ULID. A short type prefix (`evt_`, `ses_`, `msg_`) is prepended so
//! the kind of a raw ID is obvious without parsing it.

use sha2::{Digest, Sha256};

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Prefix on an event ID.
pub const EVENT_PREFIX: &str = "evt";
/// Prefix on a session token.
pub const SESSION_PREFIX: &str = "ses";
/// Prefix on a message ID.
pub const MESSAGE_PREFIX: &str = "msg";
/// Prefix on a repository ID.
pub const REPO_PREFIX: &str = "r";

/// Generate a 26-character time-sortable ULID body (no prefix).
pub fn ulid() -> String {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut rng = rand::thread_rng();
    use rand::Rng;
    let rand_hi: u16 = rng.gen();
    let rand_lo: u64 = rng.gen();

    let mut buf = [0u8; 26];

    let mut ts = now_ms;
    for i in (0..10).rev() {
        buf[i] = CROCKFORD[(ts & 0x1F) as usize];
        ts >>= 5;
    }

    let mut r = rand_hi as u128 | ((rand_lo as u128) << 16);
    for i in (10..26).rev() {
        buf[i] = CROCKFORD[(r & 0x1F) as usize];
        r >>= 5;
    }

    // SAFETY: every byte written above comes from the CROCKFORD ASCII table.
    unsafe { String::from_utf8_unchecked(buf.to_vec()) }
}

/// Generate a prefixed, time-sortable ID: `{prefix}_{26 crockford chars}`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", ulid())
}

/// Generate a new event ID.
pub fn new_event_id() -> String {
    new_id(EVENT_PREFIX)
}

/// Generate a new session token.
pub fn new_session_token() -> String {
    new_id(SESSION_PREFIX)
}

/// Generate a new message ID.
pub fn new_message_id() -> String {
    new_id(MESSAGE_PREFIX)
}

/// Lowercase, unpadded Crockford base32 of arbitrary bytes, truncated to `len`
/// characters. Used for deterministic fingerprints where the full digest
/// would be needlessly long.
fn base32_digest(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &b in bytes {
        acc = (acc << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = ((acc >> bits) & 0x1F) as usize;
            out.push(CROCKFORD[idx].to_ascii_lowercase() as char);
            if out.len() == len {
                return out;
            }
        }
    }
    if bits > 0 && out.len() < len {
        let idx = ((acc << (5 - bits)) & 0x1F) as usize;
        out.push(CROCKFORD[idx].to_ascii_lowercase() as char);
    }
    out
}

/// Normalize a git remote URL to its lowercased, `.git`-stripped HTTPS form.
///
/// Handles the common `git@host:owner/repo.git` SSH shorthand as well as
/// `ssh://` and `https://` forms, so that the same logical repository
/// fingerprints identically regardless of how a given clone addresses it.
pub fn normalize_remote_url(url: &str) -> String {
    let mut s = url.trim().to_lowercase();

    if let Some(rest) = s.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            s = format!("https://{host}/{path}");
        }
    } else if let Some(rest) = s.strip_prefix("ssh://git@") {
        s = format!("https://{rest}");
    } else if let Some(rest) = s.strip_prefix("ssh://") {
        s = format!("https://{rest}");
    }

    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_suffix('/') {
        s = stripped.to_string();
    }
    s
}

/// Derive the deterministic repository ID from a remote URL:
/// `r_` + first 12 chars of the lowercase base32 SHA-256 of the normalized URL.
pub fn repo_id(remote_url: &str) -> String {
    let normalized = normalize_remote_url(remote_url);
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{REPO_PREFIX}_{}", base32_digest(&digest, 12))
}

/// Derive an unnamed agent's ID: `{role}_{hash10}`, where `hash10` is the
/// first 10 base32 chars of SHA-256 over `repo_id | role | module`.
pub fn hashed_agent_id(repo_id: &str, role: &str, module: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_id.as_bytes());
    hasher.update(b"|");
    hasher.update(role.as_bytes());
    hasher.update(b"|");
    hasher.update(module.as_bytes());
    let digest = hasher.finalize();
    format!("{role}_{}", base32_digest(&digest, 10))
}

/// Reserved agent names that may never be chosen as a human-supplied name.
pub const RESERVED_AGENT_NAMES: &[&str] = &["everyone", "system", "all", "thrum"];

/// Validate a human-supplied agent name: lowercase `[a-z0-9_]+`, not reserved,
/// and not equal to `role` (names and roles must be visually distinguishable).
pub fn validate_agent_name(name: &str, role: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(NameError::InvalidChars);
    }
    if RESERVED_AGENT_NAMES.contains(&name) {
        return Err(NameError::Reserved);
    }
    if name == role {
        return Err(NameError::EqualsRole);
    }
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("agent name must not be empty")]
    Empty,
    #[error("agent name must match [a-z0-9_]+")]
    InvalidChars,
    #[error("agent name is a reserved word")]
    Reserved,
    #[error("agent name must not equal its role")]
    EqualsRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_length_and_uniqueness() {
        let a = ulid();
        let b = ulid();
        assert_eq!(a.len(), 26);
        assert_eq!(b.len(), 26);
        assert_ne!(a, b);
    }

    #[test]
    fn ulid_monotonic_ordering() {
        let a = new_event_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_event_id();
        assert!(a < b, "ids should sort chronologically: {a} vs {b}");
    }

    #[test]
    fn new_id_has_expected_prefix() {
        let id = new_session_token();
        assert!(id.starts_with("ses_"));
        assert_eq!(id.len(), 4 + 26);
    }

    #[test]
    fn repo_id_is_deterministic() {
        let a = repo_id("https://github.com/foo/bar.git");
        let b = repo_id("git@github.com:foo/bar.git");
        let c = repo_id("HTTPS://GitHub.com/foo/bar/");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.starts_with("r_"));
        assert_eq!(a.len(), 2 + 12);
    }

    #[test]
    fn repo_id_differs_for_different_repos() {
        let a = repo_id("https://github.com/foo/bar.git");
        let b = repo_id("https://github.com/foo/baz.git");
        assert_ne!(a, b);
    }

    #[test]
    fn hashed_agent_id_is_deterministic_and_scoped() {
        let r = repo_id("https://example.com/a.git");
        let a = hashed_agent_id(&r, "impl", "auth");
        let b = hashed_agent_id(&r, "impl", "auth");
        let c = hashed_agent_id(&r, "impl", "billing");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("impl_"));
    }

    #[test]
    fn agent_name_validation() {
        assert!(validate_agent_name("furiosa", "impl").is_ok());
        assert_eq!(
            validate_agent_name("", "impl").unwrap_err(),
            NameError::Empty
        );
        assert_eq!(
            validate_agent_name("Nux", "impl").unwrap_err(),
            NameError::InvalidChars
        );
        assert_eq!(
            validate_agent_name("everyone", "impl").unwrap_err(),
            NameError::Reserved
        );
        assert_eq!(
            validate_agent_name("impl", "impl").unwrap_err(),
            NameError::EqualsRole
        );
    }
}
