// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

/// Which listener a request arrived on. The local socket is the full
/// surface and trusts the filesystem; the sync TCP listener is a security
/// boundary and only accepts a small whitelisted subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Local,
    Sync,
}

/// Methods reachable on the sync transport. Anything else arriving there
/// is rejected with "method not found"; this is a security boundary, not
/// convenience filtering.
const SYNC_WHITELIST: &[&str] = &["sync.pull", "sync.peer_info", "sync.notify", "pair.request"];

impl Transport {
    pub fn allows(&self, method: &str) -> bool {
        match self {
            Transport::Local => true,
            Transport::Sync => SYNC_WHITELIST.contains(&method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_transport_accepts_everything() {
        assert!(Transport::Local.allows("agent.register"));
        assert!(Transport::Local.allows("sync.pull"));
    }

    #[test]
    fn sync_transport_rejects_non_whitelisted_methods() {
        assert!(Transport::Sync.allows("sync.pull"));
        assert!(Transport::Sync.allows("pair.request"));
        assert!(!Transport::Sync.allows("agent.register"));
        assert!(!Transport::Sync.allows("message.send"));
    }
}
