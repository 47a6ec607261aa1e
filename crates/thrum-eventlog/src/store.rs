// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::event::{shard_for, Event, ShardKey};

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("opening shard file {path}: {source}")]
    OpenShard {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("writing event line: {0}")]
    Write(#[from] std::io::Error),
    #[error("serializing event {0}: {1}")]
    Serialize(String, serde_json::Error),
    #[error("scanning existing log at {path}: {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a bounded `read_after` query.
pub struct ReadAfter {
    pub events: Vec<Event>,
    pub next_sequence: u64,
    pub more_available: bool,
}

struct State {
    seen_ids: HashSet<String>,
    /// `(origin, sequence) -> Event`, kept fully in memory so `read_after`
    /// and `scan` never need to touch disk.
    by_origin_seq: BTreeMap<(String, u64), Event>,
    max_sequence: HashMap<String, u64>,
    open_files: HashMap<ShardKey, File>,
}

/// Append-only per-origin event log.
///
/// Every append is a whole-record, newline-terminated write so an external
/// reader (the Git-backed replication boundary) can tail the files
/// safely while the daemon runs.
pub struct EventLog {
    root: PathBuf,
    state: Mutex<State>,
}

impl EventLog {
    /// Open (creating if needed) the log rooted at `root`, replaying any
    /// existing shard files to rebuild the in-memory index.
    pub fn open(root: &Path) -> Result<Self, EventLogError> {
        std::fs::create_dir_all(root).map_err(EventLogError::Write)?;
        std::fs::create_dir_all(root.join("messages")).map_err(EventLogError::Write)?;

        let mut state = State {
            seen_ids: HashSet::new(),
            by_origin_seq: BTreeMap::new(),
            max_sequence: HashMap::new(),
            open_files: HashMap::new(),
        };

        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "jsonl").unwrap_or(false))
        {
            replay_file(entry.path(), &mut state)?;
        }

        Ok(EventLog {
            root: root.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    /// Whether an event with this ID has already been appended.
    pub fn has(&self, event_id: &str) -> bool {
        self.state.lock().unwrap().seen_ids.contains(event_id)
    }

    /// Append `event`. If `event.sequence` is `0`, the next dense sequence
    /// for `event.origin_daemon` is assigned in place; otherwise (a remote
    /// event applied by the sync engine) the provided sequence is trusted
    /// verbatim. A duplicate `event_id` is a silent no-op, returning the
    /// sequence already on file.
    pub fn append(&self, mut event: Event) -> Result<u64, EventLogError> {
        let mut state = self.state.lock().unwrap();

        if state.seen_ids.contains(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate append skipped");
            return Ok(state
                .by_origin_seq
                .values()
                .find(|e| e.event_id == event.event_id)
                .map(|e| e.sequence)
                .unwrap_or(event.sequence));
        }

        if event.sequence == 0 {
            let next = state.max_sequence.get(&event.origin_daemon).copied().unwrap_or(0) + 1;
            event.sequence = next;
        }
        state
            .max_sequence
            .entry(event.origin_daemon.clone())
            .and_modify(|s| *s = (*s).max(event.sequence))
            .or_insert(event.sequence);

        let shard = shard_for(&event);
        let line = serde_json::to_string(&event)
            .map_err(|e| EventLogError::Serialize(event.event_id.clone(), e))?;

        let file = open_shard(&self.root, &mut state.open_files, &shard)?;
        writeln!(file, "{line}")?;
        file.flush()?;

        state.seen_ids.insert(event.event_id.clone());
        state
            .by_origin_seq
            .insert((event.origin_daemon.clone(), event.sequence), event.clone());

        Ok(event.sequence)
    }

    /// Events with `sequence > cursor` for `origin`, ordered by sequence,
    /// bounded to at most `max` results. `more_available` is set when
    /// strictly more than `max` qualifying events exist.
    pub fn read_after(&self, origin: &str, cursor: u64, max: usize) -> ReadAfter {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Event> = state
            .by_origin_seq
            .range((origin.to_string(), cursor + 1)..(origin.to_string(), u64::MAX))
            .map(|(_, e)| e.clone())
            .collect();

        let more_available = events.len() > max;
        events.truncate(max);
        let next_sequence = events.last().map(|e| e.sequence).unwrap_or(cursor);

        ReadAfter {
            events,
            next_sequence,
            more_available,
        }
    }

    /// All events for `origin` with `from_seq <= sequence <= to_seq`.
    pub fn scan(&self, origin: &str, from_seq: u64, to_seq: u64) -> Vec<Event> {
        let state = self.state.lock().unwrap();
        state
            .by_origin_seq
            .range((origin.to_string(), from_seq)..=(origin.to_string(), to_seq))
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Highest sequence assigned so far for `origin`, or `0` if none.
    pub fn max_sequence(&self, origin: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .max_sequence
            .get(origin)
            .copied()
            .unwrap_or(0)
    }

    /// Every event across every origin, in no particular cross-origin order
    /// (callers that need determinism sort by timestamp themselves). Used to
    /// feed a from-scratch projection rebuild.
    pub fn all_events(&self) -> Vec<Event> {
        self.state
            .lock()
            .unwrap()
            .by_origin_seq
            .values()
            .cloned()
            .collect()
    }

    /// Total event count across all origins, for diagnostics and tests.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().by_origin_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn open_shard<'a>(
    root: &Path,
    open_files: &'a mut HashMap<ShardKey, File>,
    shard: &ShardKey,
) -> Result<&'a mut File, EventLogError> {
    if !open_files.contains_key(shard) {
        let path = root.join(shard.file_name());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(EventLogError::Write)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| EventLogError::OpenShard {
                path: path.display().to_string(),
                source,
            })?;
        open_files.insert(shard.clone(), file);
    }
    Ok(open_files.get_mut(shard).unwrap())
}

/// Replay a shard file into the in-memory index. A truncated final line
/// (partial write interrupted by a crash) is dropped rather than rejected.
fn replay_file(path: &Path, state: &mut State) -> Result<(), EventLogError> {
    let file = File::open(path).map_err(|source| EventLogError::Scan {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| EventLogError::Scan {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                state.seen_ids.insert(event.event_id.clone());
                state
                    .max_sequence
                    .entry(event.origin_daemon.clone())
                    .and_modify(|s| *s = (*s).max(event.sequence))
                    .or_insert(event.sequence);
                state
                    .by_origin_seq
                    .insert((event.origin_daemon.clone(), event.sequence), event);
            }
            Err(e) => {
                warn!(path = %path.display(), line = lineno, error = %e, "dropping corrupt log line");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str, origin: &str, sequence: u64) -> Event {
        Event {
            event_id: id.to_string(),
            event_type: EventType::SessionStart,
            timestamp: Utc::now(),
            origin_daemon: origin.to_string(),
            sequence,
            signature: None,
            payload: json!({}),
        }
    }

    #[test]
    fn append_assigns_dense_sequence_when_zero() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        let s1 = log.append(event("evt_1", "d_1", 0)).unwrap();
        let s2 = log.append(event("evt_2", "d_1", 0)).unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[test]
    fn duplicate_event_id_is_silent_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append(event("evt_1", "d_1", 0)).unwrap();
        let before = log.len();
        let result = log.append(event("evt_1", "d_1", 0)).unwrap();
        assert_eq!(result, 1);
        assert_eq!(log.len(), before);
    }

    #[test]
    fn read_after_returns_strictly_greater_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        for i in 1..=5u64 {
            log.append(event(&format!("evt_{i}"), "d_1", i)).unwrap();
        }
        let page = log.read_after("d_1", 2, 100);
        let seqs: Vec<u64> = page.events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert!(!page.more_available);
    }

    #[test]
    fn read_after_sets_more_available_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        for i in 1..=10u64 {
            log.append(event(&format!("evt_{i}"), "d_1", i)).unwrap();
        }
        let page = log.read_after("d_1", 0, 5);
        assert_eq!(page.events.len(), 5);
        assert!(page.more_available);
        assert_eq!(page.next_sequence, 5);
    }

    #[test]
    fn origins_have_independent_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append(event("evt_a1", "d_1", 0)).unwrap();
        log.append(event("evt_b1", "d_2", 0)).unwrap();
        let s = log.append(event("evt_a2", "d_1", 0)).unwrap();
        assert_eq!(s, 2);
        assert_eq!(log.max_sequence("d_2"), 1);
    }

    #[test]
    fn reopening_replays_existing_shards() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = EventLog::open(dir.path()).unwrap();
            log.append(event("evt_1", "d_1", 0)).unwrap();
            log.append(event("evt_2", "d_1", 0)).unwrap();
        }
        let reopened = EventLog::open(dir.path()).unwrap();
        assert!(reopened.has("evt_1"));
        assert!(reopened.has("evt_2"));
        assert_eq!(reopened.max_sequence("d_1"), 2);
    }

    #[test]
    fn message_create_with_recipient_lands_in_its_own_shard() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        let e = Event {
            event_id: "evt_msg1".into(),
            event_type: EventType::MessageCreate,
            timestamp: Utc::now(),
            origin_daemon: "d_1".into(),
            sequence: 0,
            signature: None,
            payload: json!({"scopes": [{"kind": "to", "value": "furiosa"}]}),
        };
        log.append(e).unwrap();
        assert!(dir.path().join("messages/furiosa.jsonl").is_file());
    }

    #[test]
    fn scan_is_bounded_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        for i in 1..=5u64 {
            log.append(event(&format!("evt_{i}"), "d_1", i)).unwrap();
        }
        let got = log.scan("d_1", 2, 4);
        let seqs: Vec<u64> = got.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }
}
