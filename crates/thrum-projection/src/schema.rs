// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use rusqlite::Connection;

/// Forward-only migrations, applied in order. Each entry runs once; already
/// applied entries are skipped by checking `schema_version`.
const MIGRATIONS: &[&str] = &[
    // v1: base schema
    "
    CREATE TABLE IF NOT EXISTS events (
        event_id      TEXT PRIMARY KEY,
        sequence      INTEGER NOT NULL,
        type          TEXT NOT NULL,
        timestamp     TEXT NOT NULL,
        origin_daemon TEXT NOT NULL,
        payload       TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_origin_seq ON events(origin_daemon, sequence);

    CREATE TABLE IF NOT EXISTS agents (
        agent_id      TEXT PRIMARY KEY,
        role          TEXT NOT NULL,
        module        TEXT NOT NULL,
        display       TEXT,
        hostname      TEXT,
        worktree_path TEXT,
        last_seen     TEXT,
        intent        TEXT,
        session_token TEXT,
        file_changes  TEXT NOT NULL DEFAULT '[]',
        heartbeat_status TEXT NOT NULL DEFAULT 'unknown'
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_agents_role_module ON agents(role, module);

    CREATE TABLE IF NOT EXISTS sessions (
        session_token TEXT PRIMARY KEY,
        agent_id      TEXT NOT NULL,
        start_time    TEXT NOT NULL,
        end_time      TEXT,
        intent        TEXT,
        transport     TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        message_id   TEXT PRIMARY KEY,
        thread_id    TEXT,
        agent_id     TEXT NOT NULL,
        authored_by  TEXT NOT NULL,
        disclosed    INTEGER NOT NULL DEFAULT 1,
        scopes       TEXT NOT NULL DEFAULT '[]',
        mentions     TEXT NOT NULL DEFAULT '[]',
        priority     INTEGER NOT NULL DEFAULT 0,
        format       TEXT NOT NULL,
        content      TEXT NOT NULL,
        reply_to     TEXT,
        created_at   TEXT NOT NULL,
        deleted_at   TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);

    CREATE TABLE IF NOT EXISTS message_reads (
        message_id       TEXT NOT NULL,
        recipient_agent  TEXT NOT NULL,
        is_read          INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (message_id, recipient_agent)
    );

    CREATE TABLE IF NOT EXISTS groups (
        name TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS group_members (
        group_name TEXT NOT NULL,
        member     TEXT NOT NULL,
        PRIMARY KEY (group_name, member)
    );

    CREATE TABLE IF NOT EXISTS subscriptions (
        subscription_id TEXT PRIMARY KEY,
        session_id      TEXT NOT NULL,
        scope           TEXT,
        mention         TEXT,
        match_all       INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_subscriptions_session ON subscriptions(session_id);

    CREATE TABLE IF NOT EXISTS checkpoints (
        peer_daemon_id  TEXT PRIMARY KEY,
        highest_sequence INTEGER NOT NULL DEFAULT 0,
        last_sync_time  INTEGER,
        status          TEXT NOT NULL DEFAULT 'idle'
    );

    CREATE TABLE IF NOT EXISTS quarantine (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id      TEXT NOT NULL,
        peer          TEXT NOT NULL,
        received_at   TEXT NOT NULL,
        stage         TEXT NOT NULL,
        reason        TEXT NOT NULL,
        raw_json      TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_quarantine_peer_time ON quarantine(peer, received_at);
    ",
];

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;
    let applied: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version > applied {
            conn.execute_batch(migration)?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        }
    }
    Ok(())
}

/// Drop every table this crate owns, for a from-scratch rebuild.
pub fn drop_all(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS events;
        DROP TABLE IF EXISTS agents;
        DROP TABLE IF EXISTS sessions;
        DROP TABLE IF EXISTS messages;
        DROP TABLE IF EXISTS message_reads;
        DROP TABLE IF EXISTS groups;
        DROP TABLE IF EXISTS group_members;
        DROP TABLE IF EXISTS subscriptions;
        DROP TABLE IF EXISTS checkpoints;
        DROP TABLE IF EXISTS quarantine;
        DROP TABLE IF EXISTS schema_version;
        ",
    )
}
