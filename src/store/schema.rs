//! Database schema for the match store.

/// Current schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the recorder database.
pub const SCHEMA: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Matches: one row per logical game session
CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY NOT NULL,
    stream TEXT NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    format TEXT,
    player1 TEXT,
    player2 TEXT,
    winner TEXT,
    result TEXT,
    replay_url TEXT,
    my_side TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Nicknames: roster entries per match and side
CREATE TABLE IF NOT EXISTS match_nicknames (
    match_id TEXT NOT NULL,
    side TEXT NOT NULL,
    nickname TEXT NOT NULL,
    PRIMARY KEY (match_id, side, nickname),
    FOREIGN KEY (match_id) REFERENCES matches(id) ON DELETE CASCADE
);

-- Log lines: immutable, gapless sequence per match
CREATE TABLE IF NOT EXISTS log_lines (
    match_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    text TEXT NOT NULL,
    source TEXT NOT NULL,
    received_at TEXT NOT NULL,
    turn INTEGER,
    PRIMARY KEY (match_id, seq),
    FOREIGN KEY (match_id) REFERENCES matches(id) ON DELETE CASCADE
);

-- Events: exactly one per log line, owner re-derivable
CREATE TABLE IF NOT EXISTS events (
    match_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT,
    value TEXT,
    value_low REAL,
    value_high REAL,
    attacker TEXT,
    move_name TEXT,
    owner TEXT NOT NULL,
    PRIMARY KEY (match_id, seq),
    FOREIGN KEY (match_id, seq) REFERENCES log_lines(match_id, seq) ON DELETE CASCADE
);

-- Schema version table for migrations
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO schema_version (version) VALUES (1);

-- At most one open match per stream
CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_open_stream ON matches(stream) WHERE status = 'open';
CREATE INDEX IF NOT EXISTS idx_matches_started_at ON matches(started_at);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
CREATE INDEX IF NOT EXISTS idx_events_owner ON events(owner);
";
