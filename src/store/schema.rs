//! SQLite schema definition
//!
//! Three collaborators share one database:
//! - contacts: the system directory, looked up by numeric id
//! - history_calls: finished calls, read back in start order
//! - live_conferences / conference_participants: calls in progress

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================
-- DIRECTORY
-- ============================================

CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY,                -- positive directory id
    display_name TEXT NOT NULL,
    photo_ref INTEGER
);

-- ============================================
-- HISTORY
-- ============================================

CREATE TABLE IF NOT EXISTS history_calls (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    call_id TEXT NOT NULL UNIQUE,
    account_id TEXT NOT NULL,
    peer_number TEXT NOT NULL,             -- raw, as reported by the engine
    contact_id INTEGER NOT NULL DEFAULT -1, -- -1 when unknown
    call_start TEXT NOT NULL,              -- RFC 3339, UTC
    call_end TEXT NOT NULL,
    incoming INTEGER NOT NULL DEFAULT 0,
    missed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_history_calls_start ON history_calls(call_start);

-- ============================================
-- LIVE CONFERENCES
-- ============================================

CREATE TABLE IF NOT EXISTS live_conferences (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conference_participants (
    conference_id TEXT NOT NULL,
    position INTEGER NOT NULL,             -- 0 is the primary leg
    call_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    peer_number TEXT NOT NULL,
    contact_id INTEGER NOT NULL DEFAULT -1,
    PRIMARY KEY(conference_id, call_id),
    FOREIGN KEY(conference_id) REFERENCES live_conferences(id) ON DELETE CASCADE
);
"#;
