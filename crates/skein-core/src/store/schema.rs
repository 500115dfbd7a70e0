//! Canonical SQLite schema for the timeline store.
//!
//! - `rooms` remembers which fragment currently receives live sync
//! - `fragments` holds boundaries; `previous_id`/`next_id` are populated
//!   exactly when the matching boundary is `linked`
//! - `timeline_events` is keyed by `(fragment_id, event_index)` for ordered
//!   range scans, with a per-room unique event id for duplicate suppression
//!
//! The schema version lives only in `PRAGMA user_version`.

/// Migration v1: fragments, events, room pointers, and lookup indexes.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS fragments (
    fragment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    start_kind TEXT NOT NULL CHECK (start_kind IN ('gap', 'edge', 'linked')),
    start_token TEXT,
    previous_id INTEGER REFERENCES fragments(fragment_id),
    end_kind TEXT NOT NULL CHECK (end_kind IN ('gap', 'edge', 'linked')),
    end_token TEXT,
    next_id INTEGER REFERENCES fragments(fragment_id),
    created_at_us INTEGER NOT NULL,
    CHECK ((start_kind = 'gap') = (start_token IS NOT NULL)),
    CHECK ((start_kind = 'linked') = (previous_id IS NOT NULL)),
    CHECK ((end_kind = 'gap') = (end_token IS NOT NULL)),
    CHECK ((end_kind = 'linked') = (next_id IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS rooms (
    room_id TEXT PRIMARY KEY,
    live_fragment_id INTEGER REFERENCES fragments(fragment_id),
    sync_token TEXT
);

CREATE TABLE IF NOT EXISTS timeline_events (
    room_id TEXT NOT NULL,
    fragment_id INTEGER NOT NULL REFERENCES fragments(fragment_id),
    event_index INTEGER NOT NULL,
    event_id TEXT NOT NULL,
    sender TEXT NOT NULL,
    event_type TEXT NOT NULL,
    origin_server_ts INTEGER NOT NULL,
    predecessor_id TEXT,
    content_json TEXT NOT NULL,
    PRIMARY KEY (fragment_id, event_index),
    UNIQUE (room_id, event_id)
);

CREATE INDEX IF NOT EXISTS idx_fragments_room
    ON fragments(room_id, fragment_id);

CREATE INDEX IF NOT EXISTS idx_timeline_events_predecessor
    ON timeline_events(room_id, predecessor_id);
";

/// Indexes expected after the latest migration.
pub const REQUIRED_INDEXES: &[&str] = &["idx_fragments_room", "idx_timeline_events_predecessor"];
