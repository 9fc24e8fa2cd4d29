//! Canonical SQLite schema for the vigil event store.
//!
//! Three append-only event tables:
//! - `connection_events` — one row per presence session; the duration
//!   column is NULL while the session is open and written exactly once at
//!   close time (the only mutation the store ever performs)
//! - `presence_pings` — raw heartbeat timestamps consumed by session
//!   reconstruction
//! - `action_events` — immutable audit trail of discrete user actions
//!
//! The partial unique index on open `connection_events` rows is what
//! enforces the at-most-one-open-session-per-(user, project) invariant
//! under concurrent writers.

/// Migration v1: event tables plus the open-session uniqueness index.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS connection_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    project_id INTEGER NOT NULL,
    session_token TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    active_duration_ms INTEGER CHECK (active_duration_ms IS NULL OR active_duration_ms >= 0),
    metadata TEXT NOT NULL DEFAULT 'null'
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_connection_events_one_open
    ON connection_events(user_id, project_id)
    WHERE active_duration_ms IS NULL;

CREATE TABLE IF NOT EXISTS presence_pings (
    ping_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    project_id INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS action_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    project_id INTEGER NOT NULL,
    image_id INTEGER NOT NULL,
    slice_id INTEGER NOT NULL,
    action_kind TEXT NOT NULL CHECK (length(trim(action_kind)) > 0),
    created_at_ms INTEGER NOT NULL,
    annotation_id INTEGER NOT NULL,
    annotation_owner_id INTEGER NOT NULL
);
";

/// Migration v2: read-path indexes for the report queries.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_connection_events_user_project_created
    ON connection_events(user_id, project_id, created_at_ms DESC);

CREATE INDEX IF NOT EXISTS idx_connection_events_project_created
    ON connection_events(project_id, created_at_ms);

CREATE INDEX IF NOT EXISTS idx_presence_pings_user_project_created
    ON presence_pings(user_id, project_id, created_at_ms);

CREATE INDEX IF NOT EXISTS idx_action_events_image_created
    ON action_events(image_id, created_at_ms);

CREATE INDEX IF NOT EXISTS idx_action_events_slice_created
    ON action_events(slice_id, created_at_ms);
";
