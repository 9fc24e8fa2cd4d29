//! Typed engine errors.
//!
//! Every failure a caller is expected to branch on is a variant here.
//! Store-level failures (I/O, SQLite) are *not* wrapped: they propagate
//! through `anyhow` with context so callers can still downcast to
//! [`EngineError`] when one is the root cause.

use thiserror::Error;

/// Domain errors surfaced by the analytics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A reconstruction window whose end precedes its start. Fatal, never
    /// retried.
    #[error("invalid window: end {end_ms}ms precedes start {start_ms}ms")]
    InvalidWindow { start_ms: i64, end_ms: i64 },

    /// A referenced id is missing from the declared universe.
    #[error("{what} {id} not found in the declared universe")]
    NotFound { what: &'static str, id: i64 },

    /// The at-most-one-open-session constraint was hit twice in a row for
    /// the same (user, project) pair. The first hit is retried locally;
    /// the second is surfaced as this error.
    #[error("open session conflict for user {user_id} in project {project_id}")]
    Conflict { user_id: i64, project_id: i64 },

    /// A stored timestamp that cannot be represented at a calendar
    /// boundary in the reference timezone (out of chrono's range, or
    /// inside a DST gap with no valid local boundary).
    #[error("timestamp {ms}ms has no calendar boundary in the reference timezone")]
    TimestampOutOfRange { ms: i64 },
}
