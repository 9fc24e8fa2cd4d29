//! Event and result types shared across the engine.
//!
//! All timestamps are milliseconds since the Unix epoch. Connection events
//! carry their open/closed state in `active_duration_ms`; the [`Session`]
//! sum type is the one place that interprets its presence or absence, so
//! call sites never null-check the raw field.

use serde::{Deserialize, Serialize};

/// One presence session of a user in a project.
///
/// Created open (no duration) when the user starts interacting; mutated
/// exactly once, at close time, when the duration is reconstructed. Owned
/// by the lifecycle layer in `vigil-store`; read-only everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub event_id: i64,
    pub user_id: i64,
    pub project_id: i64,
    pub session_token: String,
    pub created_at_ms: i64,
    /// `None` while the session is open; set once at close.
    pub active_duration_ms: Option<i64>,
    /// Opaque client metadata (user agent, OS, …). Never interpreted here.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Open/closed state of a [`ConnectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// No newer event supersedes this one and no duration is recorded.
    Open,
    /// Terminal: the active duration has been reconstructed and stored.
    Closed { active_ms: i64 },
}

impl ConnectionEvent {
    /// Interpret the duration field as an explicit session state.
    #[must_use]
    pub fn session(&self) -> Session {
        self.active_duration_ms
            .map_or(Session::Open, |active_ms| Session::Closed { active_ms })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.active_duration_ms.is_none()
    }
}

/// A raw activity heartbeat inside a session. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePing {
    pub user_id: i64,
    pub project_id: i64,
    pub created_at_ms: i64,
}

/// One discrete user action on an annotation. Append-only audit trail,
/// never updated or reconstructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub event_id: i64,
    pub user_id: i64,
    pub project_id: i64,
    pub image_id: i64,
    pub slice_id: i64,
    pub action_kind: String,
    pub created_at_ms: i64,
    pub annotation_id: i64,
    pub annotation_owner_id: i64,
}

/// One row of a merged presence report. Transient, never persisted.
///
/// Users absent from the connection store keep both optional fields
/// `None`; by the contiguous-block rule they never interleave with
/// present rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRow {
    pub user_id: i64,
    pub last_activity_ms: Option<i64>,
    /// Duration of the most recent session, when that session is closed.
    pub active_duration_ms: Option<i64>,
}

impl PresenceRow {
    /// Row for a user with no connection record at all.
    #[must_use]
    pub const fn absent(user_id: i64) -> Self {
        Self {
            user_id,
            last_activity_ms: None,
            active_duration_ms: None,
        }
    }
}

/// One row of a merged connection-count report. Transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCountRow {
    pub user_id: i64,
    /// Total number of sessions; `None` for users with no record.
    pub frequency: Option<u64>,
    pub last_activity_ms: Option<i64>,
}

impl ConnectionCountRow {
    #[must_use]
    pub const fn absent(user_id: i64) -> Self {
        Self {
            user_id,
            frequency: None,
            last_activity_ms: None,
        }
    }
}
