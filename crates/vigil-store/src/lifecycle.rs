//! Connection lifecycle: opening, closing, and reconstructing sessions.
//!
//! Per (user, project) pair a session is either absent, open, or closed
//! with a duration — and at most one open row exists at any instant. The
//! state transitions all live here:
//!
//! - `start_session` closes the prior open row (window end = the new
//!   session's start) and inserts a fresh open row, in one transaction
//! - `close_if_open` is the lazy close used by read paths, with "now" as
//!   the window end
//! - closing an already-closed row is a no-op, and closing when no prior
//!   row exists just means "first session ever"
//!
//! The partial unique index on open rows backs the invariant under
//! concurrent writers: when two `start_session` calls race, the loser's
//! insert hits the index and the whole find-and-close-then-create
//! sequence is retried once before the conflict is surfaced.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, trace, warn};

use vigil_core::config::EngineConfig;
use vigil_core::error::EngineError;
use vigil_core::model::{ConnectionEvent, PresencePing, Session};
use vigil_core::session::active_duration;

use crate::event_store::{
    NewConnection, connections_of_user_page, insert_connection, insert_ping,
    latest_connection_before, pings_between, set_duration,
};

/// Open a new presence session for a (user, project) pair, closing the
/// prior open session first.
///
/// # Errors
///
/// Returns [`EngineError::Conflict`] when the open-session constraint is
/// hit again after the bounded retry; other store failures propagate
/// unmodified.
pub fn start_session(
    conn: &mut Connection,
    config: &EngineConfig,
    user_id: i64,
    project_id: i64,
    session_token: &str,
    metadata: serde_json::Value,
    at_ms: i64,
) -> Result<ConnectionEvent> {
    let new = NewConnection {
        user_id,
        project_id,
        session_token,
        created_at_ms: at_ms,
        metadata,
    };

    let mut retries_left = config.start_session_retries;
    loop {
        let tx = conn
            .transaction()
            .context("begin start-session transaction")?;
        close_latest_open(&tx, config, user_id, project_id, at_ms)?;

        match insert_connection(&tx, &new) {
            Ok(event) => {
                tx.commit().context("commit start-session transaction")?;
                debug!(user_id, project_id, at_ms, "session opened");
                return Ok(event);
            }
            Err(err) if is_unique_conflict(&err) => {
                drop(tx);
                if retries_left == 0 {
                    return Err(EngineError::Conflict {
                        user_id,
                        project_id,
                    }
                    .into());
                }
                retries_left -= 1;
                warn!(user_id, project_id, "open-session race detected, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Close the latest open session for a pair, if one exists, using
/// `before_ms` as the window end.
///
/// Returns the session's active duration: freshly reconstructed when the
/// row was open, the stored value when it was already closed (idempotent
/// no-op), or `None` when the pair has no session at all — silently
/// accepted as "first session ever".
///
/// # Errors
///
/// Returns [`EngineError::InvalidWindow`] when `before_ms` precedes the
/// session's start.
pub fn close_if_open(
    conn: &Connection,
    config: &EngineConfig,
    user_id: i64,
    project_id: i64,
    before_ms: i64,
) -> Result<Option<i64>> {
    close_latest_open(conn, config, user_id, project_id, before_ms)
}

/// Reconstruct the active duration for a window without touching any row:
/// fetch the pair's heartbeats strictly within `(start, end]` and run the
/// gap-collapse fold.
///
/// # Errors
///
/// Returns [`EngineError::InvalidWindow`] when the window is inverted.
pub fn reconstruct_duration(
    conn: &Connection,
    config: &EngineConfig,
    user_id: i64,
    project_id: i64,
    window_start_ms: i64,
    window_end_ms: i64,
) -> Result<i64> {
    let pings = pings_between(conn, user_id, project_id, window_start_ms, window_end_ms)?;
    let duration = active_duration(
        window_start_ms,
        window_end_ms,
        config.idle_threshold_ms,
        &pings,
    )?;
    Ok(duration)
}

/// Append one heartbeat ping for a pair.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn record_heartbeat(
    conn: &Connection,
    user_id: i64,
    project_id: i64,
    at_ms: i64,
) -> Result<PresencePing> {
    trace!(user_id, project_id, at_ms, "heartbeat");
    insert_ping(conn, user_id, project_id, at_ms)
}

/// Per-user session history, newest first.
///
/// When the newest row is still open it is lazily closed with `now_ms` as
/// the window end (the duration is written back), so every returned row
/// carries a duration. `limit == 0` means no cap.
///
/// # Errors
///
/// Returns an error if the query or the lazy-close write-back fails.
pub fn connections_of_user(
    conn: &Connection,
    config: &EngineConfig,
    user_id: i64,
    project_id: i64,
    limit: usize,
    offset: usize,
    now_ms: i64,
) -> Result<Vec<ConnectionEvent>> {
    let mut events = connections_of_user_page(conn, user_id, project_id, limit, offset)?;

    // Only the newest row can be open; it only appears on the first page.
    if offset == 0
        && let Some(first) = events.first_mut()
        && first.is_open()
    {
        let duration =
            reconstruct_duration(conn, config, user_id, project_id, first.created_at_ms, now_ms)?;
        set_duration(conn, first.event_id, duration)?;
        debug!(
            user_id,
            project_id, duration, "session closed lazily on read"
        );
        first.active_duration_ms = Some(duration);
    }

    Ok(events)
}

fn close_latest_open(
    conn: &Connection,
    config: &EngineConfig,
    user_id: i64,
    project_id: i64,
    before_ms: i64,
) -> Result<Option<i64>> {
    let Some(latest) = latest_connection_before(conn, user_id, project_id, before_ms)? else {
        return Ok(None);
    };

    match latest.session() {
        Session::Closed { active_ms } => Ok(Some(active_ms)),
        Session::Open => {
            let duration = reconstruct_duration(
                conn,
                config,
                user_id,
                project_id,
                latest.created_at_ms,
                before_ms,
            )?;
            set_duration(conn, latest.event_id, duration)?;
            debug!(user_id, project_id, duration, "session closed");
            Ok(Some(duration))
        }
    }
}

fn is_unique_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        == Some(rusqlite::ErrorCode::ConstraintViolation)
}
