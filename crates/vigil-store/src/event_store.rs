//! Typed query helpers for the event tables.
//!
//! Provides inserts and the composable read queries the lifecycle,
//! presence, and report layers are built from: heartbeat ranges, the open
//! row for a pair, and the grouped last-activity / connection-count pages
//! that back the presence merge.
//!
//! All functions take a shared `&Connection` reference and return
//! `anyhow::Result<T>` with typed structs (never raw rows).

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::warn;

use vigil_core::merge::SortDirection;
use vigil_core::model::{
    ActionEvent, ConnectionCountRow, ConnectionEvent, PresencePing, PresenceRow,
};

// ---------------------------------------------------------------------------
// Insert parameter types
// ---------------------------------------------------------------------------

/// Fields of a connection event about to be created (always open).
#[derive(Debug, Clone)]
pub struct NewConnection<'a> {
    pub user_id: i64,
    pub project_id: i64,
    pub session_token: &'a str,
    pub created_at_ms: i64,
    /// Opaque client metadata; stored as JSON text.
    pub metadata: serde_json::Value,
}

/// Fields of an action event about to be appended.
#[derive(Debug, Clone)]
pub struct NewAction<'a> {
    pub user_id: i64,
    pub project_id: i64,
    pub image_id: i64,
    pub slice_id: i64,
    pub action_kind: &'a str,
    pub created_at_ms: i64,
    pub annotation_id: i64,
    pub annotation_owner_id: i64,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn map_connection(row: &Row<'_>) -> rusqlite::Result<ConnectionEvent> {
    let event_id: i64 = row.get("event_id")?;
    let metadata_text: String = row.get("metadata")?;
    // Metadata is an opaque bag: one corrupt row must not fail a whole
    // history read, but it must not degrade silently either.
    let metadata = serde_json::from_str(&metadata_text).unwrap_or_else(|error| {
        warn!(event_id, %error, "corrupt connection metadata, reading as null");
        serde_json::Value::Null
    });
    Ok(ConnectionEvent {
        event_id,
        user_id: row.get("user_id")?,
        project_id: row.get("project_id")?,
        session_token: row.get("session_token")?,
        created_at_ms: row.get("created_at_ms")?,
        active_duration_ms: row.get("active_duration_ms")?,
        metadata,
    })
}

const CONNECTION_COLUMNS: &str = "event_id, user_id, project_id, session_token, \
     created_at_ms, active_duration_ms, metadata";

pub(crate) fn map_action(row: &Row<'_>) -> rusqlite::Result<ActionEvent> {
    Ok(ActionEvent {
        event_id: row.get("event_id")?,
        user_id: row.get("user_id")?,
        project_id: row.get("project_id")?,
        image_id: row.get("image_id")?,
        slice_id: row.get("slice_id")?,
        action_kind: row.get("action_kind")?,
        created_at_ms: row.get("created_at_ms")?,
        annotation_id: row.get("annotation_id")?,
        annotation_owner_id: row.get("annotation_owner_id")?,
    })
}

pub(crate) const ACTION_COLUMNS: &str = "event_id, user_id, project_id, image_id, slice_id, \
     action_kind, created_at_ms, annotation_id, annotation_owner_id";

/// Map `limit == 0` ("no cap") to SQLite's unbounded LIMIT.
fn sql_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}

fn sql_offset(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Inserts
// ---------------------------------------------------------------------------

/// Insert a new (open) connection event.
///
/// # Errors
///
/// Fails with a unique-constraint violation when an open row already
/// exists for the pair; `lifecycle::start_session` relies on that to
/// detect the start-session race.
pub fn insert_connection(conn: &Connection, new: &NewConnection<'_>) -> Result<ConnectionEvent> {
    let metadata_text =
        serde_json::to_string(&new.metadata).context("serialize connection metadata")?;

    conn.execute(
        "INSERT INTO connection_events
         (user_id, project_id, session_token, created_at_ms, active_duration_ms, metadata)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
        params![
            new.user_id,
            new.project_id,
            new.session_token,
            new.created_at_ms,
            metadata_text
        ],
    )
    .context("insert connection event")?;

    Ok(ConnectionEvent {
        event_id: conn.last_insert_rowid(),
        user_id: new.user_id,
        project_id: new.project_id,
        session_token: new.session_token.to_string(),
        created_at_ms: new.created_at_ms,
        active_duration_ms: None,
        metadata: new.metadata.clone(),
    })
}

/// Append one heartbeat ping.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_ping(
    conn: &Connection,
    user_id: i64,
    project_id: i64,
    created_at_ms: i64,
) -> Result<PresencePing> {
    conn.execute(
        "INSERT INTO presence_pings (user_id, project_id, created_at_ms) VALUES (?1, ?2, ?3)",
        params![user_id, project_id, created_at_ms],
    )
    .context("insert presence ping")?;

    Ok(PresencePing {
        user_id,
        project_id,
        created_at_ms,
    })
}

/// Append one action event to the audit trail. Actions are never updated
/// or deleted.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn record_action(conn: &Connection, new: &NewAction<'_>) -> Result<ActionEvent> {
    conn.execute(
        "INSERT INTO action_events
         (user_id, project_id, image_id, slice_id, action_kind, created_at_ms,
          annotation_id, annotation_owner_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.user_id,
            new.project_id,
            new.image_id,
            new.slice_id,
            new.action_kind,
            new.created_at_ms,
            new.annotation_id,
            new.annotation_owner_id
        ],
    )
    .context("insert action event")?;

    Ok(ActionEvent {
        event_id: conn.last_insert_rowid(),
        user_id: new.user_id,
        project_id: new.project_id,
        image_id: new.image_id,
        slice_id: new.slice_id,
        action_kind: new.action_kind.to_string(),
        created_at_ms: new.created_at_ms,
        annotation_id: new.annotation_id,
        annotation_owner_id: new.annotation_owner_id,
    })
}

// ---------------------------------------------------------------------------
// Session queries
// ---------------------------------------------------------------------------

/// Heartbeat timestamps for a pair strictly within
/// `(after_ms, before_ms]`, ascending.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn pings_between(
    conn: &Connection,
    user_id: i64,
    project_id: i64,
    after_ms: i64,
    before_ms: i64,
) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT created_at_ms FROM presence_pings
             WHERE user_id = ?1 AND project_id = ?2
               AND created_at_ms > ?3 AND created_at_ms <= ?4
             ORDER BY created_at_ms ASC",
        )
        .context("prepare ping range query")?;

    let pings = stmt
        .query_map(params![user_id, project_id, after_ms, before_ms], |row| {
            row.get(0)
        })
        .context("query ping range")?
        .collect::<rusqlite::Result<Vec<i64>>>()
        .context("read ping range rows")?;
    Ok(pings)
}

/// The open connection event for a pair, if any. The partial unique index
/// guarantees at most one exists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn open_session(
    conn: &Connection,
    user_id: i64,
    project_id: i64,
) -> Result<Option<ConnectionEvent>> {
    conn.query_row(
        &format!(
            "SELECT {CONNECTION_COLUMNS} FROM connection_events
             WHERE user_id = ?1 AND project_id = ?2 AND active_duration_ms IS NULL"
        ),
        params![user_id, project_id],
        map_connection,
    )
    .optional()
    .context("query open session")
}

/// The most recent connection event for a pair created strictly before
/// `before_ms`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn latest_connection_before(
    conn: &Connection,
    user_id: i64,
    project_id: i64,
    before_ms: i64,
) -> Result<Option<ConnectionEvent>> {
    conn.query_row(
        &format!(
            "SELECT {CONNECTION_COLUMNS} FROM connection_events
             WHERE user_id = ?1 AND project_id = ?2 AND created_at_ms < ?3
             ORDER BY created_at_ms DESC LIMIT 1"
        ),
        params![user_id, project_id, before_ms],
        map_connection,
    )
    .optional()
    .context("query latest connection before")
}

/// Write a session's reconstructed duration. The one mutation this store
/// performs.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_duration(conn: &Connection, event_id: i64, active_duration_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE connection_events SET active_duration_ms = ?2 WHERE event_id = ?1",
        params![event_id, active_duration_ms],
    )
    .context("set connection duration")?;
    Ok(())
}

/// Per-user session history, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn connections_of_user_page(
    conn: &Connection,
    user_id: i64,
    project_id: i64,
    limit: usize,
    offset: usize,
) -> Result<Vec<ConnectionEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connection_events
             WHERE user_id = ?1 AND project_id = ?2
             ORDER BY created_at_ms DESC, event_id DESC
             LIMIT ?3 OFFSET ?4"
        ))
        .context("prepare connection history query")?;

    let events = stmt
        .query_map(
            params![user_id, project_id, sql_limit(limit), sql_offset(offset)],
            map_connection,
        )
        .context("query connection history")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read connection history rows")?;
    Ok(events)
}

// ---------------------------------------------------------------------------
// Grouped presence pages
// ---------------------------------------------------------------------------

/// Distinct user ids with at least one connection event in the project,
/// the "present" population of a merge.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn connected_user_ids(conn: &Connection, project_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT user_id FROM connection_events
             WHERE project_id = ?1 ORDER BY user_id ASC",
        )
        .context("prepare connected users query")?;

    let ids = stmt
        .query_map(params![project_id], |row| row.get(0))
        .context("query connected users")?
        .collect::<rusqlite::Result<Vec<i64>>>()
        .context("read connected user rows")?;
    Ok(ids)
}

/// One page of per-user last activity, grouped and ordered by
/// `MAX(created_at_ms)` in the given direction with `user_id` as
/// tie-break.
///
/// Sort stability below one second is a known caveat inherited from the
/// event data itself; the tie-break only makes pages deterministic.
///
/// # Errors
///
/// Returns an error if the aggregate query fails.
pub fn last_activity_page(
    conn: &Connection,
    project_id: i64,
    users: Option<&[i64]>,
    direction: SortDirection,
    limit: usize,
    offset: usize,
) -> Result<Vec<PresenceRow>> {
    // active_duration_ms is a bare column next to MAX(created_at_ms):
    // SQLite guarantees it is taken from the row holding the max, i.e.
    // the user's most recent session.
    let (user_clause, user_params) = in_clause("user_id", users);
    let sql = format!(
        "SELECT user_id, MAX(created_at_ms) AS last_activity_ms, active_duration_ms
         FROM connection_events
         WHERE project_id = ?{user_clause}
         GROUP BY user_id
         ORDER BY last_activity_ms {dir}, user_id ASC
         LIMIT ? OFFSET ?",
        dir = direction.sql_keyword(),
    );

    let mut params: Vec<i64> = Vec::with_capacity(user_params.len() + 3);
    params.push(project_id);
    params.extend_from_slice(&user_params);
    params.push(sql_limit(limit));
    params.push(sql_offset(offset));

    let mut stmt = conn
        .prepare(&sql)
        .context("prepare last activity query")?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(PresenceRow {
                user_id: row.get("user_id")?,
                last_activity_ms: row.get("last_activity_ms")?,
                active_duration_ms: row.get("active_duration_ms")?,
            })
        })
        .context("query last activity page")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read last activity rows")?;
    Ok(rows)
}

/// One page of per-user connection counts, ordered by count in the given
/// direction with `user_id` as tie-break.
///
/// # Errors
///
/// Returns an error if the aggregate query fails.
pub fn connection_count_page(
    conn: &Connection,
    project_id: i64,
    users: Option<&[i64]>,
    direction: SortDirection,
    limit: usize,
    offset: usize,
) -> Result<Vec<ConnectionCountRow>> {
    let (user_clause, user_params) = in_clause("user_id", users);
    let sql = format!(
        "SELECT user_id, COUNT(*) AS frequency, MAX(created_at_ms) AS last_activity_ms
         FROM connection_events
         WHERE project_id = ?{user_clause}
         GROUP BY user_id
         ORDER BY frequency {dir}, user_id ASC
         LIMIT ? OFFSET ?",
        dir = direction.sql_keyword(),
    );

    let mut params: Vec<i64> = Vec::with_capacity(user_params.len() + 3);
    params.push(project_id);
    params.extend_from_slice(&user_params);
    params.push(sql_limit(limit));
    params.push(sql_offset(offset));

    let mut stmt = conn
        .prepare(&sql)
        .context("prepare connection count query")?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let frequency: i64 = row.get("frequency")?;
            Ok(ConnectionCountRow {
                user_id: row.get("user_id")?,
                frequency: Some(frequency.max(0).unsigned_abs()),
                last_activity_ms: row.get("last_activity_ms")?,
            })
        })
        .context("query connection count page")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read connection count rows")?;
    Ok(rows)
}

/// Optional `AND column IN (?, ?, …)` clause plus its parameters.
fn in_clause(column: &str, values: Option<&[i64]>) -> (String, Vec<i64>) {
    match values {
        Some(values) if !values.is_empty() => {
            let placeholders = vec!["?"; values.len()].join(", ");
            (
                format!(" AND {column} IN ({placeholders})"),
                values.to_vec(),
            )
        }
        _ => (String::new(), Vec::new()),
    }
}
