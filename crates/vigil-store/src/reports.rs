//! Aggregated reporting queries: bucketed series, bounded counts, and
//! action listings.
//!
//! Filters are applied in SQL before any bucketing happens, so calendar
//! boundaries are computed only from events actually included. The
//! reference timezone is an explicit parameter on every bucketed call;
//! nothing here ever consults the host-local zone.

use anyhow::{Context, Result};
use chrono::TimeZone;
use rusqlite::{Connection, params_from_iter};

use vigil_core::bucket::{self, FrequencyBucket, Granularity, TimeBucket};
use vigil_core::model::ActionEvent;

use crate::event_store::{ACTION_COLUMNS, map_action};

/// Default lookback of a frequency report when no lower bound is given:
/// one year before the upper bound.
const DEFAULT_LOOKBACK_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Row filters for connection-event reports. All fields optional, AND
/// semantics; `after_ms`/`before_ms` are inclusive bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportFilter {
    pub project_id: Option<i64>,
    pub user_id: Option<i64>,
    pub after_ms: Option<i64>,
    pub before_ms: Option<i64>,
}

/// Which resource an action listing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    Image(i64),
    Slice(i64),
}

/// Filters for an action listing.
#[derive(Debug, Clone, Copy)]
pub struct ActionFilter {
    pub target: ActionTarget,
    pub user_id: Option<i64>,
    pub after_ms: Option<i64>,
    pub before_ms: Option<i64>,
}

/// Per-project connection total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectTotal {
    pub project_id: i64,
    pub total: u64,
}

/// Connection counts grouped into calendar buckets in the reference
/// timezone.
///
/// # Errors
///
/// Fails when a stored timestamp has no calendar boundary in the
/// reference timezone; no partial series is returned.
pub fn bucketed_counts<Tz: TimeZone>(
    conn: &Connection,
    filter: &ReportFilter,
    granularity: Granularity,
    tz: &Tz,
) -> Result<Vec<TimeBucket>> {
    let timestamps = connection_timestamps(conn, filter)?;
    let buckets = bucket::bucket(&timestamps, granularity, tz)?;
    Ok(buckets)
}

/// Bucketed counts normalized into relative frequencies.
///
/// When the filter has no upper bound, `now_ms` is used; when it has no
/// lower bound, one year before the upper bound is used (so an unbounded
/// "usage profile" query stays a bounded scan).
///
/// # Errors
///
/// Returns an error if the underlying count series cannot be built.
pub fn bucketed_frequencies<Tz: TimeZone>(
    conn: &Connection,
    filter: &ReportFilter,
    granularity: Granularity,
    tz: &Tz,
    now_ms: i64,
) -> Result<Vec<FrequencyBucket>> {
    let before_ms = filter.before_ms.unwrap_or(now_ms);
    let bounded = ReportFilter {
        before_ms: Some(before_ms),
        after_ms: Some(filter.after_ms.unwrap_or(before_ms - DEFAULT_LOOKBACK_MS)),
        ..*filter
    };

    let counts = bucketed_counts(conn, &bounded, granularity, tz)?;
    Ok(bucket::normalize(&counts))
}

/// Count a project's connection events, optionally bounded.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_connections(
    conn: &Connection,
    project_id: i64,
    after_ms: Option<i64>,
    before_ms: Option<i64>,
) -> Result<u64> {
    count_events(conn, "connection_events", project_id, after_ms, before_ms)
}

/// Count a project's action events, optionally bounded.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_actions(
    conn: &Connection,
    project_id: i64,
    after_ms: Option<i64>,
    before_ms: Option<i64>,
) -> Result<u64> {
    count_events(conn, "action_events", project_id, after_ms, before_ms)
}

/// Connection totals for every project in the store.
///
/// # Errors
///
/// Returns an error if the aggregate query fails.
pub fn total_connections_by_project(conn: &Connection) -> Result<Vec<ProjectTotal>> {
    let mut stmt = conn
        .prepare(
            "SELECT project_id, COUNT(*) AS total
             FROM connection_events
             GROUP BY project_id
             ORDER BY project_id ASC",
        )
        .context("prepare project totals query")?;

    let totals = stmt
        .query_map([], |row| {
            let total: i64 = row.get("total")?;
            Ok(ProjectTotal {
                project_id: row.get("project_id")?,
                total: total.max(0).unsigned_abs(),
            })
        })
        .context("query project totals")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read project total rows")?;
    Ok(totals)
}

/// Actions on an image or slice, optionally restricted to one user and a
/// time range, ascending by time.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_actions(conn: &Connection, filter: &ActionFilter) -> Result<Vec<ActionEvent>> {
    let mut clauses = Vec::new();
    let mut params: Vec<i64> = Vec::new();

    match filter.target {
        ActionTarget::Image(image_id) => {
            clauses.push("image_id = ?");
            params.push(image_id);
        }
        ActionTarget::Slice(slice_id) => {
            clauses.push("slice_id = ?");
            params.push(slice_id);
        }
    }
    if let Some(user_id) = filter.user_id {
        clauses.push("user_id = ?");
        params.push(user_id);
    }
    if let Some(after_ms) = filter.after_ms {
        clauses.push("created_at_ms >= ?");
        params.push(after_ms);
    }
    if let Some(before_ms) = filter.before_ms {
        clauses.push("created_at_ms <= ?");
        params.push(before_ms);
    }

    let sql = format!(
        "SELECT {ACTION_COLUMNS} FROM action_events
         WHERE {clauses}
         ORDER BY created_at_ms ASC, event_id ASC",
        clauses = clauses.join(" AND "),
    );

    let mut stmt = conn.prepare(&sql).context("prepare action listing")?;
    let actions = stmt
        .query_map(params_from_iter(params), map_action)
        .context("query action listing")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read action rows")?;
    Ok(actions)
}

fn connection_timestamps(conn: &Connection, filter: &ReportFilter) -> Result<Vec<i64>> {
    let mut clauses = Vec::new();
    let mut params: Vec<i64> = Vec::new();

    if let Some(project_id) = filter.project_id {
        clauses.push("project_id = ?");
        params.push(project_id);
    }
    if let Some(user_id) = filter.user_id {
        clauses.push("user_id = ?");
        params.push(user_id);
    }
    if let Some(after_ms) = filter.after_ms {
        clauses.push("created_at_ms >= ?");
        params.push(after_ms);
    }
    if let Some(before_ms) = filter.before_ms {
        clauses.push("created_at_ms <= ?");
        params.push(before_ms);
    }

    let mut sql = String::from("SELECT created_at_ms FROM connection_events");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at_ms ASC");

    let mut stmt = conn
        .prepare(&sql)
        .context("prepare connection timestamps query")?;
    let timestamps = stmt
        .query_map(params_from_iter(params), |row| row.get(0))
        .context("query connection timestamps")?
        .collect::<rusqlite::Result<Vec<i64>>>()
        .context("read connection timestamps")?;
    Ok(timestamps)
}

fn count_events(
    conn: &Connection,
    table: &str,
    project_id: i64,
    after_ms: Option<i64>,
    before_ms: Option<i64>,
) -> Result<u64> {
    let mut clauses = vec!["project_id = ?"];
    let mut params: Vec<i64> = vec![project_id];

    if let Some(after_ms) = after_ms {
        clauses.push("created_at_ms >= ?");
        params.push(after_ms);
    }
    if let Some(before_ms) = before_ms {
        clauses.push("created_at_ms <= ?");
        params.push(before_ms);
    }

    let sql = format!(
        "SELECT COUNT(*) FROM {table} WHERE {clauses}",
        clauses = clauses.join(" AND "),
    );
    let count: i64 = conn
        .query_row(&sql, params_from_iter(params), |row| row.get(0))
        .with_context(|| format!("count rows in {table}"))?;
    Ok(count.max(0).unsigned_abs())
}
