//! Presence merges and calendar reports over a store populated through
//! the real write path (session lifecycle, not raw inserts).

use chrono::Utc;
use rusqlite::Connection;

use vigil_core::bucket::Granularity;
use vigil_core::config::EngineConfig;
use vigil_core::merge::SortDirection;
use vigil_store::lifecycle::{close_if_open, start_session};
use vigil_store::open_store_in_memory;
use vigil_store::presence::{connection_frequency, last_connection_of_users};
use vigil_store::reports::{
    ReportFilter, bucketed_counts, bucketed_frequencies, count_connections,
    total_connections_by_project,
};

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

const PROJECT: i64 = 7;
const UNIVERSE: [i64; 4] = [10, 11, 12, 13];

fn ms(rfc3339: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid timestamp")
        .timestamp_millis()
}

fn session(conn: &mut Connection, user_id: i64, at_ms: i64) {
    let config = EngineConfig::default();
    start_session(
        conn,
        &config,
        user_id,
        PROJECT,
        "tok",
        serde_json::Value::Null,
        at_ms,
    )
    .expect("start session");
    // The close lookup is strictly-before, so close a beat later.
    close_if_open(conn, &config, user_id, PROJECT, at_ms + 1_000).expect("close session");
}

/// Users 11 and 13 connect; 13 straddles midnight with two sessions.
fn seeded_store() -> Connection {
    let mut conn = open_store_in_memory().expect("open store");
    session(&mut conn, 11, ms("2024-01-01T10:00:00Z"));
    session(&mut conn, 13, ms("2024-01-01T23:50:00Z"));
    session(&mut conn, 13, ms("2024-01-02T00:10:00Z"));
    conn
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn merge_covers_connected_and_never_connected_users() {
    let conn = seeded_store();

    let page = last_connection_of_users(
        &conn,
        PROJECT,
        &UNIVERSE,
        SortDirection::Desc,
        0,
        0,
    )
    .expect("merge page");

    let users: Vec<i64> = page.iter().map(|row| row.user_id).collect();
    assert_eq!(users, vec![13, 11, 10, 12]);
    assert_eq!(page[0].last_activity_ms, Some(ms("2024-01-02T00:10:00Z")));
    assert!(page[2].last_activity_ms.is_none());
    assert!(page[3].last_activity_ms.is_none());
}

#[test]
fn merge_pages_partition_the_universe() {
    let conn = seeded_store();

    let mut all = Vec::new();
    for offset in (0..UNIVERSE.len()).step_by(2) {
        let page = last_connection_of_users(
            &conn,
            PROJECT,
            &UNIVERSE,
            SortDirection::Desc,
            2,
            offset,
        )
        .expect("merge page");
        assert_eq!(page.len(), 2);
        all.extend(page);
    }
    let users: Vec<i64> = all.iter().map(|row| row.user_id).collect();
    assert_eq!(users, vec![13, 11, 10, 12]);
}

#[test]
fn frequency_counts_reflect_the_lifecycle() {
    let conn = seeded_store();
    assert_eq!(
        connection_frequency(&conn, PROJECT, 13, &UNIVERSE).expect("count"),
        2
    );
    assert_eq!(
        connection_frequency(&conn, PROJECT, 10, &UNIVERSE).expect("count"),
        0
    );
}

#[test]
fn daily_buckets_split_at_midnight() {
    let conn = seeded_store();
    let filter = ReportFilter {
        project_id: Some(PROJECT),
        ..ReportFilter::default()
    };

    let buckets =
        bucketed_counts(&conn, &filter, Granularity::Day, &Utc).expect("bucketed counts");
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].bucket_key_ms, ms("2024-01-01T00:00:00Z"));
    assert_eq!(buckets[0].count, 2);
    assert_eq!(buckets[0].bucket_start_ms, ms("2024-01-01T10:00:00Z"));
    assert_eq!(buckets[1].bucket_key_ms, ms("2024-01-02T00:00:00Z"));
    assert_eq!(buckets[1].count, 1);
}

#[test]
fn frequencies_and_totals_agree_with_the_counts() {
    let conn = seeded_store();
    let filter = ReportFilter {
        project_id: Some(PROJECT),
        ..ReportFilter::default()
    };

    let now = ms("2024-02-01T00:00:00Z");
    let frequencies =
        bucketed_frequencies(&conn, &filter, Granularity::Day, &Utc, now).expect("report");
    assert_eq!(frequencies.len(), 2);
    assert!((frequencies[0].frequency - 2.0 / 3.0).abs() < 1e-9);
    assert!((frequencies[1].frequency - 1.0 / 3.0).abs() < 1e-9);

    assert_eq!(count_connections(&conn, PROJECT, None, None).expect("count"), 3);

    let totals = total_connections_by_project(&conn).expect("totals");
    assert_eq!(totals.len(), 1);
    assert_eq!((totals[0].project_id, totals[0].total), (PROJECT, 3));
}
