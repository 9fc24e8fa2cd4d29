//! Paginated presence reports over a declared universe of users.
//!
//! A project's report must cover every declared member, including the
//! ones with no connection row at all. The merged ordering puts the
//! store-backed "present" block and the null-valued "absent" block next
//! to each other — never interleaved — and `vigil_core::merge::plan_page`
//! decides which slice of each block a page needs. Only the present slice
//! turns into a store sub-query; the absent id list is materialized once
//! per call and is bounded by the universe size.
//!
//! Absent rows keep the universe's given order; they have no sort key of
//! their own.

use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;

use vigil_core::error::EngineError;
use vigil_core::merge::{SortDirection, plan_page};
use vigil_core::model::{ConnectionCountRow, PresenceRow};

use crate::event_store::{
    connected_user_ids, connection_count_page, last_activity_page,
};

/// Last connection of every user in the universe, paginated.
///
/// Present rows are ordered by last activity in `direction`; absent users
/// form the trailing block under descending sort and the leading block
/// under ascending sort. `limit == 0` means no cap.
///
/// # Errors
///
/// Returns an error if a store query fails.
pub fn last_connection_of_users(
    conn: &Connection,
    project_id: i64,
    universe: &[i64],
    direction: SortDirection,
    limit: usize,
    offset: usize,
) -> Result<Vec<PresenceRow>> {
    let (absent, present_len) = absent_ids(conn, project_id, universe)?;
    let plan = plan_page(present_len, absent.len(), direction, limit, offset);

    let present_rows = if plan.present.is_empty() {
        Vec::new()
    } else {
        last_activity_page(
            conn,
            project_id,
            None,
            direction,
            plan.present.len(),
            plan.present.start,
        )?
    };
    let absent_rows = absent[plan.absent.clone()]
        .iter()
        .map(|&user_id| PresenceRow::absent(user_id));

    Ok(if plan.absent_first {
        absent_rows.chain(present_rows).collect()
    } else {
        present_rows.into_iter().chain(absent_rows).collect()
    })
}

/// Connection count of every user in the universe, paginated. Present
/// rows are ordered by count in `direction`; the absent block follows the
/// same contiguous-block rule.
///
/// # Errors
///
/// Returns an error if a store query fails.
pub fn connection_counts_of_users(
    conn: &Connection,
    project_id: i64,
    universe: &[i64],
    direction: SortDirection,
    limit: usize,
    offset: usize,
) -> Result<Vec<ConnectionCountRow>> {
    let (absent, present_len) = absent_ids(conn, project_id, universe)?;
    let plan = plan_page(present_len, absent.len(), direction, limit, offset);

    let present_rows = if plan.present.is_empty() {
        Vec::new()
    } else {
        connection_count_page(
            conn,
            project_id,
            None,
            direction,
            plan.present.len(),
            plan.present.start,
        )?
    };
    let absent_rows = absent[plan.absent.clone()]
        .iter()
        .map(|&user_id| ConnectionCountRow::absent(user_id));

    Ok(if plan.absent_first {
        absent_rows.chain(present_rows).collect()
    } else {
        present_rows.into_iter().chain(absent_rows).collect()
    })
}

/// Present-population page only: per-user last connection for users that
/// have at least one row, optionally filtered to a user subset.
///
/// # Errors
///
/// Returns an error if the aggregate query fails.
pub fn last_connection_in_project(
    conn: &Connection,
    project_id: i64,
    users: Option<&[i64]>,
    direction: SortDirection,
    limit: usize,
    offset: usize,
) -> Result<Vec<PresenceRow>> {
    last_activity_page(conn, project_id, users, direction, limit, offset)
}

/// Last connection of one declared user.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] when the user is not part of the
/// declared universe.
pub fn last_connection_of_user(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    universe: &[i64],
) -> Result<PresenceRow> {
    require_in_universe(user_id, universe)?;

    let mut rows = last_activity_page(
        conn,
        project_id,
        Some(&[user_id]),
        SortDirection::Desc,
        1,
        0,
    )?;
    Ok(rows.pop().unwrap_or(PresenceRow::absent(user_id)))
}

/// Number of sessions one declared user has in the project.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] when the user is not part of the
/// declared universe.
pub fn connection_frequency(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
    universe: &[i64],
) -> Result<u64> {
    require_in_universe(user_id, universe)?;

    let rows = connection_count_page(
        conn,
        project_id,
        Some(&[user_id]),
        SortDirection::Desc,
        1,
        0,
    )?;
    Ok(rows.first().and_then(|row| row.frequency).unwrap_or(0))
}

/// The absent id list (universe order preserved) and the present count.
fn absent_ids(
    conn: &Connection,
    project_id: i64,
    universe: &[i64],
) -> Result<(Vec<i64>, usize)> {
    let connected = connected_user_ids(conn, project_id)?;
    let connected_set: HashSet<i64> = connected.iter().copied().collect();
    let absent: Vec<i64> = universe
        .iter()
        .copied()
        .filter(|id| !connected_set.contains(id))
        .collect();
    Ok((absent, connected.len()))
}

fn require_in_universe(user_id: i64, universe: &[i64]) -> Result<()> {
    if universe.contains(&user_id) {
        Ok(())
    } else {
        Err(EngineError::NotFound {
            what: "user",
            id: user_id,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        connection_counts_of_users, connection_frequency, last_connection_of_user,
        last_connection_of_users,
    };
    use crate::event_store::{NewConnection, insert_connection, set_duration};
    use crate::open_store_in_memory;
    use vigil_core::error::EngineError;
    use vigil_core::merge::SortDirection;

    const PROJECT: i64 = 7;
    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;
    const D: i64 = 4;

    fn seed(conn: &rusqlite::Connection, user_id: i64, created_at_ms: i64) {
        let event = insert_connection(
            conn,
            &NewConnection {
                user_id,
                project_id: PROJECT,
                session_token: "tok",
                created_at_ms,
                metadata: serde_json::Value::Null,
            },
        )
        .expect("insert connection");
        set_duration(conn, event.event_id, 0).expect("close connection");
    }

    /// universe {A,B,C,D}; B and D have connections, B more recent.
    fn seeded_store() -> rusqlite::Connection {
        let conn = open_store_in_memory().expect("open store");
        seed(&conn, B, 5_000);
        seed(&conn, D, 4_000);
        conn
    }

    #[test]
    fn page_spans_present_and_absent_blocks() {
        let conn = seeded_store();
        // Present desc = [B, D]; absent = [A, C]. Page(limit=2, offset=1)
        // is the second present row then the first absent row.
        let page = last_connection_of_users(
            &conn,
            PROJECT,
            &[A, B, C, D],
            SortDirection::Desc,
            2,
            1,
        )
        .expect("merge page");

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].user_id, D);
        assert_eq!(page[0].last_activity_ms, Some(4_000));
        assert_eq!(page[1].user_id, A);
        assert_eq!(page[1].last_activity_ms, None);
    }

    #[test]
    fn pages_concatenate_to_the_full_universe() {
        let conn = seeded_store();
        let mut all = Vec::new();
        for offset in (0..4).step_by(2) {
            let page = last_connection_of_users(
                &conn,
                PROJECT,
                &[A, B, C, D],
                SortDirection::Desc,
                2,
                offset,
            )
            .expect("merge page");
            all.extend(page);
        }

        let users: Vec<i64> = all.iter().map(|row| row.user_id).collect();
        assert_eq!(users, vec![B, D, A, C]);
    }

    #[test]
    fn ascending_puts_the_absent_block_first() {
        let conn = seeded_store();
        let page = last_connection_of_users(
            &conn,
            PROJECT,
            &[A, B, C, D],
            SortDirection::Asc,
            0,
            0,
        )
        .expect("merge page");

        let users: Vec<i64> = page.iter().map(|row| row.user_id).collect();
        assert_eq!(users, vec![A, C, D, B]);
    }

    #[test]
    fn zero_limit_returns_the_remainder() {
        let conn = seeded_store();
        let page = last_connection_of_users(
            &conn,
            PROJECT,
            &[A, B, C, D],
            SortDirection::Desc,
            0,
            1,
        )
        .expect("merge page");
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].user_id, D);
    }

    #[test]
    fn count_merge_orders_by_frequency() {
        let conn = open_store_in_memory().expect("open store");
        seed(&conn, B, 1_000);
        seed(&conn, B, 2_000);
        seed(&conn, B, 3_000);
        seed(&conn, D, 9_000);

        let page = connection_counts_of_users(
            &conn,
            PROJECT,
            &[A, B, C, D],
            SortDirection::Desc,
            0,
            0,
        )
        .expect("merge page");

        assert_eq!(page[0].user_id, B);
        assert_eq!(page[0].frequency, Some(3));
        assert_eq!(page[1].user_id, D);
        assert_eq!(page[1].frequency, Some(1));
        assert_eq!(page[2].frequency, None);
        assert_eq!(page[3].frequency, None);
    }

    #[test]
    fn single_user_lookups_check_the_universe() {
        let conn = seeded_store();

        let row = last_connection_of_user(&conn, PROJECT, B, &[A, B, C, D]).expect("lookup");
        assert_eq!(row.last_activity_ms, Some(5_000));

        let row = last_connection_of_user(&conn, PROJECT, C, &[A, B, C, D]).expect("lookup");
        assert_eq!(row.last_activity_ms, None);

        let err = connection_frequency(&conn, PROJECT, 99, &[A, B, C, D])
            .expect_err("outside the universe");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotFound { what: "user", id: 99 })
        ));

        let count = connection_frequency(&conn, PROJECT, D, &[A, B, C, D]).expect("count");
        assert_eq!(count, 1);
    }
}
