//! Page planning for the present/absent presence merge.
//!
//! A presence report covers a declared universe of user ids, but only
//! some of those users have connection rows ("present"). The rest
//! ("absent") are materialized as null-valued rows that collate smallest
//! under ascending order and largest under descending order, so the two
//! populations never interleave: one contiguous block follows the other.
//!
//! [`plan_page`] is the whole pagination algorithm as a pure function of
//! the two block sizes. The store layer turns the present range into a
//! `LIMIT`/`OFFSET` sub-query and slices the absent id list; nothing here
//! touches storage, which keeps every boundary case unit-testable.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use anyhow::bail;

/// Sort direction of the backing presence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Absent block first, then present rows oldest-first.
    Asc,
    /// Present rows newest-first, then the absent block.
    #[default]
    Desc,
}

impl SortDirection {
    #[must_use]
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => bail!("unknown sort direction '{other}': expected asc or desc"),
        }
    }
}

/// Index ranges for one page of a merged presence report.
///
/// `present` indexes into the store-ordered present population (issue it
/// as an offset/limit sub-query); `absent` indexes into the materialized
/// absent id list. `absent_first` says which block leads in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub present: Range<usize>,
    pub absent: Range<usize>,
    pub absent_first: bool,
}

impl PagePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present.is_empty() && self.absent.is_empty()
    }

    /// Total rows this page will produce.
    #[must_use]
    pub fn len(&self) -> usize {
        self.present.len() + self.absent.len()
    }
}

/// Compute the page of the merged (present ∪ absent) ordering starting at
/// `offset`, at most `limit` rows.
///
/// `limit == 0` is the documented "no cap" signal: everything from
/// `offset` to the end of the merged ordering. This is a historical
/// convention preserved on purpose, not a falsy-value accident.
///
/// The present range never exceeds `limit` rows, so the backing store is
/// never asked for more than one page.
#[must_use]
pub fn plan_page(
    present_len: usize,
    absent_len: usize,
    direction: SortDirection,
    limit: usize,
    offset: usize,
) -> PagePlan {
    let total = present_len + absent_len;
    let cap = if limit == 0 {
        total.saturating_sub(offset)
    } else {
        limit
    };

    // Under descending sort the present block leads; ascending mirrors it.
    let (first_len, second_len) = match direction {
        SortDirection::Desc => (present_len, absent_len),
        SortDirection::Asc => (absent_len, present_len),
    };

    let first_start = offset.min(first_len);
    let first_take = (first_len - first_start).min(cap);
    let first = first_start..first_start + first_take;

    let second_start = offset.saturating_sub(first_len).min(second_len);
    let second_take = (second_len - second_start).min(cap - first_take);
    let second = second_start..second_start + second_take;

    match direction {
        SortDirection::Desc => PagePlan {
            present: first,
            absent: second,
            absent_first: false,
        },
        SortDirection::Asc => PagePlan {
            present: second,
            absent: first,
            absent_first: true,
        },
    }
}
