//! Calendar-aligned time bucketing of event timestamps.
//!
//! Bucket boundaries are computed after converting each timestamp into an
//! explicit reference timezone, never the host-local zone: rows written by
//! clients in different offsets must land in the same "day" no matter
//! where this code runs. The timezone is a generic [`TimeZone`] parameter
//! threaded through every call, so `Utc`, a fixed offset, or a DST-aware
//! zone implementation all work.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{Datelike, Days, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Alignment unit for time-series aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Truncate minutes, seconds, and sub-second parts.
    Hour,
    /// Additionally truncate the hour.
    Day,
    /// Additionally align to the Monday of the ISO week.
    Week,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hour => f.write_str("hour"),
            Self::Day => f.write_str("day"),
            Self::Week => f.write_str("week"),
        }
    }
}

impl FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            other => bail!("unknown granularity '{other}': expected hour, day, or week"),
        }
    }
}

/// One bucket of the aggregated series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Calendar boundary in the reference timezone, as epoch ms. This is
    /// the grouping key.
    pub bucket_key_ms: i64,
    /// Earliest raw timestamp that fell into the bucket. Display only,
    /// never used for grouping.
    pub bucket_start_ms: i64,
    pub count: u64,
}

/// One bucket of a normalized series: counts turned into relative
/// frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBucket {
    pub bucket_key_ms: i64,
    pub bucket_start_ms: i64,
    pub frequency: f64,
}

/// Truncate a timestamp to its bucket boundary in the reference timezone.
///
/// A pure function of (timestamp, granularity, timezone): re-aggregating
/// the same events always yields the same keys.
///
/// # Errors
///
/// Returns [`EngineError::TimestampOutOfRange`] when the timestamp cannot
/// be represented, or when the truncated boundary falls into a DST gap
/// with no valid local time.
pub fn bucket_key<Tz: TimeZone>(
    ts_ms: i64,
    granularity: Granularity,
    tz: &Tz,
) -> Result<i64, EngineError> {
    let out_of_range = EngineError::TimestampOutOfRange { ms: ts_ms };

    let utc = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or(out_of_range)?;
    let local = utc.with_timezone(tz);
    let date = local.date_naive();

    let boundary = match granularity {
        Granularity::Hour => date.and_hms_opt(local.hour(), 0, 0),
        Granularity::Day => date.and_hms_opt(0, 0, 0),
        Granularity::Week => {
            let monday_offset = u64::from(date.weekday().num_days_from_monday());
            date.checked_sub_days(Days::new(monday_offset))
                .and_then(|monday| monday.and_hms_opt(0, 0, 0))
        }
    }
    .ok_or(out_of_range)?;

    let aligned = tz
        .from_local_datetime(&boundary)
        .earliest()
        .ok_or(out_of_range)?;
    Ok(aligned.timestamp_millis())
}

/// Group timestamps into calendar buckets and count members.
///
/// Returns buckets ordered by key. Callers apply their filters *before*
/// handing timestamps in, so boundaries are computed only from events
/// actually included.
///
/// # Errors
///
/// Fails on the first unrepresentable timestamp; no partial series is
/// returned.
pub fn bucket<Tz: TimeZone>(
    timestamps: &[i64],
    granularity: Granularity,
    tz: &Tz,
) -> Result<Vec<TimeBucket>, EngineError> {
    let mut grouped: BTreeMap<i64, (i64, u64)> = BTreeMap::new();
    for &ts in timestamps {
        let key = bucket_key(ts, granularity, tz)?;
        let entry = grouped.entry(key).or_insert((ts, 0));
        entry.0 = entry.0.min(ts);
        entry.1 += 1;
    }

    Ok(grouped
        .into_iter()
        .map(|(bucket_key_ms, (bucket_start_ms, count))| TimeBucket {
            bucket_key_ms,
            bucket_start_ms,
            count,
        })
        .collect())
}

/// Post-process a count series into relative frequencies.
///
/// The denominator is `max(1, total)`, so a degenerate all-zero series
/// normalizes to all-zero frequencies instead of dividing by zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn normalize(buckets: &[TimeBucket]) -> Vec<FrequencyBucket> {
    let total: u64 = buckets.iter().map(|b| b.count).sum();
    let denominator = total.max(1) as f64;

    buckets
        .iter()
        .map(|b| FrequencyBucket {
            bucket_key_ms: b.bucket_key_ms,
            bucket_start_ms: b.bucket_start_ms,
            frequency: b.count as f64 / denominator,
        })
        .collect()
}
