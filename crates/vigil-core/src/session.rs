//! Active-time reconstruction from raw heartbeat timestamps.
//!
//! A session's active duration is the sum of the small gaps between
//! consecutive heartbeats inside its window. Gaps at or above the idle
//! threshold are dead air and do not count; the tail after the last
//! heartbeat is never counted because nothing bounds it.

use crate::error::EngineError;

/// Gap length below which consecutive heartbeats count as continuous
/// activity. 30 seconds, matching the client polling cadence.
pub const IDLE_THRESHOLD_MS: i64 = 30_000;

/// Sum the collapsed intra-session gaps for heartbeats strictly within
/// `(window_start_ms, window_end_ms]`, sorted ascending.
///
/// The cursor starts at the window start and always advances to each
/// heartbeat, whether or not its gap was counted. The result is
/// deterministic and never negative; an empty heartbeat list yields 0.
///
/// # Errors
///
/// Returns [`EngineError::InvalidWindow`] when the window end precedes
/// its start.
pub fn active_duration(
    window_start_ms: i64,
    window_end_ms: i64,
    idle_threshold_ms: i64,
    pings: &[i64],
) -> Result<i64, EngineError> {
    if window_end_ms < window_start_ms {
        return Err(EngineError::InvalidWindow {
            start_ms: window_start_ms,
            end_ms: window_end_ms,
        });
    }

    let mut cursor = window_start_ms;
    let mut total = 0_i64;
    for &ts in pings {
        let gap = ts - cursor;
        if (0..idle_threshold_ms).contains(&gap) {
            total += gap;
        }
        cursor = ts;
    }

    // Non-negative by construction; the clamp is the asserted property.
    Ok(total.max(0))
}
