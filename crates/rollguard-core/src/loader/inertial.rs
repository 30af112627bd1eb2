//! Loader for inertial (stability sensor) log files.
//!
//! The recorder writes a base date/time header and a column row, then data
//! rows with no per-row timestamp. Periodically it re-stamps the stream with
//! a bare wall-clock time on its own line:
//!
//! ```text
//! # start: 2024-05-12 10:00:00
//! ax;ay;az;gx;gy;gz;roll;pitch;yaw;stability
//! 0.02;-0.15;9.78;0.001;0.002;0.010;1.2;0.4;183.0;0.93
//! ...
//! 10:00:10
//! 0.03;-0.18;9.77;0.001;0.002;0.011;1.3;0.4;183.2;0.93
//! ```
//!
//! Rows in a block of `n` between anchor times `t0` and `t1` are evenly
//! distributed: row `j` gets `t0 + j*(t1-t0)/(n-1)`. When `n == 1`, the
//! interval is non-positive, or the block is never closed by another anchor,
//! rows fall back to one-second spacing from `t0`. Adjacent blocks share
//! their boundary anchor, so the resulting duplicate timestamps are removed
//! by the common ordering postcondition.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{finalize, parse_start_header, LoadOutcome, Timestamped};
use crate::error::{Result, RollguardError};

/// One inertial sensor row with its reconstructed absolute timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InertialRecord {
    pub timestamp: DateTime<Utc>,
    /// Acceleration in m/s^2, axes x/y/z (y = lateral).
    pub accel: [f64; 3],
    /// Angular rate in rad/s, axes x/y/z (x = roll, z = yaw).
    pub gyro: [f64; 3],
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    /// Stability index supplied by the sensor itself, in [0, 1].
    pub stability_index: f64,
}

impl InertialRecord {
    pub fn lateral_accel(&self) -> f64 {
        self.accel[1]
    }

    pub fn roll_rate(&self) -> f64 {
        self.gyro[0]
    }

    pub fn yaw_rate(&self) -> f64 {
        self.gyro[2]
    }
}

impl Timestamped for InertialRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Field values of a data row, before a timestamp has been assigned.
type RawRow = [f64; 10];

pub fn load(path: &Path) -> Result<LoadOutcome<InertialRecord>> {
    let content = std::fs::read_to_string(path)?;

    let mut base: Option<DateTime<Utc>> = None;
    let mut anchor: Option<DateTime<Utc>> = None;
    let mut pending: Vec<RawRow> = Vec::new();
    let mut records = Vec::new();
    let mut rows_skipped = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Some(start) = parse_start_header(line) {
                base = Some(start);
                anchor.get_or_insert(start);
            }
            continue;
        }

        if let Some(time) = parse_anchor_row(line) {
            let Some(t0) = anchor else {
                // Anchor before any '# start:' header gives us a time of day
                // with no date to hang it on.
                rows_skipped += 1;
                continue;
            };
            let t1 = resolve_anchor(t0, time);
            close_block(&mut records, &mut pending, t0, Some(t1));
            anchor = Some(t1);
            continue;
        }

        match parse_data_row(line) {
            Some(row) => {
                if anchor.is_none() {
                    // Data before the header cannot be stamped.
                    rows_skipped += 1;
                } else {
                    pending.push(row);
                }
            }
            None => {
                // Column header row or garbage.
                if !is_column_header(line) {
                    rows_skipped += 1;
                }
            }
        }
    }

    if let Some(t0) = anchor {
        close_block(&mut records, &mut pending, t0, None);
    }

    if base.is_none() {
        return Err(RollguardError::Parse {
            path: path.to_path_buf(),
            reason: "missing '# start:' header".to_string(),
            rows_skipped,
        });
    }
    if rows_skipped > 0 {
        debug!(path = %path.display(), rows_skipped, "skipped inertial rows");
    }

    finalize(records, rows_skipped, path, "no valid inertial rows")
}

/// Assign timestamps to the rows collected since the previous anchor.
///
/// `t1 == None` means the block was never closed (end of file): fall back to
/// one-second spacing, as for degenerate intervals.
fn close_block(
    records: &mut Vec<InertialRecord>,
    pending: &mut Vec<RawRow>,
    t0: DateTime<Utc>,
    t1: Option<DateTime<Utc>>,
) {
    let n = pending.len();
    if n == 0 {
        return;
    }

    let span_ms = t1.map(|t1| (t1 - t0).num_milliseconds());
    for (j, row) in pending.drain(..).enumerate() {
        let offset = match span_ms {
            Some(span) if n > 1 && span > 0 => {
                Duration::milliseconds((span as f64 * j as f64 / (n - 1) as f64).round() as i64)
            }
            _ => Duration::seconds(j as i64),
        };
        records.push(from_raw(row, t0 + offset));
    }
}

fn from_raw(row: RawRow, timestamp: DateTime<Utc>) -> InertialRecord {
    InertialRecord {
        timestamp,
        accel: [row[0], row[1], row[2]],
        gyro: [row[3], row[4], row[5]],
        roll_deg: row[6],
        pitch_deg: row[7],
        yaw_deg: row[8],
        stability_index: row[9],
    }
}

/// A bare `HH:MM:SS` on its own line re-anchors the stream.
fn parse_anchor_row(line: &str) -> Option<NaiveTime> {
    if line.contains(';') || line.contains(',') {
        return None;
    }
    NaiveTime::parse_from_str(line, "%H:%M:%S").ok()
}

/// Combine the running anchor's date with a re-stamp time of day. A smaller
/// time of day than the current anchor means the block crossed midnight.
fn resolve_anchor(t0: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let candidate = t0.date_naive().and_time(time).and_utc();
    if candidate < t0 {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

fn parse_data_row(line: &str) -> Option<RawRow> {
    let parts: Vec<&str> = line.split(';').map(str::trim).collect();
    if parts.len() != 10 {
        return None;
    }
    let mut row = [0.0; 10];
    for (slot, part) in row.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    Some(row)
}

fn is_column_header(line: &str) -> bool {
    line.split(';')
        .next()
        .is_some_and(|first| first.trim().eq_ignore_ascii_case("ax"))
}
