//! Loader for GPS position log files.
//!
//! Rows are `date, time, lat, lon, altitude, speed, fix, satellites, ...`
//! with either `,` or `;` as the delimiter (receivers disagree, sometimes
//! within one file). Rows carrying the receiver's literal `NO DATA` marker
//! are skipped, never zero-filled.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{finalize, split_flexible, LoadOutcome, Timestamped};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub speed_kmh: f64,
    pub fix_quality: u8,
    pub satellites: u8,
}

impl Timestamped for PositionRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

pub fn load(path: &Path) -> Result<LoadOutcome<PositionRecord>> {
    let content = std::fs::read_to_string(path)?;

    let mut records = Vec::new();
    let mut rows_skipped = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains("NO DATA") {
            rows_skipped += 1;
            continue;
        }

        match parse_row(line) {
            Some(record) => records.push(record),
            None => rows_skipped += 1,
        }
    }

    if rows_skipped > 0 {
        debug!(path = %path.display(), rows_skipped, "skipped position rows");
    }

    finalize(records, rows_skipped, path, "no valid position rows")
}

fn parse_row(line: &str) -> Option<PositionRecord> {
    let parts = split_flexible(line);
    if parts.len() < 8 {
        return None;
    }

    let date = NaiveDate::parse_from_str(parts[0], "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(parts[1], "%H:%M:%S").ok()?;

    Some(PositionRecord {
        timestamp: date.and_time(time).and_utc(),
        latitude: parts[2].parse().ok()?,
        longitude: parts[3].parse().ok()?,
        altitude_m: parts[4].parse().ok()?,
        speed_kmh: parts[5].parse().ok()?,
        fix_quality: parts[6].parse().ok()?,
        satellites: parts[7].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_comma_and_semicolon_rows_in_one_file() {
        let f = write_file(
            "2024-05-12,10:00:01,41.38222,2.17694,35.0,41.8,1,8\n\
             2024-05-12;10:00:02;41.38230;2.17701;35.2;42.1;1;8\n",
        );
        let out = load(f.path()).unwrap();
        assert_eq!(out.records.len(), 2);
        assert!((out.records[0].latitude - 41.38222).abs() < 1e-9);
        assert_eq!(out.records[1].satellites, 8);
    }

    #[test]
    fn no_data_rows_are_skipped_not_zero_filled() {
        let f = write_file(
            "2024-05-12,10:00:01,41.38222,2.17694,35.0,41.8,1,8\n\
             2024-05-12,10:00:02,NO DATA\n\
             2024-05-12,10:00:03,41.38230,2.17701,35.2,42.1,1,8\n",
        );
        let out = load(f.path()).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rows_skipped, 1);
        assert!(out.records.iter().all(|r| r.latitude != 0.0));
    }

    #[test]
    fn trailing_extra_fields_are_tolerated() {
        let f = write_file("2024-05-12,10:00:01,41.38222,2.17694,35.0,41.8,1,8,hdop=0.9,extra\n");
        let out = load(f.path()).unwrap();
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn duplicate_timestamps_are_deduplicated_first_wins() {
        let f = write_file(
            "2024-05-12,10:00:01,41.0,2.0,35.0,41.8,1,8\n\
             2024-05-12,10:00:01,99.0,9.0,35.0,41.8,1,8\n",
        );
        let out = load(f.path()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!((out.records[0].latitude - 41.0).abs() < 1e-9);
    }

    #[test]
    fn all_rows_no_data_is_a_parse_error() {
        let f = write_file("2024-05-12,10:00:02,NO DATA\n2024-05-12,10:00:03,NO DATA\n");
        assert!(load(f.path()).is_err());
    }
}
