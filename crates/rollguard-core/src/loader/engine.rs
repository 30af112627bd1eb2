//! Loader for decoded engine/CAN log files.
//!
//! The upstream bus-signal decoder has already turned raw CAN frames into
//! physical-unit values, so the grammar here is just a base-date header, a
//! column-name row, and rows of elapsed seconds plus named numeric fields:
//!
//! ```text
//! # recorder: can  vehicle: truck-07
//! # start: 2024-05-12 10:00:00
//! time;speed_kmh;engine_rpm;oil_press_bar
//! 0.0;42.5;1810;3.1
//! 0.5;42.9;1815;3.1
//! ```
//!
//! Recorders restart mid-file: a second `# start:` header re-bases the elapsed
//! column for every row that follows, and repeated column rows are tolerated.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{finalize, parse_start_header, LoadOutcome, Timestamped};
use crate::error::Result;

/// One decoded engine row: an absolute timestamp plus named numeric signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRecord {
    pub timestamp: DateTime<Utc>,
    /// Signal name/value pairs in file column order.
    pub fields: Vec<(String, f64)>,
}

impl EngineRecord {
    /// Look up a named signal value.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl Timestamped for EngineRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

pub fn load(path: &Path) -> Result<LoadOutcome<EngineRecord>> {
    let content = std::fs::read_to_string(path)?;

    let mut base: Option<DateTime<Utc>> = None;
    let mut columns: Option<Vec<String>> = None;
    let mut records = Vec::new();
    let mut rows_skipped = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Some(start) = parse_start_header(line) {
                // Recorder restart: subsequent elapsed values count from here.
                base = Some(start);
            }
            continue;
        }

        let parts: Vec<&str> = line.split(';').map(str::trim).collect();

        if parts
            .first()
            .is_some_and(|first| first.eq_ignore_ascii_case("time"))
        {
            columns = Some(parts.iter().skip(1).map(|s| s.to_string()).collect());
            continue;
        }

        let (Some(base), Some(columns)) = (base, columns.as_ref()) else {
            rows_skipped += 1;
            continue;
        };

        let values: Option<Vec<f64>> = parts.iter().map(|p| p.parse::<f64>().ok()).collect();
        let Some(values) = values else {
            rows_skipped += 1;
            continue;
        };
        if values.len() != columns.len() + 1 {
            rows_skipped += 1;
            continue;
        }

        let elapsed_ms = (values[0] * 1000.0).round() as i64;
        records.push(EngineRecord {
            timestamp: base + Duration::milliseconds(elapsed_ms),
            fields: columns.iter().cloned().zip(values[1..].iter().copied()).collect(),
        });
    }

    if rows_skipped > 0 {
        debug!(path = %path.display(), rows_skipped, "skipped malformed engine rows");
    }

    let empty_reason = if base.is_none() {
        "missing '# start:' header"
    } else if columns.is_none() {
        "missing column header row"
    } else {
        "no valid engine rows"
    };
    finalize(records, rows_skipped, path, empty_reason)
}
