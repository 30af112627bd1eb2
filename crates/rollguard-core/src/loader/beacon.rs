//! Loader for rotating-beacon state log files.
//!
//! Two columns, `timestamp;state`, one transition per row:
//!
//! ```text
//! 2024-05-12 10:00:00;ON
//! 2024-05-12 10:05:10;OFF
//! ```

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{finalize, parse_datetime, LoadOutcome, Timestamped};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconState {
    On,
    Off,
    /// The recorder logged a state token we do not recognize.
    Unknown,
}

impl BeaconState {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("on") {
            BeaconState::On
        } else if s.eq_ignore_ascii_case("off") {
            BeaconState::Off
        } else {
            BeaconState::Unknown
        }
    }
}

impl fmt::Display for BeaconState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeaconState::On => write!(f, "ON"),
            BeaconState::Off => write!(f, "OFF"),
            BeaconState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconRecord {
    pub timestamp: DateTime<Utc>,
    pub state: BeaconState,
}

impl Timestamped for BeaconRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

pub fn load(path: &Path) -> Result<LoadOutcome<BeaconRecord>> {
    let content = std::fs::read_to_string(path)?;

    let mut records = Vec::new();
    let mut rows_skipped = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, ';');
        let stamp = parts.next().unwrap_or_default();
        let state = parts.next();

        match (parse_datetime(stamp), state) {
            (Some(timestamp), Some(state)) => records.push(BeaconRecord {
                timestamp,
                state: BeaconState::parse(state.trim()),
            }),
            _ => rows_skipped += 1,
        }
    }

    if rows_skipped > 0 {
        debug!(path = %path.display(), rows_skipped, "skipped beacon rows");
    }

    finalize(records, rows_skipped, path, "no valid beacon rows")
}
