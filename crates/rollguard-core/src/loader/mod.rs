//! Stream loaders for the four recorder log grammars.
//!
//! Each loader turns one on-disk file into an ordered sequence of timestamped
//! records. Ordering is a postcondition, not an assumption: recorders produce
//! out-of-order rows and duplicated header blocks in the wild, so every loader
//! re-sorts by timestamp and drops exact-duplicate timestamps (first wins).
//!
//! Malformed rows are skipped and counted. A file that yields zero valid rows
//! after skipping returns [`RollguardError::Parse`] so callers can tell
//! "format not understood" apart from a genuinely empty result.

pub mod beacon;
pub mod engine;
pub mod inertial;
pub mod position;

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

pub use beacon::{BeaconRecord, BeaconState};
pub use engine::EngineRecord;
pub use inertial::InertialRecord;
pub use position::PositionRecord;

use crate::catalog::FileKind;
use crate::error::{Result, RollguardError};

/// A loaded stream plus parse bookkeeping.
#[derive(Debug, Clone)]
pub struct LoadOutcome<T> {
    /// Records sorted by timestamp, duplicate timestamps removed.
    pub records: Vec<T>,
    /// Malformed or no-data rows skipped during parsing.
    pub rows_skipped: usize,
}

/// Records of any of the four stream kinds.
#[derive(Debug, Clone)]
pub enum StreamRecords {
    Engine(Vec<EngineRecord>),
    Position(Vec<PositionRecord>),
    Inertial(Vec<InertialRecord>),
    Beacon(Vec<BeaconRecord>),
}

impl StreamRecords {
    pub fn len(&self) -> usize {
        match self {
            StreamRecords::Engine(v) => v.len(),
            StreamRecords::Position(v) => v.len(),
            StreamRecords::Inertial(v) => v.len(),
            StreamRecords::Beacon(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First and last record timestamps. `None` only for an empty stream,
    /// which the loaders never return.
    pub fn interval(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        fn bounds<T: Timestamped>(v: &[T]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
            Some((v.first()?.timestamp(), v.last()?.timestamp()))
        }
        match self {
            StreamRecords::Engine(v) => bounds(v),
            StreamRecords::Position(v) => bounds(v),
            StreamRecords::Inertial(v) => bounds(v),
            StreamRecords::Beacon(v) => bounds(v),
        }
    }
}

/// One file's records behind the kind-erased [`StreamRecords`] wrapper.
#[derive(Debug, Clone)]
pub struct LoadedStream {
    pub records: StreamRecords,
    pub rows_skipped: usize,
}

/// Load the stream grammar matching `kind` from `path`.
pub fn load_stream(kind: FileKind, path: &Path) -> Result<LoadedStream> {
    let (records, rows_skipped) = match kind {
        FileKind::Engine => {
            let o = engine::load(path)?;
            (StreamRecords::Engine(o.records), o.rows_skipped)
        }
        FileKind::Position => {
            let o = position::load(path)?;
            (StreamRecords::Position(o.records), o.rows_skipped)
        }
        FileKind::Inertial => {
            let o = inertial::load(path)?;
            (StreamRecords::Inertial(o.records), o.rows_skipped)
        }
        FileKind::Beacon => {
            let o = beacon::load(path)?;
            (StreamRecords::Beacon(o.records), o.rows_skipped)
        }
        FileKind::Unknown => {
            return Err(RollguardError::Classification {
                path: path.to_path_buf(),
                reason: "cannot load a stream of unknown kind".to_string(),
            })
        }
    };
    Ok(LoadedStream {
        records,
        rows_skipped,
    })
}

/// Anything keyed by an absolute timestamp.
pub(crate) trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Enforce the ordering postcondition and the zero-valid-rows failure policy.
pub(crate) fn finalize<T: Timestamped>(
    mut records: Vec<T>,
    rows_skipped: usize,
    path: &Path,
    empty_reason: &str,
) -> Result<LoadOutcome<T>> {
    if records.is_empty() {
        return Err(RollguardError::Parse {
            path: path.to_path_buf(),
            reason: empty_reason.to_string(),
            rows_skipped,
        });
    }
    records.sort_by_key(|r| r.timestamp());
    records.dedup_by_key(|r| r.timestamp());
    Ok(LoadOutcome {
        records,
        rows_skipped,
    })
}

/// Parse a `YYYY-MM-DD HH:MM:SS` wall-clock stamp as UTC.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Extract the base date/time from a `# start: ...` header line.
pub(crate) fn parse_start_header(line: &str) -> Option<DateTime<Utc>> {
    let rest = line.trim().strip_prefix('#')?.trim();
    let value = rest.strip_prefix("start:")?;
    parse_datetime(value)
}

/// Split a data row on `;` when present, else on `,`.
pub(crate) fn split_flexible(line: &str) -> Vec<&str> {
    let sep = if line.contains(';') { ';' } else { ',' };
    line.split(sep).map(str::trim).collect()
}
