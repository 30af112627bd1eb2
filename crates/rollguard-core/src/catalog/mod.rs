//! File catalog: directory scanning, stream-kind classification, and
//! content-derived time intervals.
//!
//! The catalog never trusts filesystem metadata: a file's `[start, end)`
//! interval comes from its own embedded timestamps, reconstructed by the
//! matching stream loader. Files that cannot be classified or parsed are
//! recorded as [`FileKind::Unknown`] and excluded from correlation, never
//! silently assigned a default interval.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::loader;

/// The four recorder stream kinds, plus the explicit unknown bucket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum FileKind {
    Engine,
    Position,
    Inertial,
    Beacon,
    Unknown,
}

impl FileKind {
    /// The non-anchor kinds a complete session must match.
    pub const MATCHED: [FileKind; 3] = [FileKind::Position, FileKind::Inertial, FileKind::Beacon];

    /// Classify by case-insensitive filename token.
    ///
    /// Checked in order so that the beacon/GPS/IMU tokens win before the
    /// short engine token `can` gets a chance to false-positive.
    pub fn from_file_name(name: &str) -> FileKind {
        let name = name.to_ascii_lowercase();
        const TOKENS: &[(&str, FileKind)] = &[
            ("beacon", FileKind::Beacon),
            ("gps", FileKind::Position),
            ("position", FileKind::Position),
            ("imu", FileKind::Inertial),
            ("inertial", FileKind::Inertial),
            ("can", FileKind::Engine),
            ("engine", FileKind::Engine),
        ];
        for (token, kind) in TOKENS {
            if name.contains(token) {
                return *kind;
            }
        }
        FileKind::Unknown
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileKind::Engine => "engine",
            FileKind::Position => "position",
            FileKind::Inertial => "inertial",
            FileKind::Beacon => "beacon",
            FileKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One catalogued file with its content-derived half-open interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub kind: FileKind,
    pub vehicle_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FileDescriptor {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Signed overlap with another descriptor's interval:
    /// `min(end_a, end_b) - max(start_a, start_b)`. Positive means the
    /// intervals genuinely intersect.
    pub fn overlap_with(&self, other: &FileDescriptor) -> Duration {
        self.end.min(other.end) - self.start.max(other.start)
    }
}

/// Result of one directory scan.
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    /// Classified files with valid intervals, sorted by path.
    files: Vec<FileDescriptor>,
    /// Files excluded because no kind token or no parseable rows were found.
    pub unknown: Vec<PathBuf>,
    /// Live/unbounded recording variants, excluded before interval parsing.
    pub live_excluded: Vec<PathBuf>,
}

impl FileCatalog {
    /// Scan a directory tree and build the catalog.
    ///
    /// Per-file classification and interval parsing run in parallel; per-file
    /// failures are recorded, never propagated. Only a failure to list the
    /// root itself is an error.
    pub fn scan(root: &Path) -> Result<FileCatalog> {
        let mut paths = Vec::new();
        collect_files(root, &mut paths)?;
        paths.sort();

        let entries: Vec<CatalogEntry> = paths.par_iter().map(|p| catalog_one(p)).collect();

        let mut catalog = FileCatalog::default();
        for entry in entries {
            match entry {
                CatalogEntry::File(desc) => catalog.files.push(desc),
                CatalogEntry::Unknown(path) => catalog.unknown.push(path),
                CatalogEntry::Live(path) => catalog.live_excluded.push(path),
            }
        }

        debug!(
            files = catalog.files.len(),
            unknown = catalog.unknown.len(),
            live = catalog.live_excluded.len(),
            "catalog scan of {} complete",
            root.display()
        );
        Ok(catalog)
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn of_kind(&self, kind: FileKind) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter().filter(move |f| f.kind == kind)
    }

    /// Engine descriptors, the anchors that seed candidate sessions.
    pub fn anchors(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.of_kind(FileKind::Engine)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_descriptors(files: Vec<FileDescriptor>) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }
}

enum CatalogEntry {
    File(FileDescriptor),
    Unknown(PathBuf),
    Live(PathBuf),
}

fn catalog_one(path: &Path) -> CatalogEntry {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if is_live_recording(path, &name) {
        debug!(path = %path.display(), "excluding live recording variant");
        return CatalogEntry::Live(path.to_path_buf());
    }

    let kind = FileKind::from_file_name(&name);
    if kind == FileKind::Unknown {
        warn!(path = %path.display(), "no stream-kind token in file name");
        return CatalogEntry::Unknown(path.to_path_buf());
    }

    match loader::load_stream(kind, path) {
        Ok(loaded) => {
            // Loaders never return an empty stream, so the interval exists.
            let Some((start, end)) = loaded.records.interval() else {
                return CatalogEntry::Unknown(path.to_path_buf());
            };
            CatalogEntry::File(FileDescriptor {
                path: path.to_path_buf(),
                kind,
                vehicle_id: vehicle_id_for(path, &name),
                start,
                end,
            })
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "file excluded from catalog");
            CatalogEntry::Unknown(path.to_path_buf())
        }
    }
}

/// Live/realtime recording variants lack a terminal boundary and would
/// corrupt interval matching, so they are dropped before parsing.
fn is_live_recording(path: &Path, name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.contains("live") || lower.contains("realtime") {
        return true;
    }
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    content
        .lines()
        .take(5)
        .any(|l| l.trim_start().starts_with('#') && l.contains("mode:") && l.contains("live"))
}

/// Vehicle naming convention: leading `_`-separated token of the file stem,
/// falling back to the parent directory name.
fn vehicle_id_for(path: &Path, name: &str) -> String {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    if let Some((vehicle, _)) = stem.split_once('_') {
        return vehicle.to_string();
    }
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| stem.to_string())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine_file(dir: &Path, name: &str, start: &str, rows: usize) {
        let mut content = format!("# start: {start}\ntime;speed_kmh\n");
        for j in 0..rows {
            content.push_str(&format!("{}.0;40.0\n", j));
        }
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn classifies_by_filename_token() {
        assert_eq!(FileKind::from_file_name("truck-07_can_2024-05-12_001.log"), FileKind::Engine);
        assert_eq!(FileKind::from_file_name("truck-07_gps_2024-05-12_001.log"), FileKind::Position);
        assert_eq!(FileKind::from_file_name("TRUCK-07_IMU_2024-05-12_001.LOG"), FileKind::Inertial);
        assert_eq!(FileKind::from_file_name("truck-07_beacon_2024-05-12_001.log"), FileKind::Beacon);
        assert_eq!(FileKind::from_file_name("notes.txt"), FileKind::Unknown);
    }

    #[test]
    fn beacon_token_is_not_mistaken_for_engine() {
        // "beacon" must be checked before the short token "can".
        assert_eq!(FileKind::from_file_name("v1_beacon_x.log"), FileKind::Beacon);
    }

    #[test]
    fn scan_extracts_content_intervals() {
        let dir = tempfile::tempdir().unwrap();
        engine_file(dir.path(), "truck-07_can_2024-05-12_001.log", "2024-05-12 10:00:00", 61);

        let catalog = FileCatalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.files().len(), 1);
        let desc = &catalog.files()[0];
        assert_eq!(desc.kind, FileKind::Engine);
        assert_eq!(desc.vehicle_id, "truck-07");
        assert_eq!((desc.end - desc.start).num_seconds(), 60);
        assert!(desc.start <= desc.end);
    }

    #[test]
    fn live_variants_are_excluded_by_name_and_by_header() {
        let dir = tempfile::tempdir().unwrap();
        engine_file(dir.path(), "truck-07_can_live_001.log", "2024-05-12 10:00:00", 5);
        fs::write(
            dir.path().join("truck-07_can_002.log"),
            "# mode: live\n# start: 2024-05-12 10:00:00\ntime;speed_kmh\n0.0;40.0\n",
        )
        .unwrap();
        engine_file(dir.path(), "truck-07_can_003.log", "2024-05-12 11:00:00", 5);

        let catalog = FileCatalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.files().len(), 1);
        assert_eq!(catalog.live_excluded.len(), 2);
    }

    #[test]
    fn unparseable_file_is_catalogued_as_unknown_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("truck-07_can_004.log"), "complete nonsense\n").unwrap();

        let catalog = FileCatalog::scan(dir.path()).unwrap();
        assert!(catalog.files().is_empty());
        assert_eq!(catalog.unknown.len(), 1);
    }

    #[test]
    fn vehicle_id_falls_back_to_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("truck-09");
        fs::create_dir(&sub).unwrap();
        engine_file(&sub, "can.log", "2024-05-12 10:00:00", 3);

        let catalog = FileCatalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.files()[0].vehicle_id, "truck-09");
    }

    #[test]
    fn rescan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        engine_file(dir.path(), "truck-07_can_001.log", "2024-05-12 10:00:00", 10);
        fs::write(
            dir.path().join("truck-07_gps_001.log"),
            "2024-05-12,10:00:01,41.0,2.0,35.0,41.8,1,8\n2024-05-12,10:00:02,41.1,2.1,35.0,41.9,1,8\n",
        )
        .unwrap();

        let a = FileCatalog::scan(dir.path()).unwrap();
        let b = FileCatalog::scan(dir.path()).unwrap();
        assert_eq!(a.files(), b.files());
    }
}
