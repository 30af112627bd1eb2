//! Error types for the rollguard core pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::catalog::FileKind;

#[derive(Debug, Error)]
pub enum RollguardError {
    #[error("could not classify {path:?}: {reason}")]
    Classification { path: PathBuf, reason: String },

    #[error("parse failure in {path:?}: {reason} ({rows_skipped} malformed rows skipped)")]
    Parse {
        path: PathBuf,
        reason: String,
        rows_skipped: usize,
    },

    #[error("record at {timestamp} has no usable {field}")]
    Validation {
        timestamp: DateTime<Utc>,
        field: &'static str,
    },

    #[error("no {kind} candidate matched anchor {anchor:?}")]
    NoMatch { kind: FileKind, anchor: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RollguardError>;
