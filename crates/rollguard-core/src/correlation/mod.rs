//! Session correlation engine.
//!
//! Reconstructs driving sessions by matching, for every engine (anchor) file,
//! the best candidate file of each other stream kind. Matching is one
//! configurable policy, not a family of near-duplicate code paths: a
//! candidate must pass the early-bound rule and the strict-overlap rule, and
//! the winner maximizes overlap duration.
//!
//! The engine is a pure function of the catalog: correlating the same catalog
//! twice yields identical sessions, so a crashed run can simply be
//! re-executed and deduplicated by the persistence collaborator.
//!
//! Known limitation: matching is anchor-driven. If an engine file is itself
//! imperfectly bounded (recorder crash mid-trip), candidates for the other
//! kinds degrade silently; no fallback matching direction is attempted.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{FileCatalog, FileDescriptor, FileKind};
use crate::config::PipelineConfig;
use crate::error::{Result, RollguardError};

/// Parameters of the candidate-matching rules.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    /// How long before the anchor's start a candidate may begin and still be
    /// considered part of the same session. A file that starts much earlier
    /// belongs to a previous trip.
    pub early_bound: Duration,
}

impl MatchPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            early_bound: Duration::minutes(config.tolerance_minutes),
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            early_bound: Duration::minutes(10),
        }
    }
}

/// One reconstructed driving session. Immutable once built; the anchor's
/// interval, not any matched file's, defines the reported bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub anchor: FileDescriptor,
    /// Best-matching file per non-anchor kind. Missing keys mark the session
    /// as partial.
    pub matched: BTreeMap<FileKind, FileDescriptor>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Session {
    /// Complete means all three non-anchor kinds found a match.
    pub fn is_complete(&self) -> bool {
        FileKind::MATCHED.iter().all(|k| self.matched.contains_key(k))
    }

    /// The kinds this session failed to match.
    pub fn missing_kinds(&self) -> Vec<FileKind> {
        FileKind::MATCHED
            .iter()
            .copied()
            .filter(|k| !self.matched.contains_key(k))
            .collect()
    }
}

pub struct SessionCorrelator {
    policy: MatchPolicy,
}

impl SessionCorrelator {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// Build one session per anchor in the catalog, matching only candidates
    /// recorded by the anchor's vehicle. Sessions come back ordered by
    /// (start, anchor path) for deterministic output across runs.
    pub fn correlate(&self, catalog: &FileCatalog) -> Vec<Session> {
        let mut sessions: Vec<Session> = catalog
            .anchors()
            .map(|anchor| self.build_session(anchor, catalog))
            .collect();
        sessions.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| a.anchor.path.cmp(&b.anchor.path))
        });
        sessions
    }

    /// Match the three non-anchor kinds for a single anchor file.
    pub fn build_session(&self, anchor: &FileDescriptor, catalog: &FileCatalog) -> Session {
        let mut matched = BTreeMap::new();

        for kind in FileKind::MATCHED {
            match self.match_kind(anchor, kind, catalog) {
                Ok(winner) => {
                    matched.insert(kind, winner.clone());
                }
                Err(err) => {
                    // Not fatal: the session is retained as partial.
                    debug!(error = %err, "session will be partial");
                }
            }
        }

        Session {
            start: anchor.start,
            end: anchor.end,
            anchor: anchor.clone(),
            matched,
        }
    }

    /// Find the best candidate of one kind for an anchor, or report why the
    /// kind stays unmatched.
    pub fn match_kind<'a>(
        &self,
        anchor: &FileDescriptor,
        kind: FileKind,
        catalog: &'a FileCatalog,
    ) -> Result<&'a FileDescriptor> {
        let candidates = catalog
            .of_kind(kind)
            .filter(|c| c.vehicle_id == anchor.vehicle_id);
        self.best_candidate(anchor, candidates)
            .ok_or_else(|| RollguardError::NoMatch {
                kind,
                anchor: anchor.path.clone(),
            })
    }

    /// Apply the early-bound and overlap rules, then pick the candidate with
    /// the longest overlap. Ties break by smallest early-start gap, then by
    /// lexicographic path.
    fn best_candidate<'a>(
        &self,
        anchor: &FileDescriptor,
        candidates: impl Iterator<Item = &'a FileDescriptor>,
    ) -> Option<&'a FileDescriptor> {
        let mut best: Option<(&FileDescriptor, Duration, Duration)> = None;

        for candidate in candidates {
            let early_gap = early_gap(anchor, candidate);
            if early_gap > self.policy.early_bound {
                continue;
            }
            let overlap = anchor.overlap_with(candidate);
            if overlap <= Duration::zero() {
                continue;
            }

            let better = match best {
                None => true,
                Some((current, best_overlap, best_gap)) => {
                    overlap > best_overlap
                        || (overlap == best_overlap && early_gap < best_gap)
                        || (overlap == best_overlap
                            && early_gap == best_gap
                            && candidate.path < current.path)
                }
            };
            if better {
                best = Some((candidate, overlap, early_gap));
            }
        }

        best.map(|(winner, _, _)| winner)
    }
}

/// How far before the anchor the candidate starts; zero when it starts at or
/// after the anchor.
fn early_gap(anchor: &FileDescriptor, candidate: &FileDescriptor) -> Duration {
    (anchor.start - candidate.start).max(Duration::zero())
}
