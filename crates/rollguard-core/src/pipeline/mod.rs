//! Batch pipeline: scan, correlate, score, alarm, emit.
//!
//! The pipeline runs to completion over a bounded set of files and always
//! finishes with a [`RunReport`]: per-file failures are recorded against the
//! file, per-record failures are counted, and degraded results are never
//! hidden behind a bare success flag.
//!
//! All per-run state lives in explicit values threaded through the run, so a
//! host process can drive several vehicle pipelines concurrently without
//! cross-talk. Independent files are parsed on the rayon pool; correlation
//! and scoring stay single-threaded per session.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::alarm::{ActiveAlarm, AlarmEngine, AlarmEvent};
use crate::catalog::{FileCatalog, FileKind};
use crate::config::PipelineConfig;
use crate::correlation::{MatchPolicy, Session, SessionCorrelator};
use crate::loader::{
    beacon, engine, inertial, position, BeaconRecord, BeaconState, EngineRecord, PositionRecord,
};
use crate::stability::{StabilityRiskEngine, StabilitySample};

/// Engine signal consumed for the kinematic speed term of the risk score.
const SPEED_SIGNAL: &str = "speed_kmh";

/// What one run did, in numbers. The pipeline reports this unconditionally.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub files_catalogued: usize,
    pub files_unknown: usize,
    pub files_live_excluded: usize,
    pub sessions_total: usize,
    pub sessions_complete: usize,
    pub sessions_partial: usize,
    /// Sessions that ended with zero successfully scored inertial records.
    pub sessions_no_stability: usize,
    pub rows_skipped: usize,
    pub records_rejected: usize,
    pub alarm_events: usize,
}

/// Everything the pipeline hands the persistence collaborator for one
/// session: the session record plus ordered measurements per matched kind.
/// Inertial records live exclusively inside their samples.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutput {
    pub session: Session,
    pub engine: Vec<EngineRecord>,
    pub position: Vec<PositionRecord>,
    pub beacon: Vec<BeaconRecord>,
    pub samples: Vec<StabilitySample>,
    pub alarm_events: Vec<AlarmEvent>,
    /// Alarms still active when the session ended.
    pub alarms: Vec<ActiveAlarm>,
    /// Fraction of the session the rotating beacon spent ON, when the
    /// session has beacon coverage.
    pub beacon_duty_ratio: Option<f64>,
}

/// Persistence collaborator. Durable identity and re-run deduplication are
/// the implementor's job (e.g. upsert keyed by vehicle + anchor start); the
/// core always emits fresh computations.
pub trait SessionSink {
    fn store_session(&mut self, output: &SessionOutput) -> Result<()>;
}

/// Collects outputs in memory. Useful for tests and small batches.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub outputs: Vec<SessionOutput>,
}

impl SessionSink for MemorySink {
    fn store_session(&mut self, output: &SessionOutput) -> Result<()> {
        self.outputs.push(output.clone());
        Ok(())
    }
}

/// Writes one JSON document per session, newline-delimited.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SessionSink for JsonLinesSink<W> {
    fn store_session(&mut self, output: &SessionOutput) -> Result<()> {
        serde_json::to_writer(&mut self.writer, output).context("serializing session")?;
        self.writer.write_all(b"\n").context("writing session")?;
        Ok(())
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

struct ProcessedSession {
    output: SessionOutput,
    rows_skipped: usize,
    records_rejected: usize,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the full batch over a directory tree.
    pub fn run(&self, root: &Path, sink: &mut dyn SessionSink) -> Result<RunReport> {
        let catalog = FileCatalog::scan(root)
            .with_context(|| format!("scanning {}", root.display()))?;

        let correlator = SessionCorrelator::new(MatchPolicy::from_config(&self.config));
        let sessions = correlator.correlate(&catalog);

        let processed: Vec<ProcessedSession> = sessions
            .par_iter()
            .map(|session| self.process_session(session))
            .collect();

        let mut report = RunReport {
            files_catalogued: catalog.files().len(),
            files_unknown: catalog.unknown.len(),
            files_live_excluded: catalog.live_excluded.len(),
            sessions_total: processed.len(),
            ..RunReport::default()
        };

        for p in processed {
            if p.output.session.is_complete() {
                report.sessions_complete += 1;
            } else {
                report.sessions_partial += 1;
            }
            if p.output.samples.is_empty() {
                warn!(
                    anchor = %p.output.session.anchor.path.display(),
                    "session has no stability data"
                );
                report.sessions_no_stability += 1;
            }
            report.rows_skipped += p.rows_skipped;
            report.records_rejected += p.records_rejected;
            report.alarm_events += p.output.alarm_events.len();

            sink.store_session(&p.output)
                .with_context(|| format!("storing session {}", p.output.session.anchor.path.display()))?;
        }

        info!(
            sessions = report.sessions_total,
            complete = report.sessions_complete,
            partial = report.sessions_partial,
            rejected_records = report.records_rejected,
            "pipeline run finished"
        );
        Ok(report)
    }

    /// Load, score, and alarm one session. Per-file load failures degrade the
    /// session (the kind simply contributes no records) instead of aborting
    /// the batch; the catalog already proved each file parseable once, so a
    /// failure here means the file changed under us.
    fn process_session(&self, session: &Session) -> ProcessedSession {
        let mut rows_skipped = 0usize;
        let mut records_rejected = 0usize;

        let engine_records = match engine::load(&session.anchor.path) {
            Ok(o) => {
                rows_skipped += o.rows_skipped;
                o.records
            }
            Err(err) => {
                warn!(path = %session.anchor.path.display(), error = %err, "anchor reload failed");
                Vec::new()
            }
        };

        let position_records = session
            .matched
            .get(&FileKind::Position)
            .map(|d| match position::load(&d.path) {
                Ok(o) => {
                    rows_skipped += o.rows_skipped;
                    o.records
                }
                Err(err) => {
                    warn!(path = %d.path.display(), error = %err, "position reload failed");
                    Vec::new()
                }
            })
            .unwrap_or_default();

        let beacon_records = session
            .matched
            .get(&FileKind::Beacon)
            .map(|d| match beacon::load(&d.path) {
                Ok(o) => {
                    rows_skipped += o.rows_skipped;
                    o.records
                }
                Err(err) => {
                    warn!(path = %d.path.display(), error = %err, "beacon reload failed");
                    Vec::new()
                }
            })
            .unwrap_or_default();

        let inertial_records = session
            .matched
            .get(&FileKind::Inertial)
            .map(|d| match inertial::load(&d.path) {
                Ok(o) => {
                    rows_skipped += o.rows_skipped;
                    o.records
                }
                Err(err) => {
                    warn!(path = %d.path.display(), error = %err, "inertial reload failed");
                    Vec::new()
                }
            })
            .unwrap_or_default();

        // Fresh engines per session: the sliding window and active-alarm set
        // start empty at every session start.
        let mut risk = StabilityRiskEngine::new(&self.config);
        let mut alarms = AlarmEngine::new(self.config.thresholds.clone());

        let mut samples = Vec::with_capacity(inertial_records.len());
        let mut alarm_events = Vec::new();
        for record in &inertial_records {
            let speed = speed_at(&engine_records, record.timestamp);
            match risk.score(record, speed) {
                Ok(sample) => {
                    alarm_events.extend(alarms.evaluate_sample(&sample));
                    samples.push(sample);
                }
                Err(err) => {
                    warn!(error = %err, "inertial record rejected");
                    records_rejected += 1;
                }
            }
        }

        let beacon_duty_ratio =
            beacon_duty_ratio(&beacon_records, session.start, session.end);

        ProcessedSession {
            output: SessionOutput {
                session: session.clone(),
                engine: engine_records,
                position: position_records,
                beacon: beacon_records,
                samples,
                alarm_events,
                alarms: alarms.drain_active(),
                beacon_duty_ratio,
            },
            rows_skipped,
            records_rejected,
        }
    }
}

/// Most recent engine speed at or before `ts`, if the session has engine
/// coverage there.
fn speed_at(engine_records: &[EngineRecord], ts: DateTime<Utc>) -> Option<f64> {
    let idx = engine_records.partition_point(|r| r.timestamp <= ts);
    if idx == 0 {
        return None;
    }
    engine_records[idx - 1].field(SPEED_SIGNAL)
}

/// Fraction of `[start, end)` the beacon spent ON. Gaps before the first
/// transition are not counted either way.
fn beacon_duty_ratio(
    records: &[BeaconRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<f64> {
    if records.is_empty() || end <= start {
        return None;
    }

    let total_ms = (end - start).num_milliseconds() as f64;
    let mut on_ms = 0.0;

    for (i, record) in records.iter().enumerate() {
        if record.state != BeaconState::On {
            continue;
        }
        let seg_start = record.timestamp.max(start);
        let seg_end = records
            .get(i + 1)
            .map(|next| next.timestamp)
            .unwrap_or(end)
            .min(end);
        if seg_end > seg_start {
            on_ms += (seg_end - seg_start).num_milliseconds() as f64;
        }
    }

    Some(on_ms / total_ms)
}
