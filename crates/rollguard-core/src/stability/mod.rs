//! Rollover-risk scoring over a session's inertial stream.
//!
//! The engine keeps a fixed-size sliding window of recent inertial readings
//! and, for every new record, computes three indices plus a combined danger
//! level:
//!
//! - **LTR** -- lateral load-transfer ratio, clamped to `[-1, 1]`.
//! - **SSF** -- static stability factor `t / 2h`, modulated by the current
//!   roll reading, never negative.
//! - **DRS** -- dynamic rollover score, an unclamped composite of lateral
//!   acceleration, roll angle, speed, and angular rates.
//! - **danger level** -- a single scalar in `[0, 1]` combining the three,
//!   used for comparative ranking and alarming.
//!
//! A record missing any required input fails the whole sample: nothing is
//! guessed or zero-filled, the window does not advance, and the rejection is
//! reported as a [`RollguardError::Validation`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{Result, RollguardError};
use crate::loader::InertialRecord;

/// Standard gravity, m/s^2.
const G: f64 = 9.80665;

/// Normalization references for the DRS composite.
const ROLL_REF_DEG: f64 = 40.0;
const YAW_RATE_REF: f64 = 0.5;
const ROLL_RATE_REF: f64 = 0.8;

/// One risk evaluation per inertial record. The sample owns its raw record;
/// nothing else in the pipeline keeps a second copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilitySample {
    pub timestamp: DateTime<Utc>,
    pub ltr: f64,
    pub ssf: f64,
    pub drs: f64,
    pub danger_level: f64,
    pub raw: InertialRecord,
}

/// Smoothed inputs retained per window slot.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    lateral_accel: f64,
    yaw_rate: f64,
    roll_rate: f64,
}

pub struct StabilityRiskEngine {
    window: VecDeque<WindowEntry>,
    window_size: usize,
    track_width_m: f64,
    cg_height_m: f64,
}

impl StabilityRiskEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            window_size: config.window_size.max(1),
            track_width_m: config.track_width_m,
            cg_height_m: config.cg_height_m,
        }
    }

    /// Drop all window state. Called at the start of every session so one
    /// trip's dynamics never bleed into the next.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Score one inertial record. `speed_kmh` comes from the engine stream
    /// when the session has one; without it the kinematic yaw term vanishes
    /// and the measured lateral acceleration carries the score.
    pub fn score(
        &mut self,
        record: &InertialRecord,
        speed_kmh: Option<f64>,
    ) -> Result<StabilitySample> {
        validate(record)?;

        let speed_ms = speed_kmh.unwrap_or(0.0).max(0.0) / 3.6;

        self.window.push_back(WindowEntry {
            lateral_accel: record.lateral_accel(),
            yaw_rate: record.yaw_rate(),
            roll_rate: record.roll_rate(),
        });
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let mean_lat = self.mean(|e| e.lateral_accel);
        let mean_yaw = self.mean(|e| e.yaw_rate);

        let roll_rad = record.roll_deg.to_radians();
        // Blend measured lateral acceleration with the kinematic estimate
        // v * omega so a brief accelerometer dropout does not null the score.
        let effective_lat = 0.7 * mean_lat + 0.3 * speed_ms * mean_yaw;

        let half_track_ratio = (2.0 * self.cg_height_m) / self.track_width_m;
        let ltr = (half_track_ratio * effective_lat / G + roll_rad.sin()).clamp(-1.0, 1.0);

        let ssf_static = self.track_width_m / (2.0 * self.cg_height_m);
        let ssf = (ssf_static * roll_rad.cos()).max(0.0);

        let drs = 0.45 * (effective_lat / G).abs()
            + 0.30 * (record.roll_deg / ROLL_REF_DEG).abs()
            + 0.15 * (mean_yaw / YAW_RATE_REF).abs() * (1.0 + speed_ms / 20.0)
            + 0.10 * (record.roll_rate() / ROLL_RATE_REF).abs();

        let danger_level = (0.5 * ltr.abs()
            + 0.3 * drs.min(1.0)
            + 0.2 * (1.0 - (ssf / ssf_static).min(1.0)))
        .clamp(0.0, 1.0);

        Ok(StabilitySample {
            timestamp: record.timestamp,
            ltr,
            ssf,
            drs,
            danger_level,
            raw: record.clone(),
        })
    }

    fn mean(&self, f: impl Fn(&WindowEntry) -> f64) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().map(f).sum::<f64>() / self.window.len() as f64
    }
}

/// Reject a record when any required field is non-finite. The failed field is
/// named in the error so validation problems are diagnosable per record.
fn validate(record: &InertialRecord) -> Result<()> {
    let checks: [(&'static str, f64); 8] = [
        ("lateral acceleration", record.accel[1]),
        ("longitudinal acceleration", record.accel[0]),
        ("vertical acceleration", record.accel[2]),
        ("roll rate", record.gyro[0]),
        ("yaw rate", record.gyro[2]),
        ("roll angle", record.roll_deg),
        ("pitch angle", record.pitch_deg),
        ("stability index", record.stability_index),
    ];
    for (field, value) in checks {
        if !value.is_finite() {
            return Err(RollguardError::Validation {
                timestamp: record.timestamp,
                field,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_datetime;

    fn engine() -> StabilityRiskEngine {
        StabilityRiskEngine::new(&PipelineConfig::default())
    }

    fn record(lateral_accel: f64, roll_deg: f64) -> InertialRecord {
        InertialRecord {
            timestamp: parse_datetime("2024-05-12 10:00:00").unwrap(),
            accel: [0.1, lateral_accel, 9.8],
            gyro: [0.01, 0.0, 0.05],
            roll_deg,
            pitch_deg: 0.5,
            yaw_deg: 180.0,
            stability_index: 0.9,
        }
    }

    #[test]
    fn ltr_is_clamped_to_unit_range() {
        let mut engine = engine();
        // Absurd lateral acceleration drives the raw LTR far beyond 1.
        let sample = engine.score(&record(25.0, 30.0), Some(90.0)).unwrap();
        assert!(sample.ltr <= 1.0 && sample.ltr >= -1.0);
        assert!((sample.ltr - 1.0).abs() < f64::EPSILON, "expected clamp to 1.0, got {}", sample.ltr);

        let mut engine2 = StabilityRiskEngine::new(&PipelineConfig::default());
        let sample = engine2.score(&record(-25.0, -30.0), Some(90.0)).unwrap();
        assert!((sample.ltr + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ssf_is_never_negative() {
        let mut engine = engine();
        for roll in [-170.0, -95.0, 0.0, 95.0, 170.0] {
            let sample = engine.score(&record(0.5, roll), None).unwrap();
            assert!(sample.ssf >= 0.0, "ssf {} for roll {roll}", sample.ssf);
        }
    }

    #[test]
    fn danger_level_stays_in_unit_interval() {
        let mut engine = engine();
        for (lat, roll) in [(0.0, 0.0), (3.0, 5.0), (25.0, 60.0), (-25.0, -60.0)] {
            let sample = engine.score(&record(lat, roll), Some(80.0)).unwrap();
            assert!(
                (0.0..=1.0).contains(&sample.danger_level),
                "danger {} for ({lat}, {roll})",
                sample.danger_level
            );
        }
    }

    #[test]
    fn gentle_driving_scores_low() {
        let mut engine = engine();
        let sample = engine.score(&record(0.3, 1.0), Some(50.0)).unwrap();
        assert!(sample.danger_level < 0.2, "got {}", sample.danger_level);
        assert!(sample.drs < 0.3);
    }

    #[test]
    fn harder_cornering_scores_higher() {
        let mut gentle = engine();
        let mut hard = engine();
        let low = gentle.score(&record(0.5, 1.0), Some(50.0)).unwrap();
        let high = hard.score(&record(6.0, 12.0), Some(50.0)).unwrap();
        assert!(high.danger_level > low.danger_level);
        assert!(high.drs > low.drs);
    }

    #[test]
    fn non_finite_field_fails_the_whole_sample() {
        let mut engine = engine();
        let mut bad = record(0.5, 1.0);
        bad.accel[1] = f64::NAN;

        let err = engine.score(&bad, None).unwrap_err();
        assert!(matches!(err, RollguardError::Validation { field, .. } if field == "lateral acceleration"));
        // The window must not have advanced for the failed tick.
        assert!(engine.window.is_empty());

        // A subsequent good record scores as if it were the first.
        let sample = engine.score(&record(0.5, 1.0), None).unwrap();
        assert_eq!(engine.window.len(), 1);
        assert!(sample.danger_level.is_finite());
    }

    #[test]
    fn window_is_bounded_and_reset_clears_it() {
        let mut engine = engine();
        for _ in 0..25 {
            engine.score(&record(0.5, 1.0), None).unwrap();
        }
        assert_eq!(engine.window.len(), 10);

        engine.reset();
        assert!(engine.window.is_empty());
    }

    #[test]
    fn window_smooths_a_single_spike() {
        let mut engine = engine();
        for _ in 0..9 {
            engine.score(&record(0.2, 0.5), Some(50.0)).unwrap();
        }
        let spike = engine.score(&record(8.0, 0.5), Some(50.0)).unwrap();

        let mut cold = StabilityRiskEngine::new(&PipelineConfig::default());
        let unsmoothed = cold.score(&record(8.0, 0.5), Some(50.0)).unwrap();

        assert!(spike.ltr.abs() < unsmoothed.ltr.abs());
    }

    #[test]
    fn missing_speed_still_produces_a_sample() {
        let mut engine = engine();
        let sample = engine.score(&record(2.0, 3.0), None).unwrap();
        assert!(sample.danger_level > 0.0);
    }

    #[test]
    fn sample_owns_its_raw_record() {
        let mut engine = engine();
        let rec = record(0.5, 1.0);
        let sample = engine.score(&rec, None).unwrap();
        assert_eq!(sample.raw.roll_deg, rec.roll_deg);
        assert_eq!(sample.timestamp, rec.timestamp);
    }
}
