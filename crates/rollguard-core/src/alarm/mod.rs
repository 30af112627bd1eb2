//! Threshold alarms over computed risk metrics.
//!
//! Each metric carries a warning/danger/critical triple. Every evaluation
//! compares the current value against the triple and produces either nothing
//! or exactly one alarm at the highest level exceeded.
//!
//! There is deliberately no hysteresis: a value crossing back below a
//! threshold de-escalates immediately, so an alarm can flap when a metric
//! hovers near a boundary. That matches the recorder fleet's existing
//! behavior and keeps the state machine a pure function of the latest value.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ThresholdConfig;
use crate::stability::StabilitySample;

/// Escalation ladder. `Normal` is the absence of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmLevel {
    Warning,
    Danger,
    Critical,
}

impl fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlarmLevel::Warning => "warning",
            AlarmLevel::Danger => "danger",
            AlarmLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// The metrics the alarm engine watches. The static stability factor feeds
/// the danger level instead of alarming directly, keeping one crossing
/// direction (above-threshold) for every alarmed metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMetric {
    Ltr,
    Drs,
    DangerLevel,
}

impl fmt::Display for RiskMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskMetric::Ltr => "ltr",
            RiskMetric::Drs => "drs",
            RiskMetric::DangerLevel => "danger_level",
        };
        write!(f, "{s}")
    }
}

/// Warning/danger/critical boundaries for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmThreshold {
    pub warning: f64,
    pub danger: f64,
    pub critical: f64,
}

impl AlarmThreshold {
    /// The highest level the value exceeds, if any.
    pub fn classify(&self, value: f64) -> Option<AlarmLevel> {
        if value > self.critical {
            Some(AlarmLevel::Critical)
        } else if value > self.danger {
            Some(AlarmLevel::Danger)
        } else if value > self.warning {
            Some(AlarmLevel::Warning)
        } else {
            None
        }
    }

    /// The boundary value belonging to a level.
    pub fn boundary(&self, level: AlarmLevel) -> f64 {
        match level {
            AlarmLevel::Warning => self.warning,
            AlarmLevel::Danger => self.danger,
            AlarmLevel::Critical => self.critical,
        }
    }
}

/// One alarm emitted by a single evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub metric: RiskMetric,
    pub level: AlarmLevel,
    pub value: f64,
    /// The boundary that was exceeded.
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// A currently-active alarm, accumulated across evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlarm {
    pub metric: RiskMetric,
    pub level: AlarmLevel,
    /// Most recently observed value.
    pub value: f64,
    pub threshold: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

pub struct AlarmEngine {
    thresholds: ThresholdConfig,
    active: BTreeMap<RiskMetric, ActiveAlarm>,
}

impl AlarmEngine {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            active: BTreeMap::new(),
        }
    }

    /// Evaluate one metric value. Returns the single alarm produced, or
    /// `None` when the value sits under every threshold (which also clears
    /// any active alarm for the metric -- de-escalation is immediate).
    pub fn evaluate(
        &mut self,
        metric: RiskMetric,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<AlarmEvent> {
        let triple = self.triple(metric);
        let Some(level) = triple.classify(value) else {
            if self.active.remove(&metric).is_some() {
                debug!(%metric, value, "alarm cleared");
            }
            return None;
        };
        let threshold = triple.boundary(level);

        match self.active.get_mut(&metric) {
            Some(existing) if existing.level == level => {
                existing.last_seen = timestamp;
                existing.value = value;
            }
            _ => {
                self.active.insert(
                    metric,
                    ActiveAlarm {
                        metric,
                        level,
                        value,
                        threshold,
                        first_seen: timestamp,
                        last_seen: timestamp,
                    },
                );
            }
        }

        Some(AlarmEvent {
            metric,
            level,
            value,
            threshold,
            timestamp,
        })
    }

    /// Evaluate all alarmed metrics of one stability sample. LTR alarms on
    /// magnitude; load transfer to either side is equally dangerous.
    pub fn evaluate_sample(&mut self, sample: &StabilitySample) -> Vec<AlarmEvent> {
        [
            (RiskMetric::Ltr, sample.ltr.abs()),
            (RiskMetric::Drs, sample.drs),
            (RiskMetric::DangerLevel, sample.danger_level),
        ]
        .into_iter()
        .filter_map(|(metric, value)| self.evaluate(metric, value, sample.timestamp))
        .collect()
    }

    pub fn active_alarms(&self) -> impl Iterator<Item = &ActiveAlarm> {
        self.active.values()
    }

    /// Remove and return all active alarms, e.g. at session end.
    pub fn drain_active(&mut self) -> Vec<ActiveAlarm> {
        std::mem::take(&mut self.active).into_values().collect()
    }

    fn triple(&self, metric: RiskMetric) -> AlarmThreshold {
        match metric {
            RiskMetric::Ltr => self.thresholds.ltr,
            RiskMetric::Drs => self.thresholds.drs,
            RiskMetric::DangerLevel => self.thresholds.danger_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_datetime;

    fn engine() -> AlarmEngine {
        AlarmEngine::new(ThresholdConfig::default())
    }

    fn ts(s: &str) -> DateTime<Utc> {
        parse_datetime(s).unwrap()
    }

    #[test]
    fn value_above_critical_produces_exactly_one_critical_alarm() {
        let mut engine = engine();
        // Default ltr critical boundary is 0.8.
        let event = engine.evaluate(RiskMetric::Ltr, 0.95, ts("2024-05-12 10:00:00"));
        let event = event.expect("expected an alarm");
        assert_eq!(event.level, AlarmLevel::Critical);
        assert_eq!(engine.active_alarms().count(), 1);
    }

    #[test]
    fn highest_exceeded_level_wins() {
        let triple = AlarmThreshold {
            warning: 0.4,
            danger: 0.6,
            critical: 0.8,
        };
        assert_eq!(triple.classify(0.3), None);
        assert_eq!(triple.classify(0.5), Some(AlarmLevel::Warning));
        assert_eq!(triple.classify(0.7), Some(AlarmLevel::Danger));
        assert_eq!(triple.classify(0.9), Some(AlarmLevel::Critical));
        // Sitting exactly on a boundary does not exceed it.
        assert_eq!(triple.classify(0.4), None);
    }

    #[test]
    fn repeated_trigger_updates_last_seen_without_duplicating() {
        let mut engine = engine();
        engine.evaluate(RiskMetric::Drs, 0.8, ts("2024-05-12 10:00:00"));
        engine.evaluate(RiskMetric::Drs, 0.82, ts("2024-05-12 10:00:05"));

        let active: Vec<_> = engine.active_alarms().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].first_seen, ts("2024-05-12 10:00:00"));
        assert_eq!(active[0].last_seen, ts("2024-05-12 10:00:05"));
        assert!((active[0].value - 0.82).abs() < f64::EPSILON);
    }

    #[test]
    fn escalation_replaces_the_active_alarm() {
        let mut engine = engine();
        engine.evaluate(RiskMetric::Ltr, 0.5, ts("2024-05-12 10:00:00"));
        engine.evaluate(RiskMetric::Ltr, 0.95, ts("2024-05-12 10:00:05"));

        let active: Vec<_> = engine.active_alarms().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, AlarmLevel::Critical);
        assert_eq!(active[0].first_seen, ts("2024-05-12 10:00:05"));
    }

    #[test]
    fn deescalation_is_immediate_without_hysteresis() {
        let mut engine = engine();
        engine.evaluate(RiskMetric::Ltr, 0.95, ts("2024-05-12 10:00:00"));
        assert_eq!(engine.active_alarms().count(), 1);

        let event = engine.evaluate(RiskMetric::Ltr, 0.1, ts("2024-05-12 10:00:01"));
        assert!(event.is_none());
        assert_eq!(engine.active_alarms().count(), 0);

        // Hovering near the boundary flaps; this is the documented behavior.
        engine.evaluate(RiskMetric::Ltr, 0.41, ts("2024-05-12 10:00:02"));
        engine.evaluate(RiskMetric::Ltr, 0.39, ts("2024-05-12 10:00:03"));
        assert_eq!(engine.active_alarms().count(), 0);
    }

    #[test]
    fn metrics_are_tracked_independently() {
        let mut engine = engine();
        engine.evaluate(RiskMetric::Ltr, 0.95, ts("2024-05-12 10:00:00"));
        engine.evaluate(RiskMetric::DangerLevel, 0.6, ts("2024-05-12 10:00:00"));

        let active: Vec<_> = engine.active_alarms().collect();
        assert_eq!(active.len(), 2);
        assert!(active.iter().any(|a| a.metric == RiskMetric::Ltr && a.level == AlarmLevel::Critical));
        assert!(active.iter().any(|a| a.metric == RiskMetric::DangerLevel && a.level == AlarmLevel::Warning));
    }

    #[test]
    fn evaluate_sample_alarms_on_ltr_magnitude() {
        use crate::loader::InertialRecord;

        let mut engine = engine();
        let sample = StabilitySample {
            timestamp: ts("2024-05-12 10:00:00"),
            ltr: -0.95,
            ssf: 0.8,
            drs: 0.1,
            danger_level: 0.2,
            raw: InertialRecord {
                timestamp: ts("2024-05-12 10:00:00"),
                accel: [0.0, -9.0, 9.8],
                gyro: [0.0, 0.0, 0.0],
                roll_deg: -20.0,
                pitch_deg: 0.0,
                yaw_deg: 0.0,
                stability_index: 0.5,
            },
        };
        let events = engine.evaluate_sample(&sample);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, RiskMetric::Ltr);
        assert_eq!(events[0].level, AlarmLevel::Critical);
    }

    #[test]
    fn drain_active_empties_the_engine() {
        let mut engine = engine();
        engine.evaluate(RiskMetric::Drs, 2.0, ts("2024-05-12 10:00:00"));
        let drained = engine.drain_active();
        assert_eq!(drained.len(), 1);
        assert_eq!(engine.active_alarms().count(), 0);
    }
}
