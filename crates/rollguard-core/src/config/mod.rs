//! Pipeline configuration and TOML parsing.
//!
//! One [`PipelineConfig`] is loaded per run and treated as read-only for the
//! duration of processing. Every field has a serde default so a partial (or
//! empty) TOML file yields a usable configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::alarm::AlarmThreshold;

/// Top-level rollguard configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How many minutes before the anchor's start a candidate file may begin
    /// and still belong to the same session.
    #[serde(default = "default_tolerance_minutes")]
    pub tolerance_minutes: i64,

    /// Number of inertial samples in the risk engine's sliding window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Vehicle track width in meters.
    #[serde(default = "default_track_width_m")]
    pub track_width_m: f64,

    /// Height of the vehicle's center of gravity in meters.
    #[serde(default = "default_cg_height_m")]
    pub cg_height_m: f64,

    /// Per-metric alarm threshold triples.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

/// Warning/danger/critical triples for each alarmed metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_ltr_thresholds")]
    pub ltr: AlarmThreshold,

    #[serde(default = "default_drs_thresholds")]
    pub drs: AlarmThreshold,

    #[serde(default = "default_danger_level_thresholds")]
    pub danger_level: AlarmThreshold,
}

fn default_tolerance_minutes() -> i64 {
    10
}

fn default_window_size() -> usize {
    10
}

fn default_track_width_m() -> f64 {
    1.86
}

fn default_cg_height_m() -> f64 {
    1.15
}

fn default_ltr_thresholds() -> AlarmThreshold {
    AlarmThreshold {
        warning: 0.4,
        danger: 0.6,
        critical: 0.8,
    }
}

fn default_drs_thresholds() -> AlarmThreshold {
    AlarmThreshold {
        warning: 0.5,
        danger: 0.75,
        critical: 1.0,
    }
}

fn default_danger_level_thresholds() -> AlarmThreshold {
    AlarmThreshold {
        warning: 0.5,
        danger: 0.7,
        critical: 0.85,
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            ltr: default_ltr_thresholds(),
            drs: default_drs_thresholds(),
            danger_level: default_danger_level_thresholds(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance_minutes: default_tolerance_minutes(),
            window_size: default_window_size(),
            track_width_m: default_track_width_m(),
            cg_height_m: default_cg_height_m(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.tolerance_minutes, 10);
        assert_eq!(config.window_size, 10);
        assert!((config.track_width_m - 1.86).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: PipelineConfig = toml::from_str(
            r#"
            tolerance_minutes = 5

            [thresholds.ltr]
            warning = 0.3
            danger = 0.5
            critical = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.tolerance_minutes, 5);
        assert_eq!(config.window_size, 10);
        assert!((config.thresholds.ltr.warning - 0.3).abs() < f64::EPSILON);
        assert!((config.thresholds.drs.warning - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn load_or_default_without_file() {
        let config = PipelineConfig::load_or_default(Path::new("/nonexistent/rollguard.toml")).unwrap();
        assert_eq!(config.window_size, 10);
    }
}
