//! # rollguard-core
//!
//! Session correlation and rollover-risk scoring for on-board vehicle
//! recorder logs.
//!
//! Four independent recorders produce per-vehicle log files: the engine/CAN
//! recorder (decoded upstream into physical units), a GPS receiver, an
//! inertial stability sensor, and a binary rotating-beacon sensor. This crate
//! reconstructs coherent driving sessions from those files, scores each
//! session's inertial stream for rollover risk, and raises threshold alarms.
//!
//! The pipeline is a batch: [`catalog`] scans and classifies files by their
//! embedded timestamps, [`loader`] parses the four stream grammars,
//! [`correlation`] matches files into sessions around engine anchors,
//! [`stability`] and [`alarm`] score and alarm each session, and [`pipeline`]
//! ties the stages together and hands finished sessions to a persistence
//! collaborator.

pub mod alarm;
pub mod catalog;
pub mod config;
pub mod correlation;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod stability;
