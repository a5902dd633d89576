// src/stats/mod.rs
//! Statistics collection and reporting module
//!
//! This module provides functionality for tracking and reporting mining statistics,
//! including:
//! - Per-device hashrate calculations
//! - Solution acceptance/rejection/staleness tracking
//! - Hardware monitoring (temperature, fan, power, clock)
//!
//! The main component is [`StatsReporter`] which collects data and can periodically
//! report statistics to logs. [`HardwareMonitor`] is queried by the reporter and
//! the `hwmon` command, never by the search loop.

/// Vendor telemetry normalized into hardware snapshots
pub mod hwmon;

/// Submodule containing the statistics reporter implementation
///
/// The reporter handles:
/// - Atomic collection of mining statistics
/// - Periodic reporting of stats on a background thread
pub mod reporter;

// Re-export main components
pub use hwmon::{HardwareMonitor, HardwareSnapshot, TelemetryKind};
pub use reporter::{DeviceRate, MiningStats, ReportingHandle, ShareResult, StatsReporter};
