// src/utils/error.rs
use serde_json;
use std::io;
use thiserror::Error;

/// Main error type for the mining application
///
/// Device-level variants (`InvalidDeviceIndex`, `DeviceUnavailable`,
/// `KernelBuildFailed`, `DatasetGenerationFailed`, `KernelLaunchFailed`) are
/// fatal for the one worker that hit them and never for its siblings.
/// `TelemetryUnavailable` only ever degrades a hardware snapshot.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Configuration references a device the registry does not know
    #[error("Invalid device index {index} ({count} devices available)")]
    InvalidDeviceIndex {
        /// Requested index
        index: usize,
        /// Number of enumerated devices
        count: usize,
    },

    /// Device context could not be acquired
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Search or generation kernel failed to compile/load
    #[error("Kernel build failed: {0}")]
    KernelBuildFailed(String),

    /// Dataset rebuild could not complete
    #[error("Dataset generation failed: {0}")]
    DatasetGenerationFailed(String),

    /// Kernel failed to enqueue or execute
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    /// Vendor telemetry source absent or erroring
    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Worker thread died without returning
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

impl MinerError {
    /// True for errors that take a worker out of the device pool
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            MinerError::InvalidDeviceIndex { .. }
                | MinerError::DeviceUnavailable(_)
                | MinerError::KernelBuildFailed(_)
                | MinerError::DatasetGenerationFailed(_)
                | MinerError::KernelLaunchFailed(_)
        )
    }
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered in header, seed or boundary
/// arguments. Wraps the original error in an `InputError` variant.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts TOML parse errors into MinerError
impl From<toml::de::Error> for MinerError {
    fn from(e: toml::de::Error) -> Self {
        MinerError::ConfigError(format!("Invalid config format: {}", e))
    }
}
