//! Ethash Miner - per-device Ethash proof-of-work worker in Rust
//!
//! This crate provides the device side of an Ethash miner:
//! - Device enumeration across platforms with stable indices
//! - Epoch dataset generation, cached per device and staged across devices
//! - Interchangeable search kernels (stable, unstable, custom)
//! - One worker thread per device reporting to a [`farm::Farm`]
//! - Hardware telemetry (NVML, amdgpu sysfs, host sensors)

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Miner core implementation including the algorithm, datasets and workers
pub mod miner;

/// Compute devices, platforms and the device registry
pub mod device;

/// Work coordination contract and the in-process farm
pub mod farm;

/// Statistics collection, reporting and hardware telemetry
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::{Config, WorkerConfig};
pub use device::{DeviceDescriptor, DeviceRegistry, HostPlatform, Platform};
pub use farm::{Farm, LocalFarm, Solution, WorkPackage};
pub use miner::{KernelVariant, Scheduler, WorkerHandle, WorkerState};
pub use stats::{HardwareMonitor, HardwareSnapshot, MiningStats, StatsReporter};
pub use types::{DagLoadMode, H256};
pub use utils::{MinerError, init_logging};
