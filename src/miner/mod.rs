// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains all components related to the mining process:
//! - The Ethash algorithm (light cache, dataset items, hashimoto)
//! - Epoch dataset management and generation scheduling
//! - Interchangeable search and generation kernels
//! - Per-device workers and the pool that runs them

/// Mining algorithm implementations
///
/// Contains the Ethash reference functions used by the kernels and by
/// host-side verification.
pub mod algorithm;

/// Light cache memo, generation gate and per-worker dataset slot
pub mod dataset;

/// Kernel variant selection
///
/// Maps a configured variant to a search kernel and a generation kernel.
pub mod kernel;

/// Worker pool
///
/// Resolves the device selection and starts one worker per device.
pub mod scheduler;

/// Worker thread implementation
///
/// Contains the per-device state machine that dispatches search batches and
/// reports verified solutions to the farm.
pub mod worker;

// Re-export main components for cleaner imports
pub use self::dataset::{DatasetCache, GenerationGate, LightCacheStore};
pub use self::kernel::{KernelSet, KernelVariant};
pub use self::scheduler::Scheduler;
pub use self::worker::{StopHandle, Worker, WorkerHandle, WorkerState, WorkerStats};
