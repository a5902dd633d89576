// src/config/mod.rs
//! Configuration management for the Ethash miner
//!
//! This module handles all configuration-related functionality including:
//! - Loading and parsing configuration files
//! - Generating configuration templates
//! - Validating settings into the immutable [`WorkerConfig`]
//!
//! The configuration uses TOML format; every key is optional.

/// Core configuration implementation
///
/// Contains the [`Config`] file structure and the validated
/// [`WorkerConfig`] handed to the workers.
#[allow(clippy::module_inception)]
pub mod config;

// Re-export key items for easy access
pub use config::{Config, WorkerConfig};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads miner configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read or parsed
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template() -> String {
    Config::generate_template()
}
