// src/cli/mod.rs
//! Command-line surface of the `ethash-miner` binary

/// Clap definitions of the subcommands and their options
pub mod commands;

pub use commands::{
    Action, BenchmarkOptions, Commands, ConfigOptions, HwmonOptions, ListDevicesOptions,
    WorkerOverrides,
};

use crate::config::Config;

impl WorkerOverrides {
    /// Applies every override that was given on top of `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(devices) = &self.devices {
            config.devices = devices.clone();
        }
        if let Some(size) = self.local_work_size {
            config.local_work_size = size;
        }
        if let Some(multiplier) = self.global_work_multiplier {
            config.global_work_multiplier = multiplier;
        }
        if let Some(platform) = self.platform {
            config.platform_id = Some(platform);
        }
        if let Some(kernel) = self.kernel {
            config.kernel = kernel;
        }
        if let Some(mode) = self.dag_load_mode {
            config.dag_load_mode = mode;
        }
        if let Some(instances) = self.instances {
            config.instances = Some(instances);
        }
        if let Some(params) = self.params {
            config.params = params;
        }
    }
}
