// src/config/config.rs
use crate::miner::algorithm::EthashParams;
use crate::miner::kernel::KernelVariant;
use crate::types::{DagLoadMode, ParamsPreset};
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the mining application
///
/// Mirrors the TOML file. It is validated once into a [`WorkerConfig`],
/// which is what the workers actually see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global indices of the devices to mine on (empty = all devices)
    pub devices: Vec<usize>,

    /// Work group size of the search kernel
    pub local_work_size: usize,

    /// Global work size = local work size * this multiplier
    pub global_work_multiplier: u64,

    /// Restrict mining to one platform (ignored when `devices` is set)
    pub platform_id: Option<usize>,

    /// Search kernel variant: 0 = stable, 1 = unstable, 2 = custom
    pub kernel: u32,

    /// Dataset generation across devices
    pub dag_load_mode: DagLoadMode,

    /// Maximum number of devices to use
    pub instances: Option<usize>,

    /// Upper bound on a single wait for a search batch, in milliseconds
    pub poll_interval_ms: u64,

    /// Dataset size schedule
    pub params: ParamsPreset,

    /// Seconds between statistics log lines
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            devices: Vec::new(),
            local_work_size: 128,
            global_work_multiplier: 8192,
            platform_id: None,
            kernel: 0,
            dag_load_mode: DagLoadMode::Parallel,
            instances: None,
            poll_interval_ms: 50,
            params: ParamsPreset::Mainnet,
            stats_interval_secs: 10,
        }
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(MinerError)` - If file couldn't be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(toml::from_str(&config_str)?)
    }

    /// Checks the settings and freezes them for the workers
    ///
    /// # Returns
    /// * `Ok(WorkerConfig)` - Settings every worker shares
    /// * `Err(MinerError::ConfigError)` - On a zero or overflowing work size
    pub fn validate(&self) -> Result<WorkerConfig, MinerError> {
        if self.local_work_size == 0 {
            return Err(MinerError::ConfigError("local_work_size must be positive".into()));
        }
        if self.global_work_multiplier == 0 {
            return Err(MinerError::ConfigError(
                "global_work_multiplier must be positive".into(),
            ));
        }
        if (self.local_work_size as u64)
            .checked_mul(self.global_work_multiplier)
            .is_none()
        {
            return Err(MinerError::ConfigError("global work size overflows".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(MinerError::ConfigError("poll_interval_ms must be positive".into()));
        }
        if self.instances == Some(0) {
            return Err(MinerError::ConfigError("instances must be positive".into()));
        }

        Ok(WorkerConfig {
            local_work_size: self.local_work_size,
            global_work_multiplier: self.global_work_multiplier,
            kernel: KernelVariant::from_id(self.kernel),
            devices: self.devices.clone(),
            platform_id: self.platform_id,
            dag_load_mode: self.dag_load_mode,
            instances: self.instances,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            params: self.params.params(),
        })
    }

    /// Generates a configuration template string
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template() -> String {
        let mut template = String::new();
        template.push_str("# Ethash Miner Configuration\n\n");
        template.push_str("# Devices to mine on, by index from `list-devices` (empty = all)\n");
        template.push_str("devices = []\n");
        template.push_str("# Restrict to one platform when devices is empty\n");
        template.push_str("# platform_id = 0\n");
        template.push_str("# Use at most this many devices\n");
        template.push_str("# instances = 1\n\n");
        template.push_str("# Search kernel work group size\n");
        template.push_str("local_work_size = 128\n");
        template.push_str("# Nonces per batch = local_work_size * global_work_multiplier\n");
        template.push_str("global_work_multiplier = 8192\n");
        template.push_str("# Search kernel: 0 = stable, 1 = unstable, 2 = custom\n");
        template.push_str("kernel = 0\n\n");
        template.push_str("# Dataset generation: parallel or serial (one device at a time)\n");
        template.push_str("dag_load_mode = \"parallel\"\n");
        template.push_str("# Dataset sizes: mainnet or test\n");
        template.push_str("params = \"mainnet\"\n\n");
        template.push_str("# Longest single wait on a search batch (ms)\n");
        template.push_str("poll_interval_ms = 50\n");
        template.push_str("# Seconds between statistics lines\n");
        template.push_str("stats_interval_secs = 10\n");
        template
    }
}

/// Validated settings shared read-only by every worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Work group size of the search kernel
    pub local_work_size: usize,
    /// Global work size multiplier
    pub global_work_multiplier: u64,
    /// Search/generation kernel pair
    pub kernel: KernelVariant,
    /// Explicit device selection (empty = all)
    pub devices: Vec<usize>,
    /// Platform restriction
    pub platform_id: Option<usize>,
    /// Dataset generation mode
    pub dag_load_mode: DagLoadMode,
    /// Maximum number of workers
    pub instances: Option<usize>,
    /// Upper bound on a single poll
    pub poll_interval: Duration,
    /// Dataset size schedule
    pub params: EthashParams,
}

impl WorkerConfig {
    /// Nonces searched per batch
    pub fn global_work_size(&self) -> u64 {
        self.local_work_size as u64 * self.global_work_multiplier
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        // Config::default() always validates.
        let config = Config::default();
        WorkerConfig {
            local_work_size: config.local_work_size,
            global_work_multiplier: config.global_work_multiplier,
            kernel: KernelVariant::default(),
            devices: Vec::new(),
            platform_id: None,
            dag_load_mode: config.dag_load_mode,
            instances: None,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            params: config.params.params(),
        }
    }
}
