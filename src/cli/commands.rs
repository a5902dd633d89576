// src/cli/commands.rs
use crate::types::{DagLoadMode, ParamsPreset};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Ethash Miner CLI - per-device Ethash proof-of-work worker in Rust
#[derive(Parser, Debug)]
#[command(name = "ethash-miner")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Mine synthetic work on the selected devices and report the hashrate
    Benchmark(BenchmarkOptions),

    /// List the compute devices of every platform
    ListDevices(ListDevicesOptions),

    /// Print one hardware telemetry snapshot per device
    Hwmon(HwmonOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Worker settings that override the configuration file
#[derive(Args, Debug, Default)]
pub struct WorkerOverrides {
    /// Device indices to use, comma separated (overrides config)
    #[arg(long, value_delimiter = ',')]
    pub devices: Option<Vec<usize>>,

    /// Search kernel work group size (overrides config)
    #[arg(long)]
    pub local_work_size: Option<usize>,

    /// Global work size multiplier (overrides config)
    #[arg(long)]
    pub global_work_multiplier: Option<u64>,

    /// Only use devices of this platform (overrides config)
    #[arg(long)]
    pub platform: Option<usize>,

    /// Search kernel: 0 = stable, 1 = unstable, 2 = custom (overrides config)
    #[arg(long)]
    pub kernel: Option<u32>,

    /// Dataset generation across devices (overrides config)
    #[arg(long, value_enum)]
    pub dag_load_mode: Option<DagLoadMode>,

    /// Maximum number of devices to use (overrides config)
    #[arg(long)]
    pub instances: Option<usize>,

    /// Dataset size schedule (overrides config)
    #[arg(long, value_enum)]
    pub params: Option<ParamsPreset>,
}

/// Options for running the benchmark
#[derive(Parser, Debug)]
pub struct BenchmarkOptions {
    /// Path to configuration file (defaults apply when absent)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Worker settings
    #[command(flatten)]
    pub overrides: WorkerOverrides,

    /// Block number the synthetic work starts at
    #[arg(short, long, default_value_t = 0)]
    pub block: u64,

    /// Duration of benchmark in seconds
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,

    /// Difficulty of the synthetic work
    #[arg(long, default_value_t = 1 << 20)]
    pub difficulty: u64,

    /// Header hash to start from (hex, random when absent)
    #[arg(long)]
    pub header: Option<String>,

    /// Seconds between synthetic work updates
    #[arg(long, default_value_t = 15)]
    pub work_interval: u64,
}

/// Options for the device listing
#[derive(Parser, Debug)]
pub struct ListDevicesOptions {
    /// Only list these device indices, comma separated
    #[arg(long, value_delimiter = ',')]
    pub devices: Vec<usize>,
}

/// Options for the telemetry snapshot
#[derive(Parser, Debug)]
pub struct HwmonOptions {
    /// Print JSON instead of one line per device
    #[arg(long)]
    pub json: bool,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}
