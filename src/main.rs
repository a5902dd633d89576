// src/main.rs
use clap::Parser;
use ethash_miner_rs::miner::algorithm::{EPOCH_LENGTH, boundary_from_difficulty};
use ethash_miner_rs::miner::dataset::LightCacheStore;
use ethash_miner_rs::types::{H256, parse_hash};
use ethash_miner_rs::utils::init_bench_logging;
use ethash_miner_rs::*;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main entry point for the Ethash miner
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
///
/// # Flow
/// 1. Parses command line arguments
/// 2. Delegates to appropriate subcommand handler
/// 3. Propagates any errors upward
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::ListDevices(opts) => list_devices(opts),
        cli::Action::Hwmon(opts) => print_hwmon(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Mines synthetic work on the selected devices
///
/// # Arguments
/// * `opts` - Benchmark configuration options
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Loads the configuration and applies CLI overrides
/// 3. Starts one worker per selected device against a local farm
/// 4. Rotates the synthetic header, crossing an epoch every few rounds
/// 5. Stops the workers and reports the final statistics
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let mut config = match &opts.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    opts.overrides.apply(&mut config);
    let worker_config = Arc::new(config.validate()?);

    let registry = Arc::new(DeviceRegistry::with_default_platforms());
    let store = Arc::new(LightCacheStore::new(worker_config.params));
    let reporter = StatsReporter::new(Duration::from_secs(config.stats_interval_secs.max(1)));
    let farm = Arc::new(LocalFarm::new(Arc::clone(&store), reporter.clone()));

    let boundary = boundary_from_difficulty(opts.difficulty);
    let mut header: H256 = match &opts.header {
        Some(hex) => parse_hash(hex)?,
        None => rand::thread_rng().r#gen(),
    };
    let mut block = opts.block;
    farm.set_work(WorkPackage::new(header, block, boundary));

    let mut scheduler = Scheduler::new(
        Arc::clone(&worker_config),
        Arc::clone(&registry),
        farm.clone(),
        store,
    );
    scheduler.start()?;

    let devices: Vec<DeviceDescriptor> = scheduler
        .workers()
        .iter()
        .map(|w| w.device().clone())
        .collect();
    let monitor = Arc::new(HardwareMonitor::new(&devices));
    let reporting = reporter.start_reporting(Some(monitor), devices);

    log::info!(
        "Starting benchmark for {} seconds at difficulty {}",
        opts.duration,
        opts.difficulty
    );

    let started = Instant::now();
    let work_interval = Duration::from_secs(opts.work_interval.max(1));
    let mut last_work = Instant::now();
    let mut rounds = 0u64;
    while started.elapsed() < Duration::from_secs(opts.duration) {
        std::thread::sleep(Duration::from_millis(250));
        if scheduler.workers().iter().all(|w| w.state().is_terminal()) {
            log::error!("All workers exited, ending benchmark early");
            break;
        }
        if last_work.elapsed() >= work_interval {
            rounds += 1;
            header = ethash_miner_rs::miner::algorithm::ethash::keccak256(&header);
            // Every fourth round moves to the next epoch.
            block += if rounds % 4 == 0 { EPOCH_LENGTH } else { 1 };
            farm.set_work(WorkPackage::new(header, block, boundary));
            last_work = Instant::now();
        }
    }

    let per_device = scheduler.stats();
    for (index, result) in scheduler.stop() {
        if let Err(e) = result {
            log::warn!("Worker {} exited with: {}", index, e);
        }
    }
    reporting.stop();

    // Report final results
    let stats = reporter.get_stats();
    log::info!("Benchmark results:");
    for (index, worker) in per_device {
        log::info!(
            "  #{}: {} hashes, {} batches, {} found, {} accepted, {} stale, {} rebuilds",
            index,
            worker.hashes,
            worker.batches,
            worker.found,
            worker.accepted,
            worker.stale,
            worker.rebuilds
        );
    }
    log::info!("Total hashes: {}", stats.hashes_total);
    log::info!("Average hashrate: {:.2} H/s", stats.avg_hashrate);
    log::info!(
        "Solutions accepted/rejected/stale: {}/{}/{}",
        stats.shares_accepted,
        stats.shares_rejected,
        stats.shares_stale
    );
    log::logger().flush(); // Ensure final results appear

    Ok(())
}

/// Prints the device table, or only the selected devices
///
/// # Arguments
/// * `opts` - Optional device selection
fn list_devices(opts: cli::ListDevicesOptions) -> Result<(), MinerError> {
    utils::init_logging();
    let registry = DeviceRegistry::with_default_platforms();
    if opts.devices.is_empty() {
        print!("{}", registry.list_devices());
    } else {
        print!("{}", registry.list_selected(&opts.devices)?);
    }
    Ok(())
}

/// Prints one telemetry snapshot per device
///
/// # Arguments
/// * `opts` - Output format options
fn print_hwmon(opts: cli::HwmonOptions) -> Result<(), MinerError> {
    utils::init_logging();
    let registry = DeviceRegistry::with_default_platforms();
    let monitor = HardwareMonitor::new(registry.devices());
    let snapshots = monitor.snapshot_all(registry.devices());

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        for (device, snapshot) in registry.devices().iter().zip(&snapshots) {
            println!("#{:<3} {:<32} {}", device.index, device.name, snapshot);
        }
    }
    Ok(())
}

/// Generates configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
///
/// # Operations
/// 1. Generates the commented template
/// 2. Writes template to specified output file
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let config = config::generate_template();
    std::fs::write(opts.output, config)?;
    Ok(())
}
