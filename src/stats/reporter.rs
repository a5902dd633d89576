// src/stats/reporter.rs
use crate::device::DeviceDescriptor;
use crate::stats::hwmon::HardwareMonitor;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Statistics related to mining performance
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total number of hashes computed
    pub hashes_total: u64,
    /// Number of solutions accepted by the farm
    pub shares_accepted: u64,
    /// Number of solutions rejected by the farm
    pub shares_rejected: u64,
    /// Number of solutions dropped because their package was superseded
    pub shares_stale: u64,
    /// Sum of the latest per-device hashrates (hashes per second)
    pub current_hashrate: f64,
    /// Average hashrate since the reporter started (hashes per second)
    pub avg_hashrate: f64,
}

/// Hashrate of one device
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceRate {
    /// Hashes reported by the device so far
    pub hashes: u64,
    /// Rate over the last reported window (hashes per second)
    pub hashrate: f64,
}

/// Collects and reports mining statistics
#[derive(Clone)]
pub struct StatsReporter {
    /// Atomic counters for mining statistics
    stats: Arc<MiningStatsAtomic>,
    /// Interval at which stats are reported
    report_interval: Duration,
}

/// Atomic version of MiningStats for thread-safe operations
struct MiningStatsAtomic {
    hashes: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    devices: Mutex<BTreeMap<usize, DeviceRate>>,
    start_time: Instant,
}

impl StatsReporter {
    /// Creates a new StatsReporter with the specified reporting interval
    ///
    /// # Arguments
    /// * `report_interval` - How often to log statistics
    pub fn new(report_interval: Duration) -> Self {
        StatsReporter {
            stats: Arc::new(MiningStatsAtomic {
                hashes: AtomicU64::new(0),
                accepted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                stale: AtomicU64::new(0),
                devices: Mutex::new(BTreeMap::new()),
                start_time: Instant::now(),
            }),
            report_interval,
        }
    }

    /// Records hashes a device completed over `window`
    pub fn record_hashes(&self, device: usize, count: u64, window: Duration) {
        self.stats.hashes.fetch_add(count, Ordering::Relaxed);

        let mut devices = self.stats.devices.lock().unwrap_or_else(|e| e.into_inner());
        let rate = devices.entry(device).or_default();
        rate.hashes += count;
        if !window.is_zero() {
            rate.hashrate = count as f64 / window.as_secs_f64();
        }
    }

    /// Records the outcome of one submitted solution
    pub fn record_share(&self, result: ShareResult) {
        let counter = match result {
            ShareResult::Accepted => &self.stats.accepted,
            ShareResult::Rejected => &self.stats.rejected,
            ShareResult::Stale => &self.stats.stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the current mining statistics
    ///
    /// # Returns
    /// A snapshot of the current mining statistics
    pub fn get_stats(&self) -> MiningStats {
        let total_seconds = self.stats.start_time.elapsed().as_secs_f64();
        let hashes = self.stats.hashes.load(Ordering::Relaxed);
        let current = self.device_hashrates().values().map(|r| r.hashrate).sum();

        MiningStats {
            hashes_total: hashes,
            shares_accepted: self.stats.accepted.load(Ordering::Relaxed),
            shares_rejected: self.stats.rejected.load(Ordering::Relaxed),
            shares_stale: self.stats.stale.load(Ordering::Relaxed),
            current_hashrate: current,
            avg_hashrate: hashes as f64 / total_seconds.max(1e-3),
        }
    }

    /// Per-device hashrates, keyed by global device index
    pub fn device_hashrates(&self) -> BTreeMap<usize, DeviceRate> {
        self.stats
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Starts the periodic reporting of statistics
    ///
    /// This spawns a background thread that logs stats, and a hardware
    /// snapshot per device when a monitor is given, at the configured
    /// interval. The thread exits when the returned handle is stopped.
    ///
    /// # Arguments
    /// * `monitor` - Telemetry source for the per-device lines
    /// * `devices` - Devices to report telemetry for
    pub fn start_reporting(
        &self,
        monitor: Option<Arc<HardwareMonitor>>,
        devices: Vec<DeviceDescriptor>,
    ) -> ReportingHandle {
        let reporter = self.clone();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = std::thread::spawn(move || {
            let mut last = Instant::now();
            while flag.load(Ordering::Relaxed) {
                // Short sleeps keep shutdown responsive.
                std::thread::sleep(Duration::from_millis(100).min(reporter.report_interval));
                if last.elapsed() < reporter.report_interval {
                    continue;
                }
                last = Instant::now();
                reporter.log_once(monitor.as_deref(), &devices);
            }
        });

        ReportingHandle {
            running,
            thread: Some(thread),
        }
    }

    fn log_once(&self, monitor: Option<&HardwareMonitor>, devices: &[DeviceDescriptor]) {
        let mining_stats = self.get_stats();
        log::info!(
            "Hashrate: {:.2} H/s | Accepted/Rejected/Stale: {}/{}/{}",
            mining_stats.current_hashrate,
            mining_stats.shares_accepted,
            mining_stats.shares_rejected,
            mining_stats.shares_stale
        );

        let rates = self.device_hashrates();
        for device in devices {
            let rate = rates.get(&device.index).copied().unwrap_or_default();
            match monitor {
                Some(monitor) => {
                    log::info!(
                        "  #{} {:.2} H/s | {}",
                        device.index,
                        rate.hashrate,
                        monitor.snapshot(device)
                    );
                }
                None => log::info!("  #{} {:.2} H/s", device.index, rate.hashrate),
            }
        }
    }
}

/// Background reporting thread, stopped on [`ReportingHandle::stop`] or drop
pub struct ReportingHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReportingHandle {
    /// Stops the reporting thread and waits for it
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReportingHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Result of submitting a solution to the farm
#[derive(Debug, Clone, Copy)]
pub enum ShareResult {
    /// The solution was accepted as valid
    Accepted,
    /// The solution was rejected (invalid or duplicate)
    Rejected,
    /// The solution's package had been superseded
    Stale,
}
