//! Shared fixtures for the integration tests: tiny-epoch configuration,
//! polling helpers and wrapper platforms that inject delays and failures.

#![allow(dead_code)]

use ethash_miner_rs::config::WorkerConfig;
use ethash_miner_rs::farm::{Farm, Solution, WorkPackage};
use ethash_miner_rs::device::{
    DeviceContext, DeviceDataset, DeviceDescriptor, HostPlatform, Platform, PlatformDevice,
    SearchBatch, SearchOutcome,
};
use ethash_miner_rs::miner::algorithm::{EthashParams, LightCache};
use ethash_miner_rs::miner::dataset::LightCacheStore;
use ethash_miner_rs::miner::kernel::KernelSet;
use ethash_miner_rs::{LocalFarm, MinerError, StatsReporter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Small batches on test-sized datasets
pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        local_work_size: 8,
        global_work_multiplier: 8,
        poll_interval: Duration::from_millis(5),
        params: EthashParams::TEST,
        ..WorkerConfig::default()
    }
}

/// Farm and store sharing test-sized light caches
pub fn local_farm() -> (Arc<LocalFarm>, Arc<LightCacheStore>) {
    let store = Arc::new(LightCacheStore::new(EthashParams::TEST));
    let farm = Arc::new(LocalFarm::new(
        Arc::clone(&store),
        StatsReporter::new(Duration::from_secs(60)),
    ));
    (farm, store)
}

/// Polls `check` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Host platform whose dataset generation takes at least `delay`
pub struct SlowPlatform {
    pub inner: HostPlatform,
    pub delay: Duration,
}

impl Platform for SlowPlatform {
    fn name(&self) -> &str {
        "Slow host"
    }

    fn devices(&self) -> Vec<PlatformDevice> {
        self.inner.devices()
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceContext>, MinerError> {
        Ok(Box::new(SlowContext {
            inner: self.inner.open(device)?,
            delay: self.delay,
        }))
    }
}

struct SlowContext {
    inner: Box<dyn DeviceContext>,
    delay: Duration,
}

impl DeviceContext for SlowContext {
    fn descriptor(&self) -> &DeviceDescriptor {
        self.inner.descriptor()
    }

    fn build_kernels(&mut self, kernels: &KernelSet) -> Result<(), MinerError> {
        self.inner.build_kernels(kernels)
    }

    fn generate_dataset(
        &mut self,
        cache: &LightCache,
        local_size: usize,
    ) -> Result<DeviceDataset, MinerError> {
        std::thread::sleep(self.delay);
        self.inner.generate_dataset(cache, local_size)
    }

    fn dispatch_search(
        &mut self,
        dataset: &DeviceDataset,
        batch: SearchBatch,
    ) -> Result<(), MinerError> {
        self.inner.dispatch_search(dataset, batch)
    }

    fn poll_search(&mut self, timeout: Duration) -> Result<Option<SearchOutcome>, MinerError> {
        self.inner.poll_search(timeout)
    }

    fn abandon_search(&mut self) {
        self.inner.abandon_search()
    }
}

/// Host platform that refuses to open the listed devices
pub struct FlakyPlatform {
    pub inner: HostPlatform,
    pub broken: Vec<usize>,
}

impl Platform for FlakyPlatform {
    fn name(&self) -> &str {
        "Flaky host"
    }

    fn devices(&self) -> Vec<PlatformDevice> {
        self.inner.devices()
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceContext>, MinerError> {
        if self.broken.contains(&device.device_index) {
            return Err(MinerError::DeviceUnavailable(format!(
                "device {} fell off the bus",
                device.device_index
            )));
        }
        self.inner.open(device)
    }
}

/// Host platform whose driver crashes on open
pub struct PanickyPlatform {
    pub inner: HostPlatform,
}

impl Platform for PanickyPlatform {
    fn name(&self) -> &str {
        "Panicky host"
    }

    fn devices(&self) -> Vec<PlatformDevice> {
        self.inner.devices()
    }

    fn open(&self, _device: &DeviceDescriptor) -> Result<Box<dyn DeviceContext>, MinerError> {
        panic!("driver crashed while opening the device");
    }
}

/// Farm that installs `next` right after the first completed batch,
/// before the worker gets to submit that batch's candidates
pub struct SwitchAfterBatch {
    pub inner: Arc<LocalFarm>,
    pub next: WorkPackage,
    pub switched: AtomicBool,
}

impl Farm for SwitchAfterBatch {
    fn current_work(&self) -> Option<Arc<WorkPackage>> {
        self.inner.current_work()
    }

    fn submit_solution(&self, solution: Solution) -> bool {
        self.inner.submit_solution(solution)
    }

    fn report_hashes(&self, device: usize, count: u64, window: Duration) {
        if !self.switched.swap(true, Ordering::SeqCst) {
            self.inner.set_work(self.next.clone());
        }
        self.inner.report_hashes(device, count, window);
    }

    fn worker_faulted(&self, device: usize, error: &MinerError) {
        self.inner.worker_faulted(device, error);
    }
}
