// src/device/host.rs
//! Host compute platform
//!
//! Exposes the CPU as one or more compute devices. Each opened device gets
//! its own rayon pool (its "compute units") and a queue thread per search
//! launch, so dispatch is asynchronous exactly like a GPU command queue: the
//! worker enqueues, then polls with a timeout, and may cancel.

use crate::device::{
    DeviceContext, DeviceDataset, DeviceDescriptor, Platform, PlatformDevice, ResourceGuard,
    ResourceKind, ResourceTracker, SearchBatch, SearchOutcome, Vendor,
};
use crate::miner::algorithm::LightCache;
use crate::miner::kernel::{BUILTIN_KERNELS, KernelSet};
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::System;

const PLATFORM_NAME: &str = "Host";

#[derive(Debug, Clone)]
struct HostDeviceEntry {
    name: String,
    threads: usize,
    memory: u64,
}

/// Platform exposing the host CPU as compute devices
#[derive(Debug)]
pub struct HostPlatform {
    devices: Vec<HostDeviceEntry>,
    tracker: ResourceTracker,
}

impl HostPlatform {
    /// One device using every logical CPU and all physical memory
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        HostPlatform::builder()
            .threads_per_device(num_cpus::get())
            .memory(system.total_memory())
            .build()
    }

    /// Builder for custom device layouts
    pub fn builder() -> HostPlatformBuilder {
        HostPlatformBuilder::default()
    }

    /// Live resource counters of every context opened on this platform
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HostPlatform`]
#[derive(Debug, Clone)]
pub struct HostPlatformBuilder {
    devices: usize,
    threads: usize,
    memory: u64,
}

impl Default for HostPlatformBuilder {
    fn default() -> Self {
        HostPlatformBuilder {
            devices: 1,
            threads: 1,
            memory: 1 << 32,
        }
    }
}

impl HostPlatformBuilder {
    /// Number of devices to expose
    pub fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Pool threads per device
    pub fn threads_per_device(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Memory each device reports (datasets larger than this fail to build)
    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = bytes;
        self
    }

    /// Builds the platform
    pub fn build(self) -> HostPlatform {
        let devices = (0..self.devices)
            .map(|i| HostDeviceEntry {
                name: format!("Host CPU #{} ({} threads)", i, self.threads),
                threads: self.threads,
                memory: self.memory,
            })
            .collect();
        HostPlatform {
            devices,
            tracker: ResourceTracker::new(),
        }
    }
}

impl Platform for HostPlatform {
    fn name(&self) -> &str {
        PLATFORM_NAME
    }

    fn devices(&self) -> Vec<PlatformDevice> {
        self.devices
            .iter()
            .map(|entry| PlatformDevice {
                name: entry.name.clone(),
                vendor: Vendor::Host,
                global_memory: entry.memory,
                compute_units: entry.threads,
            })
            .collect()
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceContext>, MinerError> {
        let entry = self.devices.get(device.device_index).ok_or_else(|| {
            MinerError::DeviceUnavailable(format!(
                "host platform has no device {}",
                device.device_index
            ))
        })?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(entry.threads)
            .thread_name({
                let index = device.index;
                move |t| format!("host{}-cu{}", index, t)
            })
            .build()
            .map_err(|e| MinerError::DeviceUnavailable(format!("{}: {}", entry.name, e)))?;

        debug!("Opened {} with {} compute threads", entry.name, entry.threads);

        Ok(Box::new(HostContext {
            descriptor: device.clone(),
            pool: Arc::new(pool),
            tracker: self.tracker.clone(),
            kernels: None,
            inflight: None,
            _context: self.tracker.acquire(ResourceKind::Context),
        }))
    }
}

struct LoadedKernels {
    set: KernelSet,
    _handles: [ResourceGuard; 2],
}

struct InFlight {
    cancel: Arc<AtomicBool>,
    results: Receiver<SearchOutcome>,
    queue: JoinHandle<()>,
}

struct HostContext {
    descriptor: DeviceDescriptor,
    pool: Arc<rayon::ThreadPool>,
    tracker: ResourceTracker,
    kernels: Option<LoadedKernels>,
    inflight: Option<InFlight>,
    _context: ResourceGuard,
}

impl HostContext {
    fn kernels(&self) -> Result<&KernelSet, MinerError> {
        self.kernels
            .as_ref()
            .map(|k| &k.set)
            .ok_or_else(|| MinerError::KernelLaunchFailed("kernels not built".into()))
    }
}

impl DeviceContext for HostContext {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn build_kernels(&mut self, kernels: &KernelSet) -> Result<(), MinerError> {
        for name in [kernels.search.name(), kernels.generate.name()] {
            if !BUILTIN_KERNELS.contains(&name) {
                return Err(MinerError::KernelBuildFailed(format!(
                    "device {} has no program for {}",
                    self.descriptor.index, name
                )));
            }
        }
        debug!(
            "Loading {} kernels ({}, {}) on device {}",
            kernels.variant,
            kernels.search.name(),
            kernels.generate.name(),
            self.descriptor.index
        );
        self.kernels = Some(LoadedKernels {
            set: kernels.clone(),
            _handles: [
                self.tracker.acquire(ResourceKind::Kernel),
                self.tracker.acquire(ResourceKind::Kernel),
            ],
        });
        Ok(())
    }

    fn generate_dataset(
        &mut self,
        cache: &LightCache,
        local_size: usize,
    ) -> Result<DeviceDataset, MinerError> {
        let generate = Arc::clone(&self.kernels()?.generate);
        let size = cache.dataset_size();
        if size > self.descriptor.global_memory {
            return Err(MinerError::DatasetGenerationFailed(format!(
                "dataset for epoch {} needs {} bytes, device {} has {}",
                cache.epoch(),
                size,
                self.descriptor.index,
                self.descriptor.global_memory
            )));
        }

        let buffer = self.tracker.acquire(ResourceKind::Buffer);
        let started = Instant::now();
        let mut nodes = vec![[0u32; 16]; cache.dataset_items()];
        self.pool
            .install(|| generate.generate(cache.nodes(), &mut nodes, local_size));

        info!(
            "Device {} generated {} MiB dataset for epoch {} in {:.2?}",
            self.descriptor.index,
            size >> 20,
            cache.epoch(),
            started.elapsed()
        );

        Ok(DeviceDataset::new(*cache.seed(), cache.epoch(), nodes, buffer))
    }

    fn dispatch_search(
        &mut self,
        dataset: &DeviceDataset,
        batch: SearchBatch,
    ) -> Result<(), MinerError> {
        if self.inflight.is_some() {
            return Err(MinerError::KernelLaunchFailed(
                "a search batch is already in flight".into(),
            ));
        }

        let search = Arc::clone(&self.kernels()?.search);
        let pool = Arc::clone(&self.pool);
        let nodes = Arc::clone(dataset.nodes());
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let (tx, rx) = crossbeam_channel::bounded(1);

        let queue = std::thread::Builder::new()
            .name(format!("host{}-queue", self.descriptor.index))
            .spawn(move || {
                let outcome = pool.install(|| search.search(&nodes, &batch, &flag));
                // The receiver is gone when the batch was abandoned.
                let _ = tx.send(outcome);
            })
            .map_err(|e| MinerError::KernelLaunchFailed(format!("queue thread: {}", e)))?;

        self.inflight = Some(InFlight {
            cancel,
            results: rx,
            queue,
        });
        Ok(())
    }

    fn poll_search(&mut self, timeout: Duration) -> Result<Option<SearchOutcome>, MinerError> {
        let received = match &self.inflight {
            Some(inflight) => inflight.results.recv_timeout(timeout),
            None => {
                return Err(MinerError::KernelLaunchFailed(
                    "poll without a batch in flight".into(),
                ));
            }
        };

        match received {
            Ok(outcome) => {
                if let Some(done) = self.inflight.take() {
                    let _ = done.queue.join();
                }
                Ok(Some(outcome))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(dead) = self.inflight.take() {
                    let _ = dead.queue.join();
                }
                Err(MinerError::KernelLaunchFailed(
                    "search queue terminated without a result".into(),
                ))
            }
        }
    }

    fn abandon_search(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.cancel.store(true, Ordering::SeqCst);
            let _ = inflight.queue.join();
        }
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.abandon_search();
        debug!("Released host device {}", self.descriptor.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRegistry;
    use crate::miner::algorithm::{EthashParams, Node, hashimoto_light, meets_boundary};
    use crate::miner::kernel::{KernelVariant, SearchKernel, select};

    fn open_first(platform: &Arc<HostPlatform>) -> Box<dyn DeviceContext> {
        let registry = DeviceRegistry::new(vec![platform.clone() as Arc<dyn Platform>]);
        let device = registry.device(0).unwrap().clone();
        platform.open(&device).unwrap()
    }

    #[test]
    fn dispatch_then_poll_returns_verified_candidates() {
        let platform = Arc::new(HostPlatform::builder().threads_per_device(2).build());
        let mut ctx = open_first(&platform);
        ctx.build_kernels(&select(KernelVariant::Stable)).unwrap();

        let cache = LightCache::new(EthashParams::TEST, 0);
        let dataset = ctx.generate_dataset(&cache, 32).unwrap();
        let batch = SearchBatch {
            header: [9u8; 32],
            boundary: crate::miner::algorithm::boundary_from_difficulty(4),
            start_nonce: 500,
            count: 64,
            local_size: 8,
        };
        ctx.dispatch_search(&dataset, batch).unwrap();

        let outcome = loop {
            if let Some(outcome) = ctx.poll_search(Duration::from_millis(20)).unwrap() {
                break outcome;
            }
        };
        assert_eq!(outcome.hashes, 64);
        for nonce in outcome.nonces {
            let out = hashimoto_light(&cache, &batch.header, nonce);
            assert!(meets_boundary(&out.result, &batch.boundary));
        }
    }

    #[test]
    fn dataset_larger_than_device_memory_fails() {
        let platform = Arc::new(HostPlatform::builder().memory(1024).build());
        let mut ctx = open_first(&platform);
        ctx.build_kernels(&select(KernelVariant::Stable)).unwrap();

        let cache = LightCache::new(EthashParams::TEST, 0);
        let err = ctx.generate_dataset(&cache, 32).unwrap_err();
        assert!(matches!(err, MinerError::DatasetGenerationFailed(_)));
        assert_eq!(platform.tracker().live(ResourceKind::Buffer), 0);
    }

    #[test]
    fn dropping_context_releases_everything() {
        let platform = Arc::new(HostPlatform::builder().build());
        let mut ctx = open_first(&platform);
        ctx.build_kernels(&select(KernelVariant::Custom)).unwrap();
        let cache = LightCache::new(EthashParams::TEST, 1);
        let dataset = ctx.generate_dataset(&cache, 16).unwrap();
        ctx.dispatch_search(
            &dataset,
            SearchBatch {
                header: [1u8; 32],
                boundary: [0u8; 32],
                start_nonce: 0,
                count: 1 << 20,
                local_size: 16,
            },
        )
        .unwrap();
        assert_eq!(platform.tracker().total_live(), 4);

        drop(dataset);
        drop(ctx);
        assert_eq!(platform.tracker().total_live(), 0);
    }

    struct ForeignSearch;

    impl SearchKernel for ForeignSearch {
        fn name(&self) -> &'static str {
            "ethash_search_cuda"
        }

        fn search(&self, _: &[Node], batch: &SearchBatch, _: &AtomicBool) -> SearchOutcome {
            SearchOutcome {
                start_nonce: batch.start_nonce,
                ..SearchOutcome::default()
            }
        }
    }

    #[test]
    fn unknown_kernel_fails_to_build() {
        let platform = Arc::new(HostPlatform::builder().build());
        let mut ctx = open_first(&platform);
        let kernels = KernelSet {
            search: Arc::new(ForeignSearch),
            ..select(KernelVariant::Stable)
        };

        let err = ctx.build_kernels(&kernels).unwrap_err();
        assert!(matches!(err, MinerError::KernelBuildFailed(_)));
        assert_eq!(platform.tracker().live(ResourceKind::Kernel), 0);
    }

    #[test]
    fn poll_without_dispatch_is_a_launch_failure() {
        let platform = Arc::new(HostPlatform::builder().build());
        let mut ctx = open_first(&platform);
        let err = ctx.poll_search(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, MinerError::KernelLaunchFailed(_)));
    }
}
