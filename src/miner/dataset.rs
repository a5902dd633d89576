// src/miner/dataset.rs
//! Epoch dataset management
//!
//! Light caches are derived on the host and shared between workers through a
//! [`LightCacheStore`]. Each worker owns a [`DatasetCache`] holding at most one
//! device-resident dataset, rebuilt whenever the work package's seed changes.

use crate::device::{DeviceContext, DeviceDataset};
use crate::miner::algorithm::{EthashParams, LightCache, epoch_from_seed};
use crate::types::{DagLoadMode, H256, hash_hex};
use crate::utils::error::MinerError;
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

/// Light caches kept alive for reuse (current and previous epoch)
const LIGHT_CACHE_SLOTS: usize = 2;

/// Host-side memo of recently derived light caches
///
/// Shared by all workers so that N devices switching epoch derive the light
/// cache once instead of N times: the first caller derives it, later callers
/// for the same epoch block until it is ready.
#[derive(Debug)]
pub struct LightCacheStore {
    params: EthashParams,
    slots: Mutex<VecDeque<(u64, Arc<OnceLock<Arc<LightCache>>>)>>,
    derivations: AtomicU64,
}

impl LightCacheStore {
    /// Creates an empty store for the given parameter set
    pub fn new(params: EthashParams) -> Self {
        LightCacheStore {
            params,
            slots: Mutex::new(VecDeque::with_capacity(LIGHT_CACHE_SLOTS)),
            derivations: AtomicU64::new(0),
        }
    }

    /// Parameter set caches are derived with
    pub fn params(&self) -> EthashParams {
        self.params
    }

    /// Returns the light cache for `epoch`, deriving it when missing
    pub fn get(&self, epoch: u64) -> Arc<LightCache> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.iter().find(|(e, _)| *e == epoch) {
                Some((_, slot)) => Arc::clone(slot),
                None => {
                    if slots.len() == LIGHT_CACHE_SLOTS {
                        slots.pop_front();
                    }
                    let slot = Arc::new(OnceLock::new());
                    slots.push_back((epoch, Arc::clone(&slot)));
                    slot
                }
            }
        };

        // Derived outside the store lock; other epochs stay available.
        let cache = slot.get_or_init(|| {
            let started = Instant::now();
            let cache = LightCache::new(self.params, epoch);
            self.derivations.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Derived light cache for epoch {} ({} bytes) in {:.2?}",
                epoch,
                cache.nodes().len() * 64,
                started.elapsed()
            );
            Arc::new(cache)
        });
        Arc::clone(cache)
    }

    /// Epochs currently memoized, oldest first
    pub fn epochs(&self) -> Vec<u64> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.iter().map(|(epoch, _)| *epoch).collect()
    }

    /// Number of light caches derived since creation
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}

/// Coordinates dataset generation across workers
///
/// In [`DagLoadMode::Serial`] only one worker generates at a time; in
/// [`DagLoadMode::Parallel`] the gate is a pass-through.
#[derive(Debug, Default)]
pub struct GenerationGate {
    mode: DagLoadMode,
    lock: Mutex<()>,
}

impl GenerationGate {
    /// Creates a gate for the configured load mode
    pub fn new(mode: DagLoadMode) -> Self {
        GenerationGate {
            mode,
            lock: Mutex::new(()),
        }
    }

    /// Configured load mode
    pub fn mode(&self) -> DagLoadMode {
        self.mode
    }

    /// Runs `f`, exclusively when in serial mode
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        match self.mode {
            DagLoadMode::Serial => {
                let _turn = self.lock.lock().unwrap_or_else(|e| e.into_inner());
                f()
            }
            DagLoadMode::Parallel => f(),
        }
    }
}

/// Dataset resident on a worker's device
#[derive(Debug)]
pub struct Dataset {
    light: Arc<LightCache>,
    buffer: DeviceDataset,
}

impl Dataset {
    /// Seed the dataset was generated for
    pub fn seed(&self) -> &H256 {
        self.buffer.seed()
    }

    /// Epoch of the dataset
    pub fn epoch(&self) -> u64 {
        self.buffer.epoch()
    }

    /// Host light cache, used to verify device results
    pub fn light(&self) -> &LightCache {
        &self.light
    }

    /// Device buffer holding the full dataset
    pub fn buffer(&self) -> &DeviceDataset {
        &self.buffer
    }

    /// Full dataset size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.buffer.size_bytes()
    }
}

/// Per-worker dataset slot
#[derive(Debug)]
pub struct DatasetCache {
    store: Arc<LightCacheStore>,
    gate: Arc<GenerationGate>,
    local_size: usize,
    resident: Option<Dataset>,
    rebuilds: u64,
}

impl DatasetCache {
    /// Creates an empty slot
    ///
    /// # Arguments
    /// * `store` - Shared light cache memo
    /// * `gate` - Shared generation gate
    /// * `local_size` - Work group size passed to the generation kernel
    pub fn new(store: Arc<LightCacheStore>, gate: Arc<GenerationGate>, local_size: usize) -> Self {
        DatasetCache {
            store,
            gate,
            local_size,
            resident: None,
            rebuilds: 0,
        }
    }

    /// Whether the resident dataset was generated for `seed`
    pub fn is_current(&self, seed: &H256) -> bool {
        self.resident.as_ref().is_some_and(|d| d.seed() == seed)
    }

    /// Resident dataset, if any
    pub fn resident(&self) -> Option<&Dataset> {
        self.resident.as_ref()
    }

    /// Number of completed rebuilds
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Drops the resident dataset, freeing its device buffer
    pub fn release(&mut self) {
        if let Some(dataset) = self.resident.take() {
            debug!("Releasing dataset for epoch {}", dataset.epoch());
        }
    }

    /// Makes the dataset for `seed` resident on `device`
    ///
    /// A no-op when it already is. Otherwise the previous dataset is dropped
    /// first and the new one generated in full; on any failure nothing is
    /// resident afterwards.
    ///
    /// # Errors
    /// `DatasetGenerationFailed` when the seed matches no known epoch or the
    /// device cannot hold or generate the dataset.
    pub fn ensure_epoch(
        &mut self,
        device: &mut dyn DeviceContext,
        seed: &H256,
    ) -> Result<&Dataset, MinerError> {
        if !self.is_current(seed) {
            self.release();
            let dataset = self.rebuild(device, seed)?;
            self.resident = Some(dataset);
            self.rebuilds += 1;
        }

        self.resident
            .as_ref()
            .ok_or_else(|| MinerError::DatasetGenerationFailed("no resident dataset".into()))
    }

    fn rebuild(&self, device: &mut dyn DeviceContext, seed: &H256) -> Result<Dataset, MinerError> {
        let epoch = epoch_from_seed(seed).ok_or_else(|| {
            MinerError::DatasetGenerationFailed(format!(
                "seed {} matches no epoch",
                hash_hex(seed)
            ))
        })?;

        let index = device.descriptor().index;
        info!(
            "Device {} building dataset for epoch {} ({} generation)",
            index,
            epoch,
            self.gate.mode()
        );

        let light = self.store.get(epoch);
        let buffer = self
            .gate
            .run(|| device.generate_dataset(&light, self.local_size))
            .map_err(|e| match e {
                MinerError::DatasetGenerationFailed(_) => e,
                other => MinerError::DatasetGenerationFailed(other.to_string()),
            })?;

        Ok(Dataset { light, buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRegistry, HostPlatform, Platform};
    use crate::miner::algorithm::seed_hash;
    use crate::miner::kernel::{KernelVariant, select};

    fn device(platform: &Arc<HostPlatform>) -> Box<dyn DeviceContext> {
        let registry = DeviceRegistry::new(vec![platform.clone() as Arc<dyn Platform>]);
        let mut ctx = platform.open(registry.device(0).unwrap()).unwrap();
        ctx.build_kernels(&select(KernelVariant::Stable)).unwrap();
        ctx
    }

    fn cache() -> DatasetCache {
        DatasetCache::new(
            Arc::new(LightCacheStore::new(EthashParams::TEST)),
            Arc::new(GenerationGate::new(DagLoadMode::Parallel)),
            16,
        )
    }

    #[test]
    fn same_seed_is_a_no_op() {
        let platform = Arc::new(HostPlatform::builder().build());
        let mut ctx = device(&platform);
        let mut datasets = cache();
        let seed = seed_hash(0);

        datasets.ensure_epoch(ctx.as_mut(), &seed).unwrap();
        datasets.ensure_epoch(ctx.as_mut(), &seed).unwrap();
        assert_eq!(datasets.rebuilds(), 1);
        assert!(datasets.is_current(&seed));
    }

    #[test]
    fn switching_back_regenerates_identical_content() {
        let platform = Arc::new(HostPlatform::builder().build());
        let mut ctx = device(&platform);
        let mut datasets = cache();
        let (s1, s2) = (seed_hash(1), seed_hash(2));

        let first = datasets
            .ensure_epoch(ctx.as_mut(), &s1)
            .unwrap()
            .buffer()
            .content_digest();
        assert_eq!(datasets.ensure_epoch(ctx.as_mut(), &s2).unwrap().epoch(), 2);
        let again = datasets
            .ensure_epoch(ctx.as_mut(), &s1)
            .unwrap()
            .buffer()
            .content_digest();

        assert_eq!(datasets.rebuilds(), 3);
        assert_eq!(first, again);
        // Only one dataset buffer is ever live.
        assert_eq!(platform.tracker().live(crate::device::ResourceKind::Buffer), 1);
    }

    #[test]
    fn failed_rebuild_leaves_nothing_resident() {
        let platform = Arc::new(HostPlatform::builder().memory(40_000).build());
        let mut ctx = device(&platform);
        let mut datasets = cache();

        // Epoch 0 fits (32128 bytes), epoch 3 does not (44672 bytes).
        datasets.ensure_epoch(ctx.as_mut(), &seed_hash(0)).unwrap();
        let err = datasets.ensure_epoch(ctx.as_mut(), &seed_hash(3)).unwrap_err();

        assert!(matches!(err, MinerError::DatasetGenerationFailed(_)));
        assert!(datasets.resident().is_none());
        assert_eq!(datasets.rebuilds(), 1);
        assert_eq!(platform.tracker().live(crate::device::ResourceKind::Buffer), 0);
    }

    #[test]
    fn unknown_seed_is_rejected() {
        let platform = Arc::new(HostPlatform::builder().build());
        let mut ctx = device(&platform);
        let mut datasets = cache();

        let err = datasets.ensure_epoch(ctx.as_mut(), &[0xabu8; 32]).unwrap_err();
        assert!(matches!(err, MinerError::DatasetGenerationFailed(_)));
    }

    #[test]
    fn store_memoizes_two_epochs() {
        let store = LightCacheStore::new(EthashParams::TEST);
        let a = store.get(4);
        let b = store.get(4);
        assert!(Arc::ptr_eq(&a, &b));

        store.get(5);
        store.get(6);
        assert_eq!(store.epochs(), vec![5, 6]);
        assert_eq!(store.derivations(), 3);
    }

    #[test]
    fn concurrent_callers_share_one_derivation() {
        let store = Arc::new(LightCacheStore::new(EthashParams::TEST));
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (store, barrier) = (store.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    store.get(3)
                })
            })
            .collect();
        let caches: Vec<Arc<LightCache>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.derivations(), 1);
        assert!(caches.iter().all(|c| Arc::ptr_eq(c, &caches[0])));
    }

    #[test]
    fn serial_gate_never_overlaps() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let gate = Arc::new(GenerationGate::new(DagLoadMode::Serial));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (gate, active, peak) = (gate.clone(), active.clone(), peak.clone());
                std::thread::spawn(move || {
                    gate.run(|| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
