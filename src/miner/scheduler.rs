// src/miner/scheduler.rs
//! Worker pool management
//!
//! Resolves the configured device selection against the registry and runs
//! one [`Worker`] per selected device. A device that cannot be resolved or
//! opened faults on its own; the remaining devices keep mining.

use crate::config::WorkerConfig;
use crate::device::{DeviceDescriptor, DeviceRegistry};
use crate::farm::Farm;
use crate::miner::dataset::{GenerationGate, LightCacheStore};
use crate::miner::worker::{Worker, WorkerHandle, WorkerStats};
use crate::utils::error::MinerError;
use log::{error, info, warn};
use std::sync::Arc;

/// Coordinates the per-device workers
pub struct Scheduler {
    /// Settings shared by every worker
    config: Arc<WorkerConfig>,
    /// Enumerated devices
    registry: Arc<DeviceRegistry>,
    /// Work source and solution sink
    farm: Arc<dyn Farm>,
    /// Light caches shared by every worker
    store: Arc<LightCacheStore>,
    /// Serializes dataset generation in serial load mode
    gate: Arc<GenerationGate>,
    /// Running workers, in selection order
    workers: Vec<WorkerHandle>,
}

impl Scheduler {
    /// Creates a new Scheduler instance
    ///
    /// # Arguments
    /// * `config` - Validated worker settings
    /// * `registry` - Device registry to select from
    /// * `farm` - Farm the workers report to
    /// * `store` - Light cache memo (share it with the farm when it verifies)
    pub fn new(
        config: Arc<WorkerConfig>,
        registry: Arc<DeviceRegistry>,
        farm: Arc<dyn Farm>,
        store: Arc<LightCacheStore>,
    ) -> Self {
        let gate = Arc::new(GenerationGate::new(config.dag_load_mode));
        Scheduler {
            config,
            registry,
            farm,
            store,
            gate,
            workers: Vec::new(),
        }
    }

    /// Global indices the configuration asks for
    ///
    /// Explicit `devices` win; otherwise every device, or every device of
    /// `platform_id`. Capped at `instances`.
    pub fn selection(&self) -> Vec<usize> {
        let mut selection: Vec<usize> = if !self.config.devices.is_empty() {
            if self.config.platform_id.is_some() {
                warn!("Both devices and platform_id configured, using devices");
            }
            self.config.devices.clone()
        } else {
            match self.config.platform_id {
                Some(platform) => self
                    .registry
                    .platform_devices(platform)
                    .iter()
                    .map(|d| d.index)
                    .collect(),
                None => self.registry.devices().iter().map(|d| d.index).collect(),
            }
        };
        if let Some(instances) = self.config.instances {
            selection.truncate(instances);
        }
        selection
    }

    /// Starts one worker per selected device
    ///
    /// Devices that cannot be resolved are reported to the farm through
    /// `worker_faulted` and skipped.
    ///
    /// # Returns
    /// * `Ok(n)` - Number of workers started
    /// * `Err(MinerError::DeviceUnavailable)` - When no worker could start
    pub fn start(&mut self) -> Result<usize, MinerError> {
        for index in self.selection() {
            if self.workers.iter().any(|w| w.device().index == index) {
                warn!("Device {} already has a worker", index);
                continue;
            }
            match self.spawn_worker(index) {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    error!("Device {} not started: {}", index, e);
                    self.farm.worker_faulted(index, &e);
                }
            }
        }

        if self.workers.is_empty() {
            return Err(MinerError::DeviceUnavailable(
                "no worker could be started".into(),
            ));
        }
        info!(
            "Started {} worker(s), global work size {}, {} kernel, {} dataset generation",
            self.workers.len(),
            self.config.global_work_size(),
            self.config.kernel,
            self.config.dag_load_mode
        );
        Ok(self.workers.len())
    }

    fn spawn_worker(&self, index: usize) -> Result<WorkerHandle, MinerError> {
        let device: DeviceDescriptor = self.registry.device(index)?.clone();
        let platform = self.registry.platform(device.platform_id).ok_or_else(|| {
            MinerError::DeviceUnavailable(format!("platform {} missing", device.platform_id))
        })?;

        Worker::new(
            device,
            Arc::clone(platform),
            Arc::clone(&self.config),
            Arc::clone(&self.farm),
            Arc::clone(&self.store),
            Arc::clone(&self.gate),
        )
        .spawn()
    }

    /// Running workers, in start order
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Per-device counter snapshots
    pub fn stats(&self) -> Vec<(usize, WorkerStats)> {
        self.workers
            .iter()
            .map(|w| (w.device().index, w.stats()))
            .collect()
    }

    /// Stops all mining workers
    ///
    /// Signals every worker first so they wind down concurrently, then joins
    /// them.
    ///
    /// # Returns
    /// The exit result of each worker, keyed by device index
    pub fn stop(&mut self) -> Vec<(usize, Result<(), MinerError>)> {
        for worker in &self.workers {
            worker.stop();
        }
        self.workers
            .drain(..)
            .map(|worker| (worker.device().index, worker.join()))
            .collect()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}
