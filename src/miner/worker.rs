// src/miner/worker.rs
//! Per-device mining worker
//!
//! A worker owns one device for its whole life: it opens the context, loads
//! the kernels, keeps the epoch dataset resident and runs the
//! fetch, dispatch, poll, report loop against the farm. Each worker runs on
//! its own OS thread and is observed and stopped through a [`WorkerHandle`].

use crate::config::WorkerConfig;
use crate::device::{DeviceContext, DeviceDescriptor, Platform, SearchBatch};
use crate::farm::{Farm, Solution, WorkPackage};
use crate::miner::algorithm::{hashimoto_light, meets_boundary};
use crate::miner::dataset::{Dataset, DatasetCache, GenerationGate, LightCacheStore};
use crate::miner::kernel;
use crate::utils::error::MinerError;
use log::{debug, error, info, warn};
use rand::Rng;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Created, thread not running yet
    Uninitialized = 0,
    /// Opening the device and loading kernels
    Initializing = 1,
    /// Dispatching search batches
    Searching = 2,
    /// Regenerating the dataset for a new epoch
    Rebuilding = 3,
    /// Exited after a stop request
    Stopped = 4,
    /// Exited on an unrecoverable device error
    Faulted = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Initializing,
            2 => WorkerState::Searching,
            3 => WorkerState::Rebuilding,
            4 => WorkerState::Stopped,
            5 => WorkerState::Faulted,
            _ => WorkerState::Uninitialized,
        }
    }

    /// Whether the worker thread has exited
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Faulted)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Uninitialized => "uninitialized",
            WorkerState::Initializing => "initializing",
            WorkerState::Searching => "searching",
            WorkerState::Rebuilding => "rebuilding",
            WorkerState::Stopped => "stopped",
            WorkerState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free view of a worker's state
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        StateCell(Arc::new(AtomicU8::new(WorkerState::Uninitialized as u8)))
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// One-shot stop request
///
/// Cloned freely; stopping any clone stops them all. Stopping twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopHandle {
    /// Creates an unsignalled handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop and wakes any idle waiter
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps up to `timeout`, returning early on stop
    ///
    /// # Returns
    /// `true` when a stop was requested
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (stopped, _) = cvar
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *stopped
    }
}

#[derive(Debug, Default)]
struct WorkerCounters {
    hashes: AtomicU64,
    batches: AtomicU64,
    abandoned: AtomicU64,
    found: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    invalid: AtomicU64,
    rebuilds: AtomicU64,
}

impl WorkerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            hashes: self.hashes.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }
}

/// Counters of one worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Nonces evaluated in completed batches
    pub hashes: u64,
    /// Completed batches
    pub batches: u64,
    /// Batches abandoned on stop or work change
    pub abandoned: u64,
    /// Candidate nonces reported by the device
    pub found: u64,
    /// Solutions the farm accepted
    pub accepted: u64,
    /// Solutions the farm rejected
    pub rejected: u64,
    /// Candidates dropped because their package was superseded
    pub stale: u64,
    /// Candidates that failed host verification
    pub invalid: u64,
    /// Dataset rebuilds
    pub rebuilds: u64,
}

/// Nonce range allocator for one work package
struct NonceCursor {
    next: u64,
    step: u64,
}

impl NonceCursor {
    fn new(step: u64) -> Self {
        let mut cursor = NonceCursor { next: 0, step };
        cursor.reseed();
        cursor
    }

    /// Jumps to a random start leaving room for at least one batch
    fn reseed(&mut self) {
        self.next = rand::thread_rng().gen_range(0..=u64::MAX - self.step);
    }

    fn take(&mut self) -> u64 {
        if self.next.checked_add(self.step).is_none() {
            self.reseed();
        }
        let start = self.next;
        self.next += self.step;
        start
    }
}

/// Everything a worker needs before its thread starts
pub struct Worker {
    device: DeviceDescriptor,
    platform: Arc<dyn Platform>,
    config: Arc<WorkerConfig>,
    farm: Arc<dyn Farm>,
    store: Arc<LightCacheStore>,
    gate: Arc<GenerationGate>,
    state: StateCell,
    stop: StopHandle,
    counters: Arc<WorkerCounters>,
}

impl Worker {
    /// Creates a worker bound to `device`
    ///
    /// # Arguments
    /// * `device` - Device to mine on
    /// * `platform` - Platform able to open `device`
    /// * `config` - Shared validated settings
    /// * `farm` - Work source and solution sink
    /// * `store` - Shared light cache memo
    /// * `gate` - Shared dataset generation gate
    pub fn new(
        device: DeviceDescriptor,
        platform: Arc<dyn Platform>,
        config: Arc<WorkerConfig>,
        farm: Arc<dyn Farm>,
        store: Arc<LightCacheStore>,
        gate: Arc<GenerationGate>,
    ) -> Self {
        Worker {
            device,
            platform,
            config,
            farm,
            store,
            gate,
            state: StateCell::new(),
            stop: StopHandle::new(),
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    /// Starts the worker on a dedicated thread named `miner-<index>`
    ///
    /// # Errors
    /// `IoError` when the thread cannot be spawned.
    pub fn spawn(self) -> Result<WorkerHandle, MinerError> {
        let handle = WorkerHandle {
            device: self.device.clone(),
            state: self.state.clone(),
            stop: self.stop.clone(),
            counters: Arc::clone(&self.counters),
            thread: None,
        };

        let thread = std::thread::Builder::new()
            .name(format!("miner-{}", self.device.index))
            .spawn(move || self.run())?;

        Ok(WorkerHandle {
            thread: Some(thread),
            ..handle
        })
    }

    fn run(self) -> Result<(), MinerError> {
        let index = self.device.index;
        self.state.set(WorkerState::Initializing);
        info!("Worker {} starting on {}", index, self.device.name);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.mine())).unwrap_or_else(
            |payload| Err(MinerError::WorkerPanicked(panic_message(&*payload))),
        );

        match outcome {
            Ok(()) => {
                self.state.set(WorkerState::Stopped);
                info!("Worker {} stopped", index);
                Ok(())
            }
            Err(e) => {
                self.state.set(WorkerState::Faulted);
                if e.is_device_fault() {
                    error!("Worker {} lost device {}: {}", index, self.device.name, e);
                } else {
                    error!("Worker {} faulted: {}", index, e);
                }
                self.farm.worker_faulted(index, &e);
                Err(e)
            }
        }
    }

    fn mine(&self) -> Result<(), MinerError> {
        let kernels = kernel::select(self.config.kernel);
        let mut device = self.platform.open(&self.device)?;
        device.build_kernels(&kernels)?;

        let mut datasets = DatasetCache::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gate),
            self.config.local_work_size,
        );
        let result = self.search_loop(device.as_mut(), &mut datasets);

        // Dataset buffer goes before the context it lives in.
        datasets.release();
        drop(device);
        result
    }

    fn search_loop(
        &self,
        device: &mut dyn DeviceContext,
        datasets: &mut DatasetCache,
    ) -> Result<(), MinerError> {
        let index = self.device.index;
        let poll = self.config.poll_interval;
        let mut cursor = NonceCursor::new(self.config.global_work_size());
        let mut current: Option<Arc<WorkPackage>> = None;
        self.state.set(WorkerState::Searching);

        while !self.stop.is_stopped() {
            let Some(work) = self.farm.current_work() else {
                self.stop.wait(poll);
                continue;
            };

            if current.as_deref() != Some(&*work) {
                debug!(
                    "Worker {} got work for block {}",
                    index, work.block_number
                );
                cursor.reseed();
                current = Some(Arc::clone(&work));
            }

            if !datasets.is_current(&work.seed_hash) {
                self.state.set(WorkerState::Rebuilding);
                datasets.ensure_epoch(device, &work.seed_hash)?;
                WorkerCounters::bump(&self.counters.rebuilds);
                self.state.set(WorkerState::Searching);
                // The package may have moved on while generating.
                continue;
            }

            let dataset = datasets.resident().ok_or_else(|| {
                MinerError::DatasetGenerationFailed("dataset vanished after rebuild".into())
            })?;
            let batch = SearchBatch {
                header: work.header_hash,
                boundary: work.boundary,
                start_nonce: cursor.take(),
                count: self.config.global_work_size(),
                local_size: self.config.local_work_size,
            };

            let started = Instant::now();
            device.dispatch_search(dataset.buffer(), batch)?;
            let outcome = loop {
                if self.stop.is_stopped() {
                    break None;
                }
                if self.farm.current_work().as_deref() != Some(&*work) {
                    debug!("Worker {} abandoning batch, work changed", index);
                    break None;
                }
                if let Some(outcome) = device.poll_search(poll)? {
                    break Some(outcome);
                }
            };

            let Some(outcome) = outcome else {
                device.abandon_search();
                WorkerCounters::bump(&self.counters.abandoned);
                continue;
            };

            if outcome.start_nonce != batch.start_nonce {
                return Err(MinerError::KernelLaunchFailed(format!(
                    "results for batch {:#018x}, expected {:#018x}",
                    outcome.start_nonce, batch.start_nonce
                )));
            }
            if outcome.cancelled {
                WorkerCounters::bump(&self.counters.abandoned);
            } else {
                WorkerCounters::bump(&self.counters.batches);
            }
            self.counters
                .hashes
                .fetch_add(outcome.hashes, Ordering::Relaxed);
            self.farm
                .report_hashes(index, outcome.hashes, started.elapsed());

            for nonce in outcome.nonces {
                self.report_candidate(dataset, &work, nonce);
            }
        }

        Ok(())
    }

    /// Verifies a device candidate on the host and hands it to the farm
    fn report_candidate(&self, dataset: &Dataset, work: &Arc<WorkPackage>, nonce: u64) {
        let index = self.device.index;
        WorkerCounters::bump(&self.counters.found);

        let out = hashimoto_light(dataset.light(), &work.header_hash, nonce);
        if !meets_boundary(&out.result, &work.boundary) {
            warn!("Worker {} nonce {:#018x} failed verification", index, nonce);
            WorkerCounters::bump(&self.counters.invalid);
            return;
        }

        if self.farm.current_work().as_deref() != Some(&**work) {
            debug!("Worker {} dropping stale nonce {:#018x}", index, nonce);
            WorkerCounters::bump(&self.counters.stale);
            return;
        }

        let solution = Solution {
            nonce,
            mix_digest: out.mix_digest,
            result: out.result,
            work: Arc::clone(work),
            device: index,
        };
        if self.farm.submit_solution(solution) {
            WorkerCounters::bump(&self.counters.accepted);
        } else {
            WorkerCounters::bump(&self.counters.rejected);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

/// Control and observation side of a running worker
pub struct WorkerHandle {
    device: DeviceDescriptor,
    state: StateCell,
    stop: StopHandle,
    counters: Arc<WorkerCounters>,
    thread: Option<JoinHandle<Result<(), MinerError>>>,
}

impl WorkerHandle {
    /// Device the worker mines on
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Counter snapshot
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Requests a stop; the worker exits after abandoning its batch
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Clone of the worker's stop handle
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Waits for the worker thread
    ///
    /// # Returns
    /// The error that faulted the worker, or `WorkerPanicked`
    pub fn join(mut self) -> Result<(), MinerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().unwrap_or_else(|payload| {
            self.state.set(WorkerState::Faulted);
            Err(MinerError::WorkerPanicked(panic_message(&*payload)))
        })
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("device", &self.device.index)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_cell() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), WorkerState::Uninitialized);
        for state in [
            WorkerState::Initializing,
            WorkerState::Searching,
            WorkerState::Rebuilding,
            WorkerState::Stopped,
            WorkerState::Faulted,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
        assert!(WorkerState::Faulted.is_terminal());
        assert!(!WorkerState::Rebuilding.is_terminal());
    }

    #[test]
    fn stop_is_idempotent_and_wakes_waiters() {
        let stop = StopHandle::new();
        let waiter = {
            let stop = stop.clone();
            std::thread::spawn(move || stop.wait(Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(20));
        stop.stop();
        stop.stop();
        assert!(waiter.join().unwrap());
        assert!(stop.is_stopped());
    }

    #[test]
    fn idle_wait_times_out_without_stop() {
        let stop = StopHandle::new();
        assert!(!stop.wait(Duration::from_millis(5)));
    }

    #[test]
    fn cursor_never_overflows() {
        let mut cursor = NonceCursor::new(1 << 20);
        cursor.next = u64::MAX - 10;
        let start = cursor.take();
        assert!(start.checked_add(1 << 20).is_some());

        let a = cursor.take();
        let b = cursor.take();
        assert_eq!(b, a + (1 << 20));
    }
}
