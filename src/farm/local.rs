// src/farm/local.rs
//! In-process farm
//!
//! Holds the current work package behind an `ArcSwapOption` so workers read
//! it without locking, re-verifies every submitted solution on the host and
//! feeds the [`StatsReporter`].

use crate::farm::{Farm, Solution, SubmitOutcome, WorkPackage};
use crate::miner::algorithm::{hashimoto_light, meets_boundary};
use crate::miner::dataset::LightCacheStore;
use crate::stats::{ShareResult, StatsReporter};
use crate::types::{H256, hash_hex};
use crate::utils::error::MinerError;
use arc_swap::ArcSwapOption;
use log::{debug, error, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Accepted solutions kept for inspection, newest last
const ACCEPTED_HISTORY: usize = 1024;

/// Farm living in the same process as its workers
pub struct LocalFarm {
    work: ArcSwapOption<WorkPackage>,
    store: Arc<LightCacheStore>,
    reporter: StatsReporter,
    seen: Mutex<HashSet<(H256, u64)>>,
    accepted: Mutex<VecDeque<Solution>>,
    faults: Mutex<Vec<(usize, String)>>,
}

impl LocalFarm {
    /// Creates a farm without work
    ///
    /// # Arguments
    /// * `store` - Light caches used to verify submissions (share it with the workers)
    /// * `reporter` - Sink for hashrate and share counters
    pub fn new(store: Arc<LightCacheStore>, reporter: StatsReporter) -> Self {
        LocalFarm {
            work: ArcSwapOption::empty(),
            store,
            reporter,
            seen: Mutex::new(HashSet::new()),
            accepted: Mutex::new(VecDeque::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the current package; in-flight work against the old one becomes stale
    ///
    /// Duplicate tracking is only kept for the new header, since solutions
    /// for any other header now classify as stale before the lookup.
    pub fn set_work(&self, work: WorkPackage) -> Arc<WorkPackage> {
        let work = Arc::new(work);
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(header, _)| *header == work.header_hash);
        info!(
            "New work: block {} header {}",
            work.block_number,
            hash_hex(&work.header_hash)
        );
        self.work.store(Some(Arc::clone(&work)));
        work
    }

    /// Withdraws the current package; workers go idle
    pub fn clear_work(&self) {
        self.work.store(None);
    }

    /// Most recently accepted solutions, in submission order
    pub fn accepted(&self) -> Vec<Solution> {
        self.accepted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Devices that reported a fault, with the error text
    pub fn faults(&self) -> Vec<(usize, String)> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Statistics sink
    pub fn reporter(&self) -> &StatsReporter {
        &self.reporter
    }

    /// Classifies a solution and records it when accepted
    pub fn check(&self, solution: Solution) -> SubmitOutcome {
        let current = self.work.load_full();
        if current.as_deref() != Some(&*solution.work) {
            return SubmitOutcome::Stale;
        }

        let Some(epoch) = solution.work.epoch() else {
            return SubmitOutcome::Invalid;
        };
        let light = self.store.get(epoch);
        let out = hashimoto_light(&light, &solution.work.header_hash, solution.nonce);
        if out.mix_digest != solution.mix_digest
            || out.result != solution.result
            || !meets_boundary(&out.result, &solution.work.boundary)
        {
            return SubmitOutcome::Invalid;
        }

        let key = (solution.work.header_hash, solution.nonce);
        if !self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key)
        {
            return SubmitOutcome::Duplicate;
        }

        let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        if accepted.len() == ACCEPTED_HISTORY {
            accepted.pop_front();
        }
        accepted.push_back(solution);
        SubmitOutcome::Accepted
    }
}

impl Farm for LocalFarm {
    fn current_work(&self) -> Option<Arc<WorkPackage>> {
        self.work.load_full()
    }

    fn submit_solution(&self, solution: Solution) -> bool {
        let (device, nonce) = (solution.device, solution.nonce);
        let outcome = self.check(solution);
        match outcome {
            SubmitOutcome::Accepted => {
                info!("Device {} solution {:#018x} accepted", device, nonce);
                self.reporter.record_share(ShareResult::Accepted);
            }
            SubmitOutcome::Stale => {
                debug!("Device {} solution {:#018x} stale", device, nonce);
                self.reporter.record_share(ShareResult::Stale);
            }
            SubmitOutcome::Invalid | SubmitOutcome::Duplicate => {
                warn!("Device {} solution {:#018x} {}", device, nonce, outcome);
                self.reporter.record_share(ShareResult::Rejected);
            }
        }
        outcome.is_accepted()
    }

    fn report_hashes(&self, device: usize, count: u64, window: Duration) {
        self.reporter.record_hashes(device, count, window);
    }

    fn worker_faulted(&self, device: usize, err: &MinerError) {
        error!("Device {} left the pool: {}", device, err);
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((device, err.to_string()));
    }
}
