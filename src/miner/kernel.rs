// src/miner/kernel.rs
//! Kernel variant selection
//!
//! A [`KernelSet`] pairs one search kernel with one dataset generation
//! kernel. Variants are interchangeable: for the same inputs they produce the
//! same dataset and the same candidate nonces, and only differ in how work is
//! split across the device's compute units.
//!
//! The kernels here run on the host platform through rayon; the calling
//! thread must already be inside the device's pool (`ThreadPool::install`).

use crate::device::{MAX_SEARCH_RESULTS, SearchBatch, SearchOutcome};
use crate::miner::algorithm::{Node, calc_dataset_item, hashimoto_full, meets_boundary};
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Search/generation kernel family
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelVariant {
    /// Production kernel
    #[default]
    Stable,
    /// Experimental kernel, not production-validated
    Unstable,
    /// Alternative dispatch shape for tuning
    Custom,
}

impl KernelVariant {
    /// Maps a configuration id to a variant
    ///
    /// 0 = Stable, 1 = Unstable, 2 = Custom. Any other id falls back to
    /// Stable, never to Unstable.
    pub fn from_id(id: u32) -> Self {
        match id {
            0 => KernelVariant::Stable,
            1 => KernelVariant::Unstable,
            2 => KernelVariant::Custom,
            other => {
                warn!("Unknown kernel id {}, using the stable kernel", other);
                KernelVariant::Stable
            }
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelVariant::Stable => write!(f, "stable"),
            KernelVariant::Unstable => write!(f, "unstable"),
            KernelVariant::Custom => write!(f, "custom"),
        }
    }
}

/// Entry points of the kernels shipped with the crate
pub const BUILTIN_KERNELS: [&str; 5] = [
    "ethash_search",
    "ethash_search_unrolled",
    "ethash_search_strided",
    "ethash_calculate_dag_item",
    "ethash_calculate_dag_item_single",
];

/// Nonce search over a generated dataset
pub trait SearchKernel: Send + Sync {
    /// Kernel entry point name
    fn name(&self) -> &'static str;

    /// Evaluates every nonce of `batch`, stopping early once `cancel` is set
    fn search(&self, dataset: &[Node], batch: &SearchBatch, cancel: &AtomicBool) -> SearchOutcome;
}

/// Full dataset expansion from the light cache
pub trait GenerationKernel: Send + Sync {
    /// Kernel entry point name
    fn name(&self) -> &'static str;

    /// Fills `dataset` with items derived from `cache`
    fn generate(&self, cache: &[Node], dataset: &mut [Node], local_size: usize);
}

/// Search and generation kernels selected for one worker
#[derive(Clone)]
pub struct KernelSet {
    /// Variant the kernels were selected for
    pub variant: KernelVariant,
    /// Nonce search kernel
    pub search: Arc<dyn SearchKernel>,
    /// Dataset generation kernel
    pub generate: Arc<dyn GenerationKernel>,
}

impl fmt::Debug for KernelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSet")
            .field("variant", &self.variant)
            .field("search", &self.search.name())
            .field("generate", &self.generate.name())
            .finish()
    }
}

/// Concrete kernels for a variant
pub fn select(variant: KernelVariant) -> KernelSet {
    match variant {
        KernelVariant::Stable => KernelSet {
            variant,
            search: Arc::new(WorkgroupSearch),
            generate: Arc::new(ChunkedGenerate { groups_per_chunk: 1 }),
        },
        KernelVariant::Unstable => KernelSet {
            variant,
            search: Arc::new(PerNonceSearch),
            generate: Arc::new(PerItemGenerate),
        },
        KernelVariant::Custom => KernelSet {
            variant,
            search: Arc::new(StridedSearch),
            generate: Arc::new(ChunkedGenerate { groups_per_chunk: 4 }),
        },
    }
}

#[inline]
fn is_hit(dataset: &[Node], batch: &SearchBatch, nonce: u64) -> bool {
    let out = hashimoto_full(dataset, &batch.header, nonce);
    meets_boundary(&out.result, &batch.boundary)
}

fn finish(
    batch: &SearchBatch,
    hashes: u64,
    mut nonces: Vec<u64>,
    cancel: &AtomicBool,
) -> SearchOutcome {
    nonces.sort_unstable();
    nonces.truncate(MAX_SEARCH_RESULTS);
    SearchOutcome {
        start_nonce: batch.start_nonce,
        hashes,
        nonces,
        cancelled: cancel.load(Ordering::Relaxed),
    }
}

fn merge(a: (u64, Vec<u64>), b: (u64, Vec<u64>)) -> (u64, Vec<u64>) {
    let (hashes_a, mut found) = a;
    let (hashes_b, more) = b;
    found.extend(more);
    (hashes_a + hashes_b, found)
}

/// One task per workgroup of `local_size` consecutive nonces
struct WorkgroupSearch;

impl SearchKernel for WorkgroupSearch {
    fn name(&self) -> &'static str {
        "ethash_search"
    }

    fn search(&self, dataset: &[Node], batch: &SearchBatch, cancel: &AtomicBool) -> SearchOutcome {
        let local = batch.local_size.max(1) as u64;
        let end = batch.start_nonce + batch.count;
        let groups = batch.count.div_ceil(local);

        let (hashes, nonces) = (0..groups)
            .into_par_iter()
            .map(|group| {
                if cancel.load(Ordering::Relaxed) {
                    return (0, Vec::new());
                }
                let first = batch.start_nonce + group * local;
                let last = (first + local).min(end);
                let found: Vec<u64> = (first..last)
                    .filter(|&nonce| is_hit(dataset, batch, nonce))
                    .collect();
                (last - first, found)
            })
            .reduce(|| (0, Vec::new()), merge);

        finish(batch, hashes, nonces, cancel)
    }
}

/// Work stealing at single-nonce granularity
struct PerNonceSearch;

impl SearchKernel for PerNonceSearch {
    fn name(&self) -> &'static str {
        "ethash_search_unrolled"
    }

    fn search(&self, dataset: &[Node], batch: &SearchBatch, cancel: &AtomicBool) -> SearchOutcome {
        let hashes = AtomicU64::new(0);
        let nonces: Vec<u64> = (batch.start_nonce..batch.start_nonce + batch.count)
            .into_par_iter()
            .filter_map(|nonce| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                hashes.fetch_add(1, Ordering::Relaxed);
                is_hit(dataset, batch, nonce).then_some(nonce)
            })
            .collect();

        finish(batch, hashes.into_inner(), nonces, cancel)
    }
}

/// One lane per pool thread, each walking the batch with a fixed stride
struct StridedSearch;

impl SearchKernel for StridedSearch {
    fn name(&self) -> &'static str {
        "ethash_search_strided"
    }

    fn search(&self, dataset: &[Node], batch: &SearchBatch, cancel: &AtomicBool) -> SearchOutcome {
        let lanes = rayon::current_num_threads().max(1) as u64;
        let check_every = batch.local_size.max(1) as u64;

        let (hashes, nonces) = (0..lanes)
            .into_par_iter()
            .map(|lane| {
                let mut hashes = 0u64;
                let mut found = Vec::new();
                let mut offset = lane;
                while offset < batch.count {
                    if hashes % check_every == 0 && cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let nonce = batch.start_nonce + offset;
                    if is_hit(dataset, batch, nonce) {
                        found.push(nonce);
                    }
                    hashes += 1;
                    offset += lanes;
                }
                (hashes, found)
            })
            .reduce(|| (0, Vec::new()), merge);

        finish(batch, hashes, nonces, cancel)
    }
}

/// Items generated in chunks of `local_size * groups_per_chunk`
struct ChunkedGenerate {
    groups_per_chunk: usize,
}

impl GenerationKernel for ChunkedGenerate {
    fn name(&self) -> &'static str {
        "ethash_calculate_dag_item"
    }

    fn generate(&self, cache: &[Node], dataset: &mut [Node], local_size: usize) {
        let chunk = local_size.max(1) * self.groups_per_chunk.max(1);
        dataset
            .par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(group, items)| {
                let base = group * chunk;
                for (k, item) in items.iter_mut().enumerate() {
                    *item = calc_dataset_item(cache, (base + k) as u32);
                }
            });
    }
}

/// One task per dataset item
struct PerItemGenerate;

impl GenerationKernel for PerItemGenerate {
    fn name(&self) -> &'static str {
        "ethash_calculate_dag_item_single"
    }

    fn generate(&self, cache: &[Node], dataset: &mut [Node], _local_size: usize) {
        dataset
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, item)| *item = calc_dataset_item(cache, index as u32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::algorithm::{EthashParams, LightCache, boundary_from_difficulty};

    fn generate(variant: KernelVariant, cache: &LightCache) -> Vec<Node> {
        let mut dataset = vec![[0u32; 16]; cache.dataset_items()];
        select(variant).generate.generate(cache.nodes(), &mut dataset, 32);
        dataset
    }

    #[test]
    fn out_of_range_id_fails_closed_to_stable() {
        assert_eq!(KernelVariant::from_id(5), KernelVariant::Stable);
        assert_eq!(KernelVariant::from_id(u32::MAX), KernelVariant::Stable);
        assert_eq!(KernelVariant::from_id(1), KernelVariant::Unstable);
        assert_eq!(KernelVariant::from_id(2), KernelVariant::Custom);
        assert_eq!(select(KernelVariant::from_id(5)).variant, KernelVariant::Stable);
    }

    #[test]
    fn selected_kernels_are_builtin() {
        for variant in [KernelVariant::Stable, KernelVariant::Unstable, KernelVariant::Custom] {
            let set = select(variant);
            assert!(BUILTIN_KERNELS.contains(&set.search.name()));
            assert!(BUILTIN_KERNELS.contains(&set.generate.name()));
        }
    }

    #[test]
    fn all_variants_generate_the_same_dataset() {
        let cache = LightCache::new(EthashParams::TEST, 0);
        let stable = generate(KernelVariant::Stable, &cache);
        assert_eq!(stable.len(), cache.dataset_items());
        assert_eq!(stable[3], calc_dataset_item(cache.nodes(), 3));
        assert_eq!(generate(KernelVariant::Unstable, &cache), stable);
        assert_eq!(generate(KernelVariant::Custom, &cache), stable);
    }

    #[test]
    fn all_variants_find_the_same_candidates() {
        let cache = LightCache::new(EthashParams::TEST, 0);
        let dataset = generate(KernelVariant::Stable, &cache);
        let batch = SearchBatch {
            header: [3u8; 32],
            boundary: boundary_from_difficulty(8),
            start_nonce: 1_000,
            count: 96,
            local_size: 16,
        };
        let cancel = AtomicBool::new(false);

        let expected: Vec<u64> = (batch.start_nonce..batch.start_nonce + batch.count)
            .filter(|&nonce| is_hit(&dataset, &batch, nonce))
            .take(MAX_SEARCH_RESULTS)
            .collect();

        for variant in [KernelVariant::Stable, KernelVariant::Unstable, KernelVariant::Custom] {
            let outcome = select(variant).search.search(&dataset, &batch, &cancel);
            assert_eq!(outcome.hashes, batch.count, "{variant}");
            assert_eq!(outcome.nonces, expected, "{variant}");
            assert!(!outcome.cancelled);
        }
    }

    #[test]
    fn cancelled_search_stops_early() {
        let cache = LightCache::new(EthashParams::TEST, 0);
        let dataset = generate(KernelVariant::Stable, &cache);
        let batch = SearchBatch {
            header: [0u8; 32],
            boundary: [0xff; 32],
            start_nonce: 0,
            count: 4_096,
            local_size: 64,
        };
        let cancel = AtomicBool::new(true);

        let outcome = select(KernelVariant::Stable).search.search(&dataset, &batch, &cancel);
        assert!(outcome.cancelled);
        assert_eq!(outcome.hashes, 0);
        assert!(outcome.nonces.is_empty());
    }
}
