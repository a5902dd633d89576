// src/miner/algorithm/ethash.rs
//! Ethash reference functions
//!
//! Pure, allocation-explicit implementation of the pieces the worker needs:
//! - Epoch and seed hash derivation
//! - Light cache generation
//! - Full dataset item derivation
//! - The hashimoto mix function (light and full flavours)
//!
//! Sizes come from [`EthashParams`] so tests can run the exact same code on
//! datasets of a few kilobytes instead of gigabytes.

use crate::types::H256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256, Keccak512};

/// Number of blocks sharing one dataset
pub const EPOCH_LENGTH: u64 = 30_000;
/// Size of one dataset/cache node in bytes
pub const HASH_BYTES: usize = 64;
/// Width of the hashimoto mix in bytes
pub const MIX_BYTES: usize = 128;
/// Highest epoch considered when resolving a seed hash back to its epoch
pub const MAX_EPOCH: u64 = 2048;

const WORD_BYTES: usize = 4;
const NODE_WORDS: usize = HASH_BYTES / WORD_BYTES;
const MIX_WORDS: usize = MIX_BYTES / WORD_BYTES;
const MIX_NODES: usize = MIX_WORDS / NODE_WORDS;
const DATASET_PARENTS: u32 = 256;
const CACHE_ROUNDS: usize = 3;
const ACCESSES: u32 = 64;
const FNV_PRIME: u32 = 0x0100_0193;

/// One 64-byte cache or dataset element, as little-endian words
pub type Node = [u32; NODE_WORDS];

/// Size schedule of the light cache and the full dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthashParams {
    /// Cache size at epoch 0, before prime adjustment
    pub cache_bytes_init: u64,
    /// Cache growth per epoch
    pub cache_bytes_growth: u64,
    /// Dataset size at epoch 0, before prime adjustment
    pub dataset_bytes_init: u64,
    /// Dataset growth per epoch
    pub dataset_bytes_growth: u64,
}

impl EthashParams {
    /// Production schedule (16 MiB cache, 1 GiB dataset at epoch 0)
    pub const MAINNET: Self = Self {
        cache_bytes_init: 1 << 24,
        cache_bytes_growth: 1 << 17,
        dataset_bytes_init: 1 << 30,
        dataset_bytes_growth: 1 << 23,
    };

    /// Miniature schedule used by tests and quick benchmarks
    pub const TEST: Self = Self {
        cache_bytes_init: 1 << 10,
        cache_bytes_growth: 1 << 7,
        dataset_bytes_init: 1 << 15,
        dataset_bytes_growth: 1 << 12,
    };

    /// Light cache size in bytes for `epoch`
    pub fn cache_size(&self, epoch: u64) -> u64 {
        let step = HASH_BYTES as u64;
        let mut size = self.cache_bytes_init + self.cache_bytes_growth * epoch - step;
        while !is_prime(size / step) {
            size -= 2 * step;
        }
        size
    }

    /// Full dataset size in bytes for `epoch`
    pub fn dataset_size(&self, epoch: u64) -> u64 {
        let step = MIX_BYTES as u64;
        let mut size = self.dataset_bytes_init + self.dataset_bytes_growth * epoch - step;
        while !is_prime(size / step) {
            size -= 2 * step;
        }
        size
    }
}

impl Default for EthashParams {
    fn default() -> Self {
        Self::MAINNET
    }
}

/// Epoch a block number belongs to
pub fn epoch_of(block_number: u64) -> u64 {
    block_number / EPOCH_LENGTH
}

/// Seed hash for `epoch`: keccak256 applied `epoch` times to 32 zero bytes
pub fn seed_hash(epoch: u64) -> H256 {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        seed = keccak256(&seed);
    }
    seed
}

/// Resolves a seed hash back to its epoch, if it is one of the first [`MAX_EPOCH`]
pub fn epoch_from_seed(seed: &H256) -> Option<u64> {
    let mut candidate = [0u8; 32];
    for epoch in 0..MAX_EPOCH {
        if candidate == *seed {
            return Some(epoch);
        }
        candidate = keccak256(&candidate);
    }
    None
}

/// Light cache for one epoch
#[derive(Debug, Clone)]
pub struct LightCache {
    epoch: u64,
    seed: H256,
    params: EthashParams,
    nodes: Vec<Node>,
}

impl LightCache {
    /// Derives the cache for `epoch` (sequential memory-hard RandMemoHash)
    pub fn new(params: EthashParams, epoch: u64) -> Self {
        let seed = seed_hash(epoch);
        let n = (params.cache_size(epoch) / HASH_BYTES as u64) as usize;

        let mut nodes: Vec<Node> = Vec::with_capacity(n);
        nodes.push(keccak512_node(&seed));
        for i in 1..n {
            let next = keccak512_node(&node_bytes(&nodes[i - 1]));
            nodes.push(next);
        }

        for _ in 0..CACHE_ROUNDS {
            for i in 0..n {
                let v = nodes[i][0] as usize % n;
                let prev = nodes[(i + n - 1) % n];
                let mut mixed = [0u32; NODE_WORDS];
                for (k, word) in mixed.iter_mut().enumerate() {
                    *word = prev[k] ^ nodes[v][k];
                }
                nodes[i] = keccak512_node(&node_bytes(&mixed));
            }
        }

        LightCache {
            epoch,
            seed,
            params,
            nodes,
        }
    }

    /// Epoch this cache belongs to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Seed hash this cache was derived from
    pub fn seed(&self) -> &H256 {
        &self.seed
    }

    /// Size schedule used to build the cache
    pub fn params(&self) -> EthashParams {
        self.params
    }

    /// Cache nodes
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Full dataset size matching this cache
    pub fn dataset_size(&self) -> u64 {
        self.params.dataset_size(self.epoch)
    }

    /// Number of 64-byte items in the matching full dataset
    pub fn dataset_items(&self) -> usize {
        (self.dataset_size() / HASH_BYTES as u64) as usize
    }
}

/// Derives full dataset item `index` from the light cache
pub fn calc_dataset_item(cache: &[Node], index: u32) -> Node {
    let n = cache.len();
    let mut mix = cache[index as usize % n];
    mix[0] ^= index;
    mix = keccak512_node(&node_bytes(&mix));

    for j in 0..DATASET_PARENTS {
        let parent = fnv(index ^ j, mix[j as usize % NODE_WORDS]) as usize % n;
        for (k, word) in mix.iter_mut().enumerate() {
            *word = fnv(*word, cache[parent][k]);
        }
    }

    keccak512_node(&node_bytes(&mix))
}

/// Mix digest and final result of one hashimoto evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashOutput {
    /// Compressed mix, submitted alongside the nonce
    pub mix_digest: H256,
    /// Value compared against the boundary
    pub result: H256,
}

/// Hashimoto against the light cache (slow, used for verification)
pub fn hashimoto_light(cache: &LightCache, header: &H256, nonce: u64) -> HashOutput {
    let nodes = cache.nodes();
    hashimoto(header, nonce, cache.dataset_size(), |index| {
        calc_dataset_item(nodes, index)
    })
}

/// Hashimoto against a generated full dataset
pub fn hashimoto_full(dataset: &[Node], header: &H256, nonce: u64) -> HashOutput {
    let full_size = (dataset.len() * HASH_BYTES) as u64;
    hashimoto(header, nonce, full_size, |index| dataset[index as usize])
}

fn hashimoto(
    header: &H256,
    nonce: u64,
    full_size: u64,
    lookup: impl Fn(u32) -> Node,
) -> HashOutput {
    let items = (full_size / HASH_BYTES as u64) as u32;
    let pages = items / MIX_NODES as u32;

    let mut seed_input = [0u8; 40];
    seed_input[..32].copy_from_slice(header);
    seed_input[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed_bytes = keccak512(&seed_input);
    let seed = node_from_bytes(&seed_bytes);

    let mut mix = [0u32; MIX_WORDS];
    for (k, word) in mix.iter_mut().enumerate() {
        *word = seed[k % NODE_WORDS];
    }

    for i in 0..ACCESSES {
        let page = fnv(i ^ seed[0], mix[i as usize % MIX_WORDS]) % pages;
        let first = page * MIX_NODES as u32;
        for m in 0..MIX_NODES {
            let node = lookup(first + m as u32);
            for k in 0..NODE_WORDS {
                let idx = m * NODE_WORDS + k;
                mix[idx] = fnv(mix[idx], node[k]);
            }
        }
    }

    let mut mix_digest = [0u8; 32];
    for (c, words) in mix.chunks_exact(4).enumerate() {
        let folded = fnv(fnv(fnv(words[0], words[1]), words[2]), words[3]);
        mix_digest[c * 4..c * 4 + 4].copy_from_slice(&folded.to_le_bytes());
    }

    let mut hasher = Keccak256::new();
    hasher.update(seed_bytes);
    hasher.update(mix_digest);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hasher.finalize());

    HashOutput { mix_digest, result }
}

/// True when `result` (big-endian) is at or below `boundary`
pub fn meets_boundary(result: &H256, boundary: &H256) -> bool {
    result <= boundary
}

/// Boundary for a difficulty: `2^256 / difficulty`, saturating at the maximum
pub fn boundary_from_difficulty(difficulty: u64) -> H256 {
    if difficulty <= 1 {
        return [0xff; 32];
    }

    // Long division of 2^256 (a one followed by 32 zero bytes) by a u64.
    let divisor = difficulty as u128;
    let mut remainder: u128 = 1;
    let mut boundary = [0u8; 32];
    for byte in boundary.iter_mut() {
        let acc = remainder << 8;
        *byte = (acc / divisor) as u8;
        remainder = acc % divisor;
    }
    boundary
}

/// Keccak-256 over the serialized content of a dataset
pub fn dataset_digest(nodes: &[Node]) -> H256 {
    let mut hasher = Keccak256::new();
    for node in nodes {
        hasher.update(node_bytes(node));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Keccak-256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> H256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

fn keccak512(data: &[u8]) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    out.copy_from_slice(&Keccak512::digest(data));
    out
}

fn keccak512_node(data: &[u8]) -> Node {
    node_from_bytes(&keccak512(data))
}

fn node_from_bytes(bytes: &[u8; HASH_BYTES]) -> Node {
    let mut node = [0u32; NODE_WORDS];
    for (word, chunk) in node.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    node
}

/// Serializes a node to its 64-byte little-endian form
pub fn node_bytes(node: &Node) -> [u8; HASH_BYTES] {
    let mut bytes = [0u8; HASH_BYTES];
    for (chunk, word) in bytes.chunks_exact_mut(WORD_BYTES).zip(node.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}
