//! Proof-of-work reference functions
//!
//! The worker treats the hashing scheme as a library of pure functions:
//! seed/epoch derivation, light cache generation, dataset item derivation
//! and the mix function. Everything device-side (dataset expansion, nonce
//! search) is built on top of these in [`crate::miner::kernel`].

/// Ethash: Keccak based, memory-hard, epoch-rotated dataset
pub mod ethash;

pub use self::ethash::{
    EPOCH_LENGTH, EthashParams, HashOutput, LightCache, Node, boundary_from_difficulty,
    calc_dataset_item, epoch_from_seed, epoch_of, hashimoto_full, hashimoto_light, meets_boundary,
    seed_hash,
};
