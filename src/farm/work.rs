// src/farm/work.rs
//! Work packages and solutions exchanged between the farm and its workers

use crate::miner::algorithm::{epoch_from_seed, epoch_of, seed_hash};
use crate::types::{H256, hash_hex};
use std::fmt;
use std::sync::Arc;

/// A unit of work handed out by the farm
///
/// Packages are immutable; the farm supersedes them by swapping in a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkPackage {
    /// Hash of the block header being mined
    pub header_hash: H256,
    /// Seed hash identifying the epoch
    pub seed_hash: H256,
    /// Target: a result at or below this value is a solution
    pub boundary: H256,
    /// Block number the header belongs to
    pub block_number: u64,
}

impl WorkPackage {
    /// Builds a package for `block_number`, deriving the seed from its epoch
    pub fn new(header_hash: H256, block_number: u64, boundary: H256) -> Self {
        WorkPackage {
            header_hash,
            seed_hash: seed_hash(epoch_of(block_number)),
            boundary,
            block_number,
        }
    }

    /// Epoch the seed resolves to, `None` for an unknown seed
    pub fn epoch(&self) -> Option<u64> {
        epoch_from_seed(&self.seed_hash)
    }
}

impl fmt::Debug for WorkPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkPackage")
            .field("header", &hash_hex(&self.header_hash))
            .field("seed", &hash_hex(&self.seed_hash))
            .field("boundary", &hash_hex(&self.boundary))
            .field("block", &self.block_number)
            .finish()
    }
}

/// A nonce found by a worker, together with the package it solves
#[derive(Debug, Clone)]
pub struct Solution {
    /// Winning nonce
    pub nonce: u64,
    /// Mix digest computed on the host
    pub mix_digest: H256,
    /// Final result hash (at or below the package boundary)
    pub result: H256,
    /// Package the nonce was searched against
    pub work: Arc<WorkPackage>,
    /// Global index of the device that found it
    pub device: usize,
}

/// What the farm made of a submitted solution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Valid solution for the current package
    Accepted,
    /// The package was superseded before submission
    Stale,
    /// Hashes do not match or the result misses the boundary
    Invalid,
    /// Same header and nonce were already submitted
    Duplicate,
}

impl SubmitOutcome {
    /// Whether the submission counted
    pub fn is_accepted(self) -> bool {
        self == SubmitOutcome::Accepted
    }
}

impl fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitOutcome::Accepted => write!(f, "accepted"),
            SubmitOutcome::Stale => write!(f, "stale"),
            SubmitOutcome::Invalid => write!(f, "invalid"),
            SubmitOutcome::Duplicate => write!(f, "duplicate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_seed_follows_block_epoch() {
        let work = WorkPackage::new([1u8; 32], 30_001, [0xffu8; 32]);
        assert_eq!(work.seed_hash, seed_hash(1));
        assert_eq!(work.epoch(), Some(1));
    }

    #[test]
    fn foreign_seed_has_no_epoch() {
        let mut work = WorkPackage::new([1u8; 32], 0, [0xffu8; 32]);
        work.seed_hash = [7u8; 32];
        assert_eq!(work.epoch(), None);
    }
}
