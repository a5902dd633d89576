// src/farm/mod.rs
//! Work coordination contract
//!
//! Workers never talk to the network. They pull the current [`WorkPackage`]
//! from a [`Farm`], push [`Solution`]s and hash counts back, and tell it when
//! they fault. [`LocalFarm`] is the in-process implementation used by the
//! benchmark and the tests.

/// In-process farm
pub mod local;

/// Work package and solution types
pub mod work;

pub use self::local::LocalFarm;
pub use self::work::{Solution, SubmitOutcome, WorkPackage};

use crate::utils::error::MinerError;
use std::sync::Arc;
use std::time::Duration;

/// Coordinator the workers report to
///
/// Implementations are shared by every worker thread.
pub trait Farm: Send + Sync {
    /// Current package, if any. Must not block.
    fn current_work(&self) -> Option<Arc<WorkPackage>>;

    /// Hands over a host-verified solution
    ///
    /// # Returns
    /// `true` when the farm accepted it
    fn submit_solution(&self, solution: Solution) -> bool;

    /// Hashes a device completed over `window`
    fn report_hashes(&self, device: usize, count: u64, window: Duration);

    /// A worker left the pool because of `error`
    fn worker_faulted(&self, device: usize, error: &MinerError);
}
