//! Compute devices
//!
//! This module models everything a worker touches on the device side:
//! - [`DeviceDescriptor`]: one enumerated device, immutable after discovery
//! - [`Platform`]: a family of devices (an OpenCL platform, the host CPU)
//! - [`DeviceContext`]: an opened device owning kernels and buffers
//! - [`DeviceRegistry`]: ordered enumeration and index based selection
//!
//! Device resources are scoped: dropping a context or a dataset releases
//! the underlying allocations (see [`resources`]).

/// Host compute platform (rayon backed)
pub mod host;

/// Ordered device enumeration and selection
pub mod registry;

/// Live resource accounting and scoped guards
pub mod resources;

pub use self::host::{HostPlatform, HostPlatformBuilder};
pub use self::registry::DeviceRegistry;
pub use self::resources::{ResourceGuard, ResourceKind, ResourceTracker};

use crate::miner::algorithm::{LightCache, Node, ethash};
use crate::miner::kernel::KernelSet;
use crate::types::H256;
use crate::utils::error::MinerError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on candidate nonces a single search batch reports
pub const MAX_SEARCH_RESULTS: usize = 4;

/// Hardware vendor of a device, used to pick its telemetry source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// NVIDIA GPUs
    Nvidia,
    /// AMD GPUs
    Amd,
    /// Intel GPUs / FPGAs
    Intel,
    /// Host CPU device
    Host,
    /// Anything else
    Unknown,
}

impl Vendor {
    /// Classifies a platform or device vendor string
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("nvidia") {
            Vendor::Nvidia
        } else if name.contains("amd") || name.contains("advanced micro devices") {
            Vendor::Amd
        } else if name.contains("intel") {
            Vendor::Intel
        } else if name.contains("host") {
            Vendor::Host
        } else {
            Vendor::Unknown
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Vendor::Nvidia => "NVIDIA",
            Vendor::Amd => "AMD",
            Vendor::Intel => "Intel",
            Vendor::Host => "Host",
            Vendor::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// What a platform reports about one of its devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDevice {
    /// Human readable device name
    pub name: String,
    /// Device vendor
    pub vendor: Vendor,
    /// Global memory in bytes
    pub global_memory: u64,
    /// Parallel compute units
    pub compute_units: usize,
}

/// One discoverable compute device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Global index, stable for the process lifetime
    pub index: usize,
    /// Platform the device belongs to (registry order)
    pub platform_id: usize,
    /// Platform name
    pub platform_name: String,
    /// Index of the device within its platform
    pub device_index: usize,
    /// Device vendor
    pub vendor: Vendor,
    /// Human readable device name
    pub name: String,
    /// Global memory in bytes
    pub global_memory: u64,
    /// Parallel compute units
    pub compute_units: usize,
}

/// A family of devices that can be enumerated and opened
pub trait Platform: Send + Sync {
    /// Platform name as shown in device listings
    fn name(&self) -> &str;

    /// Devices of this platform, in a stable order
    fn devices(&self) -> Vec<PlatformDevice>;

    /// Acquires a context on `device`
    ///
    /// # Errors
    /// `DeviceUnavailable` when the device cannot be opened.
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceContext>, MinerError>;
}

/// Parameters of one nonce-search launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBatch {
    /// Header hash of the work package
    pub header: H256,
    /// Target boundary of the work package
    pub boundary: H256,
    /// First nonce of the batch
    pub start_nonce: u64,
    /// Number of nonces (global work size)
    pub count: u64,
    /// Local work size (workgroup granularity)
    pub local_size: usize,
}

/// Result of one completed (or cancelled) search launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    /// First nonce of the batch
    pub start_nonce: u64,
    /// Nonces actually evaluated
    pub hashes: u64,
    /// Candidate nonces meeting the boundary (at most [`MAX_SEARCH_RESULTS`])
    pub nonces: Vec<u64>,
    /// Whether the batch stopped early on a cancel request
    pub cancelled: bool,
}

/// An opened device owning its kernels, buffers and queue
///
/// Contexts are owned by exactly one worker thread. Dropping a context must
/// drain or abandon any in-flight launch and release everything it holds.
pub trait DeviceContext: Send {
    /// Device this context was opened on
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Compiles/loads the search and generation kernels
    fn build_kernels(&mut self, kernels: &KernelSet) -> Result<(), MinerError>;

    /// Expands `cache` into a device-resident full dataset
    ///
    /// Blocking and not interruptible. Nothing is returned unless the whole
    /// dataset was generated.
    fn generate_dataset(
        &mut self,
        cache: &LightCache,
        local_size: usize,
    ) -> Result<DeviceDataset, MinerError>;

    /// Enqueues a search batch without waiting for it
    fn dispatch_search(
        &mut self,
        dataset: &DeviceDataset,
        batch: SearchBatch,
    ) -> Result<(), MinerError>;

    /// Waits up to `timeout` for the in-flight batch
    ///
    /// Returns `Ok(None)` when the batch is still running.
    fn poll_search(&mut self, timeout: Duration) -> Result<Option<SearchOutcome>, MinerError>;

    /// Cancels the in-flight batch, if any, and waits for the queue to drain
    fn abandon_search(&mut self);
}

/// Full dataset resident on a device
pub struct DeviceDataset {
    seed: H256,
    epoch: u64,
    nodes: Arc<Vec<Node>>,
    _buffer: ResourceGuard,
}

impl DeviceDataset {
    /// Wraps generated dataset storage together with its buffer guard
    pub fn new(seed: H256, epoch: u64, nodes: Vec<Node>, buffer: ResourceGuard) -> Self {
        DeviceDataset {
            seed,
            epoch,
            nodes: Arc::new(nodes),
            _buffer: buffer,
        }
    }

    /// Seed hash the dataset was generated from
    pub fn seed(&self) -> &H256 {
        &self.seed
    }

    /// Epoch of the dataset
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Size in bytes
    pub fn size_bytes(&self) -> u64 {
        (self.nodes.len() * ethash::HASH_BYTES) as u64
    }

    /// Dataset items, shared with in-flight launches
    pub fn nodes(&self) -> &Arc<Vec<Node>> {
        &self.nodes
    }

    /// Keccak-256 over the whole dataset content
    pub fn content_digest(&self) -> H256 {
        ethash::dataset_digest(&self.nodes)
    }
}

impl fmt::Debug for DeviceDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDataset")
            .field("epoch", &self.epoch)
            .field("seed", &hex::encode(self.seed))
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_from_platform_strings() {
        assert_eq!(Vendor::from_name("NVIDIA CUDA"), Vendor::Nvidia);
        assert_eq!(
            Vendor::from_name("AMD Accelerated Parallel Processing"),
            Vendor::Amd
        );
        assert_eq!(Vendor::from_name("Intel(R) OpenCL"), Vendor::Intel);
        assert_eq!(Vendor::from_name("Clover"), Vendor::Unknown);
    }
}
