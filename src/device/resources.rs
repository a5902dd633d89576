// src/device/resources.rs
//! Device resource accounting
//!
//! Every device-side allocation (context, dataset buffer, compiled kernel) is
//! represented by a [`ResourceGuard`]. Dropping the guard releases the
//! resource, so any exit path of the owner (stop, fault, early return)
//! releases it too. The shared [`ResourceTracker`] counts what is still live.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Kind of device resource being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Device context / command queue
    Context,
    /// Device memory buffer (dataset)
    Buffer,
    /// Compiled kernel handle
    Kernel,
}

#[derive(Debug, Default)]
struct Counters {
    contexts: AtomicUsize,
    buffers: AtomicUsize,
    kernels: AtomicUsize,
}

impl Counters {
    fn slot(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Context => &self.contexts,
            ResourceKind::Buffer => &self.buffers,
            ResourceKind::Kernel => &self.kernels,
        }
    }
}

/// Shared live-resource counters for one platform
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    counters: Arc<Counters>,
}

impl ResourceTracker {
    /// Creates a tracker with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new live resource; released when the guard drops
    pub fn acquire(&self, kind: ResourceKind) -> ResourceGuard {
        self.counters.slot(kind).fetch_add(1, Ordering::SeqCst);
        ResourceGuard {
            counters: Arc::clone(&self.counters),
            kind,
        }
    }

    /// Live resources of one kind
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.counters.slot(kind).load(Ordering::SeqCst)
    }

    /// Live resources of all kinds
    pub fn total_live(&self) -> usize {
        self.live(ResourceKind::Context)
            + self.live(ResourceKind::Buffer)
            + self.live(ResourceKind::Kernel)
    }
}

/// Scoped ownership of one device resource
pub struct ResourceGuard {
    counters: Arc<Counters>,
    kind: ResourceKind,
}

impl ResourceGuard {
    /// Kind of resource held
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceGuard").field(&self.kind).finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.counters.slot(self.kind).fetch_sub(1, Ordering::SeqCst);
    }
}
