// src/device/registry.rs
//! Device registry
//!
//! Enumerates every platform once and assigns global device indices in
//! platform order, then device order within the platform. Indices never
//! change for the lifetime of the registry.

use crate::device::{DeviceDescriptor, HostPlatform, Platform};
use crate::utils::error::MinerError;
use log::{debug, warn};
use std::fmt::Write;
use std::sync::Arc;

/// Ordered view over all compute devices
pub struct DeviceRegistry {
    platforms: Vec<Arc<dyn Platform>>,
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Enumerates `platforms` in the given order
    pub fn new(platforms: Vec<Arc<dyn Platform>>) -> Self {
        let devices = enumerate(&platforms);
        DeviceRegistry { platforms, devices }
    }

    /// Registry over the platforms this build can drive
    pub fn with_default_platforms() -> Self {
        let host: Arc<dyn Platform> = Arc::new(HostPlatform::new());
        Self::new(vec![host])
    }

    /// Snapshot of every device, platform order then device order
    pub fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.devices.clone()
    }

    /// All devices, ordered by global index
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Number of devices across all platforms
    pub fn count_devices(&self) -> usize {
        self.devices.len()
    }

    /// Looks up a device by global index
    ///
    /// # Errors
    /// `InvalidDeviceIndex` when `index` is out of range.
    pub fn device(&self, index: usize) -> Result<&DeviceDescriptor, MinerError> {
        self.devices
            .get(index)
            .ok_or(MinerError::InvalidDeviceIndex {
                index,
                count: self.devices.len(),
            })
    }

    /// Platform a device belongs to
    pub fn platform(&self, platform_id: usize) -> Option<&Arc<dyn Platform>> {
        self.platforms.get(platform_id)
    }

    /// Devices of a single platform
    pub fn platform_devices(&self, platform_id: usize) -> Vec<&DeviceDescriptor> {
        self.devices
            .iter()
            .filter(|d| d.platform_id == platform_id)
            .collect()
    }

    /// Resolves a user selection of global indices
    ///
    /// An empty selection means every device. Duplicates are dropped,
    /// keeping the first occurrence. The whole selection fails on one bad
    /// index; the scheduler instead faults that device alone and starts the
    /// rest.
    ///
    /// # Errors
    /// `InvalidDeviceIndex` for the first index that does not exist.
    pub fn filter_by_selection(
        &self,
        selection: &[usize],
    ) -> Result<Vec<&DeviceDescriptor>, MinerError> {
        if selection.is_empty() {
            return Ok(self.devices.iter().collect());
        }

        let mut picked: Vec<&DeviceDescriptor> = Vec::with_capacity(selection.len());
        for &index in selection {
            let device = self.device(index)?;
            if picked.iter().any(|d| d.index == index) {
                warn!("Device {} selected more than once, ignoring repeat", index);
                continue;
            }
            picked.push(device);
        }
        Ok(picked)
    }

    /// Device table restricted to `selection`, in selection order
    ///
    /// # Errors
    /// `InvalidDeviceIndex` for the first index that does not exist.
    pub fn list_selected(&self, selection: &[usize]) -> Result<String, MinerError> {
        let mut out = String::new();
        for device in self.filter_by_selection(selection)? {
            write_device(&mut out, device);
        }
        Ok(out)
    }

    /// Human readable device table, one block per platform
    pub fn list_devices(&self) -> String {
        let mut out = String::new();
        for (platform_id, platform) in self.platforms.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}", platform_id, platform.name());
            for device in self.platform_devices(platform_id) {
                write_device(&mut out, device);
            }
        }
        if self.devices.is_empty() {
            out.push_str("No compute devices found\n");
        }
        out
    }
}

fn write_device(out: &mut String, device: &DeviceDescriptor) {
    let _ = writeln!(
        out,
        "    #{:<3} {} ({}) {} MiB, {} compute units",
        device.index,
        device.name,
        device.vendor,
        device.global_memory >> 20,
        device.compute_units
    );
}

fn enumerate(platforms: &[Arc<dyn Platform>]) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();
    for (platform_id, platform) in platforms.iter().enumerate() {
        let found = platform.devices();
        debug!(
            "Platform {} ({}) reports {} device(s)",
            platform_id,
            platform.name(),
            found.len()
        );
        for (device_index, device) in found.into_iter().enumerate() {
            devices.push(DeviceDescriptor {
                index: devices.len(),
                platform_id,
                platform_name: platform.name().to_string(),
                device_index,
                vendor: device.vendor,
                name: device.name,
                global_memory: device.global_memory,
                compute_units: device.compute_units,
            });
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        let a: Arc<dyn Platform> = Arc::new(HostPlatform::builder().devices(2).build());
        let b: Arc<dyn Platform> = Arc::new(HostPlatform::builder().devices(1).build());
        DeviceRegistry::new(vec![a, b])
    }

    #[test]
    fn indices_follow_platform_then_device_order() {
        let registry = registry();
        let layout: Vec<_> = registry
            .devices()
            .iter()
            .map(|d| (d.index, d.platform_id, d.device_index))
            .collect();
        assert_eq!(layout, vec![(0, 0, 0), (1, 0, 1), (2, 1, 0)]);
        assert_eq!(registry.count_devices(), 3);
        assert_eq!(registry.platform_devices(1).len(), 1);
        assert_eq!(registry.enumerate(), registry.enumerate());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let registry = registry();
        match registry.device(7) {
            Err(MinerError::InvalidDeviceIndex { index, count }) => {
                assert_eq!(index, 7);
                assert_eq!(count, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(registry.filter_by_selection(&[0, 9]).is_err());
    }

    #[test]
    fn empty_selection_means_all_devices() {
        let registry = registry();
        assert_eq!(registry.filter_by_selection(&[]).unwrap().len(), 3);
        let picked = registry.filter_by_selection(&[2, 0, 2]).unwrap();
        let indices: Vec<_> = picked.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![2, 0]);
    }

    #[test]
    fn selected_listing_keeps_selection_order() {
        let registry = registry();
        let listing = registry.list_selected(&[2, 0]).unwrap();
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("#2"));
        assert!(lines[1].contains("#0"));
        assert!(matches!(
            registry.list_selected(&[4]),
            Err(MinerError::InvalidDeviceIndex { index: 4, .. })
        ));
    }

    #[test]
    fn listing_names_every_platform() {
        let listing = registry().list_devices();
        assert!(listing.contains("[0] Host"));
        assert!(listing.contains("[1] Host"));
        assert!(listing.contains("#2"));
    }
}
