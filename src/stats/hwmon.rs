// src/stats/hwmon.rs
//! Hardware telemetry
//!
//! Normalizes vendor-specific sensor sources into one [`HardwareSnapshot`].
//! The source for each device is picked once, by vendor, when the monitor is
//! built:
//! - NVIDIA: NVML (requires the `nvml` cargo feature)
//! - AMD: the amdgpu hwmon files under `/sys/class/drm/cardN/device`
//! - Intel and unknown vendors: the same sysfs files, matched by PCI vendor
//! - Host: `sysinfo` components and CPU frequency
//!
//! There is no ADL binding; AMD boards are read through sysfs only, so AMD
//! telemetry is Linux-only.
//!
//! Telemetry is best effort. A missing or failing source yields a snapshot
//! with empty fields, never an error.

use crate::device::{DeviceDescriptor, Vendor};
use crate::utils::error::MinerError;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Components, System};

#[cfg(feature = "nvml")]
use nvml_wrapper::Nvml;
#[cfg(feature = "nvml")]
use std::sync::Arc;

const DRM_ROOT: &str = "/sys/class/drm";
const AMD_PCI_VENDOR: &str = "0x1002";
const NVIDIA_PCI_VENDOR: &str = "0x10de";
const INTEL_PCI_VENDOR: &str = "0x8086";

/// Where a snapshot's readings came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    /// NVIDIA Management Library
    Nvml,
    /// DRM sysfs hwmon
    Sysfs,
    /// Host sensors via sysinfo
    Host,
    /// No source for this device
    None,
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetryKind::Nvml => "nvml",
            TelemetryKind::Sysfs => "sysfs",
            TelemetryKind::Host => "host",
            TelemetryKind::None => "none",
        };
        f.write_str(name)
    }
}

/// Point-in-time sensor readings for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareSnapshot {
    /// Global device index
    pub device: usize,
    /// Telemetry source used
    pub source: TelemetryKind,
    /// Core temperature in Celsius
    pub temperature_c: Option<f32>,
    /// Fan duty in percent
    pub fan_percent: Option<u32>,
    /// Board power in watts
    pub power_watts: Option<f32>,
    /// Core clock in MHz
    pub core_clock_mhz: Option<u32>,
}

impl HardwareSnapshot {
    fn empty(device: usize, source: TelemetryKind) -> Self {
        HardwareSnapshot {
            device,
            source,
            temperature_c: None,
            fan_percent: None,
            power_watts: None,
            core_clock_mhz: None,
        }
    }
}

impl fmt::Display for HardwareSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.temperature_c {
            Some(t) => write!(f, "{:.0}C", t)?,
            None => write!(f, "-C")?,
        }
        match self.fan_percent {
            Some(p) => write!(f, " {}%", p)?,
            None => write!(f, " -%")?,
        }
        match self.power_watts {
            Some(w) => write!(f, " {:.1}W", w)?,
            None => write!(f, " -W")?,
        }
        match self.core_clock_mhz {
            Some(c) => write!(f, " {}MHz", c)?,
            None => write!(f, " -MHz")?,
        }
        write!(f, " ({})", self.source)
    }
}

struct HostSensors {
    system: System,
    components: Components,
}

enum TelemetrySource {
    #[cfg(feature = "nvml")]
    Nvml { nvml: Arc<Nvml>, index: u32 },
    Sysfs { device_dir: PathBuf },
    Host(Mutex<HostSensors>),
    Unavailable(String),
}

/// Lazily initialized NVML handle shared by all NVIDIA devices
#[derive(Default)]
struct NvmlSession {
    #[cfg(feature = "nvml")]
    handle: Option<Result<Arc<Nvml>, String>>,
}

impl NvmlSession {
    #[cfg(feature = "nvml")]
    fn source(&mut self, ordinal: u32) -> TelemetrySource {
        let handle = self
            .handle
            .get_or_insert_with(|| Nvml::init().map(Arc::new).map_err(|e| e.to_string()));
        match handle {
            Ok(nvml) => TelemetrySource::Nvml {
                nvml: Arc::clone(nvml),
                index: ordinal,
            },
            Err(e) => TelemetrySource::Unavailable(format!("NVML init: {}", e)),
        }
    }

    #[cfg(not(feature = "nvml"))]
    fn source(&mut self, _ordinal: u32) -> TelemetrySource {
        TelemetrySource::Unavailable("built without the nvml feature".into())
    }
}

/// Read-only telemetry for a fixed set of devices
pub struct HardwareMonitor {
    sources: HashMap<usize, TelemetrySource>,
}

impl HardwareMonitor {
    /// Builds a monitor for `devices` using the system sysfs tree
    pub fn new(devices: &[DeviceDescriptor]) -> Self {
        Self::with_sysfs_root(devices, DRM_ROOT)
    }

    /// Builds a monitor reading DRM cards from `drm_root`
    pub fn with_sysfs_root(devices: &[DeviceDescriptor], drm_root: impl AsRef<Path>) -> Self {
        let cards = drm_cards(drm_root.as_ref());
        let mut claimed = vec![false; cards.len()];
        let mut nvml = NvmlSession::default();

        let mut sources = HashMap::with_capacity(devices.len());
        let mut nvidia_seen = 0u32;

        for device in devices {
            let source = match device.vendor {
                Vendor::Nvidia => {
                    let source = nvml.source(nvidia_seen);
                    nvidia_seen += 1;
                    source
                }
                Vendor::Amd | Vendor::Intel | Vendor::Unknown => {
                    let card = cards.iter().zip(claimed.iter_mut()).find(|((pci, _), taken)| {
                        !**taken && sysfs_vendor_matches(device.vendor, pci)
                    });
                    match card {
                        Some(((_, dir), taken)) => {
                            *taken = true;
                            TelemetrySource::Sysfs {
                                device_dir: dir.clone(),
                            }
                        }
                        None => TelemetrySource::Unavailable(format!(
                            "no {} card left under sysfs",
                            device.vendor
                        )),
                    }
                }
                Vendor::Host => {
                    let mut system = System::new();
                    system.refresh_cpu_all();
                    TelemetrySource::Host(Mutex::new(HostSensors {
                        system,
                        components: Components::new_with_refreshed_list(),
                    }))
                }
            };
            sources.insert(device.index, source);
        }

        HardwareMonitor { sources }
    }

    /// Current readings for `device`
    ///
    /// Fields whose sensor is missing or failing are `None`.
    pub fn snapshot(&self, device: &DeviceDescriptor) -> HardwareSnapshot {
        let index = device.index;
        match self.sources.get(&index) {
            #[cfg(feature = "nvml")]
            Some(TelemetrySource::Nvml { nvml, index: ordinal }) => {
                nvml_snapshot(index, nvml, *ordinal)
            }
            Some(TelemetrySource::Sysfs { device_dir }) => sysfs_snapshot(index, device_dir),
            Some(TelemetrySource::Host(sensors)) => {
                let mut sensors = sensors.lock().unwrap_or_else(|e| e.into_inner());
                host_snapshot(index, &mut sensors)
            }
            Some(TelemetrySource::Unavailable(reason)) => {
                unavailable(index, &MinerError::TelemetryUnavailable(reason.clone()))
            }
            None => unavailable(
                index,
                &MinerError::TelemetryUnavailable("device not monitored".into()),
            ),
        }
    }

    /// Snapshots for every device, in the given order
    pub fn snapshot_all(&self, devices: &[DeviceDescriptor]) -> Vec<HardwareSnapshot> {
        devices.iter().map(|d| self.snapshot(d)).collect()
    }
}

fn unavailable(device: usize, error: &MinerError) -> HardwareSnapshot {
    debug!("Device {}: {}", device, error);
    HardwareSnapshot::empty(device, TelemetryKind::None)
}

/// Keeps a reading, logging why it is missing otherwise
fn reading<T>(device: usize, what: &str, value: Result<T, MinerError>) -> Option<T> {
    match value {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("Device {} {}: {}", device, what, e);
            None
        }
    }
}

#[cfg(feature = "nvml")]
fn nvml_snapshot(device: usize, nvml: &Nvml, ordinal: u32) -> HardwareSnapshot {
    use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};

    let mut snap = HardwareSnapshot::empty(device, TelemetryKind::Nvml);
    let gpu = match nvml.device_by_index(ordinal) {
        Ok(gpu) => gpu,
        Err(e) => {
            return unavailable(
                device,
                &MinerError::TelemetryUnavailable(format!("NVML device {}: {}", ordinal, e)),
            );
        }
    };
    let nvml_err =
        |e: nvml_wrapper::error::NvmlError| MinerError::TelemetryUnavailable(e.to_string());

    snap.temperature_c = reading(
        device,
        "temperature",
        gpu.temperature(TemperatureSensor::Gpu).map(|t| t as f32).map_err(nvml_err),
    );
    snap.fan_percent = reading(device, "fan", gpu.fan_speed(0).map_err(nvml_err));
    snap.power_watts = reading(
        device,
        "power",
        gpu.power_usage().map(|mw| mw as f32 / 1000.0).map_err(nvml_err),
    );
    snap.core_clock_mhz = reading(
        device,
        "clock",
        gpu.clock_info(Clock::Graphics).map_err(nvml_err),
    );
    snap
}

/// Whether a card with PCI vendor id `pci` serves devices of `vendor`
fn sysfs_vendor_matches(vendor: Vendor, pci: &str) -> bool {
    match vendor {
        Vendor::Amd => pci == AMD_PCI_VENDOR,
        Vendor::Intel => pci == INTEL_PCI_VENDOR,
        Vendor::Unknown => ![AMD_PCI_VENDOR, NVIDIA_PCI_VENDOR, INTEL_PCI_VENDOR].contains(&pci),
        Vendor::Nvidia | Vendor::Host => false,
    }
}

/// DRM card directories (`cardN/device`) with their PCI vendor ids,
/// ordered by card number
fn drm_cards(drm_root: &Path) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(drm_root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot scan {}: {}", drm_root.display(), e);
            return Vec::new();
        }
    };

    let mut cards: Vec<(u32, String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            // Connector entries look like card0-DP-1.
            let number = name.strip_prefix("card")?.parse::<u32>().ok()?;
            let device_dir = entry.path().join("device");
            let vendor = fs::read_to_string(device_dir.join("vendor")).ok()?;
            Some((number, vendor.trim().to_lowercase(), device_dir))
        })
        .collect();
    cards.sort_by_key(|(number, _, _)| *number);
    cards.into_iter().map(|(_, pci, dir)| (pci, dir)).collect()
}

fn sysfs_snapshot(device: usize, device_dir: &Path) -> HardwareSnapshot {
    let mut snap = HardwareSnapshot::empty(device, TelemetryKind::Sysfs);

    match hwmon_dir(device_dir) {
        Ok(hwmon) => {
            snap.temperature_c = reading(
                device,
                "temperature",
                read_number(&hwmon.join("temp1_input")).map(|milli| milli as f32 / 1000.0),
            );
            snap.fan_percent = reading(device, "fan", read_fan_percent(&hwmon));
            snap.power_watts = reading(
                device,
                "power",
                read_number(&hwmon.join("power1_average")).map(|micro| micro as f32 / 1e6),
            );
        }
        Err(e) => debug!("Device {}: {}", device, e),
    }
    snap.core_clock_mhz = reading(
        device,
        "clock",
        read_active_sclk(&device_dir.join("pp_dpm_sclk")),
    );
    snap
}

fn hwmon_dir(device_dir: &Path) -> Result<PathBuf, MinerError> {
    let root = device_dir.join("hwmon");
    let mut dirs: Vec<PathBuf> = fs::read_dir(&root)
        .map_err(|e| MinerError::TelemetryUnavailable(format!("{}: {}", root.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    dirs.sort();
    dirs.into_iter().next().ok_or_else(|| {
        MinerError::TelemetryUnavailable(format!("no hwmon under {}", root.display()))
    })
}

fn read_number(path: &Path) -> Result<u64, MinerError> {
    let text = fs::read_to_string(path)
        .map_err(|e| MinerError::TelemetryUnavailable(format!("{}: {}", path.display(), e)))?;
    text.trim()
        .parse()
        .map_err(|e| MinerError::TelemetryUnavailable(format!("{}: {}", path.display(), e)))
}

fn read_fan_percent(hwmon: &Path) -> Result<u32, MinerError> {
    let pwm = read_number(&hwmon.join("pwm1"))?;
    let max = read_number(&hwmon.join("pwm1_max")).unwrap_or(255);
    if max == 0 {
        return Err(MinerError::TelemetryUnavailable("pwm1_max is zero".into()));
    }
    Ok((pwm * 100 / max) as u32)
}

/// Parses the active level (marked `*`) of a `pp_dpm_sclk` table
fn read_active_sclk(path: &Path) -> Result<u32, MinerError> {
    let text = fs::read_to_string(path)
        .map_err(|e| MinerError::TelemetryUnavailable(format!("{}: {}", path.display(), e)))?;
    text.lines()
        .filter(|line| line.trim_end().ends_with('*'))
        .find_map(|line| {
            let (_, level) = line.split_once(':')?;
            let mhz = level.trim().trim_end_matches('*').trim();
            let digits = mhz.trim_end_matches(|c: char| c.is_ascii_alphabetic());
            digits.parse().ok()
        })
        .ok_or_else(|| {
            MinerError::TelemetryUnavailable(format!("no active level in {}", path.display()))
        })
}

fn host_snapshot(device: usize, sensors: &mut HostSensors) -> HardwareSnapshot {
    let mut snap = HardwareSnapshot::empty(device, TelemetryKind::Host);

    sensors.components.refresh(true);
    let labelled = sensors.components.iter().find(|c| {
        let label = c.label();
        label.contains("CPU") || label.contains("Package") || label.contains("Tctl")
    });
    snap.temperature_c = reading(
        device,
        "temperature",
        labelled
            .and_then(|c| c.temperature())
            .or_else(|| {
                sensors
                    .components
                    .iter()
                    .filter_map(|c| c.temperature())
                    .reduce(f32::max)
            })
            .ok_or_else(|| MinerError::TelemetryUnavailable("no temperature sensor".into())),
    );

    sensors.system.refresh_cpu_frequency();
    let cpus = sensors.system.cpus();
    snap.core_clock_mhz = reading(
        device,
        "clock",
        if cpus.is_empty() {
            Err(MinerError::TelemetryUnavailable("no CPUs reported".into()))
        } else {
            Ok((cpus.iter().map(|c| c.frequency()).sum::<u64>() / cpus.len() as u64) as u32)
        },
    );
    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(index: usize, vendor: Vendor) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            platform_id: 0,
            platform_name: "test".into(),
            device_index: index,
            vendor,
            name: format!("{} device", vendor),
            global_memory: 1 << 30,
            compute_units: 8,
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hwmon-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fake_amd_card(root: &Path, card: u32) {
        fake_card(root, card, "0x1002");
    }

    fn fake_card(root: &Path, card: u32, pci_vendor: &str) {
        let device = root.join(format!("card{}", card)).join("device");
        let hwmon = device.join("hwmon").join("hwmon3");
        fs::create_dir_all(&hwmon).unwrap();
        fs::write(device.join("vendor"), format!("{}\n", pci_vendor)).unwrap();
        fs::write(hwmon.join("temp1_input"), "61000\n").unwrap();
        fs::write(hwmon.join("pwm1"), "128\n").unwrap();
        fs::write(hwmon.join("pwm1_max"), "255\n").unwrap();
        fs::write(hwmon.join("power1_average"), "142500000\n").unwrap();
        fs::write(
            device.join("pp_dpm_sclk"),
            "0: 300Mhz\n1: 1340Mhz *\n2: 1411Mhz\n",
        )
        .unwrap();
    }

    #[test]
    fn amd_readings_come_from_sysfs() {
        let root = scratch_dir("amd");
        fake_amd_card(&root, 0);
        // Connector entries are not cards.
        fs::create_dir_all(root.join("card0-DP-1")).unwrap();

        let devices = vec![descriptor(0, Vendor::Amd)];
        let monitor = HardwareMonitor::with_sysfs_root(&devices, &root);
        let snap = monitor.snapshot(&devices[0]);

        assert_eq!(snap.source, TelemetryKind::Sysfs);
        assert_eq!(snap.temperature_c, Some(61.0));
        assert_eq!(snap.fan_percent, Some(50));
        assert_eq!(snap.power_watts, Some(142.5));
        assert_eq!(snap.core_clock_mhz, Some(1340));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn partial_sysfs_gives_partial_snapshot() {
        let root = scratch_dir("partial");
        fake_amd_card(&root, 1);
        let hwmon = root.join("card1/device/hwmon/hwmon3");
        fs::remove_file(hwmon.join("pwm1")).unwrap();
        fs::write(hwmon.join("power1_average"), "garbage").unwrap();

        let devices = vec![descriptor(4, Vendor::Amd)];
        let snap = HardwareMonitor::with_sysfs_root(&devices, &root).snapshot(&devices[0]);
        assert_eq!(snap.temperature_c, Some(61.0));
        assert_eq!(snap.fan_percent, None);
        assert_eq!(snap.power_watts, None);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let root = scratch_dir("empty");
        let devices = vec![descriptor(0, Vendor::Amd), descriptor(1, Vendor::Intel)];
        let monitor = HardwareMonitor::with_sysfs_root(&devices, &root);

        for snap in monitor.snapshot_all(&devices) {
            assert_eq!(snap.source, TelemetryKind::None);
            assert_eq!(snap.temperature_c, None);
        }
        // Unknown device index.
        let stranger = descriptor(9, Vendor::Amd);
        assert_eq!(monitor.snapshot(&stranger).source, TelemetryKind::None);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn sysfs_serves_other_vendors_by_pci_id() {
        let root = scratch_dir("vendors");
        fake_card(&root, 0, "0x10de");
        fake_card(&root, 1, "0x8086");
        fake_card(&root, 2, "0x1a03");
        fs::write(root.join("card2/device/hwmon/hwmon3/temp1_input"), "48000\n").unwrap();

        let devices = vec![
            descriptor(0, Vendor::Unknown),
            descriptor(1, Vendor::Intel),
            descriptor(2, Vendor::Unknown),
        ];
        let monitor = HardwareMonitor::with_sysfs_root(&devices, &root);
        let snaps = monitor.snapshot_all(&devices);

        // The NVIDIA card is never handed to an unknown device.
        assert_eq!(snaps[0].source, TelemetryKind::Sysfs);
        assert_eq!(snaps[0].temperature_c, Some(48.0));
        assert_eq!(snaps[1].source, TelemetryKind::Sysfs);
        assert_eq!(snaps[1].temperature_c, Some(61.0));
        assert_eq!(snaps[2].source, TelemetryKind::None);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn snapshot_serializes_with_nulls() {
        let snap = HardwareSnapshot::empty(2, TelemetryKind::None);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"source\":\"none\""));
        assert!(json.contains("\"temperature_c\":null"));
        assert_eq!(snap.to_string(), "-C -% -W -MHz (none)");
    }
}
