//! Integration tests: per-device fault isolation.
//!
//! A device that cannot be resolved, opened or fed a dataset faults its own
//! worker only; the other devices keep mining.

mod common;

use common::{FlakyPlatform, PanickyPlatform, local_farm, wait_for, worker_config};
use ethash_miner_rs::config::WorkerConfig;
use ethash_miner_rs::device::{DeviceRegistry, HostPlatform, Platform};
use ethash_miner_rs::farm::WorkPackage;
use ethash_miner_rs::miner::algorithm::boundary_from_difficulty;
use ethash_miner_rs::miner::{Scheduler, WorkerState};
use ethash_miner_rs::MinerError;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);

#[test]
fn failing_device_does_not_stop_siblings() {
    let flaky = Arc::new(FlakyPlatform {
        inner: HostPlatform::builder().devices(2).build(),
        broken: vec![1],
    });
    let registry = Arc::new(DeviceRegistry::new(vec![flaky.clone() as Arc<dyn Platform>]));
    let (farm, store) = local_farm();
    farm.set_work(WorkPackage::new([5u8; 32], 0, boundary_from_difficulty(2)));

    let mut scheduler = Scheduler::new(Arc::new(worker_config()), registry, farm.clone(), store);
    assert_eq!(scheduler.start().unwrap(), 2);

    assert!(wait_for(TIMEOUT, || scheduler.workers()[1].state() == WorkerState::Faulted));
    assert!(wait_for(TIMEOUT, || farm.accepted().iter().any(|s| s.device == 0)));
    assert_eq!(scheduler.workers()[0].state(), WorkerState::Searching);

    let faults = farm.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, 1);

    let results = scheduler.stop();
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(MinerError::DeviceUnavailable(_))));
    assert_eq!(flaky.inner.tracker().total_live(), 0);
}

#[test]
fn unknown_device_index_is_reported_and_skipped() {
    let host: Arc<dyn Platform> = Arc::new(HostPlatform::builder().build());
    let registry = Arc::new(DeviceRegistry::new(vec![host]));
    let (farm, store) = local_farm();

    let config = WorkerConfig {
        devices: vec![0, 5],
        ..worker_config()
    };
    let mut scheduler = Scheduler::new(Arc::new(config), registry, farm.clone(), store);
    assert_eq!(scheduler.start().unwrap(), 1);

    let faults = farm.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, 5);
    scheduler.stop();
}

#[test]
fn no_usable_device_fails_start() {
    let host: Arc<dyn Platform> = Arc::new(HostPlatform::builder().build());
    let registry = Arc::new(DeviceRegistry::new(vec![host]));
    let (farm, store) = local_farm();

    let config = WorkerConfig {
        devices: vec![3],
        ..worker_config()
    };
    let mut scheduler = Scheduler::new(Arc::new(config), registry, farm, store);
    assert!(matches!(
        scheduler.start(),
        Err(MinerError::DeviceUnavailable(_))
    ));
}

#[test]
fn dataset_too_large_faults_worker() {
    let small: Arc<dyn Platform> = Arc::new(HostPlatform::builder().memory(1024).build());
    let registry = Arc::new(DeviceRegistry::new(vec![small]));
    let (farm, store) = local_farm();
    farm.set_work(WorkPackage::new([5u8; 32], 0, boundary_from_difficulty(2)));

    let mut scheduler = Scheduler::new(Arc::new(worker_config()), registry, farm.clone(), store);
    scheduler.start().unwrap();
    assert!(wait_for(TIMEOUT, || scheduler.workers()[0].state() == WorkerState::Faulted));

    let results = scheduler.stop();
    assert!(matches!(
        results[0].1,
        Err(MinerError::DatasetGenerationFailed(_))
    ));
    assert_eq!(farm.faults()[0].0, 0);
}

#[test]
fn instances_cap_the_selection() {
    let host: Arc<dyn Platform> = Arc::new(HostPlatform::builder().devices(3).build());
    let registry = Arc::new(DeviceRegistry::new(vec![host]));
    let (farm, store) = local_farm();

    let config = WorkerConfig {
        instances: Some(2),
        ..worker_config()
    };
    let scheduler = Scheduler::new(Arc::new(config), registry, farm, store);
    assert_eq!(scheduler.selection(), vec![0, 1]);
}

#[test]
fn panicking_driver_faults_its_worker() {
    let panicky: Arc<dyn Platform> = Arc::new(PanickyPlatform {
        inner: HostPlatform::builder().build(),
    });
    let registry = Arc::new(DeviceRegistry::new(vec![panicky]));
    let (farm, store) = local_farm();
    farm.set_work(WorkPackage::new([5u8; 32], 0, boundary_from_difficulty(2)));

    let mut scheduler = Scheduler::new(Arc::new(worker_config()), registry, farm.clone(), store);
    scheduler.start().unwrap();
    assert!(wait_for(TIMEOUT, || scheduler.workers()[0].state() == WorkerState::Faulted));
    assert!(wait_for(TIMEOUT, || farm.faults().len() == 1));
    assert!(farm.faults()[0].1.contains("driver crashed"));

    let results = scheduler.stop();
    assert!(matches!(results[0].1, Err(MinerError::WorkerPanicked(_))));
}
