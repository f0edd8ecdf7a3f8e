//! Device acquisition and targets
//!
//! A [`Device`] is an exclusive claim on one driver device. It detaches when
//! released or dropped, so every early return after acquisition gives the
//! device back. A [`Target`] is the shape a graph is built against; it can
//! come from a device or be constructed directly for offline graph building.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tilegraph_backends::{DeviceDescriptor, DeviceDriver};

/// Tile layout a graph is built and compiled against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// Total tiles across all IPUs
    pub tile_count: usize,
    /// Memory per tile in bytes
    pub tile_memory_bytes: usize,
    /// IPUs in the device
    pub num_ipus: u32,
}

impl Target {
    /// Target with `num_ipus * tiles_per_ipu` tiles
    pub fn new(num_ipus: u32, tiles_per_ipu: usize, tile_memory_bytes: usize) -> Self {
        Self {
            tile_count: num_ipus as usize * tiles_per_ipu,
            tile_memory_bytes,
            num_ipus,
        }
    }

    /// Target matching a driver's device description
    pub fn from_descriptor(descriptor: &DeviceDescriptor) -> Self {
        Self::new(descriptor.num_ipus, descriptor.tiles_per_ipu, descriptor.tile_memory_bytes)
    }
}

/// Attachment state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Unattached,
    Attached,
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachState::Unattached => write!(f, "unattached"),
            AttachState::Attached => write!(f, "attached"),
        }
    }
}

/// Exclusive handle on an attached device
#[derive(Debug)]
pub struct Device {
    driver: Arc<dyn DeviceDriver>,
    descriptor: DeviceDescriptor,
    attached: Arc<AtomicBool>,
    lease: Arc<AtomicBool>,
}

impl Device {
    /// Attach to the first device with `requested_ipus` IPUs that accepts.
    ///
    /// Candidates are tried in the driver's enumeration order.
    #[tracing::instrument(skip(driver))]
    pub fn acquire(driver: Arc<dyn DeviceDriver>, requested_ipus: u32) -> Result<Self> {
        let candidates = driver.list_available_devices(requested_ipus);
        for descriptor in &candidates {
            if driver.attach(descriptor.id) {
                tracing::info!(device = descriptor.id, attached = true, "attach attempt");
                return Ok(Self {
                    driver: Arc::clone(&driver),
                    descriptor: *descriptor,
                    attached: Arc::new(AtomicBool::new(true)),
                    lease: Arc::new(AtomicBool::new(false)),
                });
            }
            tracing::warn!(device = descriptor.id, attached = false, "attach attempt");
        }

        tracing::error!(candidates = candidates.len(), "could not attach to a device");
        Err(Error::NoDeviceAvailable {
            requested_ipus,
            candidates: candidates.len(),
        })
    }

    /// Detach from the driver. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if self.attached.swap(false, Ordering::AcqRel) {
            self.driver.detach(self.descriptor.id);
            tracing::info!(device = self.descriptor.id, "device released");
        }
    }

    /// Driver-assigned id
    pub fn id(&self) -> u32 {
        self.descriptor.id
    }

    /// Total tiles
    pub fn tile_count(&self) -> usize {
        self.descriptor.tile_count()
    }

    /// Target for building graphs that run on this device
    pub fn target(&self) -> Target {
        Target::from_descriptor(&self.descriptor)
    }

    /// Current attachment state
    pub fn state(&self) -> AttachState {
        if self.attached.load(Ordering::Acquire) {
            AttachState::Attached
        } else {
            AttachState::Unattached
        }
    }

    /// Claim the device for one loaded engine.
    pub(crate) fn lease(&self) -> Result<DeviceLease> {
        let state = self.state();
        if state != AttachState::Attached {
            return Err(Error::Load(format!("device {} is {state}", self.id())));
        }
        if self
            .lease
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Load(format!("device {} already has a loaded engine", self.id())));
        }
        Ok(DeviceLease {
            device_id: self.id(),
            attached: Arc::clone(&self.attached),
            held: Arc::clone(&self.lease),
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.release();
    }
}

/// Held by a loaded engine; frees the device for another engine on drop
#[derive(Debug)]
pub(crate) struct DeviceLease {
    device_id: u32,
    attached: Arc<AtomicBool>,
    held: Arc<AtomicBool>,
}

impl DeviceLease {
    pub(crate) fn device_id(&self) -> u32 {
        self.device_id
    }

    pub(crate) fn device_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilegraph_backends::{DriverConfig, SimulatedDriver};

    fn driver(devices: u32) -> Arc<SimulatedDriver> {
        Arc::new(
            SimulatedDriver::new(&DriverConfig {
                device_count: devices,
                ..DriverConfig::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_acquire_first_free_device() {
        let driver = driver(3);
        driver.hold_externally(0).unwrap();

        let device = Device::acquire(driver.clone(), 1).unwrap();
        assert_eq!(device.id(), 1);
        assert_eq!(device.state(), AttachState::Attached);
        assert_eq!(device.tile_count(), 4);
        assert!(driver.is_attached(1));
    }

    #[test]
    fn test_no_device_available() {
        let driver = driver(1);
        driver.hold_externally(0).unwrap();
        assert!(matches!(
            Device::acquire(driver.clone(), 1),
            Err(Error::NoDeviceAvailable { requested_ipus: 1, candidates: 1 })
        ));
        assert!(matches!(
            Device::acquire(driver, 2),
            Err(Error::NoDeviceAvailable { candidates: 0, .. })
        ));
    }

    #[test]
    fn test_release_is_idempotent_and_runs_on_drop() {
        let driver = driver(1);
        let mut device = Device::acquire(driver.clone(), 1).unwrap();
        device.release();
        device.release();
        assert_eq!(device.state(), AttachState::Unattached);
        assert!(!driver.is_attached(0));

        {
            let _device = Device::acquire(driver.clone(), 1).unwrap();
            assert!(driver.is_attached(0));
        }
        assert!(!driver.is_attached(0));
    }

    #[test]
    fn test_lease_is_exclusive() {
        let device = Device::acquire(driver(1), 1).unwrap();
        let lease = device.lease().unwrap();
        assert!(matches!(device.lease(), Err(Error::Load(_))));
        drop(lease);
        assert!(device.lease().is_ok());
    }

    #[test]
    fn test_target_from_descriptor() {
        let target = Target::new(2, 4, 1024);
        assert_eq!(target.tile_count, 8);
        assert_eq!(target.num_ipus, 2);
    }
}
