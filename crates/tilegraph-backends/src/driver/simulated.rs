//! In-process simulated tile devices

use super::{DeviceDescriptor, DeviceDriver, DriverConfig};
use crate::error::{BackendError, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Driver backed by an in-memory device list
///
/// Devices can be marked as held by another process with
/// [`SimulatedDriver::hold_externally`]; attaching to a held device fails the
/// same way it would on shared hardware.
#[derive(Debug)]
pub struct SimulatedDriver {
    devices: Vec<DeviceDescriptor>,
    attached: Mutex<BTreeSet<u32>>,
    held_externally: Mutex<BTreeSet<u32>>,
}

impl SimulatedDriver {
    /// Driver exposing the devices described by `config`
    pub fn new(config: &DriverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_devices(config.descriptors()))
    }

    /// Driver configured from `TILEGRAPH_SIM_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(&DriverConfig::from_env())
    }

    /// Driver exposing an explicit device list, enumerated in the given order
    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        tracing::debug!(devices = devices.len(), "simulated driver created");
        Self {
            devices,
            attached: Mutex::new(BTreeSet::new()),
            held_externally: Mutex::new(BTreeSet::new()),
        }
    }

    /// All devices regardless of attachment
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Mark a device as claimed by someone else
    pub fn hold_externally(&self, id: u32) -> Result<()> {
        self.descriptor(id)?;
        self.held_externally.lock().insert(id);
        Ok(())
    }

    /// Release an external claim
    pub fn free_externally(&self, id: u32) {
        self.held_externally.lock().remove(&id);
    }

    /// Is the device attached through this driver?
    pub fn is_attached(&self, id: u32) -> bool {
        self.attached.lock().contains(&id)
    }

    fn descriptor(&self, id: u32) -> Result<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .ok_or(BackendError::UnknownDevice(id))
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::with_devices(DriverConfig::default().descriptors())
    }
}

impl DeviceDriver for SimulatedDriver {
    fn list_available_devices(&self, num_ipus: u32) -> Vec<DeviceDescriptor> {
        self.devices
            .iter()
            .filter(|d| d.num_ipus == num_ipus)
            .copied()
            .collect()
    }

    fn attach(&self, id: u32) -> bool {
        if self.descriptor(id).is_err() || self.held_externally.lock().contains(&id) {
            return false;
        }
        self.attached.lock().insert(id)
    }

    fn detach(&self, id: u32) {
        self.attached.lock().remove(&id);
    }
}
