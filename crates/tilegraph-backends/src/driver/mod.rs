//! Device driver contract
//!
//! A driver enumerates the tile devices visible to this process and grants
//! exclusive attachment to one of them. The core engine never talks to
//! hardware directly; it only goes through [`DeviceDriver`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               DeviceDriver trait             │
//! │  - list_available_devices(num_ipus)          │
//! │  - attach(id) / detach(id)                   │
//! └───────────────────┬──────────────────────────┘
//!                     │
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!   ┌─────────────┐       ┌─────────────┐
//!   │  Simulated  │       │  (hardware) │
//!   │   Driver    │       │   driver    │
//!   └─────────────┘       └─────────────┘
//! ```

mod config;
mod simulated;

pub use config::DriverConfig;
pub use simulated::SimulatedDriver;

use std::fmt;

/// Description of one device as reported by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Driver-assigned device id
    pub id: u32,
    /// Number of IPUs grouped into this device
    pub num_ipus: u32,
    /// Tiles on each IPU
    pub tiles_per_ipu: usize,
    /// Memory available on each tile
    pub tile_memory_bytes: usize,
}

impl DeviceDescriptor {
    /// Total tiles across every IPU of the device
    pub fn tile_count(&self) -> usize {
        self.num_ipus as usize * self.tiles_per_ipu
    }
}

/// Driver interface for tile devices
///
/// Implementations must be thread-safe; attachment is exclusive, so an
/// `attach` for a device that is already attached (by this process or any
/// other) returns `false`.
pub trait DeviceDriver: Send + Sync + fmt::Debug {
    /// Devices with exactly `num_ipus` IPUs, in the driver's enumeration order
    fn list_available_devices(&self, num_ipus: u32) -> Vec<DeviceDescriptor>;

    /// Try to claim a device. Returns `true` on success.
    fn attach(&self, id: u32) -> bool;

    /// Release a claimed device. Detaching an unattached device is a no-op.
    fn detach(&self, id: u32);
}
