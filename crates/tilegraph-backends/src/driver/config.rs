//! Simulated device configuration

use super::DeviceDescriptor;
use crate::error::{BackendError, Result};
use std::env;
use std::str::FromStr;

/// Shape of the devices exposed by [`super::SimulatedDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Number of devices to enumerate
    pub device_count: u32,
    /// IPUs per device
    pub ipus_per_device: u32,
    /// Tiles on each IPU
    pub tiles_per_ipu: usize,
    /// Memory per tile in bytes
    pub tile_memory_bytes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            ipus_per_device: 1,
            tiles_per_ipu: 4,
            tile_memory_bytes: 638_976,
        }
    }
}

impl DriverConfig {
    /// Build a configuration from defaults overridden by the environment.
    ///
    /// # Environment Variables
    ///
    /// - `TILEGRAPH_SIM_DEVICES` - number of devices
    /// - `TILEGRAPH_SIM_IPUS_PER_DEVICE` - IPUs per device
    /// - `TILEGRAPH_SIM_TILES_PER_IPU` - tiles per IPU
    /// - `TILEGRAPH_SIM_TILE_MEMORY` - bytes per tile
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_env("TILEGRAPH_SIM_DEVICES") {
            config.device_count = value;
        }
        if let Some(value) = read_env("TILEGRAPH_SIM_IPUS_PER_DEVICE") {
            config.ipus_per_device = value;
        }
        if let Some(value) = read_env("TILEGRAPH_SIM_TILES_PER_IPU") {
            config.tiles_per_ipu = value;
        }
        if let Some(value) = read_env("TILEGRAPH_SIM_TILE_MEMORY") {
            config.tile_memory_bytes = value;
        }
        config
    }

    /// Reject shapes that cannot host a graph
    pub fn validate(&self) -> Result<()> {
        if self.ipus_per_device == 0 {
            return Err(BackendError::Config("ipus_per_device must be at least 1".to_string()));
        }
        if self.tiles_per_ipu == 0 {
            return Err(BackendError::Config("tiles_per_ipu must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Descriptors for every configured device, ids starting at 0
    pub fn descriptors(&self) -> Vec<DeviceDescriptor> {
        (0..self.device_count)
            .map(|id| DeviceDescriptor {
                id,
                num_ipus: self.ipus_per_device,
                tiles_per_ipu: self.tiles_per_ipu,
                tile_memory_bytes: self.tile_memory_bytes,
            })
            .collect()
    }
}

fn read_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable driver setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: &[&str] = &[
        "TILEGRAPH_SIM_DEVICES",
        "TILEGRAPH_SIM_IPUS_PER_DEVICE",
        "TILEGRAPH_SIM_TILES_PER_IPU",
        "TILEGRAPH_SIM_TILE_MEMORY",
    ];

    fn reset_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        reset_env();
        assert_eq!(DriverConfig::from_env(), DriverConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_and_ignores_garbage() {
        reset_env();
        env::set_var("TILEGRAPH_SIM_DEVICES", "3");
        env::set_var("TILEGRAPH_SIM_TILES_PER_IPU", "16");
        env::set_var("TILEGRAPH_SIM_TILE_MEMORY", "lots");

        let config = DriverConfig::from_env();
        assert_eq!(config.device_count, 3);
        assert_eq!(config.tiles_per_ipu, 16);
        assert_eq!(config.tile_memory_bytes, DriverConfig::default().tile_memory_bytes);
        reset_env();
    }

    #[test]
    fn test_descriptors() {
        let config = DriverConfig {
            device_count: 2,
            ipus_per_device: 2,
            tiles_per_ipu: 8,
            tile_memory_bytes: 1024,
        };
        let devices = config.descriptors();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].id, 1);
        assert_eq!(devices[1].tile_count(), 16);
    }

    #[test]
    fn test_validate_rejects_empty_shape() {
        let config = DriverConfig {
            tiles_per_ipu: 0,
            ..DriverConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackendError::Config(_))));
        assert!(DriverConfig::default().validate().is_ok());
    }
}
