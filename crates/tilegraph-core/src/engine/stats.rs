//! Execution counters

use serde::{Deserialize, Serialize};

/// Counters accumulated across every `run` of an engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Completed `run` calls
    pub runs: u64,
    /// Compute-set steps executed
    pub compute_steps: u64,
    /// Vertex executions
    pub vertices_executed: u64,
    /// Bytes copied from host buffers to the device
    pub host_to_device_bytes: u64,
    /// Bytes copied from the device to host buffers
    pub device_to_host_bytes: u64,
    /// Bytes copied between device tensors
    pub device_copy_bytes: u64,
    /// Sum over steps of the busiest tile's vertex cost estimates
    pub estimated_cycles: u64,
}
