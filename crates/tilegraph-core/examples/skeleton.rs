//! Runs the seven-step skeleton pipeline on the simulated driver.
//!
//! ```text
//! cargo run -p tilegraph-core --example skeleton
//! TILEGRAPH_SIM_TILES_PER_IPU=16 TILEGRAPH_TRACING_PROFILE=performance cargo run -p tilegraph-core --example skeleton
//! ```

use std::sync::Arc;
use tilegraph_backends::SimulatedDriver;
use tilegraph_core::pipeline::{run_skeleton, SkeletonConfig};
use tilegraph_core::{partition_linearly, CompileOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tilegraph_tracing::init_from_env()?;

    let driver = Arc::new(SimulatedDriver::from_env()?);
    let mut compile = CompileOptions::from_env()?;
    if compile.flags.is_empty() {
        compile.flags = SkeletonConfig::instrumentation_flags();
    }
    let config = SkeletonConfig {
        compile,
        ..SkeletonConfig::default()
    };

    let result = run_skeleton(driver.clone(), &config)?;

    let tiles = driver.devices().first().map_or(1, |d| d.tile_count());
    for interval in partition_linearly(result.len(), tiles)?.intervals() {
        if let Some(values) = result.get(interval.range.clone()).filter(|v| !v.is_empty()) {
            tilegraph_tracing::info!(tile = interval.tile, first = values[0], last = values[values.len() - 1], "tile result");
        }
    }
    Ok(())
}
