//! End-to-end skeleton pipeline
//!
//! Acquire a device, build a graph that adds each tile's index to its share
//! of a `data` tensor `repeat_count` times, stream a host buffer through it and
//! return the result.
//!
//! ```text
//! STEP 1  acquire device
//! STEP 2  build graph     data[num_items] mapped linearly, loopBody: one vertex per tile
//! STEP 3  define streams  TO_IPU → data (copy_to_ipu), data → FROM_IPU (copy_to_host)
//! STEP 4  compile         main = Repeat(repeat_count, Execute(loopBody))
//! STEP 5  load
//! STEP 6  connect         one host buffer on both streams
//! STEP 7  run             copy_to_ipu, main, copy_to_host
//! ```

use crate::device::Device;
use crate::engine::Engine;
use crate::error::Result;
use crate::graph::Graph;
use crate::options::{CompileOptions, OptionFlags, ProgramOrder};
use crate::program::Program;
use crate::stream::HostBuffer;
use std::sync::Arc;
use tilegraph_backends::{DeviceDriver, ElementType};

/// Name of the device tensor
pub const DATA_TENSOR: &str = "data";
/// Name of the compute set executed by `main`
pub const LOOP_BODY: &str = "loopBody";
/// Host-to-device stream
pub const TO_DEVICE_STREAM: &str = "TO_IPU";
/// Device-to-host stream
pub const FROM_DEVICE_STREAM: &str = "FROM_IPU";

/// Parameters of [`run_skeleton`]
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonConfig {
    /// Elements in the `data` tensor
    pub num_items: usize,
    /// Executions of the compute set inside `main`
    pub repeat_count: u32,
    /// IPUs to request from the driver
    pub num_ipus: u32,
    /// Cost estimate attached to each vertex
    pub cost_estimate: u64,
    /// Value every host element starts with
    pub initial_value: f32,
    /// Compile options passed to the engine
    pub compile: CompileOptions,
}

impl Default for SkeletonConfig {
    fn default() -> Self {
        Self {
            num_items: 200_000,
            repeat_count: 10,
            num_ipus: 1,
            cost_estimate: 100,
            initial_value: 1.0,
            compile: CompileOptions::default(),
        }
    }
}

impl SkeletonConfig {
    /// Instrumentation flags the bring-up program passes to its engine
    pub fn instrumentation_flags() -> OptionFlags {
        [
            ("target.saveArchive", "archive.a"),
            ("debug.instrument", "true"),
            ("debug.instrumentCompute", "true"),
            ("debug.instrumentControlFlow", "true"),
            ("debug.computeInstrumentationLevel", "tile"),
            ("debug.outputAllSymbols", "true"),
            ("autoReport.all", "true"),
            ("autoReport.outputSerializedGraph", "true"),
            ("debug.retainDebugInformation", "true"),
        ]
        .into_iter()
        .collect()
    }

    pub fn with_program_order(mut self, order: ProgramOrder) -> Self {
        self.compile.program_order = order;
        self
    }
}

/// Build the skeleton graph for `device`: the `data` tensor, the `loopBody`
/// compute set, both streams and the `main`, `copy_to_ipu` and
/// `copy_to_host` programs.
pub fn build_skeleton_graph(device: &Device, config: &SkeletonConfig) -> Result<Graph> {
    let mut graph = Graph::new(device.target());

    let data = graph.add_variable(DATA_TENSOR, ElementType::F32, config.num_items)?;
    let partition = graph.map_linearly(data)?;

    let loop_body = graph.add_compute_set(LOOP_BODY)?;
    for interval in partition.intervals() {
        graph.add_work_item(
            loop_body,
            data.slice(interval.range.clone()),
            interval.tile,
            interval.tile as f64,
            config.cost_estimate,
        )?;
    }
    graph.add_program("main", Program::repeat(config.repeat_count, Program::execute(loop_body)))?;

    tracing::info!("STEP 3: Define data streams");
    let to_device = graph.add_host_to_device_stream(TO_DEVICE_STREAM, ElementType::F32, config.num_items)?;
    let from_device = graph.add_device_to_host_stream(FROM_DEVICE_STREAM, ElementType::F32, config.num_items)?;
    graph.add_program("copy_to_ipu", Program::copy(to_device, data))?;
    graph.add_program("copy_to_host", Program::copy(data, from_device))?;

    Ok(graph)
}

/// Run the seven-step pipeline and return the host buffer contents.
///
/// The device and engine are released on every exit path.
#[tracing::instrument(skip_all, fields(num_items = config.num_items, repeat = config.repeat_count))]
pub fn run_skeleton(driver: Arc<dyn DeviceDriver>, config: &SkeletonConfig) -> Result<Vec<f32>> {
    let host_data = HostBuffer::filled(config.num_items, config.initial_value);

    tracing::info!("STEP 1: Connecting to an IPU device");
    let device = Device::acquire(driver, config.num_ipus)?;

    tracing::info!("STEP 2: Building the compute graph");
    let graph = build_skeleton_graph(&device, config)?;

    tracing::info!("STEP 4: Create engine and compile graph");
    let mut engine = Engine::compile(&graph, config.compile.clone())?;
    tracing::debug!(
        max_tile_bytes = engine.tile_memory_usage().iter().copied().max().unwrap_or(0),
        "per-tile memory"
    );

    tracing::info!("STEP 5: Load compiled graph onto the IPU tiles");
    engine.load(&device)?;

    tracing::info!("STEP 6: Attach data streams");
    engine.connect_stream(TO_DEVICE_STREAM, &host_data)?;
    engine.connect_stream(FROM_DEVICE_STREAM, &host_data)?;

    tracing::info!("STEP 7: Run programs");
    for program in ["copy_to_ipu", "main", "copy_to_host"] {
        let id = engine.program_id(program)?;
        engine.run(id)?;
    }

    tracing::info!(stats = ?engine.stats(), "pipeline complete");
    Ok(host_data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilegraph_backends::SimulatedDriver;

    #[test]
    fn test_small_pipeline() {
        let config = SkeletonConfig {
            num_items: 8,
            repeat_count: 2,
            ..SkeletonConfig::default()
        };
        let result = run_skeleton(Arc::new(SimulatedDriver::default()), &config).unwrap();
        assert_eq!(result, vec![1.0, 1.0, 3.0, 3.0, 5.0, 5.0, 7.0, 7.0]);
    }

    #[test]
    fn test_instrumentation_flags() {
        let flags = SkeletonConfig::instrumentation_flags();
        assert_eq!(flags.len(), 9);
        assert_eq!(flags.get("debug.computeInstrumentationLevel"), Some("tile"));
    }
}
