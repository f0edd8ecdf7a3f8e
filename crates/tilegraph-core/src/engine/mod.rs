//! Execution engine
//!
//! An [`Engine`] is a graph compiled into executable steps with a fixed,
//! integer-indexed program list. It is loaded onto one [`Device`], has host
//! buffers connected to its streams, and runs programs synchronously.
//!
//! ```text
//!            compile              load               run / run / ...
//!  Graph ──────────────▶ Compiled ─────▶ Loaded ─────▶ Running ⇄ Idle
//!                           │               │                     │
//!                           └───────────────┴──── release ────────┴──▶ Released
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tilegraph_backends::{ElementType, SimulatedDriver};
//! use tilegraph_core::{CompileOptions, Device, Engine, Graph, HostBuffer, Program};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = Device::acquire(Arc::new(SimulatedDriver::default()), 1)?;
//! let mut graph = Graph::new(device.target());
//! let data = graph.add_variable("data", ElementType::F32, 8)?;
//! graph.map_linearly(data)?;
//! let input = graph.add_host_to_device_stream("in", ElementType::F32, 8)?;
//! graph.add_program("upload", Program::copy(input, data))?;
//!
//! let mut engine = Engine::compile(&graph, CompileOptions::default())?;
//! engine.load(&device)?;
//! engine.connect_stream("in", &HostBuffer::filled(8, 2.0f32))?;
//! engine.run(engine.program_id("upload")?)?;
//! assert_eq!(engine.read_tensor::<f32>("data")?, vec![2.0; 8]);
//! # Ok(())
//! # }
//! ```

mod exec;
mod stats;

pub use stats::EngineStats;

use crate::device::{Device, DeviceLease, Target};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::options::{CompileOptions, ProgramOrder};
use crate::stream::HostBuffer;
use exec::{ComputePlan, Executor, Step, StreamSlot};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tilegraph_backends::{BufferData, Element, ElementType};

/// Lifecycle state of an [`Engine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Compiled, not yet on a device
    Compiled,
    /// Loaded, no program has run yet
    Loaded,
    /// A program is executing
    Running,
    /// Loaded and between runs
    Idle,
    /// Device memory freed; terminal
    Released,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Compiled => write!(f, "compiled"),
            EngineState::Loaded => write!(f, "loaded"),
            EngineState::Running => write!(f, "running"),
            EngineState::Idle => write!(f, "idle"),
            EngineState::Released => write!(f, "released"),
        }
    }
}

#[derive(Debug)]
struct CompiledProgram {
    name: String,
    step: Step,
    streams: Vec<usize>,
}

#[derive(Debug)]
struct TensorLayout {
    element_type: ElementType,
    len: usize,
}

#[derive(Debug)]
struct LoadedState {
    memory: Vec<BufferData>,
    lease: DeviceLease,
}

/// Compiled, loadable form of a [`Graph`]
#[derive(Debug)]
pub struct Engine {
    target: Target,
    options: CompileOptions,
    programs: Vec<CompiledProgram>,
    program_ids: HashMap<String, usize>,
    streams: Vec<StreamSlot>,
    stream_ids: HashMap<String, usize>,
    tensors: Vec<TensorLayout>,
    tensor_ids: HashMap<String, usize>,
    plans: Vec<ComputePlan>,
    tile_memory: Vec<usize>,
    loaded: Option<LoadedState>,
    state: EngineState,
    stats: EngineStats,
}

impl Engine {
    /// Compile a graph.
    ///
    /// Every tensor must have a tile mapping, every vertex's codelet must
    /// support its element type and have its fields set, and vertices of one
    /// compute set must not overlap. Program ids are assigned by
    /// `options.program_order`.
    #[tracing::instrument(skip_all, fields(program_order = %options.program_order))]
    pub fn compile(graph: &Graph, options: CompileOptions) -> Result<Self> {
        let start = Instant::now();
        let target = graph.target();

        let mut tile_memory = vec![0usize; target.tile_count];
        let mut tensors = Vec::with_capacity(graph.tensors().len());
        let mut tensor_ids = HashMap::new();
        for entry in graph.tensors().iter() {
            let tensor = entry.tensor();
            let mapping = entry
                .mapping()
                .ok_or_else(|| Error::Compile(format!("tensor `{}` has no tile mapping", entry.name())))?;
            let element_bytes = tensor.element_type().size_bytes();
            for (tile, elements) in mapping.elements_per_tile(target.tile_count).into_iter().enumerate() {
                tile_memory[tile] += elements * element_bytes;
            }
            tensor_ids.insert(entry.name().to_string(), tensors.len());
            tensors.push(TensorLayout {
                element_type: tensor.element_type(),
                len: tensor.len(),
            });
        }

        let plans = graph
            .compute_sets()
            .iter()
            .map(|cs| ComputePlan::build(cs, graph))
            .collect::<Result<Vec<_>>>()?;

        let mut lowered: Vec<Step> = Vec::new();
        for (_, program) in graph.programs() {
            let step = Step::lower(program, &lowered)?;
            lowered.push(step);
        }

        let mut order: Vec<usize> = (0..lowered.len()).collect();
        let names: Vec<&str> = graph.programs().map(|(name, _)| name).collect();
        if options.program_order == ProgramOrder::ByName {
            order.sort_by_key(|&index| names[index]);
        }

        let mut programs = Vec::with_capacity(order.len());
        let mut program_ids = HashMap::new();
        for (id, index) in order.into_iter().enumerate() {
            let step = lowered[index].clone();
            program_ids.insert(names[index].to_string(), id);
            programs.push(CompiledProgram {
                name: names[index].to_string(),
                streams: step.streams().into_iter().collect(),
                step,
            });
        }

        let streams: Vec<StreamSlot> = graph
            .streams()
            .iter()
            .map(|stream| StreamSlot {
                stream: stream.clone(),
                binding: None,
            })
            .collect();
        let stream_ids = streams
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot.stream.name().to_string(), index))
            .collect();

        tracing::info!(
            duration_us = start.elapsed().as_micros() as u64,
            programs = programs.len(),
            compute_sets = plans.len(),
            tensors = tensors.len(),
            streams = streams.len(),
            max_step_cycles = plans.iter().map(ComputePlan::estimated_cycles).max().unwrap_or(0),
            "engine compiled"
        );

        Ok(Self {
            target,
            options,
            programs,
            program_ids,
            streams,
            stream_ids,
            tensors,
            tensor_ids,
            plans,
            tile_memory,
            loaded: None,
            state: EngineState::Compiled,
            stats: EngineStats::default(),
        })
    }

    /// Place the engine on a device and zero its tensors.
    ///
    /// Fails if the device shape differs from the compile target, a tile's
    /// memory would be exceeded, the device is released, or another engine is
    /// loaded on it.
    #[tracing::instrument(skip_all, fields(device = device.id()))]
    pub fn load(&mut self, device: &Device) -> Result<()> {
        if self.state != EngineState::Compiled {
            return Err(Error::invalid_state("load", self.state));
        }
        let device_target = device.target();
        if device_target != self.target {
            return Err(Error::Load(format!(
                "engine compiled for {:?} but device {} is {:?}",
                self.target,
                device.id(),
                device_target
            )));
        }
        if let Some((tile, bytes)) = self
            .tile_memory
            .iter()
            .enumerate()
            .find(|(_, bytes)| **bytes > self.target.tile_memory_bytes)
        {
            return Err(Error::Load(format!(
                "tile {tile} needs {bytes} bytes but has {}",
                self.target.tile_memory_bytes
            )));
        }

        let lease = device.lease()?;
        let (memory, alloc_us) = tilegraph_tracing::timed_block!("allocate_device_memory", {
            self.tensors
                .iter()
                .map(|t| BufferData::zeros(t.element_type, t.len))
                .collect::<Vec<_>>()
        });
        self.loaded = Some(LoadedState { memory, lease });
        self.state = EngineState::Loaded;

        tracing::info!(
            device = device.id(),
            bytes = self.tile_memory.iter().sum::<usize>(),
            alloc_us,
            "engine loaded"
        );
        Ok(())
    }

    /// Bind a host buffer to a stream, replacing any previous binding.
    ///
    /// A failed connect leaves every binding as it was.
    #[tracing::instrument(skip(self, buffer), fields(host_len = buffer.len()))]
    pub fn connect_stream<T: Element>(&mut self, name: &str, buffer: &HostBuffer<T>) -> Result<()> {
        if self.state == EngineState::Released {
            return Err(Error::invalid_state("connect a stream", self.state));
        }
        let index = *self
            .stream_ids
            .get(name)
            .ok_or_else(|| Error::UnknownStream(name.to_string()))?;
        let slot = &mut self.streams[index];

        if slot.stream.element_type() != T::TYPE {
            return Err(Error::ElementTypeMismatch {
                expected: slot.stream.element_type(),
                actual: T::TYPE,
            });
        }
        if slot.stream.len() != buffer.len() {
            return Err(Error::LengthMismatch {
                expected: slot.stream.len(),
                actual: buffer.len(),
            });
        }

        slot.binding = Some(Arc::new(buffer.clone()));
        tracing::debug!(stream = name, direction = %slot.stream.direction(), "stream connected");
        Ok(())
    }

    /// Run a program to completion
    #[tracing::instrument(skip(self), fields(program = tracing::field::Empty))]
    pub fn run(&mut self, id: usize) -> Result<()> {
        if !matches!(self.state, EngineState::Loaded | EngineState::Idle) {
            return Err(Error::invalid_state("run", self.state));
        }
        let count = self.programs.len();
        let program = self.programs.get(id).ok_or(Error::InvalidProgramId { id, count })?;
        tracing::Span::current().record("program", program.name.as_str());

        for slot in program.streams.iter().map(|&index| &self.streams[index]) {
            let binding = slot
                .binding
                .as_ref()
                .ok_or_else(|| Error::StreamNotConnected(slot.stream.name().to_string()))?;
            // Host buffers can be resized after they are connected
            if binding.len() != slot.stream.len() {
                return Err(Error::LengthMismatch {
                    expected: slot.stream.len(),
                    actual: binding.len(),
                });
            }
        }

        let loaded = self
            .loaded
            .as_mut()
            .ok_or_else(|| Error::invalid_state("run", "not loaded"))?;
        if !loaded.lease.device_attached() {
            return Err(Error::invalid_state(
                "run",
                format!("device {} is released", loaded.lease.device_id()),
            ));
        }

        self.state = EngineState::Running;
        let _perf = tilegraph_tracing::perf_span!("engine_run", program_id = id);
        let start = Instant::now();
        let mut executor = Executor {
            memory: &mut loaded.memory,
            streams: &self.streams,
            plans: &self.plans,
            stats: &mut self.stats,
        };
        let result = executor.run(&program.step);
        self.state = EngineState::Idle;
        result?;

        self.stats.runs += 1;
        tracing::debug!(duration_us = start.elapsed().as_micros() as u64, "program complete");
        Ok(())
    }

    /// Free device memory and the device. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if self.state == EngineState::Released {
            return;
        }
        self.loaded = None;
        for slot in &mut self.streams {
            slot.binding = None;
        }
        self.state = EngineState::Released;
        tracing::debug!(runs = self.stats.runs, "engine released");
    }

    /// Integer id of a named program
    pub fn program_id(&self, name: &str) -> Result<usize> {
        self.program_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownProgram(name.to_string()))
    }

    /// Program names in id order
    pub fn program_names(&self) -> impl Iterator<Item = &str> {
        self.programs.iter().map(|p| p.name.as_str())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Bytes of tensor data placed on each tile
    pub fn tile_memory_usage(&self) -> &[usize] {
        &self.tile_memory
    }

    /// Copy a tensor's device contents to the host
    pub fn read_tensor<T: Element>(&self, name: &str) -> Result<Vec<T>> {
        let index = self.typed_tensor::<T>(name)?;
        let loaded = self.loaded_state("read a tensor")?;
        Ok(loaded.memory[index].to_vec::<T>()?)
    }

    /// Overwrite a tensor's device contents
    pub fn write_tensor<T: Element>(&mut self, name: &str, data: &[T]) -> Result<()> {
        let index = self.typed_tensor::<T>(name)?;
        let expected = self.tensors[index].len;
        if data.len() != expected {
            return Err(Error::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        let state = self.state;
        let loaded = self
            .loaded
            .as_mut()
            .ok_or_else(|| Error::invalid_state("write a tensor", state))?;
        loaded.memory[index] = BufferData::from_vec(data.to_vec());
        Ok(())
    }

    fn typed_tensor<T: Element>(&self, name: &str) -> Result<usize> {
        let index = *self
            .tensor_ids
            .get(name)
            .ok_or_else(|| Error::UnknownTensor(name.to_string()))?;
        let element_type = self.tensors[index].element_type;
        if element_type != T::TYPE {
            return Err(Error::ElementTypeMismatch {
                expected: element_type,
                actual: T::TYPE,
            });
        }
        Ok(index)
    }

    fn loaded_state(&self, operation: &'static str) -> Result<&LoadedState> {
        self.loaded
            .as_ref()
            .ok_or_else(|| Error::invalid_state(operation, self.state))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use tilegraph_backends::{Codelet, ElementsMut, SimulatedDriver, VertexParams};

    fn device() -> Device {
        Device::acquire(Arc::new(SimulatedDriver::default()), 1).unwrap()
    }

    fn graph_with_data(len: usize) -> (Graph, crate::tensor::Tensor) {
        let mut graph = Graph::new(device_target());
        let data = graph.add_variable("data", ElementType::F32, len).unwrap();
        graph.map_linearly(data).unwrap();
        (graph, data)
    }

    fn device_target() -> Target {
        Target::new(1, 4, 638_976)
    }

    #[test]
    fn test_program_ids_by_name_and_declaration() {
        let (mut graph, _) = graph_with_data(4);
        let cs = graph.add_compute_set("cs").unwrap();
        graph.add_program("zeta", Program::execute(cs)).unwrap();
        graph.add_program("alpha", Program::execute(cs)).unwrap();
        graph.add_program("main", Program::execute(cs)).unwrap();

        let by_name = Engine::compile(&graph, CompileOptions::default()).unwrap();
        assert_eq!(by_name.program_names().collect::<Vec<_>>(), vec!["alpha", "main", "zeta"]);
        assert_eq!(by_name.program_id("zeta").unwrap(), 2);

        let declared = Engine::compile(
            &graph,
            CompileOptions::default().with_program_order(ProgramOrder::Declaration),
        )
        .unwrap();
        assert_eq!(declared.program_names().collect::<Vec<_>>(), vec!["zeta", "alpha", "main"]);
        assert!(matches!(declared.program_id("beta"), Err(Error::UnknownProgram(_))));
    }

    #[test]
    fn test_compile_requires_mapping() {
        let mut graph = Graph::new(device_target());
        graph.add_variable("loose", ElementType::F32, 4).unwrap();
        assert!(matches!(
            Engine::compile(&graph, CompileOptions::default()),
            Err(Error::Compile(_))
        ));
    }

    #[test]
    fn test_compile_rejects_overlapping_vertices() {
        let (mut graph, data) = graph_with_data(8);
        let cs = graph.add_compute_set("cs").unwrap();
        graph.add_work_item(cs, data.slice(0..5), 0, 1.0, 0).unwrap();
        graph.add_work_item(cs, data.slice(4..8), 1, 1.0, 0).unwrap();
        let err = Engine::compile(&graph, CompileOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Compile(ref msg) if msg.contains("overlapping")));
    }

    #[derive(Debug)]
    struct IntOnly;

    impl Codelet for IntOnly {
        fn name(&self) -> &str {
            "IntOnly"
        }

        fn fields(&self) -> &[&'static str] {
            &["k"]
        }

        fn supports(&self, ty: ElementType) -> bool {
            ty == ElementType::I32
        }

        fn compute(&self, _data: ElementsMut<'_>, _params: &VertexParams) -> tilegraph_backends::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_compile_checks_codelet_contract() {
        let (mut graph, data) = graph_with_data(4);
        graph.add_codelet(Arc::new(IntOnly));
        let cs = graph.add_compute_set("cs").unwrap();
        graph
            .add_vertex(cs, crate::graph::Vertex::new("IntOnly", data.whole(), 0).with_param("k", 1.0))
            .unwrap();
        assert!(matches!(
            Engine::compile(&graph, CompileOptions::default()),
            Err(Error::Compile(ref msg)) if msg.contains("does not support")
        ));

        let (mut graph, data) = graph_with_data(4);
        let cs = graph.add_compute_set("cs").unwrap();
        graph
            .add_vertex(cs, crate::graph::Vertex::new("MulScalar", data.whole(), 0))
            .unwrap();
        assert!(matches!(
            Engine::compile(&graph, CompileOptions::default()),
            Err(Error::Compile(ref msg)) if msg.contains("factor")
        ));
    }

    #[test]
    fn test_state_transitions() {
        let (mut graph, data) = graph_with_data(4);
        let cs = graph.add_compute_set("cs").unwrap();
        graph.add_work_item(cs, data.whole(), 0, 1.0, 10).unwrap();
        graph.add_program("main", Program::execute(cs)).unwrap();

        let device = device();
        let mut engine = Engine::compile(&graph, CompileOptions::default()).unwrap();
        assert_eq!(engine.state(), EngineState::Compiled);
        assert!(matches!(engine.run(0), Err(Error::InvalidState { .. })));
        assert!(matches!(engine.read_tensor::<f32>("data"), Err(Error::InvalidState { .. })));

        engine.load(&device).unwrap();
        assert_eq!(engine.state(), EngineState::Loaded);
        assert!(matches!(engine.load(&device), Err(Error::InvalidState { .. })));

        engine.run(0).unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(matches!(engine.run(1), Err(Error::InvalidProgramId { id: 1, count: 1 })));
        assert_eq!(engine.read_tensor::<f32>("data").unwrap(), vec![1.0; 4]);

        engine.release();
        engine.release();
        assert_eq!(engine.state(), EngineState::Released);
        assert!(matches!(engine.run(0), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_stats_track_cycles_and_steps() {
        let (mut graph, data) = graph_with_data(8);
        let partition = graph.tensors().get(data.id()).unwrap().mapping().unwrap().clone();
        let cs = graph.add_compute_set("cs").unwrap();
        for interval in partition.intervals() {
            let cost = 100 * (interval.tile as u64 + 1);
            graph
                .add_work_item(cs, data.slice(interval.range.clone()), interval.tile, 0.5, cost)
                .unwrap();
        }
        graph.add_program("main", Program::repeat(3, Program::execute(cs))).unwrap();

        let device = device();
        let mut engine = Engine::compile(&graph, CompileOptions::default()).unwrap();
        engine.load(&device).unwrap();
        engine.run(0).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.compute_steps, 3);
        assert_eq!(stats.vertices_executed, 12);
        assert_eq!(stats.estimated_cycles, 3 * 400);
        assert_eq!(engine.read_tensor::<f32>("data").unwrap(), vec![1.5; 8]);
    }

    #[test]
    fn test_tensor_access_checks() {
        let (graph, _) = graph_with_data(4);
        let device = device();
        let mut engine = Engine::compile(&graph, CompileOptions::default()).unwrap();
        engine.load(&device).unwrap();

        engine.write_tensor("data", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(engine.read_tensor::<f32>("data").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            engine.read_tensor::<i32>("data"),
            Err(Error::ElementTypeMismatch { .. })
        ));
        assert!(matches!(
            engine.write_tensor("data", &[1.0f32]),
            Err(Error::LengthMismatch { expected: 4, actual: 1 })
        ));
        assert!(matches!(engine.read_tensor::<f32>("nope"), Err(Error::UnknownTensor(_))));
    }
}
