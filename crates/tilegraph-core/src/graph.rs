//! Compute graph construction
//!
//! A [`Graph`] collects everything an engine needs: tensors and their tile
//! mappings, compute sets of vertices, host/device streams and named
//! programs. Every reference is validated when it is added, so errors surface
//! at the call that introduced them rather than at compile time.
//!
//! # Example
//!
//! ```rust
//! use tilegraph_core::{Graph, Program, Target};
//! use tilegraph_backends::ElementType;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new(Target::new(1, 4, 64 * 1024));
//! let data = graph.add_variable("data", ElementType::F32, 16)?;
//! let partition = graph.map_linearly(data)?;
//!
//! let cs = graph.add_compute_set("loopBody")?;
//! for interval in partition.intervals() {
//!     let slice = data.slice(interval.range.clone());
//!     graph.add_work_item(cs, slice, interval.tile, interval.tile as f64, 100)?;
//! }
//! graph.add_program("main", Program::repeat(10, Program::execute(cs)))?;
//! # Ok(())
//! # }
//! ```

use crate::device::Target;
use crate::error::{Error, Result};
use crate::program::{ComputeSetId, CopyEndpoint, Program, ProgramRef};
use crate::stream::{Stream, StreamDirection, StreamId};
use crate::tensor::{partition_linearly, PartitionMap, Tensor, TensorRegistry, TensorSlice};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tilegraph_backends::codelet::AddScalar;
use tilegraph_backends::{Codelet, CodeletRegistry, ElementType, VertexParams};

/// One codelet invocation on one tile over one tensor slice
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    codelet: String,
    slice: TensorSlice,
    tile: usize,
    params: VertexParams,
    cost: u64,
}

impl Vertex {
    pub fn new(codelet: impl Into<String>, slice: TensorSlice, tile: usize) -> Self {
        Self {
            codelet: codelet.into(),
            slice,
            tile,
            params: VertexParams::new(),
            cost: 0,
        }
    }

    /// Set a codelet field
    pub fn with_param(mut self, field: impl Into<String>, value: f64) -> Self {
        self.params.set(field, value);
        self
    }

    /// Estimated cycles for one execution, used for statistics only
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    pub fn codelet(&self) -> &str {
        &self.codelet
    }

    pub fn slice(&self) -> TensorSlice {
        self.slice
    }

    pub fn tile(&self) -> usize {
        self.tile
    }

    pub fn params(&self) -> &VertexParams {
        &self.params
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }
}

/// Vertices executed together as one step
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeSet {
    name: String,
    vertices: Vec<Vertex>,
}

impl ComputeSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }
}

/// Identity of the graph that minted a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct GraphId(u64);

impl GraphId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Graph under construction for one [`Target`]
///
/// Handles returned by one graph are rejected by every other graph. A clone
/// shares its source's identity, so handles stay valid across clones.
#[derive(Debug, Clone)]
pub struct Graph {
    id: GraphId,
    target: Target,
    tensors: TensorRegistry,
    codelets: CodeletRegistry,
    compute_sets: Vec<ComputeSet>,
    compute_set_ids: HashMap<String, ComputeSetId>,
    streams: Vec<Stream>,
    stream_ids: HashMap<String, StreamId>,
    programs: Vec<(String, Program)>,
    program_refs: HashMap<String, ProgramRef>,
}

impl Graph {
    /// Empty graph with the built-in codelets registered
    pub fn new(target: Target) -> Self {
        tracing::debug!(tiles = target.tile_count, num_ipus = target.num_ipus, "creating graph");
        let id = GraphId::next();
        Self {
            id,
            target,
            tensors: TensorRegistry::for_graph(id),
            codelets: CodeletRegistry::with_builtins(),
            compute_sets: Vec::new(),
            compute_set_ids: HashMap::new(),
            streams: Vec::new(),
            stream_ids: HashMap::new(),
            programs: Vec::new(),
            program_refs: HashMap::new(),
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn tensors(&self) -> &TensorRegistry {
        &self.tensors
    }

    pub fn codelets(&self) -> &CodeletRegistry {
        &self.codelets
    }

    /// Register an additional codelet, replacing one with the same name
    pub fn add_codelet(&mut self, codelet: Arc<dyn Codelet>) {
        self.codelets.register(codelet);
    }

    // ============================================================================================
    // Tensors
    // ============================================================================================

    /// Declare a device tensor
    pub fn add_variable(&mut self, name: impl Into<String>, element_type: ElementType, len: usize) -> Result<Tensor> {
        self.tensors.declare(name, element_type, len)
    }

    /// Look up a tensor by name
    pub fn tensor(&self, name: &str) -> Result<Tensor> {
        self.tensors
            .by_name(name)
            .ok_or_else(|| Error::UnknownTensor(name.to_string()))
    }

    /// Spread a tensor evenly over every tile and return the mapping used
    pub fn map_linearly(&mut self, tensor: Tensor) -> Result<PartitionMap> {
        let mapping = partition_linearly(tensor.len(), self.target.tile_count)?;
        self.set_tile_mapping(tensor, mapping.clone())?;
        Ok(mapping)
    }

    /// Assign an explicit tile mapping
    pub fn set_tile_mapping(&mut self, tensor: Tensor, mapping: PartitionMap) -> Result<()> {
        self.tensors.resolve(tensor)?;
        self.tensors
            .set_tile_mapping(tensor, mapping, self.target.tile_count)
    }

    // ============================================================================================
    // Compute sets
    // ============================================================================================

    /// Create an empty compute set
    pub fn add_compute_set(&mut self, name: impl Into<String>) -> Result<ComputeSetId> {
        let name = name.into();
        if self.compute_set_ids.contains_key(&name) {
            return Err(Error::DuplicateName {
                kind: "compute set",
                name,
            });
        }
        let id = ComputeSetId {
            graph: self.id,
            index: self.compute_sets.len(),
        };
        self.compute_set_ids.insert(name.clone(), id);
        self.compute_sets.push(ComputeSet {
            name,
            vertices: Vec::new(),
        });
        Ok(id)
    }

    /// Add an [`AddScalar`] vertex adding `parameter` to `slice` on `tile`
    pub fn add_work_item(
        &mut self,
        compute_set: ComputeSetId,
        slice: TensorSlice,
        tile: usize,
        parameter: f64,
        cost: u64,
    ) -> Result<()> {
        let vertex = Vertex::new(AddScalar::NAME, slice, tile)
            .with_param(AddScalar::FIELD, parameter)
            .with_cost(cost);
        self.add_vertex(compute_set, vertex)
    }

    /// Add a vertex naming any registered codelet
    pub fn add_vertex(&mut self, compute_set: ComputeSetId, vertex: Vertex) -> Result<()> {
        let tile_count = self.target.tile_count;
        if vertex.tile >= tile_count {
            return Err(Error::TileOutOfRange {
                tile: vertex.tile,
                tile_count,
            });
        }
        self.tensors.check_slice(&vertex.slice)?;
        if !self.codelets.contains(&vertex.codelet) {
            return Err(Error::UnknownCodelet(vertex.codelet));
        }

        if compute_set.graph != self.id {
            return Err(Error::UnknownComputeSet(format!("#{} of another graph", compute_set.index)));
        }
        let cs = self
            .compute_sets
            .get_mut(compute_set.index)
            .ok_or_else(|| Error::UnknownComputeSet(format!("#{}", compute_set.index)))?;
        tracing::trace!(
            compute_set = %cs.name,
            codelet = %vertex.codelet,
            tile = vertex.tile,
            start = vertex.slice.start(),
            end = vertex.slice.end(),
            "added vertex"
        );
        cs.vertices.push(vertex);
        Ok(())
    }

    pub fn compute_set(&self, id: ComputeSetId) -> Option<&ComputeSet> {
        if id.graph != self.id {
            return None;
        }
        self.compute_sets.get(id.index)
    }

    pub fn compute_set_id(&self, name: &str) -> Option<ComputeSetId> {
        self.compute_set_ids.get(name).copied()
    }

    pub fn compute_sets(&self) -> &[ComputeSet] {
        &self.compute_sets
    }

    // ============================================================================================
    // Streams
    // ============================================================================================

    /// Declare a host-to-device stream carrying `len` elements per copy
    pub fn add_host_to_device_stream(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        len: usize,
    ) -> Result<StreamId> {
        self.add_stream(name.into(), StreamDirection::HostToDevice, element_type, len)
    }

    /// Declare a device-to-host stream carrying `len` elements per copy
    pub fn add_device_to_host_stream(
        &mut self,
        name: impl Into<String>,
        element_type: ElementType,
        len: usize,
    ) -> Result<StreamId> {
        self.add_stream(name.into(), StreamDirection::DeviceToHost, element_type, len)
    }

    fn add_stream(
        &mut self,
        name: String,
        direction: StreamDirection,
        element_type: ElementType,
        len: usize,
    ) -> Result<StreamId> {
        if self.stream_ids.contains_key(&name) {
            return Err(Error::DuplicateName { kind: "stream", name });
        }
        let id = StreamId {
            graph: self.id,
            index: self.streams.len(),
        };
        tracing::debug!(stream = %name, %direction, %element_type, len, "declared stream");
        self.stream_ids.insert(name.clone(), id);
        self.streams.push(Stream {
            id,
            name,
            direction,
            element_type,
            len,
        });
        Ok(id)
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        if id.graph != self.id {
            return None;
        }
        self.streams.get(id.index)
    }

    pub fn stream_by_name(&self, name: &str) -> Option<&Stream> {
        self.stream_ids.get(name).map(|id| &self.streams[id.index])
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    // ============================================================================================
    // Programs
    // ============================================================================================

    /// Register a named program after validating every reference it makes
    pub fn add_program(&mut self, name: impl Into<String>, program: Program) -> Result<ProgramRef> {
        let name = name.into();
        if self.program_refs.contains_key(&name) {
            return Err(Error::DuplicateProgramName(name));
        }
        self.validate_program(&program)?;

        let program_ref = ProgramRef {
            graph: self.id,
            index: self.programs.len(),
        };
        tracing::debug!(program = %name, index = program_ref.index, "registered program");
        self.program_refs.insert(name.clone(), program_ref);
        self.programs.push((name, program));
        Ok(program_ref)
    }

    pub fn program_ref(&self, name: &str) -> Option<ProgramRef> {
        self.program_refs.get(name).copied()
    }

    pub fn program(&self, program: ProgramRef) -> Option<(&str, &Program)> {
        if program.graph != self.id {
            return None;
        }
        self.programs
            .get(program.index)
            .map(|(name, program)| (name.as_str(), program))
    }

    /// Named programs in registration order
    pub fn programs(&self) -> impl Iterator<Item = (&str, &Program)> {
        self.programs
            .iter()
            .map(|(name, program)| (name.as_str(), program))
    }

    fn validate_program(&self, program: &Program) -> Result<()> {
        match program {
            Program::Copy { src, dst } => self.validate_copy(src, dst),
            Program::Execute(cs) => {
                if self.compute_set(*cs).is_none() {
                    return Err(Error::UnknownComputeSet(format!("#{}", cs.index)));
                }
                Ok(())
            }
            Program::Repeat { body, .. } => self.validate_program(body),
            Program::Sequence(programs) => programs.iter().try_for_each(|p| self.validate_program(p)),
            Program::Call(program_ref) => {
                if self.program(*program_ref).is_none() {
                    return Err(Error::UnknownProgram(format!("#{}", program_ref.index)));
                }
                Ok(())
            }
        }
    }

    fn validate_copy(&self, src: &CopyEndpoint, dst: &CopyEndpoint) -> Result<()> {
        let (src_type, src_len) = self.endpoint_shape(src, StreamDirection::HostToDevice)?;
        let (dst_type, dst_len) = self.endpoint_shape(dst, StreamDirection::DeviceToHost)?;

        if let (CopyEndpoint::Stream(_), CopyEndpoint::Stream(_)) = (src, dst) {
            return Err(Error::InvalidCopy("stream to stream copies are not supported".to_string()));
        }
        if src_type != dst_type {
            return Err(Error::InvalidCopy(format!(
                "source element type {src_type} differs from destination {dst_type}"
            )));
        }
        if src_len != dst_len {
            return Err(Error::InvalidCopy(format!(
                "source has {src_len} elements, destination has {dst_len}"
            )));
        }
        Ok(())
    }

    /// Element type and count of an endpoint; streams must flow in `direction`
    fn endpoint_shape(&self, endpoint: &CopyEndpoint, direction: StreamDirection) -> Result<(ElementType, usize)> {
        match endpoint {
            CopyEndpoint::Stream(id) => {
                let stream = self
                    .stream(*id)
                    .ok_or_else(|| Error::UnknownStream(format!("#{}", id.index)))?;
                if stream.direction != direction {
                    return Err(Error::InvalidCopy(format!(
                        "stream `{}` is {} but is used as a {} endpoint",
                        stream.name, stream.direction, direction
                    )));
                }
                Ok((stream.element_type, stream.len))
            }
            CopyEndpoint::Tensor(slice) => {
                self.tensors.check_slice(slice)?;
                Ok((slice.tensor().element_type(), slice.len()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph {
        Graph::new(Target::new(1, 4, 64 * 1024))
    }

    #[test]
    fn test_work_item_tile_bounds() {
        let mut graph = graph();
        let data = graph.add_variable("data", ElementType::F32, 8).unwrap();
        let cs = graph.add_compute_set("cs").unwrap();

        assert!(graph.add_work_item(cs, data.slice(0..2), 3, 1.0, 0).is_ok());
        assert!(matches!(
            graph.add_work_item(cs, data.slice(2..4), 4, 1.0, 0),
            Err(Error::TileOutOfRange { tile: 4, tile_count: 4 })
        ));
        assert_eq!(graph.compute_set(cs).unwrap().vertices().len(), 1);
    }

    #[test]
    fn test_vertex_validation() {
        let mut graph = graph();
        let data = graph.add_variable("data", ElementType::F32, 8).unwrap();
        let cs = graph.add_compute_set("cs").unwrap();

        assert!(matches!(
            graph.add_work_item(cs, data.slice(6..9), 0, 1.0, 0),
            Err(Error::SliceOutOfRange { .. })
        ));
        assert!(matches!(
            graph.add_vertex(cs, Vertex::new("Nope", data.whole(), 0)),
            Err(Error::UnknownCodelet(_))
        ));
        assert!(matches!(
            graph.add_work_item(ComputeSetId { graph: graph.id, index: 9 }, data.whole(), 0, 1.0, 0),
            Err(Error::UnknownComputeSet(_))
        ));
    }

    #[test]
    fn test_duplicate_names() {
        let mut graph = graph();
        graph.add_variable("x", ElementType::F32, 1).unwrap();
        graph.add_compute_set("x").unwrap();
        graph.add_host_to_device_stream("x", ElementType::F32, 1).unwrap();

        assert!(matches!(
            graph.add_variable("x", ElementType::F32, 1),
            Err(Error::DuplicateName { kind: "tensor", .. })
        ));
        assert!(matches!(
            graph.add_compute_set("x"),
            Err(Error::DuplicateName { kind: "compute set", .. })
        ));
        assert!(matches!(
            graph.add_device_to_host_stream("x", ElementType::F32, 1),
            Err(Error::DuplicateName { kind: "stream", .. })
        ));

        let cs = graph.compute_set_id("x").unwrap();
        graph.add_program("p", Program::execute(cs)).unwrap();
        assert!(matches!(
            graph.add_program("p", Program::execute(cs)),
            Err(Error::DuplicateProgramName(_))
        ));
    }

    #[test]
    fn test_copy_validation() {
        let mut graph = graph();
        let data = graph.add_variable("data", ElementType::F32, 8).unwrap();
        let ints = graph.add_variable("ints", ElementType::I32, 8).unwrap();
        let to_dev = graph.add_host_to_device_stream("in", ElementType::F32, 8).unwrap();
        let from_dev = graph.add_device_to_host_stream("out", ElementType::F32, 8).unwrap();

        assert!(graph.add_program("in", Program::copy(to_dev, data)).is_ok());
        assert!(graph.add_program("out", Program::copy(data, from_dev)).is_ok());
        assert!(graph
            .add_program("d2d", Program::copy(data.slice(0..4), data.slice(4..8)))
            .is_ok());

        assert!(matches!(
            graph.add_program("wrong_direction", Program::copy(from_dev, data)),
            Err(Error::InvalidCopy(_))
        ));
        assert!(matches!(
            graph.add_program("wrong_type", Program::copy(to_dev, ints)),
            Err(Error::InvalidCopy(_))
        ));
        assert!(matches!(
            graph.add_program("wrong_len", Program::copy(to_dev, data.slice(0..4))),
            Err(Error::InvalidCopy(_))
        ));
        assert!(matches!(
            graph.add_program("streams", Program::copy(to_dev, from_dev)),
            Err(Error::InvalidCopy(_))
        ));
        assert!(matches!(
            graph.add_program("ghost", Program::copy(StreamId { graph: graph.id, index: 7 }, data)),
            Err(Error::UnknownStream(_))
        ));
    }

    #[test]
    fn test_program_references() {
        let mut graph = graph();
        let cs = graph.add_compute_set("cs").unwrap();
        let body = graph.add_program("body", Program::execute(cs)).unwrap();

        assert!(graph
            .add_program("main", Program::repeat(3, Program::call(body)))
            .is_ok());
        assert!(matches!(
            graph.add_program("bad_call", Program::call(ProgramRef { graph: graph.id, index: 5 })),
            Err(Error::UnknownProgram(_))
        ));
        assert!(matches!(
            graph.add_program("bad_exec", Program::sequence([Program::execute(ComputeSetId { graph: graph.id, index: 3 })])),
            Err(Error::UnknownComputeSet(_))
        ));
        assert_eq!(graph.programs().map(|(n, _)| n).collect::<Vec<_>>(), vec!["body", "main"]);
    }

    #[test]
    fn test_handles_from_another_graph_are_rejected() {
        let mut other = graph();
        let foreign_data = other.add_variable("data", ElementType::F32, 8).unwrap();
        let foreign_cs = other.add_compute_set("cs").unwrap();
        let foreign_in = other.add_host_to_device_stream("in", ElementType::F32, 8).unwrap();
        let foreign_body = other.add_program("body", Program::execute(foreign_cs)).unwrap();

        // Same names, types and indices as the foreign handles
        let mut graph = graph();
        let data = graph.add_variable("data", ElementType::F32, 8).unwrap();
        let cs = graph.add_compute_set("cs").unwrap();
        graph.add_host_to_device_stream("in", ElementType::F32, 8).unwrap();
        graph.add_program("body", Program::execute(cs)).unwrap();

        assert!(graph.compute_set(foreign_cs).is_none());
        assert!(graph.stream(foreign_in).is_none());
        assert!(graph.program(foreign_body).is_none());
        assert!(matches!(
            graph.add_work_item(foreign_cs, data.whole(), 0, 1.0, 0),
            Err(Error::UnknownComputeSet(_))
        ));
        assert!(matches!(
            graph.add_work_item(cs, foreign_data.whole(), 0, 1.0, 0),
            Err(Error::UnknownTensor(_))
        ));
        assert!(matches!(
            graph.add_program("exec", Program::execute(foreign_cs)),
            Err(Error::UnknownComputeSet(_))
        ));
        assert!(matches!(
            graph.add_program("upload", Program::copy(foreign_in, data)),
            Err(Error::UnknownStream(_))
        ));
        assert!(matches!(
            graph.add_program("call", Program::call(foreign_body)),
            Err(Error::UnknownProgram(_))
        ));

        let copy = graph.clone();
        assert!(copy.compute_set(cs).is_some());
    }

    #[test]
    fn test_map_linearly() {
        let mut graph = graph();
        let data = graph.add_variable("data", ElementType::U32, 10).unwrap();
        let mapping = graph.map_linearly(data).unwrap();
        assert_eq!(mapping.boundaries(), vec![0, 3, 6, 8, 10]);
        assert_eq!(graph.tensors().get(data.id()).unwrap().mapping(), Some(&mapping));
    }
}
