//! Lowered program steps and their execution against device memory

use super::stats::EngineStats;
use crate::error::{Error, Result};
use crate::graph::{ComputeSet, Graph};
use crate::program::{CopyEndpoint, Program};
use crate::stream::{HostRegion, Stream};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tilegraph_backends::{BufferData, Codelet, ElementsMut, VertexParams};
use tilegraph_tracing::performance::{record_step, record_transfer};

/// Executable form of a program tree. Tensor, stream and plan references are
/// plain indices into the engine's tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    HostToDevice {
        stream: usize,
        tensor: usize,
        range: Range<usize>,
    },
    DeviceToHost {
        tensor: usize,
        range: Range<usize>,
        stream: usize,
    },
    DeviceCopy {
        src: usize,
        src_range: Range<usize>,
        dst: usize,
        dst_start: usize,
    },
    Execute(usize),
    Repeat {
        count: u32,
        body: Box<Step>,
    },
    Sequence(Vec<Step>),
}

impl Step {
    /// Lower a program. `lowered` holds the already-lowered named programs in
    /// registration order, which is all a `Call` may reference.
    pub(crate) fn lower(program: &Program, lowered: &[Step]) -> Result<Step> {
        Ok(match program {
            Program::Copy { src, dst } => match (src, dst) {
                (CopyEndpoint::Stream(stream), CopyEndpoint::Tensor(slice)) => Step::HostToDevice {
                    stream: stream.index(),
                    tensor: slice.tensor().id().index(),
                    range: slice.range(),
                },
                (CopyEndpoint::Tensor(slice), CopyEndpoint::Stream(stream)) => Step::DeviceToHost {
                    tensor: slice.tensor().id().index(),
                    range: slice.range(),
                    stream: stream.index(),
                },
                (CopyEndpoint::Tensor(src), CopyEndpoint::Tensor(dst)) => Step::DeviceCopy {
                    src: src.tensor().id().index(),
                    src_range: src.range(),
                    dst: dst.tensor().id().index(),
                    dst_start: dst.start(),
                },
                (CopyEndpoint::Stream(_), CopyEndpoint::Stream(_)) => {
                    return Err(Error::Compile("stream to stream copy".to_string()));
                }
            },
            Program::Execute(cs) => Step::Execute(cs.index()),
            Program::Repeat { count, body } => Step::Repeat {
                count: *count,
                body: Box::new(Self::lower(body, lowered)?),
            },
            Program::Sequence(programs) => Step::Sequence(
                programs
                    .iter()
                    .map(|p| Self::lower(p, lowered))
                    .collect::<Result<_>>()?,
            ),
            Program::Call(program_ref) => lowered
                .get(program_ref.index())
                .cloned()
                .ok_or_else(|| Error::Compile(format!("call to unlowered program #{}", program_ref.index())))?,
        })
    }

    /// Indices of every stream the step tree copies through
    pub(crate) fn streams(&self) -> BTreeSet<usize> {
        let mut streams = BTreeSet::new();
        self.collect_streams(&mut streams);
        streams
    }

    fn collect_streams(&self, out: &mut BTreeSet<usize>) {
        match self {
            Step::HostToDevice { stream, .. } | Step::DeviceToHost { stream, .. } => {
                out.insert(*stream);
            }
            Step::Repeat { body, .. } => body.collect_streams(out),
            Step::Sequence(steps) => steps.iter().for_each(|s| s.collect_streams(out)),
            Step::DeviceCopy { .. } | Step::Execute(_) => {}
        }
    }
}

#[derive(Debug)]
struct Task {
    codelet: Arc<dyn Codelet>,
    range: Range<usize>,
    params: VertexParams,
}

/// A compute set resolved for execution
///
/// Tasks are grouped per tensor and sorted by start offset. Ranges within a
/// tensor never overlap, which lets execution split each buffer into disjoint
/// mutable chunks.
#[derive(Debug)]
pub(crate) struct ComputePlan {
    name: String,
    tasks: Vec<Vec<Task>>,
    vertex_count: usize,
    estimated_cycles: u64,
}

impl ComputePlan {
    pub(crate) fn build(cs: &ComputeSet, graph: &Graph) -> Result<Self> {
        let mut tasks: Vec<Vec<Task>> = (0..graph.tensors().len()).map(|_| Vec::new()).collect();
        let mut tile_cost = vec![0u64; graph.target().tile_count];

        for vertex in cs.vertices() {
            let codelet = graph
                .codelets()
                .get(vertex.codelet())
                .ok_or_else(|| Error::UnknownCodelet(vertex.codelet().to_string()))?;
            let tensor = vertex.slice().tensor();
            let element_type = tensor.element_type();

            if !codelet.supports(element_type) {
                return Err(Error::Compile(format!(
                    "codelet `{}` in compute set `{}` does not support {element_type}",
                    codelet.name(),
                    cs.name()
                )));
            }
            if let Some(field) = codelet.fields().iter().find(|f| !vertex.params().contains(f)) {
                return Err(Error::Compile(format!(
                    "vertex of codelet `{}` in compute set `{}` does not set field `{field}`",
                    codelet.name(),
                    cs.name()
                )));
            }
            if let Some((field, value)) = codelet
                .fields()
                .iter()
                .filter_map(|f| vertex.params().get(f).map(|v| (f, v)))
                .find(|(_, v)| !element_type.represents(*v))
            {
                return Err(Error::Compile(format!(
                    "field `{field}` = {value} of codelet `{}` in compute set `{}` is not a valid {element_type}",
                    codelet.name(),
                    cs.name()
                )));
            }

            if let Some(cost) = tile_cost.get_mut(vertex.tile()) {
                *cost += vertex.cost();
            }
            if !vertex.slice().is_empty() {
                tasks[tensor.id().index()].push(Task {
                    codelet,
                    range: vertex.slice().range(),
                    params: vertex.params().clone(),
                });
            }
        }

        for (index, list) in tasks.iter_mut().enumerate() {
            list.sort_by_key(|task| task.range.start);
            if let Some(pair) = list.windows(2).find(|pair| pair[0].range.end > pair[1].range.start) {
                return Err(Error::Compile(format!(
                    "compute set `{}` writes overlapping ranges {:?} and {:?} of tensor `{}`",
                    cs.name(),
                    pair[0].range,
                    pair[1].range,
                    graph.tensors().iter().nth(index).map_or("?", |entry| entry.name())
                )));
            }
        }

        Ok(Self {
            name: cs.name().to_string(),
            tasks,
            vertex_count: cs.vertices().len(),
            estimated_cycles: tile_cost.into_iter().max().unwrap_or(0),
        })
    }

    pub(crate) fn estimated_cycles(&self) -> u64 {
        self.estimated_cycles
    }

    /// Run every task concurrently. Returns once all have finished.
    fn execute(&self, memory: &mut [BufferData]) -> Result<()> {
        let mut work: Vec<(&Task, ElementsMut<'_>)> = Vec::with_capacity(self.vertex_count);

        for (buffer, tasks) in memory.iter_mut().zip(&self.tasks) {
            if tasks.is_empty() {
                continue;
            }
            let mut rest = buffer.elements_mut();
            let mut offset = 0;
            for task in tasks {
                let (_, tail) = rest.split_at(task.range.start - offset);
                let (chunk, tail) = tail.split_at(task.range.len());
                work.push((task, chunk));
                rest = tail;
                offset = task.range.end;
            }
        }

        work.into_par_iter()
            .try_for_each(|(task, chunk)| task.codelet.compute(chunk, &task.params))?;
        Ok(())
    }
}

/// A stream and the host memory currently bound to it
#[derive(Debug)]
pub(crate) struct StreamSlot {
    pub(crate) stream: Stream,
    pub(crate) binding: Option<Arc<dyn HostRegion>>,
}

/// Borrowed engine state for one `run`
pub(crate) struct Executor<'a> {
    pub(crate) memory: &'a mut [BufferData],
    pub(crate) streams: &'a [StreamSlot],
    pub(crate) plans: &'a [ComputePlan],
    pub(crate) stats: &'a mut EngineStats,
}

impl Executor<'_> {
    pub(crate) fn run(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::HostToDevice { stream, tensor, range } => {
                let start = Instant::now();
                let (name, region) = bound_region(self.streams, *stream)?;
                let dst = self.memory[*tensor].slice_mut(range.clone())?;
                let bytes = dst.len() * dst.element_type().size_bytes();
                region.read_into(dst)?;

                record_transfer(name, "host_to_device", bytes, start.elapsed().as_micros() as u64);
                self.stats.host_to_device_bytes += bytes as u64;
            }
            Step::DeviceToHost { tensor, range, stream } => {
                let start = Instant::now();
                let (name, region) = bound_region(self.streams, *stream)?;
                let src = self.memory[*tensor].slice(range.clone())?;
                let bytes = src.len() * src.element_type().size_bytes();
                region.write_from(src)?;

                record_transfer(name, "device_to_host", bytes, start.elapsed().as_micros() as u64);
                self.stats.device_to_host_bytes += bytes as u64;
            }
            Step::DeviceCopy {
                src,
                src_range,
                dst,
                dst_start,
            } => {
                let len = src_range.len();
                if src == dst {
                    self.memory[*src].copy_within(src_range.clone(), *dst_start)?;
                } else {
                    let (src_buffer, dst_buffer) = pair_mut(self.memory, *src, *dst);
                    dst_buffer
                        .slice_mut(*dst_start..*dst_start + len)?
                        .copy_from(src_buffer.slice(src_range.clone())?)?;
                }
                let bytes = len * self.memory[*dst].element_type().size_bytes();
                self.stats.device_copy_bytes += bytes as u64;
            }
            Step::Execute(index) => {
                let plans = self.plans;
                let plan = &plans[*index];
                let start = Instant::now();
                plan.execute(self.memory)?;

                record_step(
                    &plan.name,
                    plan.vertex_count,
                    plan.estimated_cycles,
                    start.elapsed().as_micros() as u64,
                );
                self.stats.compute_steps += 1;
                self.stats.vertices_executed += plan.vertex_count as u64;
                self.stats.estimated_cycles += plan.estimated_cycles;
            }
            Step::Repeat { count, body } => {
                for _ in 0..*count {
                    self.run(body)?;
                }
            }
            Step::Sequence(steps) => {
                for step in steps {
                    self.run(step)?;
                }
            }
        }
        Ok(())
    }
}

/// Stream name and the host region bound to it
fn bound_region(streams: &[StreamSlot], index: usize) -> Result<(&str, &dyn HostRegion)> {
    let slot = &streams[index];
    let region = slot
        .binding
        .as_deref()
        .ok_or_else(|| Error::StreamNotConnected(slot.stream.name().to_string()))?;
    Ok((slot.stream.name(), region))
}

/// Shared access to `memory[src]` alongside exclusive access to `memory[dst]`.
/// `src` and `dst` must differ.
fn pair_mut(memory: &mut [BufferData], src: usize, dst: usize) -> (&BufferData, &mut BufferData) {
    if src < dst {
        let (head, tail) = memory.split_at_mut(dst);
        (&head[src], &mut tail[0])
    } else {
        let (head, tail) = memory.split_at_mut(src);
        (&tail[0], &mut head[dst])
    }
}
