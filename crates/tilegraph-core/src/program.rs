//! Control programs
//!
//! A program is a tree of copies and compute-set executions. Named programs
//! are registered with [`crate::Graph::add_program`] and become the engine's
//! runnable entry points.

use crate::graph::GraphId;
use crate::stream::StreamId;
use crate::tensor::{Tensor, TensorSlice};

/// Index of a compute set within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputeSetId {
    pub(crate) graph: GraphId,
    pub(crate) index: usize,
}

impl ComputeSetId {
    pub fn index(self) -> usize {
        self.index
    }
}

/// Handle to a named program registered in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramRef {
    pub(crate) graph: GraphId,
    pub(crate) index: usize,
}

impl ProgramRef {
    /// Position in registration order (not the engine's program id)
    pub fn index(self) -> usize {
        self.index
    }
}

/// Source or destination of a [`Program::Copy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyEndpoint {
    Stream(StreamId),
    Tensor(TensorSlice),
}

impl From<StreamId> for CopyEndpoint {
    fn from(stream: StreamId) -> Self {
        CopyEndpoint::Stream(stream)
    }
}

impl From<TensorSlice> for CopyEndpoint {
    fn from(slice: TensorSlice) -> Self {
        CopyEndpoint::Tensor(slice)
    }
}

impl From<Tensor> for CopyEndpoint {
    fn from(tensor: Tensor) -> Self {
        CopyEndpoint::Tensor(tensor.whole())
    }
}

/// Program tree
#[derive(Debug, Clone, PartialEq)]
pub enum Program {
    /// Move data from `src` to `dst`
    Copy { src: CopyEndpoint, dst: CopyEndpoint },
    /// Run every vertex of a compute set as one synchronised step
    Execute(ComputeSetId),
    /// Run `body` `count` times
    Repeat { count: u32, body: Box<Program> },
    /// Run programs in order
    Sequence(Vec<Program>),
    /// Run a previously registered program
    Call(ProgramRef),
}

impl Program {
    pub fn copy(src: impl Into<CopyEndpoint>, dst: impl Into<CopyEndpoint>) -> Self {
        Program::Copy {
            src: src.into(),
            dst: dst.into(),
        }
    }

    pub fn execute(compute_set: ComputeSetId) -> Self {
        Program::Execute(compute_set)
    }

    pub fn repeat(count: u32, body: Program) -> Self {
        Program::Repeat {
            count,
            body: Box::new(body),
        }
    }

    pub fn sequence(programs: impl IntoIterator<Item = Program>) -> Self {
        Program::Sequence(programs.into_iter().collect())
    }

    pub fn call(program: ProgramRef) -> Self {
        Program::Call(program)
    }
}
