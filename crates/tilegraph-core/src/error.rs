//! Error types for tilegraph-core operations

use tilegraph_backends::{BackendError, ElementType};

/// Result type for tilegraph-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while acquiring devices, building graphs and running engines
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No device with the requested IPU count could be attached
    #[error("no device with {requested_ipus} IPU(s) could be attached ({candidates} candidate(s) tried)")]
    NoDeviceAvailable { requested_ipus: u32, candidates: usize },

    /// Tensor, compute set or stream name already used
    #[error("duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    /// Program name already registered
    #[error("duplicate program name: {0}")]
    DuplicateProgramName(String),

    /// Tile index outside the target
    #[error("tile {tile} out of range: target has {tile_count} tiles")]
    TileOutOfRange { tile: usize, tile_count: usize },

    /// Slice exceeds the tensor it refers to
    #[error("slice {start}..{end} out of range for tensor `{tensor}` of length {len}")]
    SliceOutOfRange {
        tensor: String,
        start: usize,
        end: usize,
        len: usize,
    },

    /// Graph cannot be compiled into an engine
    #[error("compile error: {0}")]
    Compile(String),

    /// Engine cannot be loaded onto the device
    #[error("load error: {0}")]
    Load(String),

    /// Stream name not declared in the graph
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    /// Host buffer or tensor data length differs from what the target expects
    #[error("length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Program id outside the engine's program list
    #[error("invalid program id {id}: engine has {count} programs")]
    InvalidProgramId { id: usize, count: usize },

    /// Tensor not declared in the graph
    #[error("unknown tensor: {0}")]
    UnknownTensor(String),

    /// Compute set not declared in the graph
    #[error("unknown compute set: {0}")]
    UnknownComputeSet(String),

    /// Program not registered in the graph or engine
    #[error("unknown program: {0}")]
    UnknownProgram(String),

    /// Codelet not registered in the graph
    #[error("unknown codelet: {0}")]
    UnknownCodelet(String),

    /// Copy endpoints are incompatible
    #[error("invalid copy: {0}")]
    InvalidCopy(String),

    /// Tile mapping does not cover the tensor exactly once
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// Host and device element types differ
    #[error("element type mismatch: expected {expected}, got {actual}")]
    ElementTypeMismatch { expected: ElementType, actual: ElementType },

    /// A program copies through a stream without a host buffer
    #[error("stream `{0}` is not connected to a host buffer")]
    StreamNotConnected(String),

    /// Operation not allowed in the engine's or device's current state
    #[error("cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: String },

    /// Invalid engine or compile options
    #[error("invalid options: {0}")]
    Options(String),

    /// Device memory, codelet or driver failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub(crate) fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}
