//! # tilegraph-core - Tile-Parallel Dataflow Core
//!
//! Build a compute graph for a tile device, compile it into an engine, bind
//! host memory and run programs.
//!
//! ## Architecture
//!
//! ```text
//! DeviceDriver ──acquire──▶ Device ──target──▶ Graph
//!                              │                 │ tensors + tile mappings
//!                              │                 │ compute sets of vertices
//!                              │                 │ streams + named programs
//!                              │                 ▼
//!                              └────load────── Engine ◀── HostBuffer (connect_stream)
//!                                                │
//!                                           run(program id)
//! ```
//!
//! - **Devices** are acquired through a [`tilegraph_backends::DeviceDriver`]
//!   and released on drop.
//! - **Graphs** validate every reference as it is added.
//! - **Engines** assign program ids by an explicit [`ProgramOrder`], execute
//!   each compute set's vertices in parallel across tiles, and treat every
//!   compute set as a barrier.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tilegraph_backends::SimulatedDriver;
//! use tilegraph_core::pipeline::{run_skeleton, SkeletonConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SkeletonConfig { num_items: 400, ..SkeletonConfig::default() };
//! let result = run_skeleton(Arc::new(SimulatedDriver::default()), &config)?;
//!
//! // 4 tiles, each adds its index 10 times to an all-ones buffer
//! assert_eq!(result[0], 1.0);
//! assert_eq!(result[399], 31.0);
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod engine;
pub mod error;
pub mod graph;
pub mod options;
pub mod pipeline;
pub mod program;
pub mod stream;
pub mod tensor;

pub use device::{AttachState, Device, Target};
pub use engine::{Engine, EngineState, EngineStats};
pub use error::{Error, Result};
pub use graph::{ComputeSet, Graph, Vertex};
pub use options::{CompileOptions, OptionFlags, ProgramOrder};
pub use program::{ComputeSetId, CopyEndpoint, Program, ProgramRef};
pub use stream::{HostBuffer, HostRegion, Stream, StreamDirection, StreamId};
pub use tensor::{partition_linearly, PartitionMap, Tensor, TensorId, TensorRegistry, TensorSlice, TileInterval};
