//! Device-side building blocks for tilegraph
//!
//! This crate provides the pieces the core engine treats as external
//! collaborators:
//! - **Driver contract**: device enumeration and exclusive attachment
//! - **Simulated driver**: an in-process tile device used by tests and demos
//! - **Device memory**: typed, bounds-checked tensor storage
//! - **Codelets**: per-tile compute kernels referenced by name
//!
//! # Architecture
//!
//! ```text
//! tilegraph-core::Engine
//!        │ attaches through            │ executes vertices with
//!        ▼                             ▼
//!   DeviceDriver (trait)          Codelet (trait)
//!        │                             │
//!   SimulatedDriver              AddScalar / MulScalar / Fill
//!                                      │ operate on
//!                                      ▼
//!                             ElementsMut (typed slice of BufferData)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use tilegraph_backends::{BufferData, Codelet, CodeletRegistry, ElementType, VertexParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CodeletRegistry::with_builtins();
//! let add = registry.get("AddScalar").expect("built-in");
//!
//! let mut data = BufferData::filled(ElementType::F32, 8, 1.0);
//! add.compute(data.slice_mut(0..4)?, &VertexParams::new().with("amount", 2.0))?;
//!
//! assert_eq!(data.to_vec::<f32>()?, vec![3.0, 3.0, 3.0, 3.0, 1.0, 1.0, 1.0, 1.0]);
//! # Ok(())
//! # }
//! ```

pub mod codelet;
pub mod driver;
pub mod error;
pub mod memory;
pub mod types;

pub use codelet::{Codelet, CodeletRegistry, VertexParams};
pub use driver::{DeviceDescriptor, DeviceDriver, DriverConfig, SimulatedDriver};
pub use error::{BackendError, Result};
pub use memory::{BufferData, Elements, ElementsMut, ScalarOp};
pub use types::{Element, ElementType};
