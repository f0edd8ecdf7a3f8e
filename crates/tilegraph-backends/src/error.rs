//! Error types for backend operations

use std::fmt;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by device memory, codelets and drivers
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Element range outside a buffer
    #[error("buffer access out of bounds: range {start}..{end} exceeds length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    /// Element type mismatch
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Element count mismatch between source and destination
    #[error("length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Codelet invoked without one of its required fields
    #[error("codelet `{codelet}` is missing required field `{field}`")]
    MissingField { codelet: String, field: String },

    /// Codelet does not implement the element type
    #[error("codelet `{codelet}` does not support element type {element_type}")]
    UnsupportedElementType { codelet: String, element_type: String },

    /// Driver does not know the device id
    #[error("unknown device id: {0}")]
    UnknownDevice(u32),

    /// Invalid driver configuration
    #[error("invalid driver configuration: {0}")]
    Config(String),
}

impl BackendError {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an unsupported element type error
    pub fn unsupported(codelet: impl Into<String>, element_type: impl fmt::Display) -> Self {
        Self::UnsupportedElementType {
            codelet: codelet.into(),
            element_type: element_type.to_string(),
        }
    }
}
