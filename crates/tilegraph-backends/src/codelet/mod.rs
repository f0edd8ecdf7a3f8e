//! Per-tile compute kernels
//!
//! A codelet is the code a vertex runs on its tile. Vertices name a codelet
//! and carry scalar fields; at execution time the engine hands the codelet the
//! vertex's slice of device memory together with those fields.

mod builtin;

pub use builtin::{AddScalar, Fill, MulScalar};

use crate::error::{BackendError, Result};
use crate::memory::ElementsMut;
use crate::types::ElementType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Named scalar fields attached to a vertex
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexParams(BTreeMap<String, f64>);

impl VertexParams {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, field: impl Into<String>, value: f64) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, field: impl Into<String>, value: f64) {
        self.0.insert(field.into(), value);
    }

    /// Field value, if present
    pub fn get(&self, field: &str) -> Option<f64> {
        self.0.get(field).copied()
    }

    /// Field value, or [`BackendError::MissingField`] naming `codelet`
    pub fn require(&self, codelet: &str, field: &str) -> Result<f64> {
        self.get(field).ok_or_else(|| BackendError::MissingField {
            codelet: codelet.to_string(),
            field: field.to_string(),
        })
    }

    /// Is the field set?
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Kernel run by every vertex that names it
///
/// `compute` receives only the vertex's own elements, so vertices of one
/// compute set can run concurrently without synchronisation.
pub trait Codelet: Send + Sync + fmt::Debug {
    /// Name vertices use to reference this codelet
    fn name(&self) -> &str;

    /// Fields every vertex must set
    fn fields(&self) -> &[&'static str];

    /// Whether the codelet has an implementation for `ty`
    fn supports(&self, _ty: ElementType) -> bool {
        true
    }

    /// Run over one vertex's elements
    fn compute(&self, data: ElementsMut<'_>, params: &VertexParams) -> Result<()>;
}

/// Codelets available to a graph, keyed by name
#[derive(Clone, Default)]
pub struct CodeletRegistry {
    codelets: BTreeMap<String, Arc<dyn Codelet>>,
}

impl CodeletRegistry {
    /// Registry without any codelets
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`AddScalar`], [`MulScalar`] and [`Fill`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AddScalar));
        registry.register(Arc::new(MulScalar));
        registry.register(Arc::new(Fill));
        registry
    }

    /// Add or replace a codelet. Returns the codelet previously registered
    /// under the same name.
    pub fn register(&mut self, codelet: Arc<dyn Codelet>) -> Option<Arc<dyn Codelet>> {
        tracing::debug!(codelet = codelet.name(), "registering codelet");
        self.codelets.insert(codelet.name().to_string(), codelet)
    }

    /// Look up a codelet by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Codelet>> {
        self.codelets.get(name).cloned()
    }

    /// Is a codelet with this name registered?
    pub fn contains(&self, name: &str) -> bool {
        self.codelets.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codelets.keys().map(String::as_str)
    }
}

impl fmt::Debug for CodeletRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.codelets.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferData;

    #[derive(Debug)]
    struct Negate;

    impl Codelet for Negate {
        fn name(&self) -> &str {
            "Negate"
        }

        fn fields(&self) -> &[&'static str] {
            &[]
        }

        fn supports(&self, ty: ElementType) -> bool {
            ty == ElementType::I32
        }

        fn compute(&self, data: ElementsMut<'_>, _params: &VertexParams) -> Result<()> {
            for value in data.typed::<i32>()? {
                *value = -*value;
            }
            Ok(())
        }
    }

    #[test]
    fn test_params_require() {
        let params = VertexParams::new().with("amount", 3.0);
        assert_eq!(params.require("AddScalar", "amount").unwrap(), 3.0);
        assert!(matches!(
            params.require("MulScalar", "factor"),
            Err(BackendError::MissingField { .. })
        ));
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("amount", 3.0)]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CodeletRegistry::with_builtins();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["AddScalar", "Fill", "MulScalar"]);
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn test_register_custom_codelet() {
        let mut registry = CodeletRegistry::with_builtins();
        assert!(registry.register(Arc::new(Negate)).is_none());
        assert!(registry.contains("Negate"));

        let codelet = registry.get("Negate").unwrap();
        assert!(!codelet.supports(ElementType::F32));

        let mut data = BufferData::from_vec(vec![1i32, -2, 3]);
        codelet.compute(data.elements_mut(), &VertexParams::new()).unwrap();
        assert_eq!(data.to_vec::<i32>().unwrap(), vec![-1, 2, -3]);
    }
}
