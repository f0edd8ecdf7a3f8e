//! Compile options and engine option flags

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Opaque engine flags, passed through unchanged
///
/// Stored as a sorted string map and serialised as a flat JSON object.
/// Boolean and numeric JSON values are accepted and kept as their text form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionFlags(BTreeMap<String, String>);

impl OptionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat JSON object
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(json).map_err(|e| Error::Options(format!("invalid option JSON: {e}")))?;

        raw.into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => Ok((key, s)),
                serde_json::Value::Bool(b) => Ok((key, b.to_string())),
                serde_json::Value::Number(n) => Ok((key, n.to_string())),
                other => Err(Error::Options(format!(
                    "option `{key}` must be a string, number or boolean, got {other}"
                ))),
            })
            .collect()
    }

    /// Read a JSON options file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Options(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Serialise as a JSON object
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Options(e.to_string()))
    }

    /// Set a flag, returning the previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Flags in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OptionFlags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Rule assigning integer ids to named programs at compile time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramOrder {
    /// Ids follow lexicographic order of program names
    #[default]
    ByName,
    /// Ids follow registration order in the graph
    Declaration,
}

impl FromStr for ProgramOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "by_name" | "by-name" | "name" => Ok(ProgramOrder::ByName),
            "declaration" | "declared" => Ok(ProgramOrder::Declaration),
            other => Err(Error::Options(format!("unknown program order `{other}`"))),
        }
    }
}

impl fmt::Display for ProgramOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramOrder::ByName => write!(f, "by_name"),
            ProgramOrder::Declaration => write!(f, "declaration"),
        }
    }
}

/// Options for [`crate::Engine::compile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub program_order: ProgramOrder,
    pub flags: OptionFlags,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program_order(mut self, order: ProgramOrder) -> Self {
        self.program_order = order;
        self
    }

    pub fn with_flags(mut self, flags: OptionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Build options from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `TILEGRAPH_PROGRAM_ORDER` - `by_name` (default) or `declaration`
    /// - `TILEGRAPH_ENGINE_OPTIONS` - path to a JSON file of option flags
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(order) = env::var("TILEGRAPH_PROGRAM_ORDER") {
            options.program_order = order.parse()?;
        }
        if let Ok(path) = env::var("TILEGRAPH_ENGINE_OPTIONS") {
            if !path.trim().is_empty() {
                options.flags = OptionFlags::from_file(path.trim())?;
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_flags_from_json_accept_scalars() {
        let flags = OptionFlags::from_json_str(r#"{"debug.instrument": true, "level": 3, "name": "tile"}"#).unwrap();
        assert_eq!(flags.get("debug.instrument"), Some("true"));
        assert_eq!(flags.get("level"), Some("3"));
        assert_eq!(flags.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["debug.instrument", "level", "name"]);
    }

    #[test]
    fn test_flags_reject_nested_values() {
        assert!(matches!(OptionFlags::from_json_str(r#"{"a": [1]}"#), Err(Error::Options(_))));
        assert!(matches!(OptionFlags::from_json_str("not json"), Err(Error::Options(_))));
    }

    #[test]
    fn test_flags_json_output_is_flat() {
        let flags: OptionFlags = [("b", "2"), ("a", "1")].into_iter().collect();
        let json = flags.to_json().unwrap();
        assert_eq!(OptionFlags::from_json_str(&json).unwrap(), flags);
        assert!(json.find("\"a\"").unwrap() < json.find("\"b\"").unwrap());
    }

    #[test]
    fn test_program_order_parse() {
        assert_eq!("by-name".parse::<ProgramOrder>().unwrap(), ProgramOrder::ByName);
        assert_eq!("Declaration".parse::<ProgramOrder>().unwrap(), ProgramOrder::Declaration);
        assert!("random".parse::<ProgramOrder>().is_err());
    }

    #[test]
    #[serial]
    fn test_compile_options_from_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"target.saveArchive": "archive.a"}}"#).unwrap();

        env::set_var("TILEGRAPH_PROGRAM_ORDER", "declaration");
        env::set_var("TILEGRAPH_ENGINE_OPTIONS", file.path());
        let options = CompileOptions::from_env().unwrap();
        env::remove_var("TILEGRAPH_PROGRAM_ORDER");
        env::remove_var("TILEGRAPH_ENGINE_OPTIONS");

        assert_eq!(options.program_order, ProgramOrder::Declaration);
        assert_eq!(options.flags.get("target.saveArchive"), Some("archive.a"));
    }

    #[test]
    #[serial]
    fn test_compile_options_from_env_missing_file() {
        env::set_var("TILEGRAPH_ENGINE_OPTIONS", "/nonexistent/tilegraph-options.json");
        let result = CompileOptions::from_env();
        env::remove_var("TILEGRAPH_ENGINE_OPTIONS");
        assert!(matches!(result, Err(Error::Options(_))));
    }
}
