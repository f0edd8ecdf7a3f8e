//! Tensors and their tile partitions
//!
//! ```text
//! tensor "data" (len 10, 4 tiles)
//!   [0 1 2][3 4 5][6 7][8 9]
//!    tile 0 tile 1 t 2  t 3
//! ```

use crate::error::{Error, Result};
use crate::graph::GraphId;
use std::collections::HashMap;
use std::ops::Range;
use tilegraph_backends::ElementType;

/// Index of a tensor within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId {
    pub(crate) graph: GraphId,
    pub(crate) index: usize,
}

impl TensorId {
    /// Position in declaration order
    pub fn index(self) -> usize {
        self.index
    }
}

/// Handle to a declared tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tensor {
    id: TensorId,
    element_type: ElementType,
    len: usize,
}

impl Tensor {
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View of `start..end`. Bounds are checked when the slice is used.
    pub fn slice(&self, range: Range<usize>) -> TensorSlice {
        TensorSlice {
            tensor: *self,
            start: range.start,
            end: range.end,
        }
    }

    /// View of every element
    pub fn whole(&self) -> TensorSlice {
        self.slice(0..self.len)
    }
}

/// Contiguous range of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorSlice {
    tensor: Tensor,
    start: usize,
    end: usize,
}

impl TensorSlice {
    pub fn tensor(&self) -> Tensor {
        self.tensor
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_in_bounds(&self) -> bool {
        self.start <= self.end && self.end <= self.tensor.len
    }
}

impl From<Tensor> for TensorSlice {
    fn from(tensor: Tensor) -> Self {
        tensor.whole()
    }
}

/// One tile's share of a tensor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileInterval {
    pub tile: usize,
    pub range: Range<usize>,
}

/// Ordered `(tile, range)` assignment of a tensor's elements to tiles
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartitionMap {
    intervals: Vec<TileInterval>,
}

impl PartitionMap {
    /// Build from explicit pairs. Use [`PartitionMap::validate`] to check coverage.
    pub fn new(intervals: impl IntoIterator<Item = (usize, Range<usize>)>) -> Self {
        Self {
            intervals: intervals
                .into_iter()
                .map(|(tile, range)| TileInterval { tile, range })
                .collect(),
        }
    }

    pub fn intervals(&self) -> &[TileInterval] {
        &self.intervals
    }

    /// Number of intervals
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Interval start offsets followed by the final end offset
    pub fn boundaries(&self) -> Vec<usize> {
        let mut boundaries: Vec<usize> = self.intervals.iter().map(|i| i.range.start).collect();
        boundaries.push(self.intervals.last().map_or(0, |i| i.range.end));
        boundaries
    }

    /// Tile holding element `index`
    pub fn tile_of(&self, index: usize) -> Option<usize> {
        self.intervals
            .iter()
            .find(|i| i.range.contains(&index))
            .map(|i| i.tile)
    }

    /// Elements held by each tile
    pub fn elements_per_tile(&self, tile_count: usize) -> Vec<usize> {
        let mut counts = vec![0; tile_count];
        for interval in &self.intervals {
            if let Some(count) = counts.get_mut(interval.tile) {
                *count += interval.range.len();
            }
        }
        counts
    }

    /// Check that intervals cover `[0, len)` in order with no gap or overlap
    /// and that every tile exists.
    pub fn validate(&self, len: usize, tile_count: usize) -> Result<()> {
        let mut expected_start = 0;
        for interval in &self.intervals {
            if interval.tile >= tile_count {
                return Err(Error::TileOutOfRange {
                    tile: interval.tile,
                    tile_count,
                });
            }
            if interval.range.start != expected_start {
                return Err(Error::InvalidPartition(format!(
                    "interval for tile {} starts at {} but previous coverage ends at {}",
                    interval.tile, interval.range.start, expected_start
                )));
            }
            if interval.range.end < interval.range.start {
                return Err(Error::InvalidPartition(format!(
                    "interval for tile {} is reversed: {}..{}",
                    interval.tile, interval.range.start, interval.range.end
                )));
            }
            expected_start = interval.range.end;
        }
        if expected_start != len {
            return Err(Error::InvalidPartition(format!(
                "coverage ends at {expected_start}, tensor length is {len}"
            )));
        }
        Ok(())
    }
}

/// Split `len` elements into exactly `tile_count` contiguous slices.
///
/// Sizes differ by at most one: the first `len % tile_count` tiles hold one
/// extra element. Tiles beyond `len` get empty slices.
pub fn partition_linearly(len: usize, tile_count: usize) -> Result<PartitionMap> {
    if tile_count == 0 {
        return Err(Error::InvalidPartition("target has no tiles".to_string()));
    }
    let base = len / tile_count;
    let extra = len % tile_count;

    let mut start = 0;
    let intervals = (0..tile_count).map(|tile| {
        let size = base + usize::from(tile < extra);
        let range = start..start + size;
        start += size;
        (tile, range)
    });
    Ok(PartitionMap::new(intervals))
}

/// Declared tensor together with its name and tile mapping
#[derive(Debug, Clone)]
pub struct TensorEntry {
    name: String,
    tensor: Tensor,
    mapping: Option<PartitionMap>,
}

impl TensorEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensor(&self) -> Tensor {
        self.tensor
    }

    pub fn mapping(&self) -> Option<&PartitionMap> {
        self.mapping.as_ref()
    }
}

/// Named tensors in declaration order
///
/// Handles carry the identity of the registry that declared them and are
/// rejected by any other registry.
#[derive(Debug, Clone)]
pub struct TensorRegistry {
    graph: GraphId,
    entries: Vec<TensorEntry>,
    by_name: HashMap<String, TensorId>,
}

impl Default for TensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorRegistry {
    pub fn new() -> Self {
        Self::for_graph(GraphId::next())
    }

    pub(crate) fn for_graph(graph: GraphId) -> Self {
        Self {
            graph,
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Declare a tensor. Names are unique.
    #[tracing::instrument(level = "debug", skip(self, name))]
    pub fn declare(&mut self, name: impl Into<String>, element_type: ElementType, len: usize) -> Result<Tensor> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateName { kind: "tensor", name });
        }

        let tensor = Tensor {
            id: TensorId {
                graph: self.graph,
                index: self.entries.len(),
            },
            element_type,
            len,
        };
        tracing::debug!(tensor = %name, %element_type, len, "declared tensor");
        self.by_name.insert(name.clone(), tensor.id);
        self.entries.push(TensorEntry {
            name,
            tensor,
            mapping: None,
        });
        Ok(tensor)
    }

    /// Assign a validated tile mapping, replacing any previous one
    pub fn set_tile_mapping(&mut self, tensor: Tensor, mapping: PartitionMap, tile_count: usize) -> Result<()> {
        let entry = self.entry_mut(tensor.id)?;
        mapping.validate(entry.tensor.len, tile_count)?;
        entry.mapping = Some(mapping);
        Ok(())
    }

    /// Look up by name
    pub fn by_name(&self, name: &str) -> Option<Tensor> {
        self.by_name.get(name).map(|id| self.entries[id.index].tensor)
    }

    /// Look up by id
    pub fn get(&self, id: TensorId) -> Option<&TensorEntry> {
        self.entries.get(id.index).filter(|entry| entry.tensor.id == id)
    }

    /// Name of a tensor, or its index rendered as `#n` when unknown
    pub fn display_name(&self, id: TensorId) -> String {
        self.get(id).map_or_else(|| format!("#{}", id.index), |e| e.name.clone())
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &TensorEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a tensor handle belongs to this registry and resolve its entry
    pub(crate) fn resolve(&self, tensor: Tensor) -> Result<&TensorEntry> {
        match self.get(tensor.id) {
            Some(entry) if entry.tensor == tensor => Ok(entry),
            _ => Err(Error::UnknownTensor(format!("#{}", tensor.id.index))),
        }
    }

    /// Check a slice refers to a known tensor and lies inside it
    pub(crate) fn check_slice(&self, slice: &TensorSlice) -> Result<&TensorEntry> {
        let entry = self.resolve(slice.tensor)?;
        if !slice.is_in_bounds() {
            return Err(Error::SliceOutOfRange {
                tensor: entry.name.clone(),
                start: slice.start,
                end: slice.end,
                len: entry.tensor.len,
            });
        }
        Ok(entry)
    }

    fn entry_mut(&mut self, id: TensorId) -> Result<&mut TensorEntry> {
        self.entries
            .get_mut(id.index)
            .filter(|entry| entry.tensor.id == id)
            .ok_or_else(|| Error::UnknownTensor(format!("#{}", id.index)))
    }
}
