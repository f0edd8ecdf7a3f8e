//! Host/device streams and the host buffers bound to them

use crate::graph::GraphId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use tilegraph_backends::{BackendError, Element, ElementType, Elements, ElementsMut};

/// Direction data flows through a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    HostToDevice,
    DeviceToHost,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::HostToDevice => write!(f, "host_to_device"),
            StreamDirection::DeviceToHost => write!(f, "device_to_host"),
        }
    }
}

/// Index of a stream within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    pub(crate) graph: GraphId,
    pub(crate) index: usize,
}

impl StreamId {
    pub fn index(self) -> usize {
        self.index
    }
}

/// Named, typed FIFO between host memory and device tensors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub(crate) id: StreamId,
    pub(crate) name: String,
    pub(crate) direction: StreamDirection,
    pub(crate) element_type: ElementType,
    pub(crate) len: usize,
}

impl Stream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Elements moved per copy
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Shared host memory that streams read from and write to
///
/// Clones share the same storage, so one buffer can be connected to several
/// streams (for example both directions of a round trip) and still be read by
/// the caller afterwards.
#[derive(Debug, Clone)]
pub struct HostBuffer<T: Element> {
    data: Arc<RwLock<Vec<T>>>,
}

impl<T: Element> HostBuffer<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Buffer of `len` copies of `value`
    pub fn filled(len: usize, value: T) -> Self {
        Self::new(vec![value; len])
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.data.write()
    }

    /// Snapshot of the current contents
    pub fn to_vec(&self) -> Vec<T> {
        self.data.read().clone()
    }
}

impl<T: Element> From<Vec<T>> for HostBuffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self::new(data)
    }
}

/// Type-erased host memory an engine can stream through
pub trait HostRegion: Send + Sync + fmt::Debug {
    fn element_type(&self) -> ElementType;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy host contents into device elements
    fn read_into(&self, dst: ElementsMut<'_>) -> tilegraph_backends::Result<()>;

    /// Copy device elements into host memory
    fn write_from(&self, src: Elements<'_>) -> tilegraph_backends::Result<()>;
}

impl<T: Element> HostRegion for HostBuffer<T> {
    fn element_type(&self) -> ElementType {
        T::TYPE
    }

    fn len(&self) -> usize {
        HostBuffer::len(self)
    }

    fn read_into(&self, dst: ElementsMut<'_>) -> tilegraph_backends::Result<()> {
        let dst = dst.typed::<T>()?;
        let host = self.data.read();
        if host.len() != dst.len() {
            return Err(BackendError::LengthMismatch {
                expected: dst.len(),
                actual: host.len(),
            });
        }
        dst.copy_from_slice(&host);
        Ok(())
    }

    fn write_from(&self, src: Elements<'_>) -> tilegraph_backends::Result<()> {
        let src = src.typed::<T>()?;
        let mut host = self.data.write();
        if host.len() != src.len() {
            return Err(BackendError::LengthMismatch {
                expected: host.len(),
                actual: src.len(),
            });
        }
        host.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilegraph_backends::BufferData;

    #[test]
    fn test_clones_share_storage() {
        let buffer = HostBuffer::filled(3, 1.0f32);
        let alias = buffer.clone();
        alias.write()[1] = 5.0;
        assert_eq!(buffer.to_vec(), vec![1.0, 5.0, 1.0]);
    }

    #[test]
    fn test_region_round_trip() {
        let host = HostBuffer::new(vec![1u32, 2, 3]);
        let mut device = BufferData::zeros(ElementType::U32, 3);
        host.read_into(device.elements_mut()).unwrap();
        assert_eq!(device.to_vec::<u32>().unwrap(), vec![1, 2, 3]);

        device.elements_mut().apply(tilegraph_backends::ScalarOp::Add, 1.0);
        host.write_from(device.elements()).unwrap();
        assert_eq!(host.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn test_region_rejects_mismatches() {
        let host = HostBuffer::new(vec![1.0f32; 4]);
        let mut short = BufferData::zeros(ElementType::F32, 3);
        assert!(matches!(
            host.read_into(short.elements_mut()),
            Err(BackendError::LengthMismatch { expected: 3, actual: 4 })
        ));

        let ints = BufferData::zeros(ElementType::I32, 4);
        assert!(matches!(host.write_from(ints.elements()), Err(BackendError::TypeMismatch { .. })));
        assert_eq!(HostRegion::element_type(&host), ElementType::F32);
    }
}
