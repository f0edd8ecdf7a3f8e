//! Typed device memory
//!
//! Every tensor loaded onto a device is backed by one [`BufferData`]. Storage
//! is typed rather than raw bytes so that slices handed to codelets are
//! always correctly aligned, and so that disjoint ranges can be split off with
//! `split_at_mut` and handed to different tiles at the same time.
//!
//! ```text
//! BufferData::F32(Vec<f32>)   [..........................................]
//!                               └ tile 0 ┘└ tile 1 ┘└ tile 2 ┘└ tile 3 ┘
//!                                    │         │ ElementsMut views
//!                                    ▼         ▼
//!                                 codelet   codelet      (in parallel)
//! ```

use crate::error::{BackendError, Result};
use crate::types::{Element, ElementType};
use std::ops::Range;

/// Scalar operation applied element-wise by the built-in codelets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    /// `x = x + operand`
    Add,
    /// `x = x * operand`
    Mul,
    /// `x = operand`
    Set,
}

/// Owned, typed storage for one device tensor
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    U32(Vec<u32>),
}

/// Shared view over a range of device elements
#[derive(Debug, Clone, Copy)]
pub enum Elements<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
    I32(&'a [i32]),
    U32(&'a [u32]),
}

/// Exclusive view over a range of device elements
#[derive(Debug)]
pub enum ElementsMut<'a> {
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    I32(&'a mut [i32]),
    U32(&'a mut [u32]),
}

/// Evaluate `$body` with `$inner` bound to the payload of whichever variant
/// `$value` holds. The body must type-check for every element type.
macro_rules! each_variant {
    ($value:expr, $enum:ident, $inner:ident => $body:expr) => {
        match $value {
            $enum::F32($inner) => $body,
            $enum::F64($inner) => $body,
            $enum::I32($inner) => $body,
            $enum::U32($inner) => $body,
        }
    };
}

fn check_range(range: &Range<usize>, len: usize) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(BackendError::OutOfBounds {
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

impl BufferData {
    /// Zero-initialised storage
    pub fn zeros(ty: ElementType, len: usize) -> Self {
        match ty {
            ElementType::F32 => BufferData::F32(vec![0.0; len]),
            ElementType::F64 => BufferData::F64(vec![0.0; len]),
            ElementType::I32 => BufferData::I32(vec![0; len]),
            ElementType::U32 => BufferData::U32(vec![0; len]),
        }
    }

    /// Storage with every element set to `value` (converted to the element type)
    pub fn filled(ty: ElementType, len: usize, value: f64) -> Self {
        let mut data = Self::zeros(ty, len);
        data.elements_mut().apply(ScalarOp::Set, value);
        data
    }

    /// Wrap a host vector
    pub fn from_vec<T: Element>(data: Vec<T>) -> Self {
        T::into_buffer(data)
    }

    /// Element type of this storage
    pub fn element_type(&self) -> ElementType {
        match self {
            BufferData::F32(_) => ElementType::F32,
            BufferData::F64(_) => ElementType::F64,
            BufferData::I32(_) => ElementType::I32,
            BufferData::U32(_) => ElementType::U32,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        each_variant!(self, BufferData, v => v.len())
    }

    /// Check if storage is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size in bytes
    pub fn size_bytes(&self) -> usize {
        self.len() * self.element_type().size_bytes()
    }

    /// View all elements
    pub fn elements(&self) -> Elements<'_> {
        match self {
            BufferData::F32(v) => Elements::F32(v),
            BufferData::F64(v) => Elements::F64(v),
            BufferData::I32(v) => Elements::I32(v),
            BufferData::U32(v) => Elements::U32(v),
        }
    }

    /// View all elements mutably
    pub fn elements_mut(&mut self) -> ElementsMut<'_> {
        match self {
            BufferData::F32(v) => ElementsMut::F32(v),
            BufferData::F64(v) => ElementsMut::F64(v),
            BufferData::I32(v) => ElementsMut::I32(v),
            BufferData::U32(v) => ElementsMut::U32(v),
        }
    }

    /// View a bounds-checked range
    pub fn slice(&self, range: Range<usize>) -> Result<Elements<'_>> {
        check_range(&range, self.len())?;
        Ok(match self {
            BufferData::F32(v) => Elements::F32(&v[range]),
            BufferData::F64(v) => Elements::F64(&v[range]),
            BufferData::I32(v) => Elements::I32(&v[range]),
            BufferData::U32(v) => Elements::U32(&v[range]),
        })
    }

    /// View a bounds-checked range mutably
    pub fn slice_mut(&mut self, range: Range<usize>) -> Result<ElementsMut<'_>> {
        check_range(&range, self.len())?;
        Ok(match self {
            BufferData::F32(v) => ElementsMut::F32(&mut v[range]),
            BufferData::F64(v) => ElementsMut::F64(&mut v[range]),
            BufferData::I32(v) => ElementsMut::I32(&mut v[range]),
            BufferData::U32(v) => ElementsMut::U32(&mut v[range]),
        })
    }

    /// Copy `src` to the range starting at `dst_start` inside this buffer.
    /// Overlapping ranges behave like `memmove`.
    pub fn copy_within(&mut self, src: Range<usize>, dst_start: usize) -> Result<()> {
        let len = self.len();
        check_range(&src, len)?;
        check_range(&(dst_start..dst_start + src.len()), len)?;
        each_variant!(self, BufferData, v => v.copy_within(src, dst_start));
        Ok(())
    }

    /// Copy out as a typed host vector
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.elements().to_vec::<T>()
    }

    /// Copy out as raw little-endian bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.elements().as_bytes().to_vec()
    }
}

impl<'a> Elements<'a> {
    /// Number of elements
    pub fn len(&self) -> usize {
        each_variant!(self, Elements, v => v.len())
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the view
    pub fn element_type(&self) -> ElementType {
        match self {
            Elements::F32(_) => ElementType::F32,
            Elements::F64(_) => ElementType::F64,
            Elements::I32(_) => ElementType::I32,
            Elements::U32(_) => ElementType::U32,
        }
    }

    /// Borrow as a typed slice
    pub fn typed<T: Element>(self) -> Result<&'a [T]> {
        let actual = self.element_type();
        T::view(self).ok_or_else(|| BackendError::type_mismatch(T::TYPE, actual))
    }

    /// Copy into a typed host vector
    pub fn to_vec<T: Element>(self) -> Result<Vec<T>> {
        Ok(self.typed::<T>()?.to_vec())
    }

    /// Raw byte view
    pub fn as_bytes(&self) -> &'a [u8] {
        each_variant!(*self, Elements, v => bytemuck::cast_slice(v))
    }
}

impl<'a> ElementsMut<'a> {
    /// Number of elements
    pub fn len(&self) -> usize {
        each_variant!(self, ElementsMut, v => v.len())
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the view
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementsMut::F32(_) => ElementType::F32,
            ElementsMut::F64(_) => ElementType::F64,
            ElementsMut::I32(_) => ElementType::I32,
            ElementsMut::U32(_) => ElementType::U32,
        }
    }

    /// Borrow as a typed mutable slice
    pub fn typed<T: Element>(self) -> Result<&'a mut [T]> {
        let actual = self.element_type();
        T::view_mut(self).ok_or_else(|| BackendError::type_mismatch(T::TYPE, actual))
    }

    /// Split into two disjoint views at `mid`
    ///
    /// # Panics
    ///
    /// Panics if `mid > len`, like `slice::split_at_mut`.
    pub fn split_at(self, mid: usize) -> (ElementsMut<'a>, ElementsMut<'a>) {
        match self {
            ElementsMut::F32(v) => {
                let (a, b) = v.split_at_mut(mid);
                (ElementsMut::F32(a), ElementsMut::F32(b))
            }
            ElementsMut::F64(v) => {
                let (a, b) = v.split_at_mut(mid);
                (ElementsMut::F64(a), ElementsMut::F64(b))
            }
            ElementsMut::I32(v) => {
                let (a, b) = v.split_at_mut(mid);
                (ElementsMut::I32(a), ElementsMut::I32(b))
            }
            ElementsMut::U32(v) => {
                let (a, b) = v.split_at_mut(mid);
                (ElementsMut::U32(a), ElementsMut::U32(b))
            }
        }
    }

    /// Copy every element of `src` into this view
    pub fn copy_from(&mut self, src: Elements<'_>) -> Result<()> {
        if src.len() != self.len() {
            return Err(BackendError::LengthMismatch {
                expected: self.len(),
                actual: src.len(),
            });
        }
        match (self, src) {
            (ElementsMut::F32(dst), Elements::F32(src)) => dst.copy_from_slice(src),
            (ElementsMut::F64(dst), Elements::F64(src)) => dst.copy_from_slice(src),
            (ElementsMut::I32(dst), Elements::I32(src)) => dst.copy_from_slice(src),
            (ElementsMut::U32(dst), Elements::U32(src)) => dst.copy_from_slice(src),
            (dst, src) => return Err(BackendError::type_mismatch(dst.element_type(), src.element_type())),
        }
        Ok(())
    }

    /// Apply `op` with `operand` (converted to the element type) to every element
    pub fn apply(&mut self, op: ScalarOp, operand: f64) {
        fn apply_typed<T: Element>(values: &mut [T], op: ScalarOp, operand: f64) {
            let operand = T::from_f64(operand);
            for value in values.iter_mut() {
                *value = value.apply(op, operand);
            }
        }

        each_variant!(self, ElementsMut, v => apply_typed(v, op, operand));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_and_filled() {
        let zeros = BufferData::zeros(ElementType::I32, 5);
        assert_eq!(zeros.len(), 5);
        assert_eq!(zeros.size_bytes(), 20);
        assert_eq!(zeros.to_vec::<i32>().unwrap(), vec![0; 5]);

        let ones = BufferData::filled(ElementType::F64, 3, 1.0);
        assert_eq!(ones.to_vec::<f64>().unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn test_slice_bounds_checked() {
        let data = BufferData::zeros(ElementType::F32, 4);
        assert!(data.slice(0..4).is_ok());
        assert!(matches!(
            data.slice(2..5),
            Err(BackendError::OutOfBounds { start: 2, end: 5, len: 4 })
        ));
    }

    #[test]
    fn test_typed_view_rejects_wrong_type() {
        let data = BufferData::zeros(ElementType::U32, 2);
        assert!(data.elements().typed::<u32>().is_ok());
        assert!(matches!(
            data.elements().typed::<f32>(),
            Err(BackendError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_split_and_apply_disjoint() {
        let mut data = BufferData::from_vec(vec![1u32, 1, 1, 1, 1, 1]);
        let (mut left, mut right) = data.elements_mut().split_at(2);
        left.apply(ScalarOp::Add, 10.0);
        right.apply(ScalarOp::Mul, 3.0);
        assert_eq!(data.to_vec::<u32>().unwrap(), vec![11, 11, 3, 3, 3, 3]);
    }

    #[test]
    fn test_copy_from_checks_length_and_type() {
        let src = BufferData::from_vec(vec![1.0f32, 2.0, 3.0]);
        let mut dst = BufferData::zeros(ElementType::F32, 3);
        dst.elements_mut().copy_from(src.elements()).unwrap();
        assert_eq!(dst, src);

        let mut short = BufferData::zeros(ElementType::F32, 2);
        assert!(matches!(
            short.elements_mut().copy_from(src.elements()),
            Err(BackendError::LengthMismatch { expected: 2, actual: 3 })
        ));

        let mut wrong = BufferData::zeros(ElementType::I32, 3);
        assert!(matches!(
            wrong.elements_mut().copy_from(src.elements()),
            Err(BackendError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_copy_within_overlapping() {
        let mut data = BufferData::from_vec(vec![1i32, 2, 3, 4, 5]);
        data.copy_within(0..3, 2).unwrap();
        assert_eq!(data.to_vec::<i32>().unwrap(), vec![1, 2, 1, 2, 3]);
        assert!(data.copy_within(0..3, 3).is_err());
    }

    #[test]
    fn test_to_bytes_little_endian() {
        let data = BufferData::from_vec(vec![1u32, 256]);
        assert_eq!(data.to_bytes(), vec![1, 0, 0, 0, 0, 1, 0, 0]);
    }
}
