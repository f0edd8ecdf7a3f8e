//! Element types shared by host buffers, streams and device memory

use crate::memory::{BufferData, Elements, ElementsMut, ScalarOp};
use std::fmt;

/// Type of the elements stored in a tensor or carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ElementType {
    F32,
    F64,
    I32,
    U32,
}

impl ElementType {
    /// Size of this type in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 | ElementType::U32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// Is this a floating-point type?
    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    /// Can a codelet parameter be converted to this type without loss?
    ///
    /// Integer types take finite whole numbers within their range.
    pub fn represents(self, value: f64) -> bool {
        let (min, max) = match self {
            ElementType::F32 | ElementType::F64 => return true,
            ElementType::I32 => (i32::MIN as f64, i32::MAX as f64),
            ElementType::U32 => (0.0, u32::MAX as f64),
        };
        value.is_finite() && value.fract() == 0.0 && (min..=max).contains(&value)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::F32 => write!(f, "f32"),
            ElementType::F64 => write!(f, "f64"),
            ElementType::I32 => write!(f, "i32"),
            ElementType::U32 => write!(f, "u32"),
        }
    }
}

/// Host-side scalar type that maps onto an [`ElementType`]
///
/// Implemented for `f32`, `f64`, `i32` and `u32`. Integer arithmetic wraps.
pub trait Element: bytemuck::Pod + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// Matching device element type
    const TYPE: ElementType;

    /// Convert a codelet parameter into this type
    fn from_f64(value: f64) -> Self;

    /// Apply a scalar operation
    fn apply(self, op: ScalarOp, operand: Self) -> Self;

    /// Borrow typed elements, `None` if the type differs
    fn view(data: Elements<'_>) -> Option<&[Self]>;

    /// Borrow typed elements mutably, `None` if the type differs
    fn view_mut(data: ElementsMut<'_>) -> Option<&mut [Self]>;

    /// Wrap an owned vector as device storage
    fn into_buffer(data: Vec<Self>) -> BufferData;
}

macro_rules! impl_element {
    (@views $ty:ty, $variant:ident) => {
        fn view(data: Elements<'_>) -> Option<&[Self]> {
            match data {
                Elements::$variant(slice) => Some(slice),
                _ => None,
            }
        }

        fn view_mut(data: ElementsMut<'_>) -> Option<&mut [Self]> {
            match data {
                ElementsMut::$variant(slice) => Some(slice),
                _ => None,
            }
        }

        fn into_buffer(data: Vec<Self>) -> BufferData {
            BufferData::$variant(data)
        }
    };
    ($ty:ty, $variant:ident, float) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn apply(self, op: ScalarOp, operand: Self) -> Self {
                match op {
                    ScalarOp::Add => self + operand,
                    ScalarOp::Mul => self * operand,
                    ScalarOp::Set => operand,
                }
            }

            impl_element!(@views $ty, $variant);
        }
    };
    ($ty:ty, $variant:ident, int) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn apply(self, op: ScalarOp, operand: Self) -> Self {
                match op {
                    ScalarOp::Add => self.wrapping_add(operand),
                    ScalarOp::Mul => self.wrapping_mul(operand),
                    ScalarOp::Set => operand,
                }
            }

            impl_element!(@views $ty, $variant);
        }
    };
}

impl_element!(f32, F32, float);
impl_element!(f64, F64, float);
impl_element!(i32, I32, int);
impl_element!(u32, U32, int);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_and_display() {
        assert_eq!(ElementType::F32.size_bytes(), 4);
        assert_eq!(ElementType::F64.size_bytes(), 8);
        assert_eq!(ElementType::U32.to_string(), "u32");
        assert!(ElementType::F64.is_float());
        assert!(!ElementType::I32.is_float());
    }

    #[test]
    fn test_represents_rejects_lossy_integers() {
        assert!(ElementType::U32.represents(4_294_967_295.0));
        assert!(!ElementType::U32.represents(-1.0));
        assert!(ElementType::I32.represents(-3.0));
        assert!(!ElementType::I32.represents(2.7));
        assert!(!ElementType::I32.represents(f64::NAN));
        assert!(!ElementType::I32.represents(2_147_483_648.0));
        assert!(ElementType::F32.represents(2.7));
    }

    #[test]
    fn test_element_types_match_rust_sizes() {
        assert_eq!(<f32 as Element>::TYPE.size_bytes(), std::mem::size_of::<f32>());
        assert_eq!(<f64 as Element>::TYPE.size_bytes(), std::mem::size_of::<f64>());
        assert_eq!(<i32 as Element>::TYPE.size_bytes(), std::mem::size_of::<i32>());
        assert_eq!(<u32 as Element>::TYPE.size_bytes(), std::mem::size_of::<u32>());
    }

    #[test]
    fn test_integer_ops_wrap() {
        assert_eq!(u32::MAX.apply(ScalarOp::Add, 2), 1);
        assert_eq!(i32::MAX.apply(ScalarOp::Mul, 2), -2);
        assert_eq!(5i32.apply(ScalarOp::Set, 9), 9);
    }

    #[test]
    fn test_float_ops() {
        assert_eq!(1.5f32.apply(ScalarOp::Add, 2.0), 3.5);
        assert_eq!(1.5f64.apply(ScalarOp::Mul, 2.0), 3.0);
        assert_eq!(f32::from_f64(3.0), 3.0);
    }
}
