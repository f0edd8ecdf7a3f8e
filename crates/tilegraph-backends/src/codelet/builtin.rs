//! Built-in scalar codelets

use super::{Codelet, VertexParams};
use crate::error::Result;
use crate::memory::{ElementsMut, ScalarOp};

/// Adds `amount` to every element
#[derive(Debug, Clone, Copy, Default)]
pub struct AddScalar;

/// Multiplies every element by `factor`
#[derive(Debug, Clone, Copy, Default)]
pub struct MulScalar;

/// Sets every element to `value`
#[derive(Debug, Clone, Copy, Default)]
pub struct Fill;

macro_rules! scalar_codelet {
    ($ty:ident, $name:literal, $field:literal, $op:expr) => {
        impl $ty {
            /// Name vertices use to reference this codelet
            pub const NAME: &'static str = $name;
            /// The single required field
            pub const FIELD: &'static str = $field;
            const FIELDS: &'static [&'static str] = &[$field];
        }

        impl Codelet for $ty {
            fn name(&self) -> &str {
                Self::NAME
            }

            fn fields(&self) -> &[&'static str] {
                Self::FIELDS
            }

            fn compute(&self, mut data: ElementsMut<'_>, params: &VertexParams) -> Result<()> {
                let operand = params.require(Self::NAME, Self::FIELD)?;
                data.apply($op, operand);
                Ok(())
            }
        }
    };
}

scalar_codelet!(AddScalar, "AddScalar", "amount", ScalarOp::Add);
scalar_codelet!(MulScalar, "MulScalar", "factor", ScalarOp::Mul);
scalar_codelet!(Fill, "Fill", "value", ScalarOp::Set);
