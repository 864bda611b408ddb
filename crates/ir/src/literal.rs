use std::fmt;

use crate::shape::{PrimitiveType, Shape};

/// A scalar constant value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Literal {
    Pred(bool),
    S32(i32),
    S64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Literal {
    pub fn element_type(&self) -> PrimitiveType {
        match self {
            Literal::Pred(_) => PrimitiveType::Pred,
            Literal::S32(_) => PrimitiveType::S32,
            Literal::S64(_) => PrimitiveType::S64,
            Literal::U32(_) => PrimitiveType::U32,
            Literal::U64(_) => PrimitiveType::U64,
            Literal::F32(_) => PrimitiveType::F32,
            Literal::F64(_) => PrimitiveType::F64,
        }
    }

    /// The rank-0 shape of this literal.
    pub fn shape(&self) -> Shape {
        Shape::scalar(self.element_type())
    }

    pub fn to_i64(&self) -> Option<i64> {
        match *self {
            Literal::S32(i) => Some(i.into()),
            Literal::S64(i) => Some(i),
            Literal::U32(u) => Some(u.into()),
            Literal::U64(u) => u.try_into().ok(),
            Literal::Pred(_) | Literal::F32(_) | Literal::F64(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Pred(b) => write!(f, "{b}"),
            Literal::S32(i) => write!(f, "{i}"),
            Literal::S64(i) => write!(f, "{i}"),
            Literal::U32(u) => write!(f, "{u}"),
            Literal::U64(u) => write!(f, "{u}"),
            Literal::F32(x) => write!(f, "{x:?}"),
            Literal::F64(x) => write!(f, "{x:?}"),
        }
    }
}
