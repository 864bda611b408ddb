use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Pred,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    Bf16,
    F32,
    F64,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Pred => "pred",
            PrimitiveType::S8 => "s8",
            PrimitiveType::S16 => "s16",
            PrimitiveType::S32 => "s32",
            PrimitiveType::S64 => "s64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F16 => "f16",
            PrimitiveType::Bf16 => "bf16",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
        }
    }

    #[must_use]
    pub fn is_floating_point(self) -> bool {
        matches!(
            self,
            PrimitiveType::F16 | PrimitiveType::Bf16 | PrimitiveType::F32 | PrimitiveType::F64
        )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArrayShape {
    pub element_type: PrimitiveType,
    pub dims: Vec<i64>,
}

/// The result shape of an instruction.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Shape {
    Array(ArrayShape),
    Tuple(Vec<Shape>),
    Token,
}

impl Shape {
    pub fn array(element_type: PrimitiveType, dims: impl Into<Vec<i64>>) -> Self {
        Shape::Array(ArrayShape {
            element_type,
            dims: dims.into(),
        })
    }

    pub fn scalar(element_type: PrimitiveType) -> Self {
        Self::array(element_type, Vec::new())
    }

    pub fn tuple(elements: impl Into<Vec<Shape>>) -> Self {
        Shape::Tuple(elements.into())
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array(_))
    }

    #[must_use]
    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// The number of dimensions of an array shape, `None` for tuples and tokens.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Array(array) => Some(array.dims.len()),
            Shape::Tuple(_) | Shape::Token => None,
        }
    }

    pub fn element_type(&self) -> Option<PrimitiveType> {
        match self {
            Shape::Array(array) => Some(array.element_type),
            Shape::Tuple(_) | Shape::Token => None,
        }
    }

    /// Returns the same array shape with a different element type. Tuples and tokens are returned
    /// unchanged.
    #[must_use]
    pub fn with_element_type(&self, element_type: PrimitiveType) -> Self {
        match self {
            Shape::Array(array) => Shape::Array(ArrayShape {
                element_type,
                dims: array.dims.clone(),
            }),
            other => other.clone(),
        }
    }

    /// Follow a tuple index path down to a nested shape.
    pub fn subshape(&self, index: &[usize]) -> Option<&Shape> {
        let mut shape = self;
        for &i in index {
            match shape {
                Shape::Tuple(elements) => shape = elements.get(i)?,
                Shape::Array(_) | Shape::Token => return None,
            }
        }
        Some(shape)
    }

    /// The number of leaf (non-tuple) shapes in this shape.
    pub fn leaf_count(&self) -> usize {
        match self {
            Shape::Tuple(elements) => elements.iter().map(Shape::leaf_count).sum(),
            Shape::Array(_) | Shape::Token => 1,
        }
    }

    /// Two shapes are compatible if they have the same element types and dimensions at every leaf.
    ///
    /// Compatible shapes can stand in for one another in every use of an instruction.
    #[must_use]
    pub fn compatible(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array(a), Shape::Array(b)) => a.element_type == b.element_type && a.dims == b.dims,
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.compatible(b))
            }
            (Shape::Token, Shape::Token) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array(array) => {
                write!(f, "{}[", array.element_type)?;
                for (i, dim) in array.dims.iter().enumerate() {
                    if i != 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{dim}")?;
                }
                write!(f, "]")
            }
            Shape::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
            Shape::Token => write!(f, "token[]"),
        }
    }
}
