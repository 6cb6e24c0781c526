//! Value types.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tessel_layout::Tile;

/// Element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Signless integer with bit width (`i1`, `i8`, `i32`, ...).
    Int(u8),
    /// Machine index.
    Index,
    /// IEEE float with bit width.
    Float(u8),
    /// Brain float.
    BFloat16,
}

impl ScalarType {
    /// 1-bit integer (boolean).
    pub const I1: Self = Self::Int(1);
    /// 8-bit integer.
    pub const I8: Self = Self::Int(8);
    /// 16-bit integer.
    pub const I16: Self = Self::Int(16);
    /// 32-bit integer.
    pub const I32: Self = Self::Int(32);
    /// 16-bit float.
    pub const F16: Self = Self::Float(16);
    /// 32-bit float.
    pub const F32: Self = Self::Float(32);

    /// Returns the width in bits. Indices count as 64 bits.
    #[must_use]
    pub const fn bitwidth(self) -> u32 {
        match self {
            Self::Int(bits) | Self::Float(bits) => bits as u32,
            Self::Index => 64,
            Self::BFloat16 => 16,
        }
    }

    /// Returns true for integer and index types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int(_) | Self::Index)
    }

    /// Returns true for float types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float(_) | Self::BFloat16)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(bits) => write!(f, "i{bits}"),
            Self::Index => f.write_str("index"),
            Self::Float(bits) => write!(f, "f{bits}"),
            Self::BFloat16 => f.write_str("bf16"),
        }
    }
}

/// Dimensions of a shaped type.
pub type Shape = SmallVec<[i64; 4]>;

/// A `vector<...>` type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorType {
    /// Static dimensions.
    pub shape: Shape,
    /// Element type.
    pub element: ScalarType,
}

impl VectorType {
    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element bitwidth.
    #[must_use]
    pub fn bitwidth(&self) -> u32 {
        self.element.bitwidth()
    }
}

/// A `memref<...>` type with its hierarchical tiling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemRefType {
    /// Static dimensions.
    pub shape: Shape,
    /// Element type.
    pub element: ScalarType,
    /// Tiling levels, outermost first. Empty for untiled memrefs.
    pub tiles: Vec<Tile>,
}

impl MemRefType {
    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// The type of an SSA value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A scalar, index or boolean.
    Scalar(ScalarType),
    /// A vector.
    Vector(VectorType),
    /// A memory reference.
    MemRef(MemRefType),
}

impl Type {
    /// Creates a vector type.
    #[must_use]
    pub fn vector(shape: &[i64], element: ScalarType) -> Self {
        Self::Vector(VectorType {
            shape: shape.iter().copied().collect(),
            element,
        })
    }

    /// Creates a memref type.
    #[must_use]
    pub fn memref(shape: &[i64], element: ScalarType, tiles: Vec<Tile>) -> Self {
        Self::MemRef(MemRefType {
            shape: shape.iter().copied().collect(),
            element,
            tiles,
        })
    }

    /// The `index` type.
    #[must_use]
    pub const fn index() -> Self {
        Self::Scalar(ScalarType::Index)
    }

    /// Returns the vector type, if this is one.
    #[must_use]
    pub fn as_vector(&self) -> Option<&VectorType> {
        match self {
            Self::Vector(vty) => Some(vty),
            _ => None,
        }
    }

    /// Returns the memref type, if this is one.
    #[must_use]
    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Self::MemRef(mty) => Some(mty),
            _ => None,
        }
    }

    /// Returns true for vector types.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }

    /// Returns true for scalar types (including index).
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Returns the element type of scalars, vectors and memrefs.
    #[must_use]
    pub fn element_type(&self) -> ScalarType {
        match self {
            Self::Scalar(s) => *s,
            Self::Vector(vty) => vty.element,
            Self::MemRef(mty) => mty.element,
        }
    }
}

fn write_shape(f: &mut fmt::Formatter<'_>, shape: &[i64]) -> fmt::Result {
    for dim in shape {
        write!(f, "{dim}x")?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Vector(vty) => {
                f.write_str("vector<")?;
                write_shape(f, &vty.shape)?;
                write!(f, "{}>", vty.element)
            }
            Self::MemRef(mty) => {
                f.write_str("memref<")?;
                write_shape(f, &mty.shape)?;
                write!(f, "{}", mty.element)?;
                if !mty.tiles.is_empty() {
                    f.write_str(", #tpu.tiled<")?;
                    for tile in &mty.tiles {
                        let dims: Vec<String> = tile.dims().iter().map(ToString::to_string).collect();
                        write!(f, "({})", dims.join(","))?;
                    }
                    f.write_str(">")?;
                }
                f.write_str(">")
            }
        }
    }
}

impl From<ScalarType> for Type {
    fn from(s: ScalarType) -> Self {
        Self::Scalar(s)
    }
}
