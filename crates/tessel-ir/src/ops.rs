//! Operation kinds and their attributes.
//!
//! Each [`OpKind`] corresponds to one operation of the `arith`, `math`, `cf`,
//! `func`, `memref`, `scf`, `vector` or `tpu` dialects. Operand order follows
//! the dialect conventions:
//!
//! | Op | Operands | Regions |
//! |----|----------|---------|
//! | `vector.load` | `base, indices...` | |
//! | `vector.store` | `value, base, indices...` | |
//! | `tpu.load` / `tpu.strided_load` | `base, indices...` | |
//! | `tpu.store` / `tpu.strided_store` | `value, base, indices...` | |
//! | `scf.for` | `lb, ub, step, inits...` | body `(iv, iter_args...)` |
//! | `scf.while` | `inits...` | before, after |
//! | `scf.if` | `cond` | then, else |
//! | `scf.condition` | `flag, args...` | |
//! | `vector.contract` / `tpu.matmul` | `lhs, rhs, acc` | |
//! | `vector.multi_reduction` | `source, acc` | |
//! | `vector.extract` | `source, dynamic positions...` | |

use serde::{Deserialize, Serialize};

/// A scalar literal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer, index or boolean literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
}

impl Literal {
    /// Returns the integer value, if this is an integer literal.
    #[must_use]
    pub const fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(n),
            Self::Float(_) => None,
        }
    }
}

/// The value of an `arith.constant`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    /// A scalar constant.
    Scalar(Literal),
    /// A dense vector with every element equal.
    Splat(Literal),
    /// A dense vector listing every element in row-major order.
    Dense(Vec<Literal>),
}

impl ConstantValue {
    /// Returns true if every element of a vector constant is equal.
    #[must_use]
    pub fn is_splat(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Splat(_) => true,
            Self::Dense(elems) => elems.windows(2).all(|w| w[0] == w[1]),
        }
    }

    /// Returns the integer value of a scalar integer constant.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Scalar(lit) => lit.as_int(),
            _ => None,
        }
    }
}

/// Elementwise arithmetic and math operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ElementwiseOp {
    AddI,
    SubI,
    MulI,
    DivSI,
    RemSI,
    AndI,
    OrI,
    XOrI,
    MaxSI,
    MinSI,
    ShLI,
    AddF,
    SubF,
    MulF,
    DivF,
    MaximumF,
    MinimumF,
    NegF,
    Exp,
    Log,
    Tanh,
    Sqrt,
    Rsqrt,
    AbsF,
}

impl ElementwiseOp {
    /// Qualified operation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddI => "arith.addi",
            Self::SubI => "arith.subi",
            Self::MulI => "arith.muli",
            Self::DivSI => "arith.divsi",
            Self::RemSI => "arith.remsi",
            Self::AndI => "arith.andi",
            Self::OrI => "arith.ori",
            Self::XOrI => "arith.xori",
            Self::MaxSI => "arith.maxsi",
            Self::MinSI => "arith.minsi",
            Self::ShLI => "arith.shli",
            Self::AddF => "arith.addf",
            Self::SubF => "arith.subf",
            Self::MulF => "arith.mulf",
            Self::DivF => "arith.divf",
            Self::MaximumF => "arith.maximumf",
            Self::MinimumF => "arith.minimumf",
            Self::NegF => "arith.negf",
            Self::Exp => "math.exp",
            Self::Log => "math.log",
            Self::Tanh => "math.tanh",
            Self::Sqrt => "math.sqrt",
            Self::Rsqrt => "math.rsqrt",
            Self::AbsF => "math.absf",
        }
    }
}

/// Comparison predicates for `arith.cmpi` / `arith.cmpf`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Combining kinds of reductions and contractions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CombiningKind {
    Add,
    Mul,
    MaxF,
    MinF,
    MaxSI,
    MinSI,
}

/// Iterator kinds of a contraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IteratorType {
    /// The dimension appears in the result.
    Parallel,
    /// The dimension is summed over.
    Reduction,
}

/// An affine map whose results are plain dimension expressions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineMap {
    /// Number of input dimensions.
    pub num_dims: usize,
    /// Dimension position of each result.
    pub results: Vec<usize>,
}

impl AffineMap {
    /// Creates the map `(d0, ..., dn) -> (d[results[0]], ...)`.
    #[must_use]
    pub fn new(num_dims: usize, results: &[usize]) -> Self {
        Self {
            num_dims,
            results: results.to_vec(),
        }
    }
}

/// Attributes of a `vector.contract`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractionAttrs {
    /// How products are combined with the accumulator.
    pub kind: CombiningKind,
    /// Kind of each iteration dimension.
    pub iterator_types: Vec<IteratorType>,
    /// Indexing maps of lhs, rhs and acc.
    pub indexing_maps: Vec<AffineMap>,
}

impl ContractionAttrs {
    /// A plain `lhs @ rhs + acc` matrix multiplication.
    #[must_use]
    pub fn matmul(transpose_rhs: bool) -> Self {
        let rhs = if transpose_rhs { [1, 2] } else { [2, 1] };
        Self {
            kind: CombiningKind::Add,
            iterator_types: vec![
                IteratorType::Parallel,
                IteratorType::Parallel,
                IteratorType::Reduction,
            ],
            indexing_maps: vec![
                AffineMap::new(3, &[0, 2]),
                AffineMap::new(3, &rhs),
                AffineMap::new(3, &[0, 1]),
            ],
        }
    }
}

/// One position of a `vector.extract`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractPosition {
    /// A position known at compile time.
    Static(i64),
    /// A position given by the next dynamic operand.
    Dynamic,
}

/// Kind of an operation, with its attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    // arith / math / cf / func / memref
    /// `arith.constant`.
    Constant(ConstantValue),
    /// Elementwise arithmetic (`arith.addf`, `math.exp`, ...).
    Elementwise(ElementwiseOp),
    /// `arith.select(cond, true_value, false_value)`.
    Select,
    /// `arith.cmpi`.
    CmpI(Predicate),
    /// `arith.cmpf`.
    CmpF(Predicate),
    /// `arith.extf`.
    ExtF,
    /// `arith.extsi`.
    ExtSI,
    /// `arith.extui`.
    ExtUI,
    /// `arith.truncf`.
    TruncF,
    /// `arith.trunci`.
    TruncI,
    /// `arith.index_cast`.
    IndexCast,
    /// `cf.assert(cond)`.
    Assert {
        /// Failure message.
        message: String,
    },
    /// `func.return`.
    Return,
    /// `memref.load(base, indices...)`.
    MemRefLoad,

    // scf
    /// `scf.if`.
    If,
    /// `scf.for`.
    For,
    /// `scf.while`.
    While,
    /// `scf.condition`.
    Condition,
    /// `scf.yield`.
    Yield,

    // tpu
    /// `tpu.assume_layout`.
    AssumeLayout,
    /// `tpu.assume_multiple`.
    AssumeMultiple {
        /// The value is a multiple of this.
        multiple: i64,
    },
    /// `tpu.rotate`.
    Rotate {
        /// Rotation amount.
        amount: i64,
        /// Rotated dimension.
        dimension: i64,
    },
    /// `tpu.concatenate(sources...)`.
    Concatenate {
        /// Concatenated dimension.
        dimension: i64,
    },
    /// `tpu.load`.
    TileLoad,
    /// `tpu.store`.
    TileStore,
    /// `tpu.strided_load`.
    StridedLoad {
        /// Stride per dimension.
        strides: Vec<i64>,
    },
    /// `tpu.strided_store`.
    StridedStore {
        /// Stride per dimension.
        strides: Vec<i64>,
    },
    /// `tpu.matmul`.
    Matmul {
        /// Whether the rhs is transposed.
        transpose_rhs: bool,
    },
    /// `tpu.erase_memref_layout`.
    EraseLayout,
    /// `tpu.iota`.
    Iota {
        /// Dimension along which values increase.
        dimension: Option<i64>,
    },
    /// `tpu.gather`.
    Gather {
        /// Gathered indices.
        indices: Vec<i64>,
        /// Gathered dimension.
        dimension: i64,
    },
    /// `tpu.bitcast`.
    Bitcast,
    /// `tpu.repeat`.
    Repeat {
        /// Repeated dimension.
        dimension: i64,
        /// Number of copies.
        times: i64,
    },
    /// `tpu.trace`.
    Trace {
        /// Trace label.
        message: String,
        /// Trace level.
        level: u32,
    },
    /// `tpu.region`.
    Region,
    /// `tpu.yield`.
    TpuYield,

    // vector
    /// `vector.broadcast`.
    Broadcast,
    /// `vector.contract`.
    Contraction(ContractionAttrs),
    /// `vector.extract`.
    Extract {
        /// Extracted position.
        position: Vec<ExtractPosition>,
    },
    /// `vector.load`.
    VectorLoad,
    /// `vector.store`.
    VectorStore,
    /// `vector.multi_reduction`.
    MultiReduction {
        /// Combining kind.
        kind: CombiningKind,
        /// Reduced dimensions.
        dims: Vec<i64>,
    },
    /// `vector.shape_cast`.
    ShapeCast,
    /// `vector.transpose`.
    Transpose {
        /// Result dim `i` is source dim `permutation[i]`.
        permutation: Vec<i64>,
    },
    /// `vector.extract_strided_slice`.
    ExtractStridedSlice {
        /// Slice start per dimension.
        offsets: Vec<i64>,
        /// Slice size per dimension.
        sizes: Vec<i64>,
        /// Slice stride per dimension.
        strides: Vec<i64>,
    },

    /// An operation from a dialect the pass has no rule for.
    Opaque {
        /// Qualified operation name.
        name: String,
        /// Whether the op is elementwise-mappable.
        elementwise: bool,
    },
}

impl OpKind {
    /// Qualified operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Constant(_) => "arith.constant",
            Self::Elementwise(op) => op.name(),
            Self::Select => "arith.select",
            Self::CmpI(_) => "arith.cmpi",
            Self::CmpF(_) => "arith.cmpf",
            Self::ExtF => "arith.extf",
            Self::ExtSI => "arith.extsi",
            Self::ExtUI => "arith.extui",
            Self::TruncF => "arith.truncf",
            Self::TruncI => "arith.trunci",
            Self::IndexCast => "arith.index_cast",
            Self::Assert { .. } => "cf.assert",
            Self::Return => "func.return",
            Self::MemRefLoad => "memref.load",
            Self::If => "scf.if",
            Self::For => "scf.for",
            Self::While => "scf.while",
            Self::Condition => "scf.condition",
            Self::Yield => "scf.yield",
            Self::AssumeLayout => "tpu.assume_layout",
            Self::AssumeMultiple { .. } => "tpu.assume_multiple",
            Self::Rotate { .. } => "tpu.rotate",
            Self::Concatenate { .. } => "tpu.concatenate",
            Self::TileLoad => "tpu.load",
            Self::TileStore => "tpu.store",
            Self::StridedLoad { .. } => "tpu.strided_load",
            Self::StridedStore { .. } => "tpu.strided_store",
            Self::Matmul { .. } => "tpu.matmul",
            Self::EraseLayout => "tpu.erase_memref_layout",
            Self::Iota { .. } => "tpu.iota",
            Self::Gather { .. } => "tpu.gather",
            Self::Bitcast => "tpu.bitcast",
            Self::Repeat { .. } => "tpu.repeat",
            Self::Trace { .. } => "tpu.trace",
            Self::Region => "tpu.region",
            Self::TpuYield => "tpu.yield",
            Self::Broadcast => "vector.broadcast",
            Self::Contraction(_) => "vector.contract",
            Self::Extract { .. } => "vector.extract",
            Self::VectorLoad => "vector.load",
            Self::VectorStore => "vector.store",
            Self::MultiReduction { .. } => "vector.multi_reduction",
            Self::ShapeCast => "vector.shape_cast",
            Self::Transpose { .. } => "vector.transpose",
            Self::ExtractStridedSlice { .. } => "vector.extract_strided_slice",
            Self::Opaque { name, .. } => name,
        }
    }

    /// Returns true if the op ends a block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Return | Self::Yield | Self::Condition | Self::TpuYield
        )
    }

    /// Returns true if the op applies independently to each vector element.
    #[must_use]
    pub fn is_elementwise_mappable(&self) -> bool {
        match self {
            Self::Elementwise(_)
            | Self::Select
            | Self::CmpI(_)
            | Self::CmpF(_)
            | Self::ExtF
            | Self::ExtSI
            | Self::ExtUI
            | Self::TruncF
            | Self::TruncI
            | Self::IndexCast => true,
            Self::Opaque { elementwise, .. } => *elementwise,
            _ => false,
        }
    }

    /// Returns true for `tpu.assume_layout`.
    #[must_use]
    pub fn is_assume_layout(&self) -> bool {
        matches!(self, Self::AssumeLayout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_all_equal_is_splat() {
        let dense = ConstantValue::Dense(vec![Literal::Float(1.0); 4]);
        assert!(dense.is_splat());
        let mixed = ConstantValue::Dense(vec![Literal::Int(0), Literal::Int(1)]);
        assert!(!mixed.is_splat());
        assert!(!ConstantValue::Scalar(Literal::Int(3)).is_splat());
    }

    #[test]
    fn test_names() {
        assert_eq!(OpKind::Elementwise(ElementwiseOp::AddF).name(), "arith.addf");
        assert_eq!(OpKind::EraseLayout.name(), "tpu.erase_memref_layout");
        let opaque = OpKind::Opaque {
            name: "foo.bar".into(),
            elementwise: false,
        };
        assert_eq!(opaque.name(), "foo.bar");
    }

    #[test]
    fn test_elementwise_mappable() {
        assert!(OpKind::Select.is_elementwise_mappable());
        assert!(!OpKind::Broadcast.is_elementwise_mappable());
        assert!(OpKind::Opaque {
            name: "math.erf".into(),
            elementwise: true
        }
        .is_elementwise_mappable());
    }

    #[test]
    fn test_terminators() {
        assert!(OpKind::Yield.is_terminator());
        assert!(OpKind::TpuYield.is_terminator());
        assert!(!OpKind::If.is_terminator());
    }
}
