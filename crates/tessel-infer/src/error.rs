//! Errors reported by the layout inference pass.

use tessel_ir::OpId;
use tessel_layout::TilingError;
use thiserror::Error;

use crate::verify::AnnotationError;

/// A failure to infer layouts, attached to the op that caused it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("'{op_name}' op {kind}")]
pub struct InferError {
    /// The failing op, or `None` for function-level failures.
    pub op: Option<OpId>,
    /// Qualified name of the failing op.
    pub op_name: String,
    /// What went wrong.
    pub kind: InferErrorKind,
}

impl InferError {
    /// Follows nested region failures down to the innermost error.
    #[must_use]
    pub fn root_cause(&self) -> &InferError {
        match &self.kind {
            InferErrorKind::Region { source, .. } => source.root_cause(),
            _ => self,
        }
    }
}

/// Kinds of inference failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InferErrorKind {
    /// A construct the rule set does not handle.
    #[error("{0}")]
    Unsupported(String),

    /// The IR is malformed or an annotation is in an unexpected state.
    #[error("{0}")]
    Invariant(String),

    /// Two producers admit no common layout.
    #[error("{0}")]
    Incompatible(String),

    /// A dynamic memref index could not be proven tile-aligned.
    #[error("cannot statically prove that index in dimension {dim} is a multiple of {tiling}")]
    NotDivisible {
        /// Memref dimension of the index.
        dim: usize,
        /// Tile size the index must be a multiple of.
        tiling: i64,
    },

    /// The memref tiling is not understood by loads and stores.
    #[error(transparent)]
    MemoryTiling(#[from] TilingError),

    /// A nested region failed.
    #[error("{context}: {source}")]
    Region {
        /// Which region failed.
        context: String,
        /// The failure inside the region.
        source: Box<InferError>,
    },

    /// The finished annotations break a structural invariant.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

impl InferErrorKind {
    /// A construct that is not implemented yet.
    pub(crate) fn nyi(what: impl std::fmt::Display) -> Self {
        Self::Unsupported(format!("not implemented: {what}"))
    }
}

/// Result type of the inference rules.
pub type InferResult<T = ()> = Result<T, InferError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_index::Idx;

    #[test]
    fn test_display_names_the_op() {
        let err = InferError {
            op: Some(OpId::new(3)),
            op_name: "tpu.rotate".into(),
            kind: InferErrorKind::nyi("Rotate with non-32-bit data"),
        };
        assert_eq!(
            err.to_string(),
            "'tpu.rotate' op not implemented: Rotate with non-32-bit data"
        );
    }

    #[test]
    fn test_region_errors_chain() {
        let inner = InferError {
            op: Some(OpId::new(1)),
            op_name: "vector.load".into(),
            kind: InferErrorKind::NotDivisible { dim: 1, tiling: 128 },
        };
        let outer = InferError {
            op: Some(OpId::new(2)),
            op_name: "scf.if".into(),
            kind: InferErrorKind::Region {
                context: "failed to infer layout for then branch".into(),
                source: Box::new(inner.clone()),
            },
        };
        assert_eq!(outer.root_cause(), &inner);
        assert_eq!(
            outer.to_string(),
            "'scf.if' op failed to infer layout for then branch: 'vector.load' op \
             cannot statically prove that index in dimension 1 is a multiple of 128"
        );
    }

    #[test]
    fn test_tiling_errors_convert() {
        let kind: InferErrorKind = TilingError::ExpectedOneLevel.into();
        assert_eq!(kind.to_string(), "Only one-level tiling supported for 32-bit loads");
    }
}
