//! Structural checks on a fully annotated function.
//!
//! Every op with operands carries one `in_layout` entry per operand and
//! every op with results one `out_layout` entry per result. An entry is a
//! layout exactly when its value is a vector.

use std::fmt;

use tessel_ir::{Function, OpId, ValueId};
use tessel_layout::Layout;
use thiserror::Error;

/// Which side of an op an annotation entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// An `in_layout` entry.
    Operand,
    /// An `out_layout` entry.
    Result,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operand => f.write_str("operand"),
            Self::Result => f.write_str("result"),
        }
    }
}

/// A broken annotation invariant.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AnnotationError {
    /// The op has operands but no `in_layout`.
    #[error("missing in_layout attribute")]
    MissingInLayout {
        /// The op.
        op: OpId,
        /// Qualified name of the op.
        name: String,
    },

    /// The op has results but no `out_layout`.
    #[error("missing out_layout attribute")]
    MissingOutLayout {
        /// The op.
        op: OpId,
        /// Qualified name of the op.
        name: String,
    },

    /// The annotation does not have one entry per value.
    #[error("{side} layouts have {found} entries, expected {expected}")]
    Count {
        /// The op.
        op: OpId,
        /// Qualified name of the op.
        name: String,
        /// Which annotation.
        side: Side,
        /// Number of operands or results.
        expected: usize,
        /// Number of entries.
        found: usize,
    },

    /// A vector value has no layout.
    #[error("vector {side} {index} has no layout")]
    MissingLayout {
        /// The op.
        op: OpId,
        /// Qualified name of the op.
        name: String,
        /// Which annotation.
        side: Side,
        /// Position of the value.
        index: usize,
    },

    /// A non-vector value has a layout.
    #[error("non-vector {side} {index} has a layout")]
    UnexpectedLayout {
        /// The op.
        op: OpId,
        /// Qualified name of the op.
        name: String,
        /// Which annotation.
        side: Side,
        /// Position of the value.
        index: usize,
    },
}

impl AnnotationError {
    /// The offending op.
    #[must_use]
    pub fn op(&self) -> OpId {
        match self {
            Self::MissingInLayout { op, .. }
            | Self::MissingOutLayout { op, .. }
            | Self::Count { op, .. }
            | Self::MissingLayout { op, .. }
            | Self::UnexpectedLayout { op, .. } => *op,
        }
    }

    /// Qualified name of the offending op.
    #[must_use]
    pub fn op_name(&self) -> &str {
        match self {
            Self::MissingInLayout { name, .. }
            | Self::MissingOutLayout { name, .. }
            | Self::Count { name, .. }
            | Self::MissingLayout { name, .. }
            | Self::UnexpectedLayout { name, .. } => name,
        }
    }
}

/// Checks the annotation invariants on every op of `func`.
///
/// # Errors
///
/// Returns the first violation found, in op creation order.
pub fn verify_annotations(func: &Function) -> Result<(), AnnotationError> {
    for (op, operation) in func.ops() {
        let sides = [
            (Side::Operand, &operation.operands[..], &operation.in_layout),
            (Side::Result, &operation.results[..], &operation.out_layout),
        ];
        for (side, values, layouts) in sides {
            if values.is_empty() && layouts.as_ref().map_or(true, Vec::is_empty) {
                continue;
            }
            let name = operation.name().to_string();
            let Some(layouts) = layouts else {
                return Err(match side {
                    Side::Operand => AnnotationError::MissingInLayout { op, name },
                    Side::Result => AnnotationError::MissingOutLayout { op, name },
                });
            };
            check_entries(func, op, name, side, values, layouts)?;
        }
    }
    Ok(())
}

fn check_entries(
    func: &Function,
    op: OpId,
    name: String,
    side: Side,
    values: &[ValueId],
    layouts: &[Layout],
) -> Result<(), AnnotationError> {
    if values.len() != layouts.len() {
        return Err(AnnotationError::Count {
            op,
            name,
            side,
            expected: values.len(),
            found: layouts.len(),
        });
    }
    for (index, (&value, layout)) in values.iter().zip(layouts).enumerate() {
        match (func.value_type(value).is_vector(), layout.is_some()) {
            (true, false) => {
                return Err(AnnotationError::MissingLayout {
                    op,
                    name,
                    side,
                    index,
                })
            }
            (false, true) => {
                return Err(AnnotationError::UnexpectedLayout {
                    op,
                    name,
                    side,
                    index,
                })
            }
            _ => {}
        }
    }
    Ok(())
}
