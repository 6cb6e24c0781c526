//! # Tessel Vector Layout Inference
//!
//! Assigns a [`VectorLayout`](tessel_layout::VectorLayout) to every vector
//! value of a [`Function`](tessel_ir::Function), recording it on each op as
//! `in_layout` / `out_layout`.
//!
//! ## Overview
//!
//! The pass walks the function body in program order. Each op is handled by
//! a rule that reads the layouts its operands were produced with, picks the
//! layouts it wants to consume them in and the layouts of its results, and
//! annotates the op. Structured control flow (`scf.if`, `scf.for`,
//! `scf.while`) recurses into its regions; loop-carried vectors are pinned at
//! region entry with `tpu.assume_layout` ops.
//!
//! The pass only annotates. Where a consumer's in-layout differs from the
//! producer's out-layout, a later relayout pass materialises the conversion.
//!
//! ## Main Types
//!
//! - [`InferVectorLayoutPass`]: Configured pass entry point
//! - [`InferReport`]: What the pass did
//! - [`InferError`]: Why the pass failed, and where
//!
//! ## See Also
//!
//! - `tessel-layout`: The layout descriptor and its algebra
//! - `tessel-ir`: The IR the pass runs on

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Fails the current rule with `InferErrorKind::Unsupported` unless `cond`.
macro_rules! check_op {
    ($self:expr, $op:expr, $cond:expr, $($msg:tt)+) => {
        if !($cond) {
            return Err($self.error(
                $op,
                $crate::error::InferErrorKind::Unsupported(format!($($msg)+)),
            ));
        }
    };
}

/// Fails the current rule with `InferErrorKind::Invariant` unless `cond`.
macro_rules! check_ir {
    ($self:expr, $op:expr, $cond:expr, $($msg:tt)+) => {
        if !($cond) {
            return Err($self.error(
                $op,
                $crate::error::InferErrorKind::Invariant(format!($($msg)+)),
            ));
        }
    };
}

/// Fails the current rule with a "not implemented" error.
macro_rules! nyi {
    ($self:expr, $op:expr, $($msg:tt)+) => {
        return Err($self.error($op, $crate::error::InferErrorKind::nyi(format!($($msg)+))))
    };
}

mod bridge;
pub mod divisibility;
pub mod error;
mod infer;
pub mod pass;
mod rules;
pub mod verify;

pub use divisibility::is_guaranteed_divisible;
pub use error::{InferError, InferErrorKind, InferResult};
pub use pass::{infer_vector_layout, InferReport, InferVectorLayoutPass};
pub use verify::{verify_annotations, AnnotationError};
