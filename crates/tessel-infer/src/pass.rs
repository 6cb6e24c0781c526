//! The configured pass entry point and its report.

use std::fmt;

use rustc_hash::FxHashMap;
use tessel_ir::Function;
use tessel_layout::TargetShape;
use tessel_session::Options;
use tracing::{info, instrument, warn};

use crate::error::{InferError, InferErrorKind};
use crate::infer::VectorLayoutInferer;
use crate::verify::verify_annotations;

/// Vector layout inference, configured for one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InferVectorLayoutPass {
    /// Vreg geometry of the target.
    pub target: TargetShape,
    /// Re-check the annotations once inference succeeds.
    pub verify: bool,
}

impl InferVectorLayoutPass {
    /// Creates a pass for a target with the given vreg geometry.
    ///
    /// The annotations are verified after inference.
    #[must_use]
    pub const fn new(lane_count: i64, sublane_count: i64) -> Self {
        Self {
            target: TargetShape::new(sublane_count, lane_count),
            verify: true,
        }
    }

    /// Creates a pass from session options.
    #[must_use]
    pub fn from_options(options: &Options) -> Self {
        Self {
            target: options.target,
            verify: options.verify,
        }
    }

    /// Annotates every op of `func` with `in_layout` / `out_layout`.
    ///
    /// On failure the function may be left partially annotated; callers
    /// are expected to discard it.
    ///
    /// # Errors
    ///
    /// Returns the first op for which no layout could be inferred, or the
    /// first broken annotation invariant if verification is enabled.
    #[instrument(skip(self, func), fields(func = %func.name, target = %self.target))]
    pub fn run(&self, func: &mut Function) -> Result<InferReport, InferError> {
        if !self.target.is_valid() {
            return Err(InferError {
                op: None,
                op_name: "func.func".to_string(),
                kind: InferErrorKind::Invariant(format!("invalid target shape {}", self.target)),
            });
        }
        info!(ops = func.num_ops(), "inferring vector layouts");

        let mut inferer = VectorLayoutInferer::new(func, self.target);
        if let Err(err) = inferer.infer_function() {
            warn!(error = %err, "vector layout inference failed");
            return Err(err);
        }
        let report = inferer.into_report();

        if self.verify {
            verify_annotations(func).map_err(|err| {
                warn!(error = %err, "annotations failed verification");
                InferError {
                    op: Some(err.op()),
                    op_name: err.op_name().to_string(),
                    kind: err.into(),
                }
            })?;
        }

        info!(
            annotated = report.annotated_ops,
            assumes = report.assume_inserted,
            "inferred vector layouts"
        );
        Ok(report)
    }
}

impl Default for InferVectorLayoutPass {
    fn default() -> Self {
        Self::from_options(&Options::default())
    }
}

/// Runs vector layout inference with verification for `target`.
///
/// # Errors
///
/// See [`InferVectorLayoutPass::run`].
pub fn infer_vector_layout(
    func: &mut Function,
    target: TargetShape,
) -> Result<InferReport, InferError> {
    InferVectorLayoutPass {
        target,
        verify: true,
    }
    .run(func)
}

/// What one run of the pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InferReport {
    /// Ops annotated by inference, excluding pre-existing assumes.
    pub annotated_ops: usize,
    /// `tpu.assume_layout` ops inserted at region entries.
    pub assume_inserted: usize,
    /// `tpu.assume_layout` ops found in place and kept.
    pub assume_reused: usize,
    /// Annotated ops, by qualified name.
    pub ops_by_name: FxHashMap<String, usize>,
}

impl InferReport {
    pub(crate) fn record(&mut self, name: String) {
        self.annotated_ops += 1;
        *self.ops_by_name.entry(name).or_default() += 1;
    }

    /// Number of annotated ops named `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.ops_by_name.get(name).copied().unwrap_or(0)
    }
}

impl fmt::Display for InferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Layout Inference Report")?;
        writeln!(f, "=======================")?;
        writeln!(f, "Annotated ops: {}", self.annotated_ops)?;
        writeln!(
            f,
            "Assumed layouts: {} inserted, {} reused",
            self.assume_inserted, self.assume_reused
        )?;

        let mut names: Vec<_> = self.ops_by_name.iter().collect();
        names.sort();
        for (name, count) in names {
            writeln!(f, "  {name}: {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{ElementwiseOp, FuncBuilder, Literal, ScalarType, Type};

    fn add_twice() -> Function {
        let vty = Type::vector(&[8, 128], ScalarType::F32);
        let mut func = Function::new("add_twice", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let x = b.splat(Literal::Float(1.0), &vty);
        let y = b.binary(ElementwiseOp::AddF, x, x);
        b.binary(ElementwiseOp::AddF, y, x);
        b.ret(&[]);
        func
    }

    #[test]
    fn test_report_counts_ops() {
        let mut func = add_twice();
        let report = InferVectorLayoutPass::new(128, 8).run(&mut func).unwrap();
        assert_eq!(report.annotated_ops, 3);
        assert_eq!(report.count("arith.addf"), 2);
        assert_eq!(report.count("arith.constant"), 1);
        assert_eq!(report.assume_inserted, 0);
    }

    #[test]
    fn test_report_display() {
        let mut func = add_twice();
        let report = infer_vector_layout(&mut func, TargetShape::new(8, 128)).unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Layout Inference Report\n"));
        assert!(text.contains("Annotated ops: 3"));
        assert!(text.contains("  arith.addf: 2\n  arith.constant: 1\n"));
    }

    #[test]
    fn test_invalid_target_is_rejected() {
        let mut func = add_twice();
        let err = InferVectorLayoutPass::new(0, 8).run(&mut func).unwrap_err();
        assert_eq!(err.op, None);
        assert!(matches!(err.kind, InferErrorKind::Invariant(_)));
        assert!(!func.op(func.block(func.entry_block()).ops[0]).is_annotated());
    }

    #[test]
    fn test_from_options() {
        let options = Options::parse("verify = false\n[target]\nsublanes = 16\nlanes = 256\n").unwrap();
        let pass = InferVectorLayoutPass::from_options(&options);
        assert_eq!(pass.target, TargetShape::new(16, 256));
        assert!(!pass.verify);
    }
}
