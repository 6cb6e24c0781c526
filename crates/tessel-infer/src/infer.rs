//! The block driver.
//!
//! [`VectorLayoutInferer`] visits the ops of a block in order, dispatches each
//! one to its rule and hands the block terminator to a caller-supplied
//! predicate. Structured control-flow rules call back into
//! [`VectorLayoutInferer::infer_block`] for their regions, so the walk is a
//! plain recursion over the region tree.

use tessel_ir::print::op_to_string;
use tessel_ir::{BlockId, Function, OpId, OpKind, Type, ValueId};
use tessel_layout::{Layout, TargetShape, Tiling, VectorLayout};
use tracing::trace;

use crate::error::{InferError, InferErrorKind, InferResult};
use crate::pass::InferReport;

/// Mutable state of one run of the pass over one function.
pub(crate) struct VectorLayoutInferer<'f> {
    pub(crate) func: &'f mut Function,
    pub(crate) target: TargetShape,
    pub(crate) default_tiling: Tiling,
    pub(crate) report: InferReport,
}

impl<'f> VectorLayoutInferer<'f> {
    pub(crate) fn new(func: &'f mut Function, target: TargetShape) -> Self {
        Self {
            func,
            target,
            default_tiling: target.default_tiling(),
            report: InferReport::default(),
        }
    }

    pub(crate) fn into_report(self) -> InferReport {
        self.report
    }

    /// Builds an error attached to `op`.
    pub(crate) fn error(&self, op: OpId, kind: InferErrorKind) -> InferError {
        InferError {
            op: Some(op),
            op_name: self.func.op(op).name().to_string(),
            kind,
        }
    }

    pub(crate) fn unsupported(&self, op: OpId, msg: impl Into<String>) -> InferError {
        self.error(op, InferErrorKind::Unsupported(msg.into()))
    }

    pub(crate) fn invariant(&self, op: OpId, msg: impl Into<String>) -> InferError {
        self.error(op, InferErrorKind::Invariant(msg.into()))
    }

    /// Wraps the failure of a nested region of `op`.
    pub(crate) fn region_error(&self, op: OpId, context: &str, source: InferError) -> InferError {
        self.error(
            op,
            InferErrorKind::Region {
                context: context.to_string(),
                source: Box::new(source),
            },
        )
    }

    /// Infers every non-terminator op of `block`, then runs
    /// `match_terminator` on the terminator.
    pub(crate) fn infer_block(
        &mut self,
        block: BlockId,
        match_terminator: impl FnOnce(&mut Self, OpId) -> InferResult,
    ) -> InferResult {
        // Rules may insert ops at the start of nested blocks, never here.
        let ops = self.func.ops_without_terminator(block).to_vec();
        for op in ops {
            trace!(op = %op_to_string(self.func, op), "inferring layout");
            let operation = self.func.op(op);
            if operation.is_annotated() {
                if operation.kind.is_assume_layout() {
                    check_ir!(
                        self,
                        op,
                        operation.in_layout.is_some() && operation.out_layout.is_some(),
                        "expect layout attributes in tpu.assume_layout"
                    );
                    continue;
                }
                return Err(self.invariant(op, "layout attributes already attached"));
            }

            let has_vector_io = operation
                .operands
                .iter()
                .chain(operation.results.iter())
                .any(|&v| self.func.value_type(v).is_vector());
            if !has_vector_io && operation.regions.is_empty() {
                let num_operands = operation.operands.len();
                let num_results = operation.results.len();
                check_op!(self, op, num_results <= 1, "Multi-result ops not supported");
                self.func.set_in_layout(op, vec![None; num_operands]);
                if num_results == 1 {
                    self.func.set_out_layout(op, vec![None]);
                }
            } else {
                self.infer_op(op)?;
            }

            let operation = self.func.op(op);
            check_ir!(
                self,
                op,
                operation.operands.is_empty() || operation.in_layout.is_some(),
                "expected an in_layout attribute after inference"
            );
            check_ir!(
                self,
                op,
                operation.results.is_empty() || operation.out_layout.is_some(),
                "expected an out_layout attribute after inference"
            );
            let name = operation.name().to_string();
            self.report.record(name);
        }

        match self.func.terminator(block) {
            Some(terminator) => match_terminator(self, terminator),
            None => {
                let parent = self.func.region(self.func.block(block).parent).parent;
                Err(match parent {
                    Some(op) => self.invariant(op, "expected a terminator in every block"),
                    None => InferError {
                        op: None,
                        op_name: "func.func".to_string(),
                        kind: InferErrorKind::Invariant("expected a terminator in every block".into()),
                    },
                })
            }
        }
    }

    fn infer_op(&mut self, op: OpId) -> InferResult {
        let kind = self.func.op(op).kind.clone();
        match kind {
            OpKind::ExtF | OpKind::ExtSI => self.infer_ext(op),
            OpKind::TruncF | OpKind::TruncI => self.infer_trunc(op),
            OpKind::Select => self.infer_select(op),
            OpKind::ExtUI => self.infer_ext_ui(op),
            OpKind::CmpI(_) | OpKind::CmpF(_) => self.infer_cmp(op),
            OpKind::Constant(value) => self.infer_constant(op, &value),
            OpKind::Assert { .. } => self.infer_assert(op),
            OpKind::MemRefLoad => self.infer_memref_load(op),
            OpKind::If => self.infer_if(op),
            OpKind::For => self.infer_for(op),
            OpKind::While => self.infer_while(op),
            // A well-formed condition only appears as the terminator of a
            // while's before region, where `match_condition` handles it.
            OpKind::Condition => Err(self.invariant(
                op,
                "expected scf.condition to terminate the before region of scf.while",
            )),
            OpKind::Rotate { .. } => self.infer_rotate(op),
            OpKind::Concatenate { dimension } => self.infer_concatenate(op, dimension),
            OpKind::TileLoad => self.infer_tile_load(op),
            OpKind::TileStore => self.infer_tile_store(op),
            OpKind::StridedLoad { .. } => self.infer_strided_load(op),
            OpKind::StridedStore { .. } => self.infer_strided_store(op),
            OpKind::Matmul { .. } => self.infer_matmul(op),
            OpKind::EraseLayout => self.infer_erase_layout(op),
            OpKind::Iota { dimension } => self.infer_iota(op, dimension),
            OpKind::Gather { .. } | OpKind::Repeat { .. } => self.infer_same_as_source(op),
            OpKind::Bitcast => self.infer_bitcast(op),
            OpKind::Trace { .. } | OpKind::Region => self.infer_region_op(op),
            OpKind::Broadcast => self.infer_broadcast(op),
            OpKind::Contraction(attrs) => self.infer_contraction(op, &attrs),
            OpKind::Extract { position } => self.infer_extract(op, &position),
            OpKind::VectorLoad => self.infer_vector_load(op),
            OpKind::VectorStore => self.infer_vector_store(op),
            OpKind::MultiReduction { dims, .. } => self.infer_multi_reduction(op, &dims),
            OpKind::ShapeCast => self.infer_shape_cast(op),
            OpKind::Transpose { permutation } => self.infer_transpose(op, &permutation),
            OpKind::ExtractStridedSlice {
                offsets, strides, ..
            } => self.infer_extract_strided_slice(op, &offsets, &strides),
            kind if kind.is_elementwise_mappable() => self.infer_elementwise(op, true),
            _ => Err(self.error(
                op,
                InferErrorKind::Unsupported("unsupported in vector layout inference".into()),
            )),
        }
    }

    /// The layout with zero offsets and native tiling for `bitwidth`.
    pub(crate) fn native(&self, bitwidth: u32) -> VectorLayout {
        VectorLayout::native(bitwidth, self.target)
    }

    pub(crate) fn native_tiling(&self, bitwidth: u32) -> Tiling {
        self.target.native_tiling(bitwidth)
    }

    pub(crate) fn operands(&self, op: OpId) -> Vec<ValueId> {
        self.func.op(op).operands.to_vec()
    }

    pub(crate) fn results(&self, op: OpId) -> Vec<ValueId> {
        self.func.op(op).results.to_vec()
    }

    pub(crate) fn ty(&self, value: ValueId) -> Type {
        self.func.value_type(value).clone()
    }

    /// The layout `value` was produced with.
    pub(crate) fn layout_of(&self, op: OpId, value: ValueId) -> InferResult<Layout> {
        self.func
            .produced_layout(value)
            .ok_or_else(|| self.invariant(op, "missing vector layout"))
    }

    /// The layout of a vector `value`, which must be present.
    pub(crate) fn vector_layout_of(&self, op: OpId, value: ValueId) -> InferResult<VectorLayout> {
        self.layout_of(op, value)?
            .ok_or_else(|| self.invariant(op, "missing vector layout"))
    }

    pub(crate) fn set_in_layout(&mut self, op: OpId, layouts: Vec<Layout>) {
        self.func.set_in_layout(op, layouts);
    }

    pub(crate) fn set_out_layout(&mut self, op: OpId, layouts: Vec<Layout>) {
        self.func.set_out_layout(op, layouts);
    }

    /// Annotates a single-result op with `in_layout` for its first operand,
    /// no layout for the rest, and `out_layout` for its result.
    pub(crate) fn set_layout(&mut self, op: OpId, in_layout: Layout, out_layout: Layout) {
        let mut ins = vec![None; self.func.op(op).operands.len()];
        if let Some(first) = ins.first_mut() {
            *first = in_layout;
        }
        self.set_in_layout(op, ins);
        self.set_out_layout(op, vec![out_layout]);
    }

    /// Annotates a result-less op with `in_layout` for its first operand and
    /// no layout for the rest.
    pub(crate) fn set_first_in_layout(&mut self, op: OpId, in_layout: Layout) {
        let mut ins = vec![None; self.func.op(op).operands.len()];
        if let Some(first) = ins.first_mut() {
            *first = in_layout;
        }
        self.set_in_layout(op, ins);
    }
}
