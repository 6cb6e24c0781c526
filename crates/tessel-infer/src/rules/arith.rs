//! Rules for `arith` ops and for elementwise ops of any dialect.

use tessel_ir::{ConstantValue, OpId, OpKind, Type, ValueId};
use tessel_layout::{
    ImplicitDim, Layout, VectorLayout, NATIVE_BITWIDTH, REPLICATED, ZERO_OFFSETS,
};

use crate::error::{InferErrorKind, InferResult};
use crate::infer::VectorLayoutInferer;

impl VectorLayoutInferer<'_> {
    pub(crate) fn infer_constant(&mut self, op: OpId, value: &ConstantValue) -> InferResult {
        let result = self.results(op)[0];
        match self.ty(result) {
            Type::Scalar(_) => {
                self.set_out_layout(op, vec![None]);
                Ok(())
            }
            Type::Vector(vty) => {
                check_ir!(self, op, vty.rank() > 0, "rank 0 vectors unsupported");
                check_ir!(
                    self,
                    op,
                    !matches!(value, ConstantValue::Scalar(_)),
                    "expected vector constants to use dense elements"
                );
                let bitwidth = vty.bitwidth();
                let layout = if value.is_splat() {
                    let implicit_dim = if vty.rank() == 1 {
                        ImplicitDim::SecondMinor
                    } else {
                        ImplicitDim::None
                    };
                    VectorLayout::new(
                        bitwidth,
                        REPLICATED,
                        self.native_tiling(bitwidth),
                        implicit_dim,
                    )
                } else {
                    check_op!(
                        self,
                        op,
                        bitwidth == NATIVE_BITWIDTH,
                        "Only 32-bit non-splat constants supported"
                    );
                    if vty.rank() == 1 {
                        if vty.shape[0] <= self.target.sublanes {
                            nyi!(self, op, "small 1D constants");
                        }
                        nyi!(self, op, "large 1D constants");
                    }
                    VectorLayout::new(
                        NATIVE_BITWIDTH,
                        ZERO_OFFSETS,
                        self.default_tiling,
                        ImplicitDim::None,
                    )
                };
                self.set_out_layout(op, vec![Some(layout)]);
                Ok(())
            }
            Type::MemRef(_) => Err(self.error(
                op,
                InferErrorKind::Unsupported("unsupported constant type".into()),
            )),
        }
    }

    pub(crate) fn infer_assert(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(
            self,
            op,
            operands.iter().all(|&v| self.func.value_type(v).is_scalar()),
            "expected a scalar condition"
        );
        self.set_in_layout(op, vec![None; operands.len()]);
        Ok(())
    }

    pub(crate) fn infer_memref_load(&mut self, op: OpId) -> InferResult {
        let results = self.results(op);
        check_op!(
            self,
            op,
            results.len() == 1 && self.func.value_type(results[0]).is_scalar(),
            "memref.load with non-scalar result"
        );
        let num_operands = self.func.op(op).operands.len();
        self.set_in_layout(op, vec![None; num_operands]);
        self.set_out_layout(op, vec![None]);
        Ok(())
    }

    pub(crate) fn infer_ext(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let (src_ty, dst_ty) = (self.ty(operands[0]), self.ty(results[0]));
        let Some(src_vty) = src_ty.as_vector() else {
            self.set_layout(op, None, None);
            return Ok(());
        };
        let Some(dst_vty) = dst_ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector result"));
        };
        if matches!(self.func.op(op).kind, OpKind::ExtF) {
            check_op!(
                self,
                op,
                src_vty.bitwidth() == 16 && dst_vty.bitwidth() == 32,
                "Only 16-bit to 32-bit extensions supported"
            );
        } else {
            check_op!(
                self,
                op,
                dst_vty.bitwidth() == 32,
                "Only extensions to 32-bit supported"
            );
        }

        let layout = self.vector_layout_of(op, operands[0])?;
        match layout.implicit_dim() {
            ImplicitDim::None => {
                let tiling = layout.tiling();
                let src_layout = if self.default_tiling.sublane() % tiling.sublane() == 0
                    && self.default_tiling.lane() == tiling.lane()
                {
                    layout
                } else {
                    layout.with_tiling(self.default_tiling)
                };
                let dst_layout = VectorLayout::new(
                    NATIVE_BITWIDTH,
                    layout.offsets(),
                    src_layout.tiling(),
                    ImplicitDim::None,
                );
                self.set_layout(op, Some(src_layout), Some(dst_layout));
                Ok(())
            }
            ImplicitDim::SecondMinor => {
                check_op!(
                    self,
                    op,
                    layout.tiling() == self.native_tiling(16),
                    "unsupported tiling"
                );
                let dst_layout = VectorLayout::new(
                    NATIVE_BITWIDTH,
                    layout.offsets(),
                    self.default_tiling,
                    ImplicitDim::SecondMinor,
                );
                self.set_layout(op, Some(layout), Some(dst_layout));
                Ok(())
            }
            ImplicitDim::Minor => Err(self.error(
                op,
                InferErrorKind::Unsupported("unsupported extension layout".into()),
            )),
        }
    }

    pub(crate) fn infer_trunc(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let (src_ty, dst_ty) = (self.ty(operands[0]), self.ty(results[0]));
        let (src_vty, dst_vty) = match (src_ty.as_vector(), dst_ty.as_vector()) {
            (None, None) => {
                self.set_layout(op, None, None);
                return Ok(());
            }
            (Some(src), Some(dst)) => (src, dst),
            _ => return Err(self.invariant(op, "expected both operand and result to be vectors")),
        };
        if matches!(self.func.op(op).kind, OpKind::TruncF) {
            check_op!(
                self,
                op,
                src_vty.bitwidth() == 32 && dst_vty.bitwidth() == 16,
                "Only 32-bit to 16-bit truncation supported"
            );
        } else {
            check_op!(
                self,
                op,
                src_vty.bitwidth() == 32,
                "Only 32-bit truncation supported"
            );
        }

        let layout = self.vector_layout_of(op, operands[0])?;
        if layout.implicit_dim() != ImplicitDim::None {
            nyi!(self, op, "Only 2D layouts supported");
        }
        let dst_bitwidth = dst_vty.bitwidth();
        let dst_tiling = if self.all_users_require_native_tiling(results[0]) {
            self.native_tiling(dst_bitwidth)
        } else {
            self.default_tiling
        };
        let src_layout = VectorLayout::new(
            NATIVE_BITWIDTH,
            layout.offsets(),
            self.default_tiling,
            ImplicitDim::None,
        );
        let dst_layout =
            VectorLayout::new(dst_bitwidth, layout.offsets(), dst_tiling, ImplicitDim::None);
        self.set_layout(op, Some(src_layout), Some(dst_layout));
        Ok(())
    }

    /// Returns true if every consumer of `value` wants narrow data in native
    /// tiling: matmuls, and transposes that swap the two minor dims.
    fn all_users_require_native_tiling(&self, value: ValueId) -> bool {
        self.func.uses(value).iter().all(|u| match &self.func.op(u.op).kind {
            OpKind::Contraction(_) | OpKind::Matmul { .. } => true,
            OpKind::Transpose { permutation } => {
                let rank = permutation.len();
                rank >= 2
                    && usize::try_from(permutation[rank - 2]).ok() == Some(rank - 1)
                    && usize::try_from(permutation[rank - 1]).ok() == Some(rank - 2)
            }
            _ => false,
        })
    }

    pub(crate) fn infer_select(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(self, op, operands.len() == 3, "expected three operands");
        let true_ty = self.ty(operands[1]);
        let false_ty = self.ty(operands[2]);
        check_op!(
            self,
            op,
            true_ty.is_vector() == false_ty.is_vector(),
            "Only one side of arith is a vector?"
        );
        if let (Some(t), Some(f)) = (true_ty.as_vector(), false_ty.as_vector()) {
            check_op!(
                self,
                op,
                t.bitwidth() == NATIVE_BITWIDTH && f.bitwidth() == NATIVE_BITWIDTH,
                "Only 32-bit select supported"
            );
        }
        self.infer_elementwise(op, false)
    }

    pub(crate) fn infer_ext_ui(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let (src_ty, dst_ty) = (self.ty(operands[0]), self.ty(results[0]));
        check_op!(
            self,
            op,
            src_ty.is_vector() == dst_ty.is_vector(),
            "Input and output are not both vectors?"
        );
        if let (Some(src), Some(dst)) = (src_ty.as_vector(), dst_ty.as_vector()) {
            check_op!(
                self,
                op,
                src.bitwidth() == 1 && dst.bitwidth() == 32,
                "Only 1 bit -> 32 bit extension supported"
            );
        }
        self.infer_elementwise(op, false)
    }

    pub(crate) fn infer_cmp(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(self, op, operands.len() == 2, "expected two operands");
        let lhs_ty = self.ty(operands[0]);
        let rhs_ty = self.ty(operands[1]);
        check_op!(
            self,
            op,
            lhs_ty.is_vector() == rhs_ty.is_vector(),
            "Only one side of cmp is a vector?"
        );
        if let (Some(lhs), Some(rhs)) = (lhs_ty.as_vector(), rhs_ty.as_vector()) {
            check_op!(
                self,
                op,
                lhs.bitwidth() == NATIVE_BITWIDTH && rhs.bitwidth() == NATIVE_BITWIDTH,
                "Only 32-bit cmp supported"
            );
        }
        self.infer_elementwise(op, false)
    }

    /// The generic rule for ops that apply independently to every element.
    ///
    /// Operands that are fully replicated do not constrain the result. The
    /// first constraining operand picks the layout and later ones are joined
    /// into it; an operand that cannot be joined is left unconstrained and
    /// will be relaid out to the result layout. When every operand is
    /// replicated the result takes the layout of the last one, which for
    /// `arith.select` is a value operand rather than the mask.
    pub(crate) fn infer_elementwise(&mut self, op: OpId, check_bitwidth: bool) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_op!(self, op, results.len() <= 1, "only one result supported");
        check_op!(
            self,
            op,
            !operands.is_empty(),
            "elementwise ops with no operands unsupported"
        );

        let mut candidate: Option<VectorLayout> = None;
        let mut out_layout: Option<VectorLayout> = None;
        // `None` marks an operand that takes whatever the result ends up with.
        let mut in_layouts: Vec<Option<Layout>> = Vec::with_capacity(operands.len());
        let mut bitwidth: Option<u32> = None;
        for &operand in &operands {
            match self.ty(operand) {
                Type::Vector(vty) => {
                    let operand_bitwidth = *bitwidth.get_or_insert(vty.bitwidth());
                    check_op!(
                        self,
                        op,
                        !check_bitwidth || operand_bitwidth == vty.bitwidth(),
                        "Generic elementwise rule only supports operands of same width"
                    );
                    let layout = self.vector_layout_of(op, operand)?;
                    if layout.is_fully_replicated() {
                        candidate = Some(layout);
                        in_layouts.push(None);
                        continue;
                    }
                    match out_layout {
                        None => {
                            out_layout = Some(layout);
                            in_layouts.push(Some(Some(layout)));
                        }
                        Some(current) => {
                            if let Some(joined) = tessel_layout::algebra::join(&layout, &current, &vty.shape)
                            {
                                out_layout = Some(joined);
                                in_layouts.push(Some(Some(layout)));
                            } else {
                                // The conflicting operand is never guaranteed
                                // to become replicated.
                                out_layout = Some(current.without_replication());
                                in_layouts.push(None);
                            }
                        }
                    }
                }
                Type::Scalar(_) => in_layouts.push(Some(None)),
                Type::MemRef(_) => {
                    return Err(self.error(
                        op,
                        InferErrorKind::Unsupported(
                            "expected only vector and scalar operands".into(),
                        ),
                    ))
                }
            }
        }

        let mut final_out: Layout = None;
        if let Some(&result) = results.first() {
            match self.ty(result) {
                Type::Vector(out_vty) => {
                    check_op!(
                        self,
                        op,
                        !check_bitwidth || bitwidth == Some(out_vty.bitwidth()),
                        "Generic elementwise rule can't change element type width"
                    );
                    final_out = out_layout.or(candidate);
                    check_op!(self, op, final_out.is_some(), "Cannot infer output layout");
                }
                Type::Scalar(_) => {}
                Type::MemRef(_) => {
                    return Err(self.invariant(op, "expected a vector or scalar result"));
                }
            }
        }

        let ins = in_layouts
            .into_iter()
            .map(|layout| layout.unwrap_or(final_out))
            .collect();
        self.set_in_layout(op, ins);
        if !results.is_empty() {
            self.set_out_layout(op, vec![final_out]);
        }
        Ok(())
    }
}
