//! Rules for `vector` dialect ops and `tpu.matmul`.

use tessel_ir::{CombiningKind, ContractionAttrs, ExtractPosition, OpId, ScalarType, Type, ValueId};
use tessel_layout::{
    is_fully_replicated, ImplicitDim, Offset, Tiling, VectorLayout, NATIVE_BITWIDTH, REPLICATED,
    ZERO_OFFSETS,
};

use crate::error::InferResult;
use crate::infer::VectorLayoutInferer;

/// The last two entries of `shape`, or fewer if it is shorter.
fn tail2(shape: &[i64]) -> &[i64] {
    &shape[shape.len().saturating_sub(2)..]
}

/// `shape[shape.len() - k]`, if present.
fn from_end(shape: &[i64], k: usize) -> Option<i64> {
    shape.len().checked_sub(k).map(|i| shape[i])
}

impl VectorLayoutInferer<'_> {
    pub(crate) fn infer_broadcast(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let res_ty = self.ty(results[0]);
        let Some(res_vty) = res_ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector result"));
        };
        check_ir!(self, op, res_vty.rank() > 0, "rank 0 vectors unsupported");

        match self.ty(operands[0]) {
            Type::Scalar(scalar) => {
                check_op!(
                    self,
                    op,
                    scalar != ScalarType::Index,
                    "unsupported broadcast source type"
                );
                // Masks are tracked as 32-bit data.
                let bitwidth = match scalar.bitwidth() {
                    1 => NATIVE_BITWIDTH,
                    bw => bw,
                };
                let implicit_dim = if res_vty.rank() == 1 {
                    ImplicitDim::SecondMinor
                } else {
                    ImplicitDim::None
                };
                let layout = VectorLayout::new(
                    bitwidth,
                    REPLICATED,
                    self.native_tiling(bitwidth),
                    implicit_dim,
                );
                self.set_layout(op, None, Some(layout));
                Ok(())
            }
            Type::Vector(src_vty) => {
                check_op!(self, op, src_vty.rank() >= 2, "source rank below 2D unsupported");
                check_op!(self, op, res_vty.rank() >= 2, "result rank below 2D unsupported");
                let mut layout = self.vector_layout_of(op, operands[0])?;
                let src_shape = &src_vty.shape;
                let res_shape = &res_vty.shape;

                // Sublane broadcasts only exist in the default tiling.
                if from_end(src_shape, 2) != from_end(res_shape, 2) {
                    if layout.bitwidth() != NATIVE_BITWIDTH {
                        nyi!(self, op, "Only 32-bit broadcasts supported");
                    }
                    let mut offsets = layout.offsets();
                    if layout.tiling().sublane() == 1 {
                        offsets[0] = Offset::Replicated;
                    }
                    layout = layout
                        .with_offsets(offsets)
                        .with_tiling(self.default_tiling);
                }

                if layout.has_implicit_dim() {
                    let layout_2d = layout.with_implicit_dim(ImplicitDim::None);
                    if !layout_2d.equivalent_to(&layout, src_shape, self.target) {
                        return Err(self.unsupported(op, "Only 2D layouts supported"));
                    }
                    layout = layout_2d;
                }

                let mut offsets = layout.offsets();
                if layout.bitwidth() == NATIVE_BITWIDTH && layout.tiling() == self.default_tiling {
                    let (src_tail, res_tail) = (tail2(src_shape), tail2(res_shape));
                    for axis in 0..2 {
                        if src_tail[axis] != res_tail[axis] {
                            offsets[axis] = Offset::Replicated;
                        }
                    }
                }
                let out = layout
                    .with_offsets(offsets)
                    .with_implicit_dim(ImplicitDim::None);
                self.set_layout(op, Some(layout), Some(out));
                Ok(())
            }
            Type::MemRef(_) => Err(self.unsupported(op, "unsupported broadcast source type")),
        }
    }

    pub(crate) fn infer_contraction(&mut self, op: OpId, attrs: &ContractionAttrs) -> InferResult {
        check_op!(self, op, attrs.kind == CombiningKind::Add, "Only ADD supported");
        let matmul = ContractionAttrs::matmul(false);
        check_op!(
            self,
            op,
            attrs.iterator_types == matmul.iterator_types,
            "Not a matmul"
        );
        check_op!(
            self,
            op,
            attrs.indexing_maps == matmul.indexing_maps
                || attrs.indexing_maps == ContractionAttrs::matmul(true).indexing_maps,
            "Not a matmul"
        );
        self.infer_matmul(op)
    }

    /// The layout a matmul operand is consumed in, if it has no padding
    /// that would need masking.
    ///
    /// The lane dim must be a whole number of native lane tiles and the
    /// sublane dim a multiple of `major_multiple` (the native sublane tile
    /// when `None`).
    fn unpadded_layout(&self, value: ValueId, major_multiple: Option<i64>) -> Option<VectorLayout> {
        let layout = self.func.produced_layout(value).flatten()?;
        if layout.has_implicit_dim() {
            return None;
        }
        let vty = self.func.value_type(value).as_vector()?;
        let tiling = self.native_tiling(vty.bitwidth());
        let [major, minor] = tail2(&vty.shape) else {
            return None;
        };
        let [o0, o1] = layout.offsets();
        if o0.value_or(0) != 0
            || o1.value_or(0) != 0
            || major % major_multiple.unwrap_or(tiling.sublane()) != 0
            || minor % tiling.lane() != 0
        {
            return None;
        }
        Some(layout.with_tiling(tiling))
    }

    pub(crate) fn infer_matmul(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(self, op, operands.len() == 3, "expected lhs, rhs and acc operands");
        check_ir!(self, op, results.len() == 1, "expected one result");
        let res_ty = self.ty(results[0]);
        let Some(res_vty) = res_ty.as_vector() else {
            return Err(self.unsupported(op, "only vector results supported"));
        };
        check_op!(
            self,
            op,
            res_vty.bitwidth() == NATIVE_BITWIDTH,
            "only 32-bit matmul results supported"
        );

        // Unpacked operands place no constraint on their rows.
        let major_multiple = |value: ValueId| {
            self.func
                .value_type(value)
                .as_vector()
                .filter(|vty| vty.bitwidth() == NATIVE_BITWIDTH)
                .map(|_| 1)
        };
        let in_layouts = [
            self.unpadded_layout(operands[0], major_multiple(operands[0])),
            self.unpadded_layout(operands[1], major_multiple(operands[1])),
            self.unpadded_layout(operands[2], Some(1)),
        ];
        if in_layouts.iter().any(Option::is_none) {
            return Err(self.unsupported(op, "unsupported operand shapes or layouts"));
        }
        self.set_in_layout(op, in_layouts.to_vec());
        let out = VectorLayout::new(
            NATIVE_BITWIDTH,
            ZERO_OFFSETS,
            self.default_tiling,
            ImplicitDim::None,
        );
        self.set_out_layout(op, vec![Some(out)]);
        Ok(())
    }

    pub(crate) fn infer_extract(&mut self, op: OpId, position: &[ExtractPosition]) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_op!(
            self,
            op,
            operands.len() == 1
                && position
                    .iter()
                    .all(|p| matches!(p, ExtractPosition::Static(_))),
            "dynamic indices not supported"
        );
        let Some(src_vty) = self.func.value_type(operands[0]).as_vector() else {
            return Err(self.invariant(op, "expected a vector source"));
        };
        check_op!(
            self,
            op,
            src_vty.bitwidth() == NATIVE_BITWIDTH,
            "Only 32-bit types supported"
        );
        check_op!(
            self,
            op,
            results.len() == 1 && self.func.value_type(results[0]).is_scalar(),
            "only scalar extraction supported"
        );
        let layout = self.vector_layout_of(op, operands[0])?;
        let in_layout = VectorLayout::new(
            NATIVE_BITWIDTH,
            ZERO_OFFSETS,
            layout.tiling(),
            layout.implicit_dim(),
        );
        self.set_layout(op, Some(in_layout), None);
        Ok(())
    }

    pub(crate) fn infer_extract_strided_slice(
        &mut self,
        op: OpId,
        offsets: &[i64],
        strides: &[i64],
    ) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let layout = self.vector_layout_of(op, operands[0])?;
        check_op!(
            self,
            op,
            !layout.has_implicit_dim(),
            "only 2D layouts supported"
        );
        let res_ty = self.ty(results[0]);
        check_op!(
            self,
            op,
            res_ty.as_vector().is_some_and(|vty| vty.bitwidth() == NATIVE_BITWIDTH),
            "Only 32-bit types supported"
        );
        check_op!(
            self,
            op,
            tail2(offsets).iter().all(|&off| off == 0),
            "Only zero-offset slices supported."
        );
        check_op!(
            self,
            op,
            strides.iter().all(|&stride| stride == 1),
            "Only trivial strides supported."
        );
        self.set_layout(op, Some(layout), Some(layout));
        Ok(())
    }

    pub(crate) fn infer_multi_reduction(&mut self, op: OpId, dims: &[i64]) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 2 && results.len() == 1,
            "expected source and acc operands and one result"
        );
        let dst_ty = self.ty(results[0]);
        let Some(dst_vty) = dst_ty.as_vector() else {
            return Err(self.unsupported(op, "only reductions with vector results supported"));
        };
        let src_ty = self.ty(operands[0]);
        let Some(src_vty) = src_ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector source"));
        };
        let acc_layout = self.layout_of(op, operands[1])?;
        check_op!(
            self,
            op,
            is_fully_replicated(&acc_layout),
            "only constant accumulators supported"
        );
        check_op!(
            self,
            op,
            src_vty.bitwidth() == NATIVE_BITWIDTH,
            "only 32-bit reductions supported"
        );
        let mut src_layout = self.vector_layout_of(op, operands[0])?;

        let src_rank = i64::try_from(src_vty.rank()).unwrap_or(i64::MAX);
        let reduced = |dim: i64| dims.contains(&dim);
        let reduces = match src_layout.implicit_dim() {
            ImplicitDim::None => [reduced(src_rank - 2), reduced(src_rank - 1)],
            ImplicitDim::SecondMinor => [false, reduced(src_rank - 1)],
            ImplicitDim::Minor => [reduced(src_rank - 1), false],
        };
        if (reduces[0] || reduces[1]) && !src_layout.has_native_tiling(self.target) {
            src_layout = VectorLayout::new(
                NATIVE_BITWIDTH,
                src_layout.offsets(),
                self.default_tiling,
                src_layout.implicit_dim(),
            );
        }

        let mut out_offsets = src_layout.offsets();
        for (offset, &reduced) in out_offsets.iter_mut().zip(&reduces) {
            if reduced {
                *offset = Offset::Replicated;
            }
        }
        let out_implicit_dim = if (reduces[0] && reduces[1])
            || (src_layout.has_implicit_dim() && (reduces[0] || reduces[1]))
        {
            if dst_vty.shape.last() != Some(&1) {
                nyi!(
                    self,
                    op,
                    "reductions over both trailing dimensions are only supported when \
                     the resulting value has a trailing axis of size 1"
                );
            }
            ImplicitDim::SecondMinor
        } else if reduces[0] {
            ImplicitDim::SecondMinor
        } else if reduces[1] {
            ImplicitDim::Minor
        } else {
            src_layout.implicit_dim()
        };

        self.set_in_layout(op, vec![Some(src_layout), acc_layout]);
        let out = VectorLayout::new(
            src_layout.bitwidth(),
            out_offsets,
            src_layout.tiling(),
            out_implicit_dim,
        );
        self.set_out_layout(op, vec![Some(out)]);
        Ok(())
    }

    pub(crate) fn infer_shape_cast(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let (src_ty, res_ty) = (self.ty(operands[0]), self.ty(results[0]));
        let (Some(src_vty), Some(res_vty)) = (src_ty.as_vector(), res_ty.as_vector()) else {
            return Err(self.invariant(op, "expected vector operand and result"));
        };
        let layout = self.vector_layout_of(op, operands[0])?;
        let bitwidth = src_vty.bitwidth();
        match self.shape_cast_layouts(op, layout, bitwidth, &src_vty.shape, &res_vty.shape)? {
            Some((in_layout, out_layout)) => {
                self.set_layout(op, Some(in_layout), Some(out_layout));
                Ok(())
            }
            None => Err(self.unsupported(op, "unsupported shape cast")),
        }
    }

    /// Picks the in and out layouts of a shape cast, or `None` if the cast
    /// is not one of the supported forms.
    #[allow(clippy::too_many_lines)]
    fn shape_cast_layouts(
        &self,
        op: OpId,
        mut layout: VectorLayout,
        bitwidth: u32,
        src: &[i64],
        res: &[i64],
    ) -> InferResult<Option<(VectorLayout, VectorLayout)>> {
        let (sublanes, lanes) = (self.target.sublanes, self.target.lanes);
        let (src_rank, res_rank) = (src.len(), res.len());
        let last = |shape: &[i64]| from_end(shape, 1).unwrap_or(0);
        let second_last = |shape: &[i64]| from_end(shape, 2);

        if layout.has_implicit_dim() {
            // The last dim is unchanged.
            if res_rank >= 1 && last(src) == last(res) {
                return Ok(Some((layout, layout)));
            }
            check_op!(
                self,
                op,
                bitwidth == NATIVE_BITWIDTH,
                "only 32-bit shape casts supported"
            );
            // A singleton innermost dim is inserted.
            if res_rank == src_rank + 1 && Some(last(src)) == second_last(res) && last(res) == 1 {
                let out = if layout.implicit_dim() == ImplicitDim::Minor {
                    VectorLayout::new(
                        NATIVE_BITWIDTH,
                        layout.offsets(),
                        self.default_tiling,
                        ImplicitDim::None,
                    )
                } else {
                    VectorLayout::new(
                        NATIVE_BITWIDTH,
                        [Offset::ZERO, Offset::Replicated],
                        self.default_tiling,
                        ImplicitDim::None,
                    )
                };
                return Ok(Some((layout, out)));
            }
            return Ok(None);
        }

        // The last two dims are unchanged.
        if res_rank >= 2 && tail2(src) == tail2(res) {
            return Ok(Some((layout, layout)));
        }

        let tiling = layout.tiling();
        // Sublane (un)tiling.
        if res_rank >= 2
            && tiling.lane() == lanes
            && last(src) == last(res)
            && second_last(src).is_some_and(|d| d % tiling.sublane() == 0)
            && second_last(res).is_some_and(|d| d % tiling.sublane() == 0)
        {
            let layout = layout.with_offsets(ZERO_OFFSETS);
            return Ok(Some((layout, layout)));
        }

        // Lane (un)tiling.
        if tiling.lane() == lanes
            && last(src) != last(res)
            && last(src) % tiling.lane() == 0
            && last(res) % tiling.lane() == 0
        {
            if bitwidth != NATIVE_BITWIDTH {
                nyi!(self, op, "Shapecast along lane dimension when bitwidth is not 32");
            }
            let dense = |wide: &[i64], narrow: &[i64]| {
                last(narrow) == lanes
                    && second_last(narrow).is_some_and(|d| d % sublanes == 0)
                    && last(wide) % (sublanes * lanes) == 0
                    && second_last(wide).is_some_and(|d| d == 1 || d % sublanes == 0)
            };
            let row = VectorLayout::new(
                layout.bitwidth(),
                ZERO_OFFSETS,
                Tiling::new(1, lanes),
                ImplicitDim::None,
            );
            let native = VectorLayout::new(
                layout.bitwidth(),
                ZERO_OFFSETS,
                self.default_tiling,
                ImplicitDim::None,
            );
            // Densely packed rows reshape for free into and out of vregs.
            if dense(src, res) {
                return Ok(Some((row, native)));
            }
            if dense(res, src) {
                return Ok(Some((native, row)));
            }
            return Ok(None);
        }

        let native_tiling = self.native_tiling(bitwidth);
        if layout.tiling() != native_tiling {
            layout = layout.with_tiling(native_tiling);
        }
        check_ir!(self, op, src_rank >= 2, "expected 2D+ operand with 2D layout");
        let layout_shape = [src[src_rank - 2], src[src_rank - 1]];
        if res_rank >= 2 {
            // The sublane dim is squeezed out.
            if layout_shape[0] == 1 && res[..res_rank - 1] == src[..src_rank - 2] && last(res) == last(src) {
                let out = VectorLayout::new(
                    bitwidth,
                    layout.offsets(),
                    layout.tiling(),
                    ImplicitDim::SecondMinor,
                );
                return Ok(Some((layout, out)));
            }
            // A singleton lane dim is inserted; the old lanes become sublanes.
            if bitwidth == NATIVE_BITWIDTH && Some(last(src)) == second_last(res) && last(res) == 1 {
                let out = VectorLayout::new(
                    NATIVE_BITWIDTH,
                    [Offset::ZERO, Offset::Replicated],
                    self.default_tiling,
                    ImplicitDim::None,
                );
                return Ok(Some((layout, out)));
            }
        } else if res_rank == 1 {
            let all_one = src[..src_rank - 2].iter().all(|&d| d == 1);
            // Everything but the lanes is squeezed out.
            if layout_shape[0] == 1 && all_one && last(res) == layout_shape[1] {
                let out = VectorLayout::new(
                    bitwidth,
                    layout.offsets(),
                    layout.tiling(),
                    ImplicitDim::SecondMinor,
                );
                return Ok(Some((layout, out)));
            }
            // Everything but the sublanes is squeezed out.
            if layout_shape[1] == 1 && all_one && last(res) == layout_shape[0] {
                check_op!(
                    self,
                    op,
                    bitwidth == NATIVE_BITWIDTH,
                    "only 32-bit shape casts supported"
                );
                let out = VectorLayout::new(
                    NATIVE_BITWIDTH,
                    layout.offsets(),
                    layout.tiling(),
                    ImplicitDim::Minor,
                );
                return Ok(Some((layout, out)));
            }
        }
        Ok(None)
    }

    pub(crate) fn infer_transpose(&mut self, op: OpId, permutation: &[i64]) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let layout = self.vector_layout_of(op, operands[0])?;
        let src_ty = self.ty(operands[0]);
        let Some(src_vty) = src_ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector operand"));
        };
        let rank = src_vty.rank();
        check_ir!(
            self,
            op,
            permutation.len() == rank,
            "Transpose permutation has incorrect rank"
        );
        if layout.has_implicit_dim() || rank < 2 {
            return Err(self.unsupported(op, "Unsupported transpose"));
        }
        check_op!(
            self,
            op,
            layout.offsets() == ZERO_OFFSETS,
            "Padded transposes unsupported"
        );
        let lanes = self.target.lanes;
        for &dim in tail2(&src_vty.shape) {
            check_op!(self, op, dim % lanes == 0, "Padded transposes unsupported");
        }
        let minor_start = i64::try_from(rank - 2).unwrap_or(i64::MAX);
        for &dim in &permutation[..rank - 2] {
            check_op!(
                self,
                op,
                dim < minor_start,
                "Unsupported transpose permutation - minor dims into major"
            );
        }
        for &dim in &permutation[rank - 2..] {
            check_op!(
                self,
                op,
                dim >= minor_start,
                "Unsupported transpose permutation - major dims into minor"
            );
        }
        // Swapping the minor dims goes through the XLU, which needs native
        // tiling.
        let required = if permutation[rank - 1] == minor_start {
            layout.with_tiling(self.native_tiling(layout.bitwidth()))
        } else {
            layout
        };
        self.set_layout(op, Some(required), Some(required));
        Ok(())
    }
}
