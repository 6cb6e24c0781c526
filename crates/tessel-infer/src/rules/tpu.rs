//! Rules for `tpu` dialect ops that compute on vectors.

use tessel_ir::{OpId, OpKind, ScalarType};
use tessel_layout::{ImplicitDim, Offset, VectorLayout, NATIVE_BITWIDTH, ZERO_OFFSETS};

use crate::error::InferResult;
use crate::infer::VectorLayoutInferer;

impl VectorLayoutInferer<'_> {
    pub(crate) fn infer_rotate(&mut self, op: OpId) -> InferResult {
        let results = self.results(op);
        check_ir!(self, op, results.len() == 1, "expected one result");
        let ty = self.ty(results[0]);
        let Some(vty) = ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector result"));
        };
        if vty.bitwidth() != NATIVE_BITWIDTH {
            nyi!(self, op, "Rotate with non-32-bit data");
        }
        if vty.rank() < 2 {
            nyi!(self, op, "Unsupported 1D shape");
        }
        let layout = self.native(NATIVE_BITWIDTH);
        self.set_layout(op, Some(layout), Some(layout));
        Ok(())
    }

    pub(crate) fn infer_concatenate(&mut self, op: OpId, dimension: i64) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_op!(
            self,
            op,
            !operands.is_empty(),
            "Need at least one vector to concatenate"
        );
        check_ir!(self, op, results.len() == 1, "expected one result");
        let ty = self.ty(results[0]);
        let Some(vty) = ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector result"));
        };
        let rank = i64::try_from(vty.rank()).unwrap_or(i64::MAX);
        check_op!(
            self,
            op,
            (0..rank).contains(&dimension),
            "Expect a valid concatenate dimension"
        );
        if rank == 1 {
            nyi!(self, op, "Support concatenation with 1D vectors");
        }
        if vty.bitwidth() != NATIVE_BITWIDTH {
            nyi!(self, op, "Support concatenation with non 32-bit data");
        }
        // Concatenating tiled dims needs aligned tiles; major dims keep
        // whatever the first source has.
        let layout = if dimension >= rank - 2 {
            self.native(NATIVE_BITWIDTH)
        } else {
            self.vector_layout_of(op, operands[0])?
        };
        self.set_in_layout(op, vec![Some(layout); operands.len()]);
        self.set_out_layout(op, vec![Some(layout)]);
        Ok(())
    }

    pub(crate) fn infer_iota(&mut self, op: OpId, dimension: Option<i64>) -> InferResult {
        let results = self.results(op);
        check_ir!(self, op, results.len() == 1, "expected one result");
        let ty = self.ty(results[0]);
        let Some(vty) = ty.as_vector() else {
            return Err(self.invariant(op, "expected a vector result"));
        };
        check_op!(
            self,
            op,
            vty.element == ScalarType::I32,
            "Only 32-bit integer iota supported"
        );
        check_op!(self, op, vty.rank() >= 2, "iota rank below 2D unsupported");
        let rank = i64::try_from(vty.rank()).unwrap_or(i64::MAX);
        // Values only vary along the iota dimension.
        let mut offsets = ZERO_OFFSETS;
        if dimension == Some(rank - 1) {
            offsets[0] = Offset::Replicated;
        }
        if dimension == Some(rank - 2) {
            offsets[1] = Offset::Replicated;
        }
        let layout = VectorLayout::new(
            NATIVE_BITWIDTH,
            offsets,
            self.default_tiling,
            ImplicitDim::None,
        );
        self.set_in_layout(op, vec![None; self.func.op(op).operands.len()]);
        self.set_out_layout(op, vec![Some(layout)]);
        Ok(())
    }

    /// `tpu.gather` and `tpu.repeat` produce their source layout.
    pub(crate) fn infer_same_as_source(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(self, op, operands.len() == 1, "expected one operand");
        let layout = self.vector_layout_of(op, operands[0])?;
        self.set_layout(op, Some(layout), Some(layout));
        Ok(())
    }

    pub(crate) fn infer_bitcast(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            operands.len() == 1 && results.len() == 1,
            "expected one operand and one result"
        );
        let layout = self.vector_layout_of(op, operands[0])?;
        let offsets = layout.offsets();
        if offsets.iter().any(|offset| offset.value_or(0) != 0) {
            nyi!(self, op, "unsupported bitcast with offsets");
        }
        if layout.has_implicit_dim() {
            nyi!(self, op, "unsupported bitcast with an implicit dim");
        }
        let (in_ty, out_ty) = (self.ty(operands[0]), self.ty(results[0]));
        let (Some(in_vty), Some(out_vty)) = (in_ty.as_vector(), out_ty.as_vector()) else {
            return Err(self.unsupported(op, "Input and output have different rank"));
        };
        check_op!(
            self,
            op,
            in_vty.rank() == out_vty.rank(),
            "Input and output have different rank"
        );
        let rank = in_vty.rank();
        if rank < 2 {
            nyi!(self, op, "Support bitcast with 1D vector");
        }
        let (in_bitwidth, out_bitwidth) = (in_vty.bitwidth(), out_vty.bitwidth());
        for (i, (&in_dim, &out_dim)) in in_vty.shape.iter().zip(&out_vty.shape).enumerate() {
            // Packing changes the number of rows, not the bits per row.
            let (in_dim, out_dim) = if i == rank - 2 {
                (in_dim * i64::from(in_bitwidth), out_dim * i64::from(out_bitwidth))
            } else {
                (in_dim, out_dim)
            };
            check_op!(
                self,
                op,
                in_dim == out_dim,
                "Input and output have incompatible shape"
            );
        }
        let in_layout = VectorLayout::new(
            in_bitwidth,
            offsets,
            self.native_tiling(in_bitwidth),
            ImplicitDim::None,
        );
        let out_layout = VectorLayout::new(
            out_bitwidth,
            offsets,
            self.native_tiling(out_bitwidth),
            ImplicitDim::None,
        );
        self.set_layout(op, Some(in_layout), Some(out_layout));
        Ok(())
    }

    /// `tpu.trace` and `tpu.region` only scope their body.
    pub(crate) fn infer_region_op(&mut self, op: OpId) -> InferResult {
        let operation = self.func.op(op);
        check_op!(self, op, operation.operands.is_empty(), "expected no operands");
        check_op!(self, op, operation.results.is_empty(), "results unsupported");
        let body = operation
            .regions
            .first()
            .and_then(|&region| self.func.region_entry(region))
            .ok_or_else(|| self.invariant(op, "expected a body block"))?;
        self.infer_block(body, Self::match_tpu_yield)
    }

    fn match_tpu_yield(&mut self, op: OpId) -> InferResult {
        check_op!(
            self,
            op,
            matches!(self.func.op(op).kind, OpKind::TpuYield),
            "expected yield terminator"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tessel_ir::{FuncBuilder, Function, Literal, OpKind, ScalarType, Type};
    use tessel_layout::{Offset, TargetShape, Tiling, VectorLayout};

    use crate::infer::VectorLayoutInferer;

    const TARGET: TargetShape = TargetShape::new(8, 128);

    #[test]
    fn test_iota_replicates_the_constant_axis() {
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let lanes = b.op1(
            OpKind::Iota { dimension: Some(1) },
            &[],
            Type::vector(&[8, 128], ScalarType::I32),
        );
        let rows = b.op1(
            OpKind::Iota { dimension: Some(0) },
            &[],
            Type::vector(&[8, 128], ScalarType::I32),
        );
        let (lanes_op, rows_op) = (
            func.defining_op(lanes).unwrap(),
            func.defining_op(rows).unwrap(),
        );
        let mut inferer = VectorLayoutInferer::new(&mut func, TARGET);
        inferer.infer_iota(lanes_op, Some(1)).unwrap();
        inferer.infer_iota(rows_op, Some(0)).unwrap();

        let out = |op| func.op(op).out_layout.as_ref().unwrap()[0].unwrap();
        assert_eq!(out(lanes_op).offsets(), [Offset::Replicated, Offset::ZERO]);
        assert_eq!(out(rows_op).offsets(), [Offset::ZERO, Offset::Replicated]);
    }

    #[test]
    fn test_bitcast_retiles_both_sides() {
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let src = b.splat(Literal::Int(0), &Type::vector(&[16, 128], ScalarType::I16));
        let cast = b.op1(OpKind::Bitcast, &[src], Type::vector(&[8, 128], ScalarType::I32));
        let src_op = func.defining_op(src).unwrap();
        func.set_out_layout(src_op, vec![Some(VectorLayout::native(16, TARGET))]);
        let op = func.defining_op(cast).unwrap();

        let mut inferer = VectorLayoutInferer::new(&mut func, TARGET);
        inferer.infer_bitcast(op).unwrap();
        let operation = func.op(op);
        let input = operation.in_layout.as_ref().unwrap()[0].unwrap();
        let output = operation.out_layout.as_ref().unwrap()[0].unwrap();
        assert_eq!(input.tiling(), Tiling::new(16, 128));
        assert_eq!(output.tiling(), Tiling::new(8, 128));
        assert_eq!(output.bitwidth(), 32);
    }

    #[test]
    fn test_bitcast_rejects_mismatched_rows() {
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let src = b.splat(Literal::Int(0), &Type::vector(&[8, 128], ScalarType::I16));
        let cast = b.op1(OpKind::Bitcast, &[src], Type::vector(&[8, 128], ScalarType::I32));
        let src_op = func.defining_op(src).unwrap();
        func.set_out_layout(src_op, vec![Some(VectorLayout::native(16, TARGET))]);
        let op = func.defining_op(cast).unwrap();

        let mut inferer = VectorLayoutInferer::new(&mut func, TARGET);
        let err = inferer.infer_bitcast(op).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'tpu.bitcast' op Input and output have incompatible shape"
        );
    }

    #[test]
    fn test_concatenate_on_major_dim_keeps_first_layout() {
        let vty = Type::vector(&[2, 8, 128], ScalarType::F32);
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let x = b.splat(Literal::Float(0.0), &vty);
        let y = b.splat(Literal::Float(1.0), &vty);
        let cat = b.op1(
            OpKind::Concatenate { dimension: 0 },
            &[x, y],
            Type::vector(&[4, 8, 128], ScalarType::F32),
        );
        let row = VectorLayout::native(32, TARGET).with_tiling(Tiling::new(1, 128));
        for v in [x, y] {
            let producer = func.defining_op(v).unwrap();
            func.set_out_layout(producer, vec![Some(row)]);
        }
        let op = func.defining_op(cat).unwrap();

        let mut inferer = VectorLayoutInferer::new(&mut func, TARGET);
        inferer.infer_concatenate(op, 0).unwrap();
        assert_eq!(func.op(op).in_layout, Some(vec![Some(row), Some(row)]));
        assert_eq!(func.op(op).out_layout, Some(vec![Some(row)]));
    }
}
