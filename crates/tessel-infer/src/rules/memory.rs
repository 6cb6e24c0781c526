//! Rules for loads and stores.
//!
//! `vector.load` and `vector.store` derive their layout from the memref
//! tiling: the vreg tile is the first-level memory tile, and the offsets are
//! where the accessed window starts within a tile. The `tpu` memory ops
//! always use the native 32-bit layout.

use smallvec::SmallVec;
use tessel_ir::{OpId, OpKind, Type, ValueId, VectorType};
use tessel_layout::{
    verify_memory_tiling, ImplicitDim, Offset, Tile, Tiling, VectorLayout, NATIVE_BITWIDTH,
};

use crate::divisibility::is_guaranteed_divisible;
use crate::error::{InferErrorKind, InferResult};
use crate::infer::VectorLayoutInferer;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Load,
    Store,
}

impl Access {
    fn expected_1d(self) -> &'static str {
        match self {
            Self::Load => "Expected 1D tiling in 1D loads",
            Self::Store => "Expected 1D tiling in 1D store",
        }
    }

    fn unsupported_1d(self) -> &'static str {
        match self {
            Self::Load => "Unsupported tiling for 1D load",
            Self::Store => "Unsupported 1D tiling for 1D store",
        }
    }

    fn expected_2d(self) -> &'static str {
        match self {
            Self::Load => "Expected 2D tiling in 2D+ loads",
            Self::Store => "Expected 2D tiling in 2D+ store",
        }
    }

    fn unsupported_2d(self) -> &'static str {
        match self {
            Self::Load => "Unsupported tiling for 2d load",
            Self::Store => "Unsupported tiling for 2d store",
        }
    }
}

impl VectorLayoutInferer<'_> {
    /// The tiling of the memref `base`, seen through `tpu.erase_memref_layout`.
    fn memref_tiles(&self, op: OpId, base: ValueId) -> InferResult<(Vec<Tile>, usize, u32)> {
        let source = match self.func.defining_op(base) {
            Some(producer) if matches!(self.func.op(producer).kind, OpKind::EraseLayout) => {
                self.func.op(producer).operands[0]
            }
            _ => base,
        };
        let Type::MemRef(mty) = self.func.value_type(source) else {
            return Err(self.invariant(op, "expected a memref operand"));
        };
        Ok((mty.tiles.clone(), mty.rank(), mty.element.bitwidth()))
    }

    fn vector_type(&self, op: OpId, value: ValueId) -> InferResult<VectorType> {
        self.func
            .value_type(value)
            .as_vector()
            .cloned()
            .ok_or_else(|| self.invariant(op, "expected a vector"))
    }

    /// Offset of the accessed window within a memory tile, per tiled dim.
    fn tile_offsets(
        &self,
        op: OpId,
        indices: &[ValueId],
        tiling: &[i64],
    ) -> InferResult<SmallVec<[i64; 2]>> {
        let rank = indices.len();
        let mut offsets = SmallVec::new();
        for (i, &tile) in tiling.iter().enumerate() {
            check_ir!(self, op, tile > 0, "invalid memref tile {tile}");
            let dim = rank - tiling.len() + i;
            let index = indices[dim];
            let literal = self
                .func
                .defining_op(index)
                .and_then(|producer| match &self.func.op(producer).kind {
                    OpKind::Constant(value) => value.as_int(),
                    _ => None,
                });
            if let Some(value) = literal {
                check_ir!(self, op, value >= 0, "negative index {value} in dimension {dim}");
                offsets.push(value % tile);
            } else if is_guaranteed_divisible(self.func, index, tile) {
                offsets.push(0);
            } else {
                return Err(self.error(op, InferErrorKind::NotDivisible { dim, tiling: tile }));
            }
        }
        Ok(offsets)
    }

    /// The layout of the vector moved by a `vector.load` or `vector.store`.
    fn memory_layout(
        &self,
        op: OpId,
        base: ValueId,
        vty: &VectorType,
        indices: &[ValueId],
        access: Access,
    ) -> InferResult<VectorLayout> {
        let (tiles, memref_rank, memref_bitwidth) = self.memref_tiles(op, base)?;
        let rank = vty.rank();
        check_ir!(
            self,
            op,
            memref_rank == rank,
            "memref and vector rank mismatch"
        );
        check_ir!(self, op, rank > 0, "rank 0 vectors unsupported");
        check_ir!(
            self,
            op,
            indices.len() == rank,
            "expected one index per memref dimension"
        );
        let tiling = verify_memory_tiling(&tiles, memref_rank, memref_bitwidth, self.target)
            .map_err(|e| self.error(op, e.into()))?
            .to_vec();
        let bitwidth = vty.bitwidth();
        let lanes = self.target.lanes;

        if rank == 1 {
            check_op!(
                self,
                op,
                tiling.len() == 1,
                "{}",
                access.expected_1d()
            );
            let tile = tiling[0];
            check_op!(
                self,
                op,
                tile % lanes == 0,
                "{}",
                access.unsupported_1d()
            );
            let offsets = self.tile_offsets(op, indices, &tiling)?;
            return Ok(VectorLayout::new(
                bitwidth,
                [Offset::ZERO, Offset::Fixed(offsets[0])],
                Tiling::new(1, tile),
                ImplicitDim::SecondMinor,
            ));
        }

        check_op!(
            self,
            op,
            tiling.len() == 2,
            "{}",
            access.expected_2d()
        );
        check_op!(
            self,
            op,
            tiling[1] == lanes,
            "{}",
            access.unsupported_2d()
        );
        let offsets = self.tile_offsets(op, indices, &tiling)?;
        let memref_lanes = self.memref_shape_tail(base);
        let num_sublanes = vty.shape[rank - 2];
        let is_native_32 = bitwidth == NATIVE_BITWIDTH;
        let layout_tiling = Tiling::new(tiling[0], tiling[1]);

        // A single row, or data no wider than a vreg, starts at sublane 0.
        let sublane_offset = if is_native_32 && (memref_lanes <= lanes || num_sublanes == 1) {
            0
        } else {
            offsets[0]
        };
        let lane_offset = Offset::Fixed(offsets[1]);
        let layout = if num_sublanes == 1 && is_native_32 && vty.shape[rank - 1] > lanes {
            VectorLayout::new(
                bitwidth,
                [Offset::Fixed(sublane_offset), lane_offset],
                Tiling::new(1, tiling[1]),
                ImplicitDim::None,
            )
        } else if access == Access::Load
            && num_sublanes == 1
            && is_native_32
            && layout_tiling == self.default_tiling
        {
            // A single row can be loaded replicated across sublanes.
            VectorLayout::new(
                bitwidth,
                [Offset::Replicated, lane_offset],
                layout_tiling,
                ImplicitDim::None,
            )
        } else {
            VectorLayout::new(
                bitwidth,
                [Offset::Fixed(sublane_offset), lane_offset],
                layout_tiling,
                ImplicitDim::None,
            )
        };
        Ok(layout)
    }

    /// The trailing dimension of the memref `base`.
    fn memref_shape_tail(&self, base: ValueId) -> i64 {
        self.func
            .value_type(base)
            .as_memref()
            .and_then(|mty| mty.shape.last().copied())
            .unwrap_or(0)
    }

    pub(crate) fn infer_vector_load(&mut self, op: OpId) -> InferResult {
        let (operands, results) = (self.operands(op), self.results(op));
        check_ir!(
            self,
            op,
            !operands.is_empty() && results.len() == 1,
            "expected a base operand and one result"
        );
        let vty = self.vector_type(op, results[0])?;
        let layout = self.memory_layout(op, operands[0], &vty, &operands[1..], Access::Load)?;
        self.set_in_layout(op, vec![None; operands.len()]);
        self.set_out_layout(op, vec![Some(layout)]);
        Ok(())
    }

    pub(crate) fn infer_vector_store(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(
            self,
            op,
            operands.len() >= 2,
            "expected a value and a base operand"
        );
        let vty = self.vector_type(op, operands[0])?;
        let layout = self.memory_layout(op, operands[1], &vty, &operands[2..], Access::Store)?;
        self.set_first_in_layout(op, Some(layout));
        Ok(())
    }

    pub(crate) fn infer_tile_load(&mut self, op: OpId) -> InferResult {
        let results = self.results(op);
        check_ir!(self, op, results.len() == 1, "expected one result");
        let vty = self.vector_type(op, results[0])?;
        check_op!(
            self,
            op,
            vty.bitwidth() == NATIVE_BITWIDTH
                && vty.shape.as_slice() == [self.target.sublanes, self.target.lanes],
            "Only 32-bit loads supported"
        );
        let num_operands = self.func.op(op).operands.len();
        self.set_in_layout(op, vec![None; num_operands]);
        self.set_out_layout(op, vec![Some(self.native(NATIVE_BITWIDTH))]);
        Ok(())
    }

    pub(crate) fn infer_tile_store(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(self, op, !operands.is_empty(), "expected a value operand");
        let vty = self.vector_type(op, operands[0])?;
        check_op!(
            self,
            op,
            vty.bitwidth() == NATIVE_BITWIDTH
                && vty.shape.as_slice() == [self.target.sublanes, self.target.lanes],
            "Only 32-bit stores supported"
        );
        self.set_first_in_layout(op, Some(self.native(NATIVE_BITWIDTH)));
        Ok(())
    }

    pub(crate) fn infer_strided_load(&mut self, op: OpId) -> InferResult {
        let results = self.results(op);
        check_ir!(self, op, results.len() == 1, "expected one result");
        let vty = self.vector_type(op, results[0])?;
        if vty.bitwidth() != NATIVE_BITWIDTH {
            nyi!(self, op, "Strided load with non 32-bit data");
        }
        if vty.rank() < 2 {
            nyi!(self, op, "Strided load with 1D vector");
        }
        let num_operands = self.func.op(op).operands.len();
        self.set_in_layout(op, vec![None; num_operands]);
        self.set_out_layout(op, vec![Some(self.native(NATIVE_BITWIDTH))]);
        Ok(())
    }

    pub(crate) fn infer_strided_store(&mut self, op: OpId) -> InferResult {
        let operands = self.operands(op);
        check_ir!(self, op, !operands.is_empty(), "expected a value operand");
        let vty = self.vector_type(op, operands[0])?;
        if vty.bitwidth() != NATIVE_BITWIDTH {
            nyi!(self, op, "Strided store with non 32-bit data");
        }
        if vty.rank() < 2 {
            nyi!(self, op, "Strided store with 1D vector");
        }
        self.set_first_in_layout(op, Some(self.native(NATIVE_BITWIDTH)));
        Ok(())
    }

    pub(crate) fn infer_erase_layout(&mut self, op: OpId) -> InferResult {
        self.set_layout(op, None, None);
        Ok(())
    }
}
