//! Static divisibility proofs for index values.
//!
//! A dynamic index into a tiled memref may only be used if it is provably a
//! multiple of the tile size, in which case the access starts at offset 0
//! within a tile. The proof follows the producers of the index through a
//! small set of ops.

use tessel_ir::{ConstantValue, ElementwiseOp, Function, Literal, OpKind, ValueId};

/// Maximum depth of producer chains followed.
const FUEL: u32 = 8;

/// Returns true if `value` is known to be a multiple of `divisor`.
///
/// Understood producers are `tpu.assume_multiple`, `arith.muli` (either
/// factor), `arith.addi` (both terms), integer constants and
/// `arith.index_cast`. Everything else, including block arguments, is
/// unknown.
#[must_use]
pub fn is_guaranteed_divisible(func: &Function, value: ValueId, divisor: i64) -> bool {
    divisible(func, value, divisor, FUEL)
}

fn divisible(func: &Function, value: ValueId, divisor: i64, fuel: u32) -> bool {
    if divisor == 1 {
        return true;
    }
    if divisor <= 0 || fuel == 0 {
        return false;
    }
    let Some(op) = func.defining_op(value) else {
        return false;
    };
    let operation = func.op(op);
    let operand = |i: usize| operation.operands.get(i).copied();
    let check = |i: usize| operand(i).is_some_and(|v| divisible(func, v, divisor, fuel - 1));
    match &operation.kind {
        OpKind::AssumeMultiple { multiple } => multiple % divisor == 0,
        OpKind::Elementwise(ElementwiseOp::MulI) => check(1) || check(0),
        OpKind::Elementwise(ElementwiseOp::AddI) => check(0) && check(1),
        OpKind::Constant(ConstantValue::Scalar(Literal::Int(c))) => c % divisor == 0,
        OpKind::IndexCast => check(0),
        _ => false,
    }
}
