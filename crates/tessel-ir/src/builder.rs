//! Function construction.
//!
//! [`FuncBuilder`] appends operations to one block at a time. Structured
//! control flow is built with closures that receive a builder positioned in
//! the nested block:
//!
//! ```
//! use tessel_ir::{FuncBuilder, Function, Literal, ScalarType, Type};
//!
//! let vty = Type::vector(&[8, 128], ScalarType::F32);
//! let mut func = Function::new("f", &[]);
//! let mut b = FuncBuilder::new(&mut func);
//! let zero = b.index_const(0);
//! let one = b.index_const(1);
//! let four = b.index_const(4);
//! let init = b.splat(Literal::Float(1.0), &vty);
//! b.build_for(zero, four, one, &[init], |b, _iv, iters| vec![iters[0]]);
//! b.ret(&[]);
//! ```

use crate::{
    BlockId, ConstantValue, ElementwiseOp, Function, Literal, OpId, OpKind, ScalarType, Type,
    ValueId,
};

/// Appends operations to a block of a [`Function`].
pub struct FuncBuilder<'f> {
    func: &'f mut Function,
    block: BlockId,
}

impl<'f> FuncBuilder<'f> {
    /// Creates a builder positioned at the end of the function's entry block.
    pub fn new(func: &'f mut Function) -> Self {
        let block = func.entry_block();
        Self { func, block }
    }

    /// Creates a builder positioned at the end of `block`.
    pub fn at_block(func: &'f mut Function, block: BlockId) -> Self {
        Self { func, block }
    }

    /// The block ops are appended to.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// The function being built.
    pub fn func(&mut self) -> &mut Function {
        self.func
    }

    /// Returns the type of `value`.
    #[must_use]
    pub fn type_of(&self, value: ValueId) -> Type {
        self.func.value_type(value).clone()
    }

    /// Appends an op without regions.
    pub fn push(&mut self, kind: OpKind, operands: &[ValueId], result_types: &[Type]) -> OpId {
        let op = self.func.create_op(kind, operands, result_types, 0);
        self.func.append_op(self.block, op);
        op
    }

    /// Appends a single-result op and returns its result.
    pub fn op1(&mut self, kind: OpKind, operands: &[ValueId], ty: Type) -> ValueId {
        let op = self.push(kind, operands, &[ty]);
        self.func.op(op).results[0]
    }

    /// `arith.constant` of type `index`.
    pub fn index_const(&mut self, value: i64) -> ValueId {
        self.op1(
            OpKind::Constant(ConstantValue::Scalar(Literal::Int(value))),
            &[],
            Type::index(),
        )
    }

    /// Scalar `arith.constant`.
    pub fn scalar_const(&mut self, value: Literal, ty: ScalarType) -> ValueId {
        self.op1(OpKind::Constant(ConstantValue::Scalar(value)), &[], ty.into())
    }

    /// Splat vector `arith.constant`.
    pub fn splat(&mut self, value: Literal, ty: &Type) -> ValueId {
        self.op1(OpKind::Constant(ConstantValue::Splat(value)), &[], ty.clone())
    }

    /// Dense vector `arith.constant`.
    pub fn dense(&mut self, values: Vec<Literal>, ty: &Type) -> ValueId {
        self.op1(OpKind::Constant(ConstantValue::Dense(values)), &[], ty.clone())
    }

    /// Binary elementwise op; the result has the type of `lhs`.
    pub fn binary(&mut self, op: ElementwiseOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs);
        self.op1(OpKind::Elementwise(op), &[lhs, rhs], ty)
    }

    /// Unary elementwise op.
    pub fn unary(&mut self, op: ElementwiseOp, operand: ValueId) -> ValueId {
        let ty = self.type_of(operand);
        self.op1(OpKind::Elementwise(op), &[operand], ty)
    }

    /// `vector.load base[indices]`.
    pub fn vector_load(&mut self, base: ValueId, indices: &[ValueId], ty: Type) -> ValueId {
        let operands: Vec<ValueId> = std::iter::once(base).chain(indices.iter().copied()).collect();
        self.op1(OpKind::VectorLoad, &operands, ty)
    }

    /// `vector.store value, base[indices]`.
    pub fn vector_store(&mut self, value: ValueId, base: ValueId, indices: &[ValueId]) -> OpId {
        let operands: Vec<ValueId> = [value, base]
            .into_iter()
            .chain(indices.iter().copied())
            .collect();
        self.push(OpKind::VectorStore, &operands, &[])
    }

    /// `vector.broadcast source` to `ty`.
    pub fn broadcast(&mut self, source: ValueId, ty: Type) -> ValueId {
        self.op1(OpKind::Broadcast, &[source], ty)
    }

    /// `vector.shape_cast source` to `shape`.
    pub fn shape_cast(&mut self, source: ValueId, shape: &[i64]) -> ValueId {
        let element = self.type_of(source).element_type();
        self.op1(OpKind::ShapeCast, &[source], Type::vector(shape, element))
    }

    /// `vector.transpose source, permutation`.
    pub fn transpose(&mut self, source: ValueId, permutation: &[i64]) -> ValueId {
        let src = self.type_of(source);
        let shape: Vec<i64> = match src.as_vector() {
            Some(vty) => permutation
                .iter()
                .filter_map(|&p| usize::try_from(p).ok().and_then(|p| vty.shape.get(p).copied()))
                .collect(),
            None => Vec::new(),
        };
        self.op1(
            OpKind::Transpose {
                permutation: permutation.to_vec(),
            },
            &[source],
            Type::vector(&shape, src.element_type()),
        )
    }

    /// `func.return values`.
    pub fn ret(&mut self, values: &[ValueId]) -> OpId {
        self.push(OpKind::Return, values, &[])
    }

    /// `scf.yield values`.
    pub fn yield_(&mut self, values: &[ValueId]) -> OpId {
        self.push(OpKind::Yield, values, &[])
    }

    fn nested<R>(&mut self, block: BlockId, build: impl FnOnce(&mut FuncBuilder<'_>) -> R) -> R {
        let mut inner = FuncBuilder {
            func: &mut *self.func,
            block,
        };
        build(&mut inner)
    }

    /// Builds `scf.for lb to ub step step iter_args(inits)`.
    ///
    /// `body` receives the induction variable and the iter args and returns
    /// the values to yield.
    pub fn build_for(
        &mut self,
        lb: ValueId,
        ub: ValueId,
        step: ValueId,
        inits: &[ValueId],
        body: impl FnOnce(&mut FuncBuilder<'_>, ValueId, &[ValueId]) -> Vec<ValueId>,
    ) -> OpId {
        let init_types: Vec<Type> = inits.iter().map(|&v| self.type_of(v)).collect();
        let operands: Vec<ValueId> = [lb, ub, step]
            .into_iter()
            .chain(inits.iter().copied())
            .collect();
        let op = self.func.create_op(OpKind::For, &operands, &init_types, 1);

        let mut arg_types = vec![Type::index()];
        arg_types.extend(init_types.iter().cloned());
        let region = self.func.op(op).regions[0];
        let block = self.func.add_block(region, &arg_types);
        let args = self.func.block(block).args.to_vec();

        self.nested(block, |b| {
            let yields = body(b, args[0], &args[1..]);
            b.yield_(&yields);
        });
        self.func.append_op(self.block, op);
        op
    }

    /// Builds `scf.if cond` with both branches.
    pub fn build_if(
        &mut self,
        cond: ValueId,
        result_types: &[Type],
        then_body: impl FnOnce(&mut FuncBuilder<'_>) -> Vec<ValueId>,
        else_body: impl FnOnce(&mut FuncBuilder<'_>) -> Vec<ValueId>,
    ) -> OpId {
        let op = self.func.create_op(OpKind::If, &[cond], result_types, 2);
        let regions = self.func.op(op).regions.clone();
        let then_block = self.func.add_block(regions[0], &[]);
        let else_block = self.func.add_block(regions[1], &[]);
        self.nested(then_block, |b| {
            let yields = then_body(b);
            b.yield_(&yields);
        });
        self.nested(else_block, |b| {
            let yields = else_body(b);
            b.yield_(&yields);
        });
        self.func.append_op(self.block, op);
        op
    }

    /// Builds a result-less `scf.if cond` whose else region is empty.
    pub fn build_if_then(
        &mut self,
        cond: ValueId,
        then_body: impl FnOnce(&mut FuncBuilder<'_>),
    ) -> OpId {
        let op = self.func.create_op(OpKind::If, &[cond], &[], 2);
        let region = self.func.op(op).regions[0];
        let then_block = self.func.add_block(region, &[]);
        self.nested(then_block, |b| {
            then_body(b);
            b.yield_(&[]);
        });
        self.func.append_op(self.block, op);
        op
    }

    /// Builds `scf.while (inits)`.
    ///
    /// `before` receives the before-block arguments and returns the condition
    /// flag and the values forwarded to the after block. `after` receives the
    /// after-block arguments and returns the values yielded back.
    pub fn build_while(
        &mut self,
        inits: &[ValueId],
        before: impl FnOnce(&mut FuncBuilder<'_>, &[ValueId]) -> (ValueId, Vec<ValueId>),
        after: impl FnOnce(&mut FuncBuilder<'_>, &[ValueId]) -> Vec<ValueId>,
    ) -> OpId {
        let init_types: Vec<Type> = inits.iter().map(|&v| self.type_of(v)).collect();
        // Result types are known only once the condition is built.
        let op = self.func.create_op(OpKind::While, inits, &[], 2);
        let regions = self.func.op(op).regions.clone();

        let before_block = self.func.add_block(regions[0], &init_types);
        let before_args = self.func.block(before_block).args.to_vec();
        let forwarded = self.nested(before_block, |b| {
            let (flag, forwarded) = before(b, &before_args);
            let operands: Vec<ValueId> = std::iter::once(flag).chain(forwarded.iter().copied()).collect();
            b.push(OpKind::Condition, &operands, &[]);
            forwarded
        });
        let result_types: Vec<Type> = forwarded.iter().map(|&v| self.type_of(v)).collect();

        let after_block = self.func.add_block(regions[1], &result_types);
        let after_args = self.func.block(after_block).args.to_vec();
        self.nested(after_block, |b| {
            let yields = after(b, &after_args);
            b.yield_(&yields);
        });

        self.func.add_results(op, &result_types);
        self.func.append_op(self.block, op);
        op
    }

    /// Builds a result-less single-region op (`tpu.trace`, `tpu.region`)
    /// terminated by `tpu.yield`.
    pub fn build_region_op(&mut self, kind: OpKind, body: impl FnOnce(&mut FuncBuilder<'_>)) -> OpId {
        let op = self.func.create_op(kind, &[], &[], 1);
        let region = self.func.op(op).regions[0];
        let block = self.func.add_block(region, &[]);
        self.nested(block, |b| {
            body(b);
            b.push(OpKind::TpuYield, &[], &[]);
        });
        self.func.append_op(self.block, op);
        op
    }

    /// Returns result `index` of `op`.
    #[must_use]
    pub fn result(&self, op: OpId, index: usize) -> ValueId {
        self.func.op(op).results[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vty() -> Type {
        Type::vector(&[8, 128], ScalarType::F32)
    }

    #[test]
    fn test_build_for_wires_iter_args() {
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let lb = b.index_const(0);
        let ub = b.index_const(8);
        let step = b.index_const(1);
        let init = b.splat(Literal::Float(0.0), &vty());
        let for_op = b.build_for(lb, ub, step, &[init], |b, _iv, iters| {
            vec![b.unary(ElementwiseOp::NegF, iters[0])]
        });
        b.ret(&[]);

        let op = func.op(for_op);
        assert_eq!(op.operands.len(), 4);
        assert_eq!(op.results.len(), 1);
        let body = func.region_entry(op.regions[0]).unwrap();
        assert_eq!(func.block(body).args.len(), 2);
        let yield_op = func.terminator(body).unwrap();
        assert_eq!(func.op(yield_op).kind, OpKind::Yield);
    }

    #[test]
    fn test_build_while_result_types() {
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let init = b.splat(Literal::Float(0.0), &vty());
        let flag = b.scalar_const(Literal::Int(1), ScalarType::I1);
        let while_op = b.build_while(
            &[init],
            |_, args| (flag, vec![args[0]]),
            |_, args| vec![args[0]],
        );
        b.ret(&[]);

        let op = func.op(while_op);
        assert_eq!(op.results.len(), 1);
        assert_eq!(func.value_type(op.results[0]), &vty());
        let before = func.region_entry(op.regions[0]).unwrap();
        let cond = func.terminator(before).unwrap();
        assert_eq!(func.op(cond).operands.len(), 2);
    }

    #[test]
    fn test_transpose_result_shape() {
        let mut func = Function::new("f", &[Type::vector(&[8, 256], ScalarType::F32)]);
        let arg = func.args()[0];
        let mut b = FuncBuilder::new(&mut func);
        let t = b.transpose(arg, &[1, 0]);
        assert_eq!(b.type_of(t), Type::vector(&[256, 8], ScalarType::F32));
    }
}
