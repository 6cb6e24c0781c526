//! Rules for structured control flow and function entry.

use tessel_ir::{BlockId, OpId, OpKind, Type, ValueId};
use tessel_layout::{algebra::join, Layout};
use tracing::debug;

use crate::error::{InferError, InferErrorKind, InferResult};
use crate::infer::VectorLayoutInferer;

impl VectorLayoutInferer<'_> {
    fn function_error(msg: &str) -> InferError {
        InferError {
            op: None,
            op_name: "func.func".to_string(),
            kind: InferErrorKind::Unsupported(msg.to_string()),
        }
    }

    /// Infers the function body, which must be a single block ending in a
    /// `func.return` of non-vector values.
    pub(crate) fn infer_function(&mut self) -> InferResult {
        let body = self.func.body();
        if self.func.region(body).blocks.len() != 1 {
            return Err(Self::function_error("Only one block functions supported"));
        }
        let entry = self.func.entry_block();
        self.infer_block(entry, |this, terminator| {
            check_op!(
                this,
                terminator,
                matches!(this.func.op(terminator).kind, OpKind::Return),
                "Expected func.return terminator"
            );
            let operands = this.operands(terminator);
            for &value in &operands {
                check_op!(
                    this,
                    terminator,
                    !this.func.value_type(value).is_vector(),
                    "vector returns unsupported"
                );
            }
            this.set_in_layout(terminator, vec![None; operands.len()]);
            Ok(())
        })
    }

    pub(crate) fn match_yield(&mut self, op: OpId) -> InferResult {
        check_ir!(
            self,
            op,
            matches!(self.func.op(op).kind, OpKind::Yield),
            "expected scf.yield terminator"
        );
        Ok(())
    }

    fn entry_of(&self, op: OpId, region_index: usize, what: &str) -> InferResult<BlockId> {
        self.func
            .op(op)
            .regions
            .get(region_index)
            .and_then(|&region| self.func.region_entry(region))
            .ok_or_else(|| self.invariant(op, format!("expected {what}")))
    }

    /// The layout a value is carried with through structured control flow.
    fn carried_layout(&self, op: OpId, value: ValueId) -> InferResult<Layout> {
        match self.func.value_type(value) {
            Type::Scalar(_) => Ok(None),
            Type::Vector(_) => self.vector_layout_of(op, value).map(Some),
            ty @ Type::MemRef(_) => Err(self.error(
                op,
                InferErrorKind::Unsupported(format!(
                    "unsupported arg type {ty} in {}",
                    self.func.op(op).name()
                )),
            )),
        }
    }

    fn yield_operand_types(&self, yield_op: OpId) -> Vec<Type> {
        self.func
            .op(yield_op)
            .operands
            .iter()
            .map(|&v| self.func.value_type(v).clone())
            .collect()
    }

    pub(crate) fn infer_if(&mut self, op: OpId) -> InferResult {
        check_ir!(
            self,
            op,
            self.func.op(op).operands.len() == 1,
            "expected one operand"
        );
        self.set_in_layout(op, vec![None]);

        let then_block = self.entry_of(op, 0, "a then block")?;
        self.infer_block(then_block, Self::match_yield)
            .map_err(|e| self.region_error(op, "failed to infer layout for then branch", e))?;
        let then_yield = self
            .func
            .terminator(then_block)
            .ok_or_else(|| self.invariant(op, "expected scf.yield terminator"))?;

        let results = self.results(op);
        let result_types: Vec<Type> = results.iter().map(|&v| self.ty(v)).collect();
        check_ir!(
            self,
            op,
            self.yield_operand_types(then_yield) == result_types,
            "scf.yield types in the then branch do not match the scf.if results"
        );
        let mut result_layouts = Vec::with_capacity(results.len());
        for value in self.operands(then_yield) {
            match self.func.value_type(value) {
                Type::Scalar(_) => result_layouts.push(None),
                Type::Vector(_) => result_layouts.push(Some(self.vector_layout_of(op, value)?)),
                Type::MemRef(_) => {
                    return Err(self.error(
                        op,
                        InferErrorKind::Unsupported("unsupported scf.yield type".into()),
                    ))
                }
            }
        }

        let else_block = self
            .func
            .op(op)
            .regions
            .get(1)
            .and_then(|&region| self.func.region_entry(region));
        let Some(else_block) = else_block else {
            check_ir!(
                self,
                op,
                results.is_empty(),
                "expected the else branch with results"
            );
            return Ok(());
        };
        self.infer_block(else_block, Self::match_yield)
            .map_err(|e| self.region_error(op, "failed to infer layout for else branch", e))?;
        if results.is_empty() {
            return Ok(());
        }
        let else_yield = self
            .func
            .terminator(else_block)
            .ok_or_else(|| self.invariant(op, "expected scf.yield terminator"))?;
        check_ir!(
            self,
            op,
            self.yield_operand_types(else_yield) == result_types,
            "scf.yield types in the else branch do not match the scf.if results"
        );

        for (i, value) in self.operands(else_yield).into_iter().enumerate() {
            let Some(then_layout) = result_layouts[i] else {
                continue;
            };
            let else_layout = self.vector_layout_of(op, value)?;
            let shape = result_types[i]
                .as_vector()
                .map(|vty| vty.shape.clone())
                .unwrap_or_default();
            result_layouts[i] = join(&then_layout, &else_layout, &shape);
            if result_layouts[i].is_none() {
                return Err(self.error(
                    op,
                    InferErrorKind::Incompatible(format!(
                        "failed to find a compatible layout in then and else branch for output {i}"
                    )),
                ));
            }
        }
        self.set_in_layout(then_yield, result_layouts.clone());
        self.set_in_layout(else_yield, result_layouts.clone());
        self.set_out_layout(op, result_layouts);
        Ok(())
    }

    pub(crate) fn infer_for(&mut self, op: OpId) -> InferResult {
        let regions = self.func.op(op).regions.clone();
        check_ir!(
            self,
            op,
            regions.len() == 1 && self.func.region(regions[0]).blocks.len() == 1,
            "expected one block for scf.for"
        );
        let body = self.entry_of(op, 0, "one block for scf.for")?;
        let (operands, results) = (self.operands(op), self.results(op));
        let body_args = self.func.block(body).args.to_vec();
        check_ir!(
            self,
            op,
            body_args.len() == results.len() + 1,
            "expected num_region_iter_args is equal to num_results in scf.for"
        );
        check_ir!(
            self,
            op,
            operands.len() == 3 + results.len(),
            "expected num_operands is equal to 3 + num_results in scf.for"
        );

        let mut in_layouts: Vec<Layout> = vec![None; 3];
        for &init in &operands[3..] {
            in_layouts.push(self.carried_layout(op, init)?);
        }
        let out_layouts = in_layouts[3..].to_vec();

        self.bridge_block_args(body, &body_args[1..], &out_layouts);
        self.infer_block(body, Self::match_yield)?;
        let yield_op = self
            .func
            .terminator(body)
            .ok_or_else(|| self.invariant(op, "expected scf.yield terminator"))?;
        check_ir!(
            self,
            op,
            self.func.op(yield_op).operands.len() == results.len(),
            "expected scf.yield operands to match the scf.for results"
        );
        self.set_in_layout(yield_op, out_layouts.clone());
        self.set_in_layout(op, in_layouts);
        self.set_out_layout(op, out_layouts);
        Ok(())
    }

    pub(crate) fn infer_while(&mut self, op: OpId) -> InferResult {
        check_ir!(
            self,
            op,
            self.func.op(op).regions.len() == 2,
            "expected two blocks for scf.while"
        );
        let before = self.entry_of(op, 0, "a before block for scf.while")?;
        let after = self.entry_of(op, 1, "an after block for scf.while")?;
        let (operands, results) = (self.operands(op), self.results(op));

        let mut in_layouts = Vec::with_capacity(operands.len());
        for &init in &operands {
            in_layouts.push(self.carried_layout(op, init)?);
        }
        check_op!(
            self,
            op,
            results.len() == operands.len(),
            "scf.while results must match its inputs"
        );
        // The results are assumed to keep the input layouts.
        let out_layouts = in_layouts.clone();

        let before_args = self.func.block(before).args.to_vec();
        let after_args = self.func.block(after).args.to_vec();
        check_ir!(
            self,
            op,
            before_args.len() == in_layouts.len(),
            "expected the before block to take the scf.while inputs"
        );
        check_ir!(
            self,
            op,
            after_args.len() == out_layouts.len(),
            "expected the after block to take the scf.while results"
        );

        self.bridge_block_args(before, &before_args, &in_layouts);
        let expected = out_layouts.clone();
        self.infer_block(before, move |this, cond| this.match_condition(cond, &expected))?;
        self.bridge_block_args(after, &after_args, &out_layouts);
        self.infer_block(after, Self::match_yield)?;

        let cond = self
            .func
            .terminator(before)
            .ok_or_else(|| self.invariant(op, "expected scf.condition terminator"))?;
        let yield_op = self
            .func
            .terminator(after)
            .ok_or_else(|| self.invariant(op, "expected scf.yield terminator"))?;
        check_ir!(
            self,
            op,
            self.func.op(yield_op).operands.len() == in_layouts.len(),
            "expected scf.yield operands to match the scf.while inputs"
        );
        let mut cond_layouts = vec![None];
        cond_layouts.extend(out_layouts.iter().copied());
        self.set_in_layout(cond, cond_layouts);
        self.set_in_layout(yield_op, in_layouts.clone());
        self.set_in_layout(op, in_layouts);
        self.set_out_layout(op, out_layouts);
        Ok(())
    }

    fn match_condition(&mut self, op: OpId, expected: &[Layout]) -> InferResult {
        check_ir!(
            self,
            op,
            matches!(self.func.op(op).kind, OpKind::Condition),
            "expected scf.condition terminator"
        );
        let forwarded = self.condition_layouts(op)?;
        check_ir!(
            self,
            op,
            forwarded.len() == expected.len(),
            "expected scf.condition to forward one value per scf.while result"
        );
        if forwarded != expected {
            debug!(
                forwarded = ?forwarded,
                expected = ?expected,
                "scf.condition forwards layouts that differ from the scf.while inputs"
            );
        }
        Ok(())
    }

    /// Layouts of the values an `scf.condition` forwards, without the flag.
    fn condition_layouts(&self, op: OpId) -> InferResult<Vec<Layout>> {
        let operands = self.operands(op);
        check_ir!(self, op, !operands.is_empty(), "expected a condition flag");
        operands[1..]
            .iter()
            .map(|&value| self.carried_layout(op, value))
            .collect()
    }
}
