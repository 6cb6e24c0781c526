//! # Tessel IR
//!
//! An SSA intermediate representation with structured regions, modelled on
//! the tile-level dialects consumed by the vector layout inference pass.
//!
//! ## Overview
//!
//! A [`Function`] owns four flat arenas:
//!
//! - **Operations** ([`OpId`]): a kind, operands, results, nested regions and
//!   the optional `in_layout` / `out_layout` annotations
//! - **Blocks** ([`BlockId`]): block arguments and an ordered op list
//! - **Regions** ([`RegionId`]): a list of blocks owned by an operation
//! - **Values** ([`ValueId`]): a type, a definition and a use list
//!
//! Use lists are kept in sync by every mutation, so rewrites such as
//! [`Function::replace_uses_with_if`] stay cheap.
//!
//! ## Main Types
//!
//! - [`Function`]: The arena and entry point
//! - [`Operation`]: One operation with its annotations
//! - [`OpKind`]: The kind of an operation and its attributes
//! - [`Type`]: Scalar, vector and memref types
//! - [`FuncBuilder`]: Convenience API for constructing functions
//!
//! ## See Also
//!
//! - `tessel-layout`: The layouts stored in the annotations
//! - `tessel-infer`: The pass that fills in the annotations

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod ops;
pub mod print;
pub mod types;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tessel_index::{define_index, IndexVec};
use tessel_layout::Layout;

pub use builder::FuncBuilder;
pub use ops::{
    AffineMap, CombiningKind, ConstantValue, ContractionAttrs, ElementwiseOp, ExtractPosition,
    IteratorType, Literal, OpKind, Predicate,
};
pub use types::{MemRefType, ScalarType, Shape, Type, VectorType};

define_index! {
    /// Index of an operation.
    pub struct OpId;
    /// Index of a block.
    pub struct BlockId;
    /// Index of a region.
    pub struct RegionId;
    /// Index of an SSA value.
    pub struct ValueId;
}

/// Where a value is defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueDef {
    /// The `index`-th result of `op`.
    OpResult {
        /// Defining operation.
        op: OpId,
        /// Result number.
        index: usize,
    },
    /// The `index`-th argument of `block`.
    BlockArg {
        /// Owning block.
        block: BlockId,
        /// Argument number.
        index: usize,
    },
}

/// One use of a value: operand `operand` of `op`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Use {
    /// The using operation.
    pub op: OpId,
    /// Operand position.
    pub operand: usize,
}

/// An SSA value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueData {
    /// The value's type.
    pub ty: Type,
    /// Where the value is defined.
    pub def: ValueDef,
    uses: Vec<Use>,
}

/// An operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Kind and attributes.
    pub kind: OpKind,
    /// Operand values.
    pub operands: SmallVec<[ValueId; 4]>,
    /// Result values.
    pub results: SmallVec<[ValueId; 2]>,
    /// Nested regions.
    pub regions: SmallVec<[RegionId; 2]>,
    /// The block containing the op, once inserted.
    pub parent: Option<BlockId>,
    /// Layout of each operand, once inferred.
    pub in_layout: Option<Vec<Layout>>,
    /// Layout of each result, once inferred.
    pub out_layout: Option<Vec<Layout>>,
}

impl Operation {
    /// Returns the qualified name of the op.
    #[must_use]
    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// Returns true if either layout annotation is present.
    #[must_use]
    pub fn is_annotated(&self) -> bool {
        self.in_layout.is_some() || self.out_layout.is_some()
    }
}

/// A basic block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block arguments.
    pub args: SmallVec<[ValueId; 4]>,
    /// Operations in order; the last one is the terminator.
    pub ops: Vec<OpId>,
    /// Owning region.
    pub parent: RegionId,
}

/// A region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Blocks, entry first.
    pub blocks: SmallVec<[BlockId; 1]>,
    /// Owning operation, or `None` for the function body.
    pub parent: Option<OpId>,
}

/// A function: the unit the layout pass runs on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name.
    pub name: String,
    ops: IndexVec<OpId, Operation>,
    blocks: IndexVec<BlockId, Block>,
    regions: IndexVec<RegionId, Region>,
    values: IndexVec<ValueId, ValueData>,
    body: RegionId,
}

impl Function {
    /// Creates a function with a single entry block taking `arg_types`.
    #[must_use]
    pub fn new(name: impl Into<String>, arg_types: &[Type]) -> Self {
        let mut regions = IndexVec::new();
        let body = regions.push(Region {
            blocks: SmallVec::new(),
            parent: None,
        });
        let mut func = Self {
            name: name.into(),
            ops: IndexVec::new(),
            blocks: IndexVec::new(),
            regions,
            values: IndexVec::new(),
            body,
        };
        func.add_block(body, arg_types);
        func
    }

    /// The function body.
    #[must_use]
    pub fn body(&self) -> RegionId {
        self.body
    }

    /// The entry block of the function body.
    ///
    /// # Panics
    ///
    /// Panics if the body has no block, which [`Function::new`] rules out.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.regions[self.body].blocks[0]
    }

    /// Returns the arguments of the entry block.
    #[must_use]
    pub fn args(&self) -> &[ValueId] {
        &self.blocks[self.entry_block()].args
    }

    /// Adds an empty region.
    pub fn add_region(&mut self, parent: Option<OpId>) -> RegionId {
        self.regions.push(Region {
            blocks: SmallVec::new(),
            parent,
        })
    }

    /// Appends a block with arguments of `arg_types` to `region`.
    pub fn add_block(&mut self, region: RegionId, arg_types: &[Type]) -> BlockId {
        let block = self.blocks.push(Block {
            args: SmallVec::new(),
            ops: Vec::new(),
            parent: region,
        });
        for (index, ty) in arg_types.iter().enumerate() {
            let arg = self.values.push(ValueData {
                ty: ty.clone(),
                def: ValueDef::BlockArg { block, index },
                uses: Vec::new(),
            });
            self.blocks[block].args.push(arg);
        }
        self.regions[region].blocks.push(block);
        block
    }

    /// Creates a detached operation with `num_regions` empty regions.
    ///
    /// Use [`Function::append_op`] or [`Function::insert_op_at_start`] to
    /// place it into a block.
    pub fn create_op(
        &mut self,
        kind: OpKind,
        operands: &[ValueId],
        result_types: &[Type],
        num_regions: usize,
    ) -> OpId {
        let op = self.ops.next_index();
        for (operand, &value) in operands.iter().enumerate() {
            self.values[value].uses.push(Use { op, operand });
        }
        let results = result_types
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                self.values.push(ValueData {
                    ty: ty.clone(),
                    def: ValueDef::OpResult { op, index },
                    uses: Vec::new(),
                })
            })
            .collect();
        let id = self.ops.push(Operation {
            kind,
            operands: operands.iter().copied().collect(),
            results,
            regions: SmallVec::new(),
            parent: None,
            in_layout: None,
            out_layout: None,
        });
        debug_assert_eq!(id, op);
        for _ in 0..num_regions {
            let region = self.add_region(Some(op));
            self.ops[op].regions.push(region);
        }
        op
    }

    /// Appends results of `result_types` to `op`.
    pub fn add_results(&mut self, op: OpId, result_types: &[Type]) {
        let first = self.ops[op].results.len();
        for (offset, ty) in result_types.iter().enumerate() {
            let result = self.values.push(ValueData {
                ty: ty.clone(),
                def: ValueDef::OpResult {
                    op,
                    index: first + offset,
                },
                uses: Vec::new(),
            });
            self.ops[op].results.push(result);
        }
    }

    /// Appends a detached op to the end of `block`.
    pub fn append_op(&mut self, block: BlockId, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none(), "op already placed");
        self.ops[op].parent = Some(block);
        self.blocks[block].ops.push(op);
    }

    /// Inserts a detached op at `position` in `block`.
    pub fn insert_op(&mut self, block: BlockId, position: usize, op: OpId) {
        debug_assert!(self.ops[op].parent.is_none(), "op already placed");
        self.ops[op].parent = Some(block);
        self.blocks[block].ops.insert(position, op);
    }

    /// Inserts a detached op at the start of `block`.
    pub fn insert_op_at_start(&mut self, block: BlockId, op: OpId) {
        self.insert_op(block, 0, op);
    }

    /// Returns an operation.
    #[must_use]
    pub fn op(&self, op: OpId) -> &Operation {
        &self.ops[op]
    }

    /// Returns an operation mutably.
    pub fn op_mut(&mut self, op: OpId) -> &mut Operation {
        &mut self.ops[op]
    }

    /// Returns a block.
    #[must_use]
    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    /// Returns a region.
    #[must_use]
    pub fn region(&self, region: RegionId) -> &Region {
        &self.regions[region]
    }

    /// Returns a value.
    #[must_use]
    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value]
    }

    /// Returns the type of a value.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.values[value].ty
    }

    /// Returns the uses of a value.
    #[must_use]
    pub fn uses(&self, value: ValueId) -> &[Use] {
        &self.values[value].uses
    }

    /// Returns the op defining `value`, or `None` for block arguments.
    #[must_use]
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.values[value].def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Iterates over all operations, placed or not.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Operation)> + '_ {
        self.ops.iter_enumerated()
    }

    /// Number of operations in the arena.
    #[must_use]
    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Returns the terminator of `block`, if its last op is one.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<OpId> {
        self.blocks[block]
            .ops
            .last()
            .copied()
            .filter(|&op| self.ops[op].kind.is_terminator())
    }

    /// Returns the non-terminator ops of `block`, in order.
    #[must_use]
    pub fn ops_without_terminator(&self, block: BlockId) -> &[OpId] {
        let ops = &self.blocks[block].ops;
        match self.terminator(block) {
            Some(_) => &ops[..ops.len() - 1],
            None => ops,
        }
    }

    /// Returns the first block of `region`.
    #[must_use]
    pub fn region_entry(&self, region: RegionId) -> Option<BlockId> {
        self.regions[region].blocks.first().copied()
    }

    /// Redirects every use of `from` accepted by `pred` to `to`.
    pub fn replace_uses_with_if(
        &mut self,
        from: ValueId,
        to: ValueId,
        mut pred: impl FnMut(Use) -> bool,
    ) {
        let uses = std::mem::take(&mut self.values[from].uses);
        let (moved, kept): (Vec<Use>, Vec<Use>) = uses.into_iter().partition(|&u| pred(u));
        self.values[from].uses = kept;
        for u in moved {
            self.ops[u.op].operands[u.operand] = to;
            self.values[to].uses.push(u);
        }
    }

    /// Sets the `in_layout` annotation of `op`.
    pub fn set_in_layout(&mut self, op: OpId, layouts: Vec<Layout>) {
        debug_assert_eq!(layouts.len(), self.ops[op].operands.len());
        self.ops[op].in_layout = Some(layouts);
    }

    /// Sets the `out_layout` annotation of `op`.
    pub fn set_out_layout(&mut self, op: OpId, layouts: Vec<Layout>) {
        debug_assert_eq!(layouts.len(), self.ops[op].results.len());
        self.ops[op].out_layout = Some(layouts);
    }

    /// Returns the layout a vector value was produced with.
    ///
    /// Returns `None` for block arguments and ops not yet annotated.
    #[must_use]
    pub fn produced_layout(&self, value: ValueId) -> Option<Layout> {
        match self.values[value].def {
            ValueDef::OpResult { op, index } => self.ops[op]
                .out_layout
                .as_ref()
                .and_then(|layouts| layouts.get(index).copied()),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Removes the layout annotations of every op except `tpu.assume_layout`.
    pub fn strip_layouts(&mut self) {
        for op in self.ops.iter_mut() {
            if !op.kind.is_assume_layout() {
                op.in_layout = None;
                op.out_layout = None;
            }
        }
    }
}
