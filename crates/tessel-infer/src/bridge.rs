//! Pinning loop-carried vectors at region entry.
//!
//! The layout of a loop-carried block argument is decided by the loop op,
//! but the ops inside the body look layouts up through the defining op of
//! their operands. A `tpu.assume_layout` placed at the start of the body
//! gives each vector argument a producer with the decided layout, and every
//! other use of the argument is redirected to its result.

use tessel_index::Idx;
use tessel_ir::{BlockId, OpKind, ValueId};
use tessel_layout::Layout;
use tracing::debug;

use crate::infer::VectorLayoutInferer;

impl VectorLayoutInferer<'_> {
    /// Inserts (or reuses) one `tpu.assume_layout` per vector argument of
    /// `block`, in argument order.
    pub(crate) fn bridge_block_args(&mut self, block: BlockId, args: &[ValueId], layouts: &[Layout]) {
        debug_assert_eq!(args.len(), layouts.len());
        let mut position = 0;
        for (&arg, &layout) in args.iter().zip(layouts) {
            let ty = self.func.value_type(arg).clone();
            if !ty.is_vector() {
                continue;
            }
            if self.existing_assume(block, arg, layout) {
                debug!(arg = arg.index(), "reusing tpu.assume_layout");
                self.report.assume_reused += 1;
                continue;
            }

            let assume = self
                .func
                .create_op(OpKind::AssumeLayout, &[arg], &[ty], 0);
            self.func.insert_op(block, position, assume);
            position += 1;
            self.func.set_in_layout(assume, vec![layout]);
            self.func.set_out_layout(assume, vec![layout]);
            let assumed = self.func.op(assume).results[0];
            self.func.replace_uses_with_if(arg, assumed, |u| u.op != assume);
            debug!(arg = arg.index(), assumed = assumed.index(), "inserted tpu.assume_layout");
            self.report.assume_inserted += 1;
        }
    }

    /// Returns true if the only user of `arg` is an annotated
    /// `tpu.assume_layout` in `block` carrying `layout`.
    fn existing_assume(&self, block: BlockId, arg: ValueId, layout: Layout) -> bool {
        let [only_use] = self.func.uses(arg) else {
            return false;
        };
        let user = self.func.op(only_use.op);
        user.kind.is_assume_layout()
            && user.parent == Some(block)
            && user.in_layout.as_deref() == Some(&[layout][..])
            && user.out_layout.as_deref() == Some(&[layout][..])
    }
}
