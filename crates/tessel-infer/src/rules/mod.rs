//! Per-op layout rules.
//!
//! Every rule is a method on the driver that reads the operand layouts it
//! needs, checks the constraints of the op, and annotates it. Rules are
//! grouped by dialect:
//!
//! - [`arith`]: constants, casts, comparisons and the generic elementwise rule
//! - [`scf`]: structured control flow and function entry
//! - [`memory`]: vector and tile loads and stores
//! - [`vector`]: shape manipulation, reductions and contractions
//! - [`tpu`]: the remaining target-specific ops

mod arith;
mod memory;
mod scf;
mod tpu;
mod vector;
