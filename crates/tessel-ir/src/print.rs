//! Compact MLIR-like printing.
//!
//! Ops print on one line as
//! `%3 = vector.load %0, %1, %2 : memref<...>, index, index -> vector<...>`
//! followed by their layout annotations, if any. Nested regions are printed
//! indented below the op.

use std::fmt::{self, Write};

use tessel_layout::{DisplayLayout, Layout};

use crate::{BlockId, ConstantValue, Function, Literal, OpId, OpKind, ValueId};

fn write_value_list(out: &mut String, values: &[ValueId]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "%{}", tessel_index::Idx::index(*value))?;
    }
    Ok(())
}

fn write_layouts(out: &mut String, layouts: &[Layout]) -> fmt::Result {
    out.push('[');
    for (i, layout) in layouts.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}", DisplayLayout(layout))?;
    }
    out.push(']');
    Ok(())
}

fn literal(lit: Literal) -> String {
    match lit {
        Literal::Int(n) => n.to_string(),
        Literal::Float(x) => format!("{x:?}"),
    }
}

fn attributes(kind: &OpKind) -> Option<String> {
    match kind {
        OpKind::Constant(ConstantValue::Scalar(lit)) => Some(literal(*lit)),
        OpKind::Constant(ConstantValue::Splat(lit)) => Some(format!("dense<{}>", literal(*lit))),
        OpKind::Constant(ConstantValue::Dense(elems)) => Some(format!("dense<[{} elements]>", elems.len())),
        OpKind::AssumeMultiple { multiple } => Some(format!("multiple = {multiple}")),
        OpKind::Concatenate { dimension } => Some(format!("dimension = {dimension}")),
        OpKind::Iota {
            dimension: Some(dim),
        } => Some(format!("dimension = {dim}")),
        OpKind::Transpose { permutation } => Some(format!("permutation = {permutation:?}")),
        OpKind::MultiReduction { kind, dims } => Some(format!("{kind:?}, dims = {dims:?}")),
        OpKind::Extract { position } => Some(format!("position = {position:?}")),
        _ => None,
    }
}

fn write_op_line(out: &mut String, func: &Function, op_id: OpId) -> fmt::Result {
    let op = func.op(op_id);
    if !op.results.is_empty() {
        write_value_list(out, &op.results)?;
        out.push_str(" = ");
    }
    out.push_str(op.name());
    if !op.operands.is_empty() {
        out.push(' ');
        write_value_list(out, &op.operands)?;
    }
    if let Some(attrs) = attributes(&op.kind) {
        write!(out, " {{{attrs}}}")?;
    }

    if !op.operands.is_empty() || !op.results.is_empty() {
        out.push_str(" : ");
        for (i, &v) in op.operands.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "{}", func.value_type(v))?;
        }
        if !op.results.is_empty() {
            if !op.operands.is_empty() {
                out.push_str(" -> ");
            }
            for (i, &v) in op.results.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "{}", func.value_type(v))?;
            }
        }
    }

    if op.in_layout.is_some() || op.out_layout.is_some() {
        out.push_str(" {");
        if let Some(layouts) = &op.in_layout {
            out.push_str("in_layout = ");
            write_layouts(out, layouts)?;
        }
        if let Some(layouts) = &op.out_layout {
            if op.in_layout.is_some() {
                out.push_str(", ");
            }
            out.push_str("out_layout = ");
            write_layouts(out, layouts)?;
        }
        out.push('}');
    }
    Ok(())
}

/// Renders a single op on one line, without its regions.
#[must_use]
pub fn op_to_string(func: &Function, op: OpId) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_op_line(&mut out, func, op);
    out
}

fn write_block(out: &mut String, func: &Function, block: BlockId, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let args = &func.block(block).args;
    if !args.is_empty() {
        write!(out, "{indent}^bb(")?;
        for (i, &arg) in args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "%{}: {}", tessel_index::Idx::index(arg), func.value_type(arg))?;
        }
        out.push_str("):\n");
    }
    for &op in &func.block(block).ops {
        write_op(out, func, op, depth + 1)?;
    }
    Ok(())
}

fn write_op(out: &mut String, func: &Function, op: OpId, depth: usize) -> fmt::Result {
    out.push_str(&"  ".repeat(depth));
    write_op_line(out, func, op)?;
    let regions = &func.op(op).regions;
    if regions.is_empty() {
        out.push('\n');
        return Ok(());
    }
    out.push_str(" (\n");
    for (i, &region) in regions.iter().enumerate() {
        if i > 0 {
            writeln!(out, "{}}} {{", "  ".repeat(depth))?;
        } else {
            writeln!(out, "{}{{", "  ".repeat(depth))?;
        }
        for &block in &func.region(region).blocks {
            write_block(out, func, block, depth + 1)?;
        }
    }
    writeln!(out, "{}}})", "  ".repeat(depth))
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write!(out, "func.func @{}(", self.name)?;
        for (i, &arg) in self.args().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "%{}: {}", tessel_index::Idx::index(arg), self.value_type(arg))?;
        }
        out.push_str(") {\n");
        for &block in &self.region(self.body()).blocks {
            for &op in &self.block(block).ops {
                write_op(&mut out, self, op, 1)?;
            }
        }
        out.push_str("}\n");
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FuncBuilder, ScalarType, Type};
    use tessel_layout::{TargetShape, VectorLayout};

    #[test]
    fn test_op_line_with_layouts() {
        let vty = Type::vector(&[8, 128], ScalarType::F32);
        let mut func = Function::new("f", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let v = b.splat(Literal::Float(1.0), &vty);
        let op = func.defining_op(v).unwrap();
        let layout = VectorLayout::native(32, TargetShape::default());
        func.set_out_layout(op, vec![Some(layout)]);
        assert_eq!(
            op_to_string(&func, op),
            "%0 = arith.constant {dense<1.0>} : vector<8x128xf32> {out_layout = [32,{0,0},(8,128)]}"
        );
    }

    #[test]
    fn test_function_printing_nests_regions() {
        let vty = Type::vector(&[8, 128], ScalarType::F32);
        let mut func = Function::new("loop", &[]);
        let mut b = FuncBuilder::new(&mut func);
        let lb = b.index_const(0);
        let ub = b.index_const(4);
        let step = b.index_const(1);
        let init = b.splat(Literal::Float(0.0), &vty);
        b.build_for(lb, ub, step, &[init], |_, _, iters| vec![iters[0]]);
        b.ret(&[]);

        let text = func.to_string();
        assert!(text.starts_with("func.func @loop() {\n"));
        assert!(text.contains("scf.for %0, %1, %2, %3"));
        assert!(text.contains("^bb(%5: index, %6: vector<8x128xf32>):"));
        assert!(text.contains("scf.yield %6"));
        assert!(text.ends_with("}\n"));
    }
}
