//! Integration tests for vector layout inference.
//!
//! These tests build small functions with the IR builder, run the pass and
//! check the annotations it leaves behind.

use tessel_infer::{infer_vector_layout, InferErrorKind, InferVectorLayoutPass};
use tessel_ir::{
    ElementwiseOp, FuncBuilder, Function, Literal, OpId, OpKind, ScalarType, Type, ValueId,
};
use tessel_layout::{
    algebra::join, ImplicitDim, Layout, Offset, TargetShape, Tile, TilingError, VectorLayout, REPLICATED,
    ZERO_OFFSETS,
};

const TARGET: TargetShape = TargetShape::new(8, 128);

/// Helper to create an f32 vector type.
fn f32_vector(shape: &[i64]) -> Type {
    Type::vector(shape, ScalarType::F32)
}

/// Helper to create an f32 memref type with a single level of tiling.
fn f32_memref(shape: &[i64], tile: &[i64]) -> Type {
    Type::memref(shape, ScalarType::F32, vec![Tile::new(tile)])
}

/// The native 32-bit layout with the given offsets.
fn layout_32(offsets: [Offset; 2]) -> VectorLayout {
    VectorLayout::new(32, offsets, TARGET.default_tiling(), ImplicitDim::None)
}

fn in_layouts(func: &Function, op: OpId) -> Vec<Layout> {
    func.op(op).in_layout.clone().expect("in_layout")
}

fn out_layouts(func: &Function, op: OpId) -> Vec<Layout> {
    func.op(op).out_layout.clone().expect("out_layout")
}

fn producer(func: &Function, value: ValueId) -> OpId {
    func.defining_op(value).expect("value has a defining op")
}

fn body_block(func: &Function, op: OpId, region: usize) -> tessel_ir::BlockId {
    func.region_entry(func.op(op).regions[region])
        .expect("region has a block")
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_load_from_tiled_memref() {
    let mut func = Function::new("load", &[f32_memref(&[1, 1, 8, 128], &[8, 128])]);
    let mem = func.args()[0];
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let v = b.vector_load(mem, &[c0, c0, c0, c0], f32_vector(&[1, 1, 8, 128]));
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let load = producer(&func, v);
    assert_eq!(out_layouts(&func, load), vec![Some(layout_32(ZERO_OFFSETS))]);
    assert_eq!(in_layouts(&func, load), vec![None; 5]);
}

#[test]
fn test_splat_constant_is_replicated() {
    let mut func = Function::new("splat", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let v = b.splat(Literal::Float(1.0), &f32_vector(&[8, 128]));
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let constant = producer(&func, v);
    assert_eq!(out_layouts(&func, constant), vec![Some(layout_32(REPLICATED))]);
}

#[test]
fn test_select_of_replicated_values_keeps_value_width() {
    let mut func = Function::new("select", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let mask = b.splat(Literal::Int(1), &Type::vector(&[8, 128], ScalarType::I1));
    let t = b.splat(Literal::Float(1.0), &f32_vector(&[8, 128]));
    let f = b.splat(Literal::Float(2.0), &f32_vector(&[8, 128]));
    let v = b.op1(OpKind::Select, &[mask, t, f], f32_vector(&[8, 128]));
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let select = producer(&func, v);
    let out = out_layouts(&func, select)[0].unwrap();
    assert_eq!(out.bitwidth(), 32);
    assert_eq!(out, layout_32(REPLICATED));
    let ins = in_layouts(&func, select);
    assert_eq!(ins[1..], [Some(out), Some(out)]);
}

#[test]
fn test_for_loop_pins_carried_vector() {
    let mut func = Function::new("loop", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let lb = b.index_const(0);
    let ub = b.index_const(4);
    let step = b.index_const(1);
    let init = b.splat(Literal::Float(0.0), &f32_vector(&[8, 128]));
    let for_op = b.build_for(lb, ub, step, &[init], |b, _, iters| {
        vec![b.unary(ElementwiseOp::NegF, iters[0])]
    });
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let replicated = Some(layout_32(REPLICATED));
    assert_eq!(
        in_layouts(&func, for_op),
        vec![None, None, None, replicated]
    );
    assert_eq!(out_layouts(&func, for_op), vec![replicated]);

    let body = body_block(&func, for_op, 0);
    let ops = func.block(body).ops.clone();
    let assume = ops[0];
    assert!(func.op(assume).kind.is_assume_layout());
    let iter_arg = func.block(body).args[1];
    assert_eq!(func.op(assume).operands[0], iter_arg);
    assert_eq!(func.uses(iter_arg).len(), 1);

    let assumed = func.op(assume).results[0];
    assert_eq!(func.op(ops[1]).operands[0], assumed);

    let yield_op = func.terminator(body).unwrap();
    assert_eq!(in_layouts(&func, yield_op), out_layouts(&func, for_op));
}

#[test]
fn test_if_joins_branch_layouts() {
    let vty = Type::vector(&[8, 128], ScalarType::I32);
    let mut func = Function::new("branch", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let cond = b.scalar_const(Literal::Int(1), ScalarType::I1);
    let if_op = b.build_if(
        cond,
        &[vty.clone()],
        |b| vec![b.op1(OpKind::Iota { dimension: None }, &[], vty.clone())],
        |b| vec![b.op1(OpKind::Iota { dimension: Some(0) }, &[], vty.clone())],
    );
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let expected = vec![Some(layout_32(ZERO_OFFSETS))];
    assert_eq!(out_layouts(&func, if_op), expected);
    assert_eq!(in_layouts(&func, if_op), vec![None]);

    let then_yield = func.terminator(body_block(&func, if_op, 0)).unwrap();
    let else_yield = func.terminator(body_block(&func, if_op, 1)).unwrap();
    assert_eq!(in_layouts(&func, then_yield), expected);
    assert_eq!(in_layouts(&func, else_yield), expected);

    // The else branch still produces its own layout.
    let else_value = func.op(else_yield).operands[0];
    let else_layout = out_layouts(&func, producer(&func, else_value))[0].unwrap();
    assert_eq!(else_layout.offsets(), [Offset::ZERO, Offset::Replicated]);
    assert_eq!(
        join(&layout_32(ZERO_OFFSETS), &else_layout, &[8, 128]),
        expected[0]
    );
}

#[test]
fn test_broadcast_of_scalar() {
    let mut func = Function::new("broadcast", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let s = b.scalar_const(Literal::Float(2.0), ScalarType::F32);
    let v = b.broadcast(s, f32_vector(&[8, 128]));
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let broadcast = producer(&func, v);
    assert_eq!(out_layouts(&func, broadcast), vec![Some(layout_32(REPLICATED))]);
    assert_eq!(in_layouts(&func, broadcast), vec![None]);
}

#[test]
fn test_transpose_forces_native_tiling() {
    let mut func = Function::new("transpose", &[f32_memref(&[128, 128], &[8, 128])]);
    let mem = func.args()[0];
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let v = b.vector_load(mem, &[c0, c0], f32_vector(&[128, 128]));
    let t = b.transpose(v, &[1, 0]);
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let transpose = producer(&func, t);
    let native = Some(layout_32(ZERO_OFFSETS));
    assert_eq!(in_layouts(&func, transpose), vec![native]);
    assert_eq!(out_layouts(&func, transpose), vec![native]);
}

// ============================================================================
// Structured control flow
// ============================================================================

#[test]
fn test_while_keeps_input_layouts() {
    let mut func = Function::new("while", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let init = b.splat(Literal::Float(0.0), &f32_vector(&[8, 128]));
    let while_op = b.build_while(
        &[init],
        |b, args| {
            let flag = b.scalar_const(Literal::Int(1), ScalarType::I1);
            (flag, vec![args[0]])
        },
        |b, args| vec![b.unary(ElementwiseOp::NegF, args[0])],
    );
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let replicated = Some(layout_32(REPLICATED));
    assert_eq!(in_layouts(&func, while_op), vec![replicated]);
    assert_eq!(out_layouts(&func, while_op), vec![replicated]);

    let before = body_block(&func, while_op, 0);
    let after = body_block(&func, while_op, 1);
    for block in [before, after] {
        let first = func.block(block).ops[0];
        assert!(func.op(first).kind.is_assume_layout());
    }
    let cond = func.terminator(before).unwrap();
    assert_eq!(in_layouts(&func, cond), vec![None, replicated]);
    let yield_op = func.terminator(after).unwrap();
    assert_eq!(in_layouts(&func, yield_op), vec![replicated]);
}

#[test]
fn test_condition_outside_while_is_rejected() {
    let mut func = Function::new("stray", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let flag = b.scalar_const(Literal::Int(1), ScalarType::I1);
    let v = b.splat(Literal::Float(0.0), &f32_vector(&[8, 128]));
    b.push(OpKind::Condition, &[flag, v], &[]);
    b.ret(&[]);

    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert_eq!(err.op_name, "scf.condition");
    assert_eq!(
        err.kind,
        InferErrorKind::Invariant(
            "expected scf.condition to terminate the before region of scf.while".into()
        )
    );
}

#[test]
fn test_if_with_incompatible_branches() {
    let vty = f32_vector(&[8, 256]);
    let mut func = Function::new("branch", &[f32_memref(&[16, 256], &[8, 128])]);
    let mem = func.args()[0];
    let mut b = FuncBuilder::new(&mut func);
    let cond = b.scalar_const(Literal::Int(1), ScalarType::I1);
    let c0 = b.index_const(0);
    let c11 = b.index_const(11);
    let if_op = b.build_if(
        cond,
        &[vty.clone()],
        |b| vec![b.vector_load(mem, &[c0, c0], vty.clone())],
        |b| vec![b.vector_load(mem, &[c11, c0], vty.clone())],
    );
    b.ret(&[]);

    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert_eq!(err.op, Some(if_op));
    assert!(matches!(err.kind, InferErrorKind::Incompatible(_)));
    assert_eq!(
        err.to_string(),
        "'scf.if' op failed to find a compatible layout in then and else branch for output 0"
    );
}

#[test]
fn test_branch_failure_is_wrapped() {
    let vty = f32_vector(&[8, 128]);
    let mut func = Function::new("branch", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let cond = b.scalar_const(Literal::Int(1), ScalarType::I1);
    let x = b.splat(Literal::Float(1.0), &vty);
    let opaque = OpKind::Opaque {
        name: "custom.shuffle".to_string(),
        elementwise: false,
    };
    b.build_if_then(cond, |b| {
        b.op1(opaque, &[x], vty.clone());
    });
    b.ret(&[]);

    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert!(matches!(err.kind, InferErrorKind::Region { .. }));
    assert_eq!(err.op_name, "scf.if");
    let root = err.root_cause();
    assert_eq!(root.op_name, "custom.shuffle");
    assert_eq!(
        err.to_string(),
        "'scf.if' op failed to infer layout for then branch: \
         'custom.shuffle' op unsupported in vector layout inference"
    );
}

// ============================================================================
// Memory access
// ============================================================================

#[test]
fn test_literal_index_sets_offset() {
    let mut func = Function::new("load", &[f32_memref(&[16, 256], &[8, 128])]);
    let mem = func.args()[0];
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let c11 = b.index_const(11);
    let v = b.vector_load(mem, &[c11, c0], f32_vector(&[8, 256]));
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let layout = out_layouts(&func, producer(&func, v))[0].unwrap();
    assert_eq!(layout.offsets(), [Offset::Fixed(3), Offset::ZERO]);
}

#[test]
fn test_negative_literal_index_is_rejected() {
    let mut func = Function::new("load", &[f32_memref(&[16, 256], &[8, 128])]);
    let mem = func.args()[0];
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let neg = b.index_const(-3);
    b.vector_load(mem, &[neg, c0], f32_vector(&[8, 256]));
    b.ret(&[]);

    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert_eq!(err.op_name, "vector.load");
    assert_eq!(
        err.kind,
        InferErrorKind::Invariant("negative index -3 in dimension 0".into())
    );
}

#[test]
fn test_dynamic_index_must_be_divisible() {
    let mut func = Function::new(
        "load",
        &[f32_memref(&[8, 1024], &[8, 128]), Type::index()],
    );
    let (mem, idx) = (func.args()[0], func.args()[1]);
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let v = b.vector_load(mem, &[c0, idx], f32_vector(&[8, 128]));
    b.ret(&[]);

    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert_eq!(err.op, Some(producer(&func, v)));
    assert_eq!(err.kind, InferErrorKind::NotDivisible { dim: 1, tiling: 128 });
}

#[test]
fn test_assumed_multiple_proves_alignment() {
    let mut func = Function::new(
        "load",
        &[f32_memref(&[8, 1024], &[8, 128]), Type::index()],
    );
    let (mem, idx) = (func.args()[0], func.args()[1]);
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let aligned = b.op1(OpKind::AssumeMultiple { multiple: 256 }, &[idx], Type::index());
    let v = b.vector_load(mem, &[c0, aligned], f32_vector(&[8, 128]));
    b.ret(&[]);

    infer_vector_layout(&mut func, TARGET).unwrap();
    let layout = out_layouts(&func, producer(&func, v))[0].unwrap();
    assert_eq!(layout.offsets(), ZERO_OFFSETS);
}

#[test]
fn test_bad_memory_tiling() {
    let mem_ty = Type::memref(
        &[8, 128],
        ScalarType::F32,
        vec![Tile::new(&[8, 128]), Tile::new(&[1, 128])],
    );
    let mut func = Function::new("load", &[mem_ty]);
    let mem = func.args()[0];
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    b.vector_load(mem, &[c0, c0], f32_vector(&[8, 128]));
    b.ret(&[]);

    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert_eq!(
        err.kind,
        InferErrorKind::MemoryTiling(TilingError::ExpectedOneLevel)
    );
}

// ============================================================================
// Native tiling
// ============================================================================

#[test]
fn test_native_tiling_ops() {
    let mut func = Function::new(
        "native",
        &[
            f32_memref(&[8, 128], &[8, 128]),
            f32_memref(&[128, 128], &[8, 128]),
        ],
    );
    let (lhs_mem, rhs_mem) = (func.args()[0], func.args()[1]);
    let mut b = FuncBuilder::new(&mut func);
    let c0 = b.index_const(0);
    let lhs = b.vector_load(lhs_mem, &[c0, c0], f32_vector(&[8, 128]));
    let rhs = b.vector_load(rhs_mem, &[c0, c0], f32_vector(&[128, 128]));
    let acc = b.splat(Literal::Float(0.0), &f32_vector(&[8, 128]));
    let product = b.op1(
        OpKind::Matmul {
            transpose_rhs: false,
        },
        &[lhs, rhs, acc],
        f32_vector(&[8, 128]),
    );
    let rotated = b.op1(
        OpKind::Rotate {
            amount: 1,
            dimension: 1,
        },
        &[product],
        f32_vector(&[8, 128]),
    );
    let tile = b.op1(OpKind::TileLoad, &[lhs_mem, c0, c0], f32_vector(&[8, 128]));
    let iota = b.op1(
        OpKind::Iota { dimension: Some(1) },
        &[],
        Type::vector(&[8, 128], ScalarType::I32),
    );
    b.ret(&[]);

    let report = infer_vector_layout(&mut func, TARGET).unwrap();
    for value in [product, rotated, tile, iota] {
        let layout = out_layouts(&func, producer(&func, value))[0].unwrap();
        assert!(layout.has_native_tiling(TARGET), "{layout:?}");
    }
    assert_eq!(report.count("tpu.matmul"), 1);

    // The replicated accumulator is consumed as is.
    let matmul_in = in_layouts(&func, producer(&func, product));
    assert_eq!(matmul_in[2], Some(layout_32(REPLICATED)));
}

// ============================================================================
// Round trips
// ============================================================================

fn loop_with_branch() -> Function {
    let vty = f32_vector(&[8, 128]);
    let mut func = Function::new("roundtrip", &[]);
    let mut b = FuncBuilder::new(&mut func);
    let lb = b.index_const(0);
    let ub = b.index_const(4);
    let step = b.index_const(1);
    let init = b.splat(Literal::Float(0.0), &vty);
    let flag = b.scalar_const(Literal::Int(1), ScalarType::I1);
    b.build_for(lb, ub, step, &[init], |b, _, iters| {
        let carried = iters[0];
        let if_op = b.build_if(
            flag,
            &[vty.clone()],
            |b| vec![b.binary(ElementwiseOp::AddF, carried, carried)],
            |_| vec![carried],
        );
        vec![b.result(if_op, 0)]
    });
    b.ret(&[]);
    func
}

#[test]
fn test_strip_and_rerun_is_identical() {
    let mut func = loop_with_branch();
    let first = infer_vector_layout(&mut func, TARGET).unwrap();
    assert_eq!(first.assume_inserted, 1);
    let annotated = func.clone();

    func.strip_layouts();
    let second = infer_vector_layout(&mut func, TARGET).unwrap();
    assert_eq!(second.assume_inserted, 0);
    assert_eq!(second.assume_reused, 1);
    assert_eq!(func, annotated);
}

#[test]
fn test_reannotation_is_rejected() {
    let mut func = loop_with_branch();
    infer_vector_layout(&mut func, TARGET).unwrap();
    let err = infer_vector_layout(&mut func, TARGET).unwrap_err();
    assert!(matches!(err.kind, InferErrorKind::Invariant(_)));
    assert!(err.to_string().ends_with("layout attributes already attached"));
}

#[test]
fn test_annotations_survive_serialization() {
    let mut func = loop_with_branch();
    InferVectorLayoutPass::new(128, 8).run(&mut func).unwrap();
    let json = serde_json::to_string(&func).unwrap();
    let back: Function = serde_json::from_str(&json).unwrap();
    assert_eq!(back, func);
    assert_eq!(tessel_infer::verify_annotations(&back), Ok(()));
}
