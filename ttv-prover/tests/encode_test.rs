// SPDX-License-Identifier: Apache-2.0

//! End-to-end encoding tests: build small functions with the IR builder,
//! encode them against the term backend, and check the resulting terms and
//! well-definedness predicates.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use ttv_ir::affine::{AffineExpr, AffineMap};
use ttv_ir::builder::FnBuilder;
use ttv_ir::ir::{
    self, Constant, Dim, IteratorKind, MixedVal, OpKind, Scalar, ScalarType, Type,
};
use ttv_prover::encode::encode;
use ttv_prover::solver::Solver;
use ttv_prover::state::State;
use ttv_prover::term_backend::{Term, TermConfig, TermSolver};
use ttv_prover::value::{Index, Value};

type R = Rc<Term>;

fn encoded(f: &ir::Fn) -> (TermSolver, State<R>) {
    let mut s = TermSolver::new(&TermConfig).unwrap();
    let mut st = State::new(&mut s, f).unwrap();
    encode(&mut s, &mut st, f, false).expect("encoding failed");
    (s, st)
}

fn ret_tensor(st: &State<R>, i: usize) -> ttv_prover::value::Tensor<R> {
    match &st.ret_values[i] {
        Value::Tensor(t) => t.clone(),
        other => panic!("return value {} is not a tensor: {:?}", i, other),
    }
}

fn dense_f32(values: &[f32]) -> Constant {
    Constant::Dense {
        ty: ir::TensorType {
            elem: ScalarType::F32,
            dims: vec![Dim::Static(values.len() as u64)],
        },
        values: values.iter().map(|v| Scalar::F32(*v)).collect(),
    }
}

#[test]
fn add_of_constant_tensors_is_pointwise_uninterpreted_add() {
    let mut b = FnBuilder::new("f");
    let c1 = b.constant(dense_f32(&[1.0, 2.0]));
    let c2 = b.constant(dense_f32(&[3.0, 4.0]));
    let r = b.push1(OpKind::Add { lhs: c1, rhs: c2 }, Type::tensor(ScalarType::F32, &[2]));
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    let two = Index::lit(&mut s, 2);
    assert_eq!(t.dims(), &[two]);

    // body(0) = fp.add(1.0, 3.0), body(1) = fp.add(2.0, 4.0).
    let mut ufs = st.ufs.borrow_mut();
    let add = ufs.fp_add(&mut s, ttv_prover::solver::FpSort::F32);
    let one_c = ufs.fp_const(&mut s, ttv_prover::solver::FpSort::F32, 1.0f32.to_bits() as u64);
    let three_c = ufs.fp_const(&mut s, ttv_prover::solver::FpSort::F32, 3.0f32.to_bits() as u64);
    drop(ufs);
    let expected = s.apply_uf(&add, &[one_c, three_c]);
    let zero = Index::zero(&mut s);
    let (elem, _) = t.get(&mut s, &[zero]);
    assert_eq!(elem, expected);

    // The operands have identical static shapes, so nothing is conditional.
    let wf = st.well_defined_pred(&mut s);
    let t_lit = s.bool_lit(true);
    assert_eq!(wf, t_lit);
}

#[test]
fn extract_of_dense_constant_resolves_and_bounds_hold() {
    let mut b = FnBuilder::new("f");
    let c = b.constant(Constant::Dense {
        ty: ir::TensorType {
            elem: ScalarType::Int(32),
            dims: vec![Dim::Static(2), Dim::Static(2)],
        },
        values: [5u64, 6, 7, 8]
            .iter()
            .map(|v| Scalar::Int { value: *v, width: 32 })
            .collect(),
    });
    let i0 = b.index_const(0);
    let i1 = b.index_const(1);
    let e = b.push1(OpKind::Extract { tensor: c, indices: vec![i0, i1] }, Type::int(32));
    b.ret(&[e]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let got = st.ret_values[0].as_expr().clone();
    let six = s.bv_lit(32, 6);
    assert_eq!(got, six);
    // 0 < 2 and 1 < 2 both hold, so the accumulated predicate folds away.
    let wf = st.well_defined_pred(&mut s);
    let t_lit = s.bool_lit(true);
    assert_eq!(wf, t_lit);
}

fn reduction_generic_fn() -> ir::Fn {
    // (i, j) -> (i, j) input, (i, j) -> (i) output; body adds into the
    // accumulator. A 3x4 input reduces to a length-3 result.
    let mut b = FnBuilder::new("f");
    let a = b.param("a", Type::tensor(ScalarType::F32, &[3, 4]));
    let init = b.push1(
        OpKind::InitTensor { dynamic_sizes: vec![] },
        Type::tensor(ScalarType::F32, &[3]),
    );
    let args = b.begin_block(&[Type::f32(), Type::f32()]);
    let sum = b.push1(OpKind::Add { lhs: args[0], rhs: args[1] }, Type::f32());
    b.push0(OpKind::Yield { operands: vec![sum] });
    let body = b.end_block();
    let in_map = AffineMap::identity(2);
    let out_map = AffineMap::new(2, 0, vec![AffineExpr::Dim(0)]);
    let r = b.push1(
        OpKind::Generic {
            inputs: vec![a],
            outputs: vec![init],
            indexing_maps: vec![in_map, out_map],
            iterators: vec![IteratorKind::Parallel, IteratorKind::Reduction],
            body,
        },
        Type::tensor(ScalarType::F32, &[3]),
    );
    b.ret(&[r]);
    b.build()
}

#[test]
fn reduction_generic_sums_over_dropped_axis() {
    let f = reduction_generic_fn();
    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    let three = Index::lit(&mut s, 3);
    assert_eq!(t.dims(), &[three]);
    let zero = Index::zero(&mut s);
    let (elem, _) = t.get(&mut s, &[zero]);
    let text = s.render(&elem);
    assert!(text.contains("sum.f32"), "no reduction total in: {}", text);
}

#[test]
fn parallel_generic_builds_elementwise_result() {
    let mut b = FnBuilder::new("f");
    let a = b.param("a", Type::tensor(ScalarType::F32, &[3, 4]));
    let init = b.push1(
        OpKind::InitTensor { dynamic_sizes: vec![] },
        Type::tensor(ScalarType::F32, &[3, 4]),
    );
    let args = b.begin_block(&[Type::f32(), Type::f32()]);
    let doubled = b.push1(OpKind::Add { lhs: args[0], rhs: args[0] }, Type::f32());
    b.push0(OpKind::Yield { operands: vec![doubled] });
    let body = b.end_block();
    let r = b.push1(
        OpKind::Generic {
            inputs: vec![a],
            outputs: vec![init],
            indexing_maps: vec![AffineMap::identity(2), AffineMap::identity(2)],
            iterators: vec![IteratorKind::Parallel, IteratorKind::Parallel],
            body,
        },
        Type::tensor(ScalarType::F32, &[3, 4]),
    );
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    assert_eq!(t.rank(), 2);
    // The output map is a permutation, so no reduction total appears.
    let zero = Index::zero(&mut s);
    let (elem, _) = t.get(&mut s, &[zero.clone(), zero]);
    let text = s.render(&elem);
    assert!(text.contains("fp.add.f32"), "{}", text);
    assert!(!text.contains("sum.f32"), "unexpected total in: {}", text);
}

#[test]
fn insert_slice_selects_source_inside_window() {
    let mut b = FnBuilder::new("f");
    let src = b.param("src", Type::tensor(ScalarType::F32, &[2, 2]));
    let tgt = b.param("tgt", Type::tensor(ScalarType::F32, &[4, 4]));
    let one = MixedVal::Static(1);
    let two = MixedVal::Static(2);
    let r = b.push1(
        OpKind::InsertSlice {
            source: src,
            dest: tgt,
            offsets: vec![one, one],
            sizes: vec![two, two],
            strides: vec![MixedVal::Static(1), MixedVal::Static(1)],
        },
        Type::tensor(ScalarType::F32, &[4, 4]),
    );
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);

    let src_t = ret_param_tensor(&f, &st, "src");
    let tgt_t = ret_param_tensor(&f, &st, "tgt");

    // Inside the window: result(2, 2) = src(1, 1).
    let two_l = Index::lit(&mut s, 2);
    let (inside, _) = t.get(&mut s, &[two_l.clone(), two_l]);
    let one_l = Index::one(&mut s);
    let (expect_src, _) = src_t.get(&mut s, &[one_l.clone(), one_l]);
    assert_eq!(inside, expect_src);

    // Outside: result(0, 0) = tgt(0, 0).
    let zero = Index::zero(&mut s);
    let (outside, _) = t.get(&mut s, &[zero.clone(), zero.clone()]);
    let (expect_tgt, _) = tgt_t.get(&mut s, &[zero.clone(), zero]);
    assert_eq!(outside, expect_tgt);
}

fn ret_param_tensor(f: &ir::Fn, st: &State<R>, name: &str) -> ttv_prover::value::Tensor<R> {
    let p = f.params.iter().find(|p| p.name == name).unwrap();
    match st.regs.get(p.value) {
        Value::Tensor(t) => t.clone(),
        other => panic!("param {} is not a tensor: {:?}", name, other),
    }
}

#[test]
fn extract_slice_with_unit_offsets_and_strides_is_identity() {
    let mut b = FnBuilder::new("f");
    let src = b.param("src", Type::tensor(ScalarType::F32, &[3]));
    let r = b.push1(
        OpKind::ExtractSlice {
            source: src,
            offsets: vec![MixedVal::Static(0)],
            sizes: vec![MixedVal::Static(3)],
            strides: vec![MixedVal::Static(1)],
        },
        Type::tensor(ScalarType::F32, &[3]),
    );
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    let src_t = ret_param_tensor(&f, &st, "src");
    let i = s.declare("i", &ttv_prover::solver::Sort::BitVec(Index::BITS)).unwrap();
    let (sliced, _) = t.get(&mut s, &[i.clone()]);
    let (original, _) = src_t.get(&mut s, &[i]);
    assert_eq!(sliced, original);
}

#[test]
fn copy_of_overlapping_views_is_never_well_defined() {
    let mut b = FnBuilder::new("f");
    let m = b.push1(OpKind::Alloc { dynamic_sizes: vec![] }, Type::memref(ScalarType::F32, &[4]));
    b.push0(OpKind::Copy {
        source: m,
        dest: m,
        input_permutation: None,
        output_permutation: None,
    });
    b.push0(OpKind::Return { operands: vec![] });
    let f = b.build();

    let (mut s, st) = encoded(&f);
    // The source and destination share a block and a range, so the noalias
    // obligation is plainly false.
    let wf = st.well_defined_pred(&mut s);
    let f_lit = s.bool_lit(false);
    assert_eq!(wf, f_lit);
}

#[test]
fn store_after_clone_is_never_well_defined() {
    let mut b = FnBuilder::new("f");
    let m = b.push1(OpKind::Alloc { dynamic_sizes: vec![] }, Type::memref(ScalarType::F32, &[4]));
    b.push1(OpKind::Clone { source: m }, Type::memref(ScalarType::F32, &[4]));
    let v = b.constant(Constant::Scalar(Scalar::F32(1.0)));
    let i = b.index_const(0);
    b.push0(OpKind::Store { value: v, memref: m, indices: vec![i] });
    b.push0(OpKind::Return { operands: vec![] });
    let f = b.build();

    let (mut s, st) = encoded(&f);
    // Clone froze the source block, so the later store cannot succeed.
    let wf = st.well_defined_pred(&mut s);
    let f_lit = s.bool_lit(false);
    assert_eq!(wf, f_lit);
}

#[test]
fn encoding_is_deterministic() {
    let f = reduction_generic_fn();
    let (mut s1, st1) = encoded(&f);
    let (mut s2, st2) = encoded(&f);
    let w1 = st1.well_defined_pred(&mut s1);
    let w2 = st2.well_defined_pred(&mut s2);
    assert_eq!(s1.render(&w1), s2.render(&w2));
    let t1 = ret_tensor(&st1, 0);
    let t2 = ret_tensor(&st2, 0);
    assert_eq!(t1, t2);
}

#[test]
fn broadcast_results_have_matching_dims_either_way() {
    let build = |swap: bool| {
        let mut b = FnBuilder::new("f");
        let a = b.param("a", Type::tensor(ScalarType::F32, &[2, 3]));
        let c = b.param("c", Type::tensor(ScalarType::F32, &[3]));
        let (lhs, rhs) = if swap { (c, a) } else { (a, c) };
        let r = b.push1(OpKind::Add { lhs, rhs }, Type::tensor(ScalarType::F32, &[2, 3]));
        b.ret(&[r]);
        b.build()
    };
    let (mut s1, st1) = encoded(&build(false));
    let (mut s2, st2) = encoded(&build(true));
    let d1: Vec<String> = ret_tensor(&st1, 0).dims().iter().map(|d| s1.render(d)).collect();
    let d2: Vec<String> = ret_tensor(&st2, 0).dims().iter().map(|d| s2.render(d)).collect();
    assert_eq!(d1, d2);
    // The trailing broadcast axis reads the shorter operand directly.
    let one = Index::one(&mut s1);
    let zero = Index::zero(&mut s1);
    let t = ret_tensor(&st1, 0);
    let (elem, _) = t.get(&mut s1, &[zero, one]);
    let text = s1.render(&elem);
    assert!(text.contains("fp.add.f32"), "{}", text);
}

#[test]
fn matmul_with_incompatible_inner_dims_is_never_well_defined() {
    let mut b = FnBuilder::new("f");
    let a = b.param("a", Type::tensor(ScalarType::F32, &[2, 3]));
    let c = b.param("c", Type::tensor(ScalarType::F32, &[4, 2]));
    let r = b.push1(OpKind::Matmul { lhs: a, rhs: c }, Type::tensor(ScalarType::F32, &[2, 2]));
    b.ret(&[r]);
    let f = b.build();
    let (mut s, st) = encoded(&f);
    let wf = st.well_defined_pred(&mut s);
    let f_lit = s.bool_lit(false);
    assert_eq!(wf, f_lit);
}

#[test]
fn buffer_cast_into_strided_layout_introduces_quantifier() {
    let strided = AffineMap::new(
        1,
        0,
        vec![AffineExpr::mul(AffineExpr::Dim(0), AffineExpr::Const(2))],
    );
    let mut b = FnBuilder::new("f");
    let t = b.param("t", Type::tensor(ScalarType::F32, &[4]));
    b.push1(
        OpKind::BufferCast { tensor: t },
        Type::memref_with_layout(ScalarType::F32, &[4], strided),
    );
    b.push0(OpKind::Return { operands: vec![] });
    let f = b.build();
    let (_, st) = encoded(&f);
    assert!(st.has_quantifier);
}

#[test]
fn buffer_cast_with_identity_layout_stays_quantifier_free() {
    let mut b = FnBuilder::new("f");
    let t = b.param("t", Type::tensor(ScalarType::F32, &[4]));
    b.push1(OpKind::BufferCast { tensor: t }, Type::memref(ScalarType::F32, &[4]));
    b.push0(OpKind::Return { operands: vec![] });
    let f = b.build();
    let (_, st) = encoded(&f);
    assert!(!st.has_quantifier);
}

#[test]
fn sparse_constant_sets_const_array_flag() {
    let mut b = FnBuilder::new("f");
    let c = b.constant(Constant::Sparse {
        ty: ir::TensorType {
            elem: ScalarType::F32,
            dims: vec![Dim::Static(2), Dim::Static(2)],
        },
        indices: vec![vec![0, 1]],
        values: vec![Scalar::F32(5.0)],
    });
    b.ret(&[c]);
    let f = b.build();
    let (_, st) = encoded(&f);
    assert!(st.has_const_array);
}

#[test]
fn generate_binds_induction_vars_to_body() {
    let mut b = FnBuilder::new("f");
    let args = b.begin_block(&[Type::index()]);
    b.push0(OpKind::Yield { operands: vec![args[0]] });
    let body = b.end_block();
    let r = b.push1(
        OpKind::Generate { dynamic_extents: vec![], body },
        Type::tensor(ScalarType::Index, &[4]),
    );
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    let two = Index::lit(&mut s, 2);
    let (elem, _) = t.get(&mut s, &[two.clone()]);
    assert_eq!(elem, two);
}

#[test]
fn pad_reads_source_inside_and_padding_outside() {
    let mut b = FnBuilder::new("f");
    let src = b.param("src", Type::tensor(ScalarType::F32, &[2]));
    let _args = b.begin_block(&[Type::index()]);
    let pad_val = b.constant(Constant::Scalar(Scalar::F32(0.0)));
    b.push0(OpKind::Yield { operands: vec![pad_val] });
    let body = b.end_block();
    let r = b.push1(
        OpKind::Pad {
            source: src,
            low: vec![MixedVal::Static(1)],
            high: vec![MixedVal::Static(1)],
            body,
        },
        Type::tensor(ScalarType::F32, &[4]),
    );
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    let four = Index::lit(&mut s, 4);
    assert_eq!(t.dims(), &[four]);

    let src_t = ret_param_tensor(&f, &st, "src");
    let one = Index::one(&mut s);
    let (inside, _) = t.get(&mut s, &[one]);
    let zero = Index::zero(&mut s);
    let (expect, _) = src_t.get(&mut s, &[zero.clone()]);
    assert_eq!(inside, expect);

    let (outside, _) = t.get(&mut s, &[zero]);
    let mut ufs = st.ufs.borrow_mut();
    let pad_const = ufs.fp_const(&mut s, ttv_prover::solver::FpSort::F32, 0);
    drop(ufs);
    assert_eq!(outside, pad_const);
}

#[test]
fn unsupported_ops_abort_with_structured_error() {
    let mut b = FnBuilder::new("f");
    let src = b.param("src", Type::tensor(ScalarType::F32, &[4]));
    b.push1(
        OpKind::Reshape { source: src, new_shape: vec![-1] },
        Type::tensor(ScalarType::F32, &[-1]),
    );
    b.push0(OpKind::Return { operands: vec![] });
    let f = b.build();

    let mut s = TermSolver::new(&TermConfig).unwrap();
    let mut st = State::new(&mut s, &f).unwrap();
    let err = encode(&mut s, &mut st, &f, false).unwrap_err();
    assert!(err.reason.contains("dynamic shape"), "{}", err);
    assert!(err.op.is_some());
}

#[test]
fn tensor_load_freezes_the_buffer() {
    let mut b = FnBuilder::new("f");
    let m = b.push1(OpKind::Alloc { dynamic_sizes: vec![] }, Type::memref(ScalarType::F32, &[2]));
    b.push1(OpKind::TensorLoad { memref: m }, Type::tensor(ScalarType::F32, &[2]));
    let v = b.constant(Constant::Scalar(Scalar::F32(1.0)));
    let i = b.index_const(0);
    b.push0(OpKind::Store { value: v, memref: m, indices: vec![i] });
    b.push0(OpKind::Return { operands: vec![] });
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let wf = st.well_defined_pred(&mut s);
    let f_lit = s.bool_lit(false);
    assert_eq!(wf, f_lit);
}

#[test]
fn fill_produces_a_splat_tensor() {
    let mut b = FnBuilder::new("f");
    let v = b.constant(Constant::Scalar(Scalar::F32(7.0)));
    let init = b.push1(
        OpKind::InitTensor { dynamic_sizes: vec![] },
        Type::tensor(ScalarType::F32, &[5]),
    );
    let r = b.push1(OpKind::Fill { value: v, dest: init }, Type::tensor(ScalarType::F32, &[5]));
    b.ret(&[r]);
    let f = b.build();

    let (mut s, st) = encoded(&f);
    let t = ret_tensor(&st, 0);
    let three = Index::lit(&mut s, 3);
    let (elem, _) = t.get(&mut s, &[three]);
    let mut ufs = st.ufs.borrow_mut();
    let seven = ufs.fp_const(&mut s, ttv_prover::solver::FpSort::F32, 7.0f32.to_bits() as u64);
    drop(ufs);
    assert_eq!(elem, seven);
}
