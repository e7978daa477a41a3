// SPDX-License-Identifier: Apache-2.0

//! Operation encoders and the block walker.
//!
//! Encoding walks a function's body in program order; each op reads its
//! operands from the register file, produces abstract values for its
//! results, and contributes well-definedness conjuncts to the state. The
//! only error is [`Unsupported`]; everything else the input could get wrong
//! becomes a solver obligation.

use std::rc::Rc;

use ttv_ir::ir::{self, Dim, MixedVal, ScalarType, Type};

use crate::affine::{apply_dim_map, encode_affine_expr};
use crate::error::{EncodeResult, Unsupported};
use crate::solver::{Expr, Solver};
use crate::state::{LoopScope, State};
use crate::uf::UfRegistry;
use crate::value::{
    add_one, fp_sort_of, get_1d_size, scalar_sort, zero_of_type, Float, Index, MemRef, Tensor,
    Value,
};

/// Encodes `func` into `st`. The state must have been created with
/// [`State::new`] for the same function so parameters are bound.
pub fn encode<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    print_ops: bool,
) -> EncodeResult<()> {
    encode_block(
        s,
        st,
        func,
        &func.body,
        print_ops,
        /*encode_mem_writes=*/ true,
        |_, _| Ok(false),
        |_, _, _| {},
    )
}

/// Walks a block in program order. `skip` may consume an op before encoding
/// (loop terminators); `after` runs after each successfully encoded op and
/// is what loop-body encoders use to collect per-op well-definedness.
pub fn encode_block<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    block: &ir::Block,
    print_ops: bool,
    encode_mem_writes: bool,
    mut skip: impl FnMut(&ir::Op, usize) -> EncodeResult<bool>,
    mut after: impl FnMut(&mut S, &mut State<S::Rep>, &ir::Op),
) -> EncodeResult<()> {
    for (index, op) in block.ops.iter().enumerate() {
        if print_ops {
            println!("  {}", op);
        }
        if skip(op, index)? {
            continue;
        }
        encode_op(s, st, func, op, encode_mem_writes)?;
        after(s, st, op);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared helpers.

fn result(op: &ir::Op, i: usize) -> &ir::OpResult {
    &op.results[i]
}

fn elem_of(ty: &Type, op: &ir::Op) -> EncodeResult<ScalarType> {
    ty.elem_type()
        .ok_or_else(|| Unsupported::in_op(op, "expected a shaped type"))
}

/// Index expressions for a mixed static/dynamic list.
fn mixed_exprs<S: Solver>(
    s: &mut S,
    st: &State<S::Rep>,
    vals: &[MixedVal],
) -> Vec<Expr<S::Rep>> {
    vals.iter()
        .map(|v| match v {
            MixedVal::Static(c) => Index::lit(s, *c),
            MixedVal::Val(id) => st.regs.get_index(*id),
        })
        .collect()
}

/// Dim expressions for a shaped result type, consuming `dynamic` operands in
/// order for the `?` axes. Rank-0 shapes get one unit dim.
fn shaped_dims<S: Solver>(
    s: &mut S,
    st: &State<S::Rep>,
    dims: &[Dim],
    dynamic: &[ir::ValueId],
) -> Vec<Expr<S::Rep>> {
    let mut dyn_iter = dynamic.iter();
    let out: Vec<_> = dims
        .iter()
        .map(|d| match d {
            Dim::Static(v) => Index::lit(s, *v as i64),
            Dim::Dynamic => {
                let id = dyn_iter.next().expect("missing dynamic size operand");
                st.regs.get_index(*id)
            }
        })
        .collect();
    assert!(dyn_iter.next().is_none(), "extra dynamic size operands");
    if out.is_empty() {
        vec![Index::one(s)]
    } else {
        out
    }
}

/// Width change between index-ish bit-vectors: truncate via extract, widen
/// via sign extension.
fn eval_index_cast<S: Solver>(
    s: &mut S,
    e: &Expr<S::Rep>,
    dst_width: u32,
) -> Expr<S::Rep> {
    let src_width = e.sort.bv_width();
    if src_width > dst_width {
        s.bv_extract(e, dst_width - 1, 0)
    } else if src_width < dst_width {
        s.bv_sext(e, dst_width - src_width)
    } else {
        e.clone()
    }
}

fn scalar_width(ty: ScalarType) -> u32 {
    match ty {
        ScalarType::Index => Index::BITS,
        ScalarType::Int(w) => w,
        other => panic!("no bit width for {}", other),
    }
}

/// Shape-select over a dim vector: `dims[index]` plus `index < rank`.
fn encode_dim_op<S: Solver>(
    s: &mut S,
    dims: &[Expr<S::Rep>],
    index: &Expr<S::Rep>,
) -> (Expr<S::Rep>, Expr<S::Rep>) {
    let mut res = dims[0].clone();
    for (i, d) in dims.iter().enumerate().skip(1) {
        let lit = Index::lit(s, i as i64);
        let here = s.eq(index, &lit);
        res = s.ite(&here, d, &res);
    }
    let rank = Index::lit(s, dims.len() as i64);
    let wf = s.bv_ult(index, &rank);
    (res, wf)
}

/// NumPy-style broadcast of two ranked tensors. Dims of the two results are
/// kept separate so a shape mismatch surfaces as a well-definedness
/// constraint, not a silent merge. Returns `None` on forms the encoding
/// does not cover (one side dynamic, or incompatible statics).
fn broadcast_tensors<S: Solver>(
    s: &mut S,
    st: &State<S::Rep>,
    func: &ir::Fn,
    arg0: ir::ValueId,
    arg1: ir::ValueId,
) -> Option<(Tensor<S::Rep>, Tensor<S::Rep>)> {
    let ty0 = func.type_of(arg0).as_tensor()?.clone();
    let ty1 = func.type_of(arg1).as_tensor()?.clone();
    let t0 = st.regs.get_tensor(arg0);
    let t1 = st.regs.get_tensor(arg1);
    let r0 = ty0.rank().max(1);
    let r1 = ty1.rank().max(1);
    let res_rank = r0.max(r1);
    let dim_of = |ty: &ir::TensorType, i: usize| -> Dim {
        if ty.rank() == 0 {
            Dim::Static(1)
        } else {
            ty.dims[i]
        }
    };

    let in0 = Index::bound_vars(s, res_rank);
    let in1 = Index::bound_vars(s, res_rank);
    let zero = Index::zero(s);

    let mut out0 = Vec::with_capacity(r0);
    let mut out1 = Vec::with_capacity(r1);
    let mut res_dims0 = Vec::with_capacity(res_rank);
    let mut res_dims1 = Vec::with_capacity(res_rank);

    for j in 0..res_rank {
        let i0 = j as isize - (res_rank - r0) as isize;
        let i1 = j as isize - (res_rank - r1) as isize;
        match (i0 >= 0, i1 >= 0) {
            (true, true) => {
                let (i0, i1) = (i0 as usize, i1 as usize);
                let d0 = dim_of(&ty0, i0);
                let d1 = dim_of(&ty1, i1);
                match (d0, d1) {
                    (Dim::Dynamic, Dim::Dynamic) => {
                        res_dims0.push(t0.dim(i0));
                        res_dims1.push(t1.dim(i1));
                        out0.push(in0[j].clone());
                        out1.push(in1[j].clone());
                    }
                    (Dim::Static(v0), Dim::Static(v1)) => {
                        if v0 != 1 && v1 != 1 && v0 != v1 {
                            return None;
                        }
                        let m = Index::lit(s, v0.max(v1) as i64);
                        res_dims0.push(m.clone());
                        res_dims1.push(m);
                        out0.push(if v0 == 1 { zero.clone() } else { in0[j].clone() });
                        out1.push(if v1 == 1 { zero.clone() } else { in1[j].clone() });
                    }
                    // Exactly one side dynamic: not supported.
                    _ => return None,
                }
            }
            (false, true) => {
                let d = t1.dim(i1 as usize);
                res_dims0.push(d.clone());
                res_dims1.push(d);
                out1.push(in1[j].clone());
            }
            (true, false) => {
                let d = t0.dim(i0 as usize);
                res_dims0.push(d.clone());
                res_dims1.push(d);
                out0.push(in0[j].clone());
            }
            (false, false) => unreachable!(),
        }
    }

    let b0 = t0.get(s, &out0).0;
    let m0 = Tensor::mk_lambda(s, t0.elem_type(), res_dims0, in0, b0);
    let b1 = t1.get(s, &out1).0;
    let m1 = Tensor::mk_lambda(s, t1.elem_type(), res_dims1, in1, b1);
    Some((m0, m1))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinArith {
    Add,
    Sub,
    Mul,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinArith {
    fn int_only(&self) -> bool {
        matches!(self, BinArith::BitAnd | BinArith::BitOr | BinArith::BitXor)
    }
}

fn apply_int_bin<S: Solver>(
    s: &mut S,
    kind: BinArith,
    a: &Expr<S::Rep>,
    b: &Expr<S::Rep>,
) -> Expr<S::Rep> {
    match kind {
        BinArith::Add => s.bv_add(a, b),
        BinArith::Sub => s.bv_sub(a, b),
        BinArith::Mul => s.bv_mul(a, b),
        BinArith::BitAnd => s.bv_and(a, b),
        BinArith::BitOr => s.bv_or(a, b),
        BinArith::BitXor => s.bv_xor(a, b),
    }
}

fn apply_float_bin<S: Solver>(
    s: &mut S,
    ufs: &mut UfRegistry<S::Rep>,
    prec: crate::solver::FpSort,
    kind: BinArith,
    a: &Expr<S::Rep>,
    b: &Expr<S::Rep>,
) -> Expr<S::Rep> {
    let fa = Float::new(a.clone(), prec);
    let fb = Float::new(b.clone(), prec);
    match kind {
        BinArith::Add => fa.add(s, ufs, &fb).expr,
        BinArith::Sub => {
            let nb = fb.neg(s, ufs);
            fa.add(s, ufs, &nb).expr
        }
        BinArith::Mul => fa.mul(s, ufs, &fb).expr,
        _ => panic!("bitwise op on float"),
    }
}

/// Binary arithmetic, dispatching on operand kind: scalar floats, scalar
/// integers/indices, or (broadcast) tensors.
fn encode_bin_arith<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    kind: BinArith,
    lhs: ir::ValueId,
    rhs: ir::ValueId,
) -> EncodeResult<()> {
    match func.type_of(lhs) {
        Type::Scalar(sc) if sc.is_float() => {
            if kind.int_only() {
                return Err(Unsupported::in_op(op, "bitwise op on float operands"));
            }
            let a = st.regs.get_float(lhs);
            let b = st.regs.get_float(rhs);
            let ufs_rc = Rc::clone(&st.ufs);
            let mut ufs = ufs_rc.borrow_mut();
            let e = apply_float_bin(s, &mut ufs, a.prec, kind, &a.expr, &b.expr);
            drop(ufs);
            st.regs.add(result(op, 0).value, Value::Float(Float::new(e, a.prec)));
        }
        Type::Scalar(_) => {
            let a = st.regs.get_expr(lhs);
            let b = st.regs.get_expr(rhs);
            let e = apply_int_bin(s, kind, &a, &b);
            let res = result(op, 0);
            let sc = res.ty.as_scalar().expect("scalar result");
            st.regs.add(res.value, Value::from_expr(e, sc));
        }
        Type::Tensor(tt) => {
            let elem = tt.elem;
            if kind.int_only() && !elem.is_int_or_index() {
                return Err(Unsupported::in_op(op, "bitwise op needs integer elements"));
            }
            let (a, b) = broadcast_tensors(s, st, func, lhs, rhs)
                .ok_or_else(|| Unsupported::in_op(op, "unsupported broadcast form"))?;
            let ufs_rc = Rc::clone(&st.ufs);
            let mut ufs = ufs_rc.borrow_mut();
            let res = a.elementwise_bin_op(s, &b, elem, |s, x, y| {
                if elem.is_float() {
                    apply_float_bin(s, &mut ufs, fp_sort_of(elem), kind, &x, &y)
                } else {
                    apply_int_bin(s, kind, &x, &y)
                }
            });
            drop(ufs);
            let wf = s.lists_equal(a.dims(), b.dims());
            st.regs.add(result(op, 0).value, Value::Tensor(res));
            st.well_defined(op.id, wf);
        }
        Type::MemRef(_) => return Err(Unsupported::in_op(op, "arithmetic on memref")),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnArith {
    Neg,
    Abs,
    BitNot,
}

fn encode_un_arith<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    kind: UnArith,
    arg: ir::ValueId,
) -> EncodeResult<()> {
    let apply_scalar = |s: &mut S,
                        ufs: &mut UfRegistry<S::Rep>,
                        elem: ScalarType,
                        e: Expr<S::Rep>|
     -> EncodeResult<Expr<S::Rep>> {
        match (kind, elem.is_float()) {
            (UnArith::Neg, true) => Ok(Float::new(e, fp_sort_of(elem)).neg(s, ufs).expr),
            (UnArith::Abs, true) => Ok(Float::new(e, fp_sort_of(elem)).abs(s, ufs).expr),
            (UnArith::Neg, false) => {
                let zero = s.bv_lit(e.sort.bv_width(), 0);
                Ok(s.bv_sub(&zero, &e))
            }
            (UnArith::BitNot, false) => Ok(s.bv_not(&e)),
            (UnArith::Abs, false) => Err(Unsupported::msg("abs needs float operands")),
            (UnArith::BitNot, true) => Err(Unsupported::msg("bitwise not on float operands")),
        }
    };
    match func.type_of(arg) {
        Type::Scalar(sc) => {
            let e = st.regs.get_expr(arg);
            let ufs_rc = Rc::clone(&st.ufs);
            let mut ufs = ufs_rc.borrow_mut();
            let r = apply_scalar(s, &mut ufs, *sc, e).map_err(|u| Unsupported {
                op: Some(op.to_string()),
                ..u
            })?;
            drop(ufs);
            let res = result(op, 0);
            let rsc = res.ty.as_scalar().expect("scalar result");
            st.regs.add(res.value, Value::from_expr(r, rsc));
        }
        Type::Tensor(tt) => {
            let elem = tt.elem;
            // Probe the scalar case once so bad type/op pairs fail before we
            // build the lambda.
            if matches!(
                (kind, elem.is_float()),
                (UnArith::Abs, false) | (UnArith::BitNot, true)
            ) {
                return Err(Unsupported::in_op(op, "unsupported element type"));
            }
            let t = st.regs.get_tensor(arg);
            let ufs_rc = Rc::clone(&st.ufs);
            let mut ufs = ufs_rc.borrow_mut();
            let res = t.elementwise_unary_op(s, elem, |s, e| {
                apply_scalar(s, &mut ufs, elem, e).expect("checked above")
            });
            drop(ufs);
            st.regs.add(result(op, 0).value, Value::Tensor(res));
        }
        _ => return Err(Unsupported::in_op(op, "unsupported type")),
    }
    Ok(())
}

/// Common path of buffer-filling ops: bulk-store a tensor into a memref.
/// The non-identity-layout path quantifies over the view and flips the
/// state's quantifier flag.
fn store_tensor_to<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    op: &ir::Op,
    tensor: Tensor<S::Rep>,
    memref: &MemRef<S::Rep>,
    memref_ty: &ir::MemRefType,
) {
    if memref_ty.layout.is_identity() {
        let arr = tensor.as_array(s);
        let zero = Index::zero(s);
        let len = tensor.get_1d_size(s);
        let success = memref.store_array(s, &mut st.mem, &arr, &zero, &len, false);
        st.well_defined(op.id, success);
    } else {
        let idxs = Index::bound_vars(s, memref.rank());
        let (t_val, t_ok) = tensor.get(s, &idxs);
        let (m_val, m_ok) = memref.get(s, &st.mem, &idxs);
        let ok = s.and(&t_ok, &m_ok);
        let agree = s.eq(&m_val, &t_val);
        let body = s.implies(&ok, &agree);
        // TODO: clarify whether this should be a precondition instead of UB.
        let wf = s.forall(&idxs, &body);
        st.well_defined(op.id, wf);
        st.has_quantifier = true;
    }
}

/// Fresh local block wrapped in a memref of the given type.
fn create_local_block<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    dims: Vec<Expr<S::Rep>>,
    memref_ty: &ir::MemRefType,
    writable: bool,
) -> EncodeResult<MemRef<S::Rep>> {
    let layout = crate::value::Layout::from_affine_map(s, &memref_ty.layout, &dims)?;
    let size = get_1d_size(s, &dims);
    let bid = st.mem.add_local_block(s, memref_ty.elem, size, writable);
    let offset = Index::zero(s);
    Ok(MemRef::new(memref_ty.elem, bid, offset, dims, layout))
}

/// Port of the rank-reduction inference for views: a source axis is dropped
/// only when it is statically 1 and does not match the next result axis.
fn compute_rank_reduction_mask(original: &[Dim], reduced: &[Dim]) -> Option<Vec<bool>> {
    let mut mask = Vec::with_capacity(original.len());
    let mut ri = 0;
    for o in original {
        if ri < reduced.len() && *o == reduced[ri] {
            mask.push(false);
            ri += 1;
        } else if *o == Dim::Static(1) {
            mask.push(true);
        } else {
            return None;
        }
    }
    if ri == reduced.len() {
        Some(mask)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Loop bodies.

/// Encodes a parallel loop body and builds one result tensor per yielded
/// value. `output_val_map` post-processes the yielded expression given the
/// output index vars (pad uses it to choose source vs padding).
fn encode_parallel_body<S: Solver>(
    s: &mut S,
    newst: &mut State<S::Rep>,
    func: &ir::Fn,
    block: &ir::Block,
    output_map: &ttv_ir::affine::AffineMap,
    welldef: &mut Expr<S::Rep>,
    mut output_val_map: Option<&mut dyn FnMut(&mut S, &Expr<S::Rep>, &[Expr<S::Rep>]) -> Expr<S::Rep>>,
) -> EncodeResult<Vec<Tensor<S::Rep>>> {
    let mut yielded: Vec<ir::ValueId> = Vec::new();
    encode_block(
        s,
        newst,
        func,
        block,
        /*print_ops=*/ false,
        /*encode_mem_writes=*/ false,
        |op, _| {
            if let ir::OpKind::Yield { operands } = &op.kind {
                assert!(!operands.is_empty(), "yield with no operands");
                yielded.extend(operands.iter().copied());
                return Ok(true);
            }
            Ok(false)
        },
        |s, stt, op| {
            let w = stt.op_well_defined(s, op.id);
            let combined = s.and(welldef, &w);
            *welldef = combined;
        },
    )?;

    let scope = newst.loop_scope();
    let ind_vars = scope.ind_vars.clone();
    let bounds = scope.ind_var_upper_bounds.clone();
    let out_ind_vars = apply_dim_map(output_map, &ind_vars);
    let mapped_bounds = apply_dim_map(output_map, &bounds);
    let tensor_sz = add_one(s, &mapped_bounds);

    let mut results = Vec::with_capacity(yielded.len());
    for v in yielded {
        let mut res_expr = newst.regs.get_expr(v);
        if let Some(f) = output_val_map.as_mut() {
            res_expr = f(s, &res_expr, &out_ind_vars);
        }
        let elem = newst.regs.get(v).scalar_type();
        results.push(Tensor::mk_lambda(
            s,
            elem,
            tensor_sz.clone(),
            out_ind_vars.clone(),
            res_expr,
        ));
    }
    Ok(results)
}

/// Recognizes the one supported reduction shape: the body yields
/// `add(v, acc)` or `add(acc, v)` where `acc` is the last block argument and
/// is used nowhere else, and sums `v` over the reduced induction vars.
fn encode_reduction_body<S: Solver>(
    s: &mut S,
    newst: &mut State<S::Rep>,
    func: &ir::Fn,
    block: &ir::Block,
    output_map: &ttv_ir::affine::AffineMap,
    welldef: &mut Expr<S::Rep>,
) -> EncodeResult<Tensor<S::Rep>> {
    let reject = || {
        Unsupported::msg("permuted output map or simple reduction form is supported only")
    };
    let ops = &block.ops;
    if ops.len() < 2 {
        return Err(reject());
    }
    let acc = block.args.last().expect("reduction body has arguments").value;
    let yielded = match &ops[ops.len() - 1].kind {
        ir::OpKind::Yield { operands } if operands.len() == 1 => operands[0],
        _ => return Err(reject()),
    };
    let sum_op = &ops[ops.len() - 2];
    if sum_op.results.len() != 1 || sum_op.results[0].value != yielded {
        return Err(reject());
    }
    let v = match &sum_op.kind {
        ir::OpKind::Add { lhs, rhs } if *lhs == acc => *rhs,
        ir::OpKind::Add { lhs, rhs } if *rhs == acc => *lhs,
        _ => return Err(reject()),
    };

    let instcount = ops.len();
    encode_block(
        s,
        newst,
        func,
        block,
        /*print_ops=*/ false,
        /*encode_mem_writes=*/ false,
        |op, idx| {
            if idx >= instcount - 2 {
                // The accumulating add and the yield are encoded by hand.
                return Ok(true);
            }
            if op.kind.operands().contains(&acc) {
                return Err(Unsupported::in_op(op, "unsupported reduction form"));
            }
            Ok(false)
        },
        |s, stt, op| {
            let w = stt.op_well_defined(s, op.id);
            let combined = s.and(welldef, &w);
            *welldef = combined;
        },
    )?;

    let scope = newst.loop_scope();
    let ind_vars = scope.ind_vars.clone();
    let bounds = scope.ind_var_upper_bounds.clone();
    let elem = newst.regs.get(v).scalar_type();
    let v_expr = newst.regs.get_expr(v);
    let v_dims = add_one(s, &bounds);
    let t_v = Tensor::mk_lambda(s, elem, v_dims, ind_vars.clone(), v_expr);

    let ufs_rc = Rc::clone(&newst.ufs);
    let mut ufs = ufs_rc.borrow_mut();
    if output_map.results.iter().all(|e| e.is_zero_const()) {
        // e.g. in (i, j) -> (i, j), out (i, j) -> (0):
        // the single output element is the total over every iteration.
        let total = t_v.sum(s, &mut ufs);
        let rank = output_map.num_results().max(1);
        let one = Index::one(s);
        return Ok(Tensor::splat(s, elem, total, vec![one; rank]));
    }

    // e.g. in (i, j) -> (i, j), out (i, j) -> (i):
    // result[i] is the total of the j-indexed sub-tensor at i.
    let mut used = vec![false; output_map.num_dims];
    for e in &output_map.results {
        match e.as_dim() {
            Some(pos) => used[pos] = true,
            None => return Err(reject()),
        }
    }
    let mut reduced_vars = Vec::new();
    let mut reduced_bounds = Vec::new();
    for (j, used) in used.iter().enumerate() {
        if !used {
            reduced_vars.push(ind_vars[j].clone());
            reduced_bounds.push(bounds[j].clone());
        }
    }
    if reduced_vars.is_empty() {
        return Err(reject());
    }
    let mapped_bounds = apply_dim_map(output_map, &bounds);
    let tensor_sz = add_one(s, &mapped_bounds);
    let inner_dims = add_one(s, &reduced_bounds);
    let v_at = t_v.get(s, &ind_vars).0;
    let inner = Tensor::mk_lambda(s, elem, inner_dims, reduced_vars, v_at);
    let t_sum = inner.sum(s, &mut ufs);
    let out_ind_vars = apply_dim_map(output_map, &ind_vars);
    Ok(Tensor::mk_lambda(s, elem, tensor_sz, out_ind_vars, t_sum))
}

/// Inclusive loop bounds for a generic op, derived from the first operand
/// axis that mentions each dim id.
fn find_loop_bounds<S: Solver>(
    s: &mut S,
    view_sizes: &[Expr<S::Rep>],
    flat_results: &[&ttv_ir::affine::AffineExpr],
    num_dims: usize,
) -> EncodeResult<Vec<Expr<S::Rep>>> {
    if view_sizes.is_empty() {
        // All operands have rank zero; a single one-trip loop.
        return Ok(vec![Index::zero(s)]);
    }
    let one = Index::one(s);
    let mut bounds: Vec<Option<Expr<S::Rep>>> = vec![None; num_dims];
    for (idx, e) in flat_results.iter().enumerate() {
        if let Some(pos) = e.as_dim() {
            if bounds[pos].is_none() {
                // Store size - 1: bounds compose additively, e.g.
                // i + j <= (N - 1) + (M - 1).
                bounds[pos] = Some(s.bv_sub(&view_sizes[idx], &one));
            }
        }
    }
    bounds
        .into_iter()
        .map(|b| b.ok_or_else(|| Unsupported::msg("loop dim not bounded by any operand")))
        .collect()
}

fn encode_generic<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    inputs: &[ir::ValueId],
    outputs: &[ir::ValueId],
    indexing_maps: &[ttv_ir::affine::AffineMap],
    body: &ir::Block,
    encode_mem_writes: bool,
) -> EncodeResult<()> {
    let all_tensors = outputs.iter().all(|o| func.type_of(*o).as_tensor().is_some());
    let all_memrefs = outputs.iter().all(|o| func.type_of(*o).as_memref().is_some());
    if outputs.is_empty() || (!all_tensors && !all_memrefs) {
        return Err(Unsupported::in_op(op, "tensor/buffer semantics is supported only"));
    }
    if all_memrefs && !encode_mem_writes {
        return Err(Unsupported::in_op(op, "memory writes are not allowed in this scope"));
    }
    let operands: Vec<ir::ValueId> = inputs.iter().chain(outputs.iter()).copied().collect();
    if indexing_maps.len() != operands.len() {
        return Err(Unsupported::in_op(op, "indexing map per operand is required"));
    }
    if body.args.len() != operands.len() {
        return Err(Unsupported::in_op(op, "unsupported block arguments"));
    }
    for arg in &body.args {
        match arg.ty.as_scalar() {
            Some(sc) if sc != ScalarType::Index => {}
            _ => return Err(Unsupported::in_op(op, "unsupported block arguments")),
        }
    }
    let num_dims = indexing_maps[0].num_dims;
    if indexing_maps.iter().any(|m| m.num_dims != num_dims || m.num_symbols != 0) {
        return Err(Unsupported::in_op(op, "inconsistent indexing maps"));
    }

    // Flattened (operand axis size, map result) pairs, in operand order.
    let mut view_sizes: Vec<Expr<S::Rep>> = Vec::new();
    let mut flat_results: Vec<&ttv_ir::affine::AffineExpr> = Vec::new();
    for (oid, map) in operands.iter().zip(indexing_maps.iter()) {
        let rank = match func.type_of(*oid) {
            Type::Tensor(t) => t.rank(),
            Type::MemRef(m) => m.rank(),
            Type::Scalar(_) => 0,
        };
        if rank == 0 {
            continue;
        }
        if map.num_results() != rank {
            return Err(Unsupported::in_op(op, "indexing map rank mismatch"));
        }
        let dims: Vec<Expr<S::Rep>> = match st.regs.get(*oid) {
            Value::Tensor(t) => t.dims().to_vec(),
            Value::MemRef(m) => m.dims().to_vec(),
            other => panic!("shaped operand bound to {:?}", other),
        };
        view_sizes.extend(dims.into_iter());
        flat_results.extend(map.results.iter());
    }

    let loop_bounds = find_loop_bounds(s, &view_sizes, &flat_results, num_dims)?;

    // Every operand shape must agree with the derived bounds wherever its
    // map touches them.
    for (idx, e) in flat_results.iter().enumerate() {
        let at_bounds = encode_affine_expr(s, e, &loop_bounds, &[])
            .ok_or_else(|| Unsupported::in_op(op, "unsupported affine expr"))?;
        let size = view_sizes[idx].clone();
        let non_zero = s.is_non_zero(&size);
        let fits = s.bv_ult(&at_bounds, &size);
        let wf = s.implies(&non_zero, &fits);
        st.well_defined(op.id, wf);
    }

    let output_map = indexing_maps.last().unwrap().clone();
    let is_parallel = output_map.is_permutation();

    let ind_vars = Index::bound_vars(s, loop_bounds.len());
    let mut newst = st.clone();
    let mut welldef = s.bool_lit(true);
    let scope = LoopScope {
        ind_vars: ind_vars.clone(),
        ind_var_upper_bounds: loop_bounds.clone(),
    };
    let tensors = newst.with_loop_scope(scope, |newst| {
        // Bind each block argument to its operand element at the mapped
        // index. Output arguments see the initial value of the output.
        for (arg_i, (oid, map)) in operands.iter().zip(indexing_maps.iter()).enumerate() {
            let arg = body.args[arg_i].value;
            match newst.regs.get(*oid).clone() {
                Value::Float(f) => newst.regs.add(arg, Value::Float(f)),
                Value::Int(e) => newst.regs.add(arg, Value::Int(e)),
                Value::Index(_) => {
                    return Err(Unsupported::in_op(op, "unsupported block argument type"))
                }
                Value::Tensor(t) => {
                    let elem = if map.num_results() == 0 {
                        // A single-element tensor.
                        let zero = Index::zero(s);
                        t.get(s, &[zero]).0
                    } else {
                        let idxs = map_indices(s, map, &ind_vars, op)?;
                        // Bounds were enforced with the loop bounds above.
                        t.get(s, &idxs).0
                    };
                    newst.regs.add(arg, Value::from_expr(elem, t.elem_type()));
                }
                Value::MemRef(m) => {
                    let idxs = map_indices(s, map, &ind_vars, op)?;
                    let (elem, ok) = m.get(s, &newst.mem, &idxs);
                    welldef = s.and(&welldef, &ok);
                    newst.regs.add(arg, Value::from_expr(elem, m.elem));
                }
            }
        }

        if is_parallel {
            encode_parallel_body(s, newst, func, body, &output_map, &mut welldef, None)
        } else {
            if outputs.len() > 1 {
                return Err(Unsupported::in_op(op, "unsupported reduction form"));
            }
            let t = encode_reduction_body(s, newst, func, body, &output_map, &mut welldef)?;
            Ok(vec![t])
        }
    })?;

    // No induction variable may witness undefined behavior.
    let one = Index::one(s);
    let mut inbounds = s.bool_lit(true);
    for (var, bound) in ind_vars.iter().zip(loop_bounds.iter()) {
        let limit = s.bv_add(bound, &one);
        let le = s.bv_ult(var, &limit);
        inbounds = s.and(&inbounds, &le);
    }
    let guarded = s.implies(&inbounds, &welldef);
    let closed = s.forall(&ind_vars, &guarded);
    st.well_defined(op.id, closed);

    if all_tensors {
        assert_eq!(op.results.len(), tensors.len(), "result per yielded value");
        for (r, t) in op.results.iter().zip(tensors.into_iter()) {
            st.regs.add(r.value, Value::Tensor(t));
        }
    } else {
        assert_eq!(outputs.len(), tensors.len(), "output buffer per yielded value");
        let mut success = s.bool_lit(true);
        for (o, t) in outputs.iter().zip(tensors.into_iter()) {
            let m = st.regs.get_memref(*o);
            let arr = t.as_array(s);
            let zero = Index::zero(s);
            let len = t.get_1d_size(s);
            let stored = m.store_array(s, &mut st.mem, &arr, &zero, &len, true);
            success = s.and(&success, &stored);
        }
        st.well_defined(op.id, success);
    }
    Ok(())
}

fn map_indices<S: Solver>(
    s: &mut S,
    map: &ttv_ir::affine::AffineMap,
    ind_vars: &[Expr<S::Rep>],
    op: &ir::Op,
) -> EncodeResult<Vec<Expr<S::Rep>>> {
    map.results
        .iter()
        .map(|e| {
            encode_affine_expr(s, e, ind_vars, &[])
                .ok_or_else(|| Unsupported::in_op(op, "unsupported affine expr"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// The dispatcher.

fn encode_op<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    encode_mem_writes: bool,
) -> EncodeResult<()> {
    use ir::OpKind;
    match &op.kind {
        OpKind::Add { lhs, rhs } => encode_bin_arith(s, st, func, op, BinArith::Add, *lhs, *rhs),
        OpKind::Sub { lhs, rhs } => encode_bin_arith(s, st, func, op, BinArith::Sub, *lhs, *rhs),
        OpKind::Mul { lhs, rhs } => encode_bin_arith(s, st, func, op, BinArith::Mul, *lhs, *rhs),
        OpKind::BitAnd { lhs, rhs } => {
            encode_bin_arith(s, st, func, op, BinArith::BitAnd, *lhs, *rhs)
        }
        OpKind::BitOr { lhs, rhs } => {
            encode_bin_arith(s, st, func, op, BinArith::BitOr, *lhs, *rhs)
        }
        OpKind::BitXor { lhs, rhs } => {
            encode_bin_arith(s, st, func, op, BinArith::BitXor, *lhs, *rhs)
        }
        OpKind::Neg { arg } => encode_un_arith(s, st, func, op, UnArith::Neg, *arg),
        OpKind::Abs { arg } => encode_un_arith(s, st, func, op, UnArith::Abs, *arg),
        OpKind::BitNot { arg } => encode_un_arith(s, st, func, op, UnArith::BitNot, *arg),

        OpKind::CmpF { pred: ir::FloatPred::Olt, lhs, rhs } => {
            match (func.type_of(*lhs), func.type_of(*rhs)) {
                (Type::Tensor(lt), Type::Tensor(_)) => {
                    if !lt.elem.is_float() {
                        return Err(Unsupported::in_op(op, "cmpf needs float-like elements"));
                    }
                    let prec = fp_sort_of(lt.elem);
                    let a = st.regs.get_tensor(*lhs);
                    let b = st.regs.get_tensor(*rhs);
                    let res = result(op, 0);
                    let res_elem = elem_of(&res.ty, op)?;
                    let ufs_rc = Rc::clone(&st.ufs);
                    let mut ufs = ufs_rc.borrow_mut();
                    let t = a.elementwise_bin_op(s, &b, res_elem, |s, x, y| {
                        Float::new(x, prec).fult(s, &mut ufs, &Float::new(y, prec))
                    });
                    drop(ufs);
                    let wf = s.lists_equal(a.dims(), b.dims());
                    st.regs.add(res.value, Value::Tensor(t));
                    st.well_defined(op.id, wf);
                    Ok(())
                }
                (Type::Scalar(a), Type::Scalar(b)) if a.is_float() && b.is_float() => {
                    let fa = st.regs.get_float(*lhs);
                    let fb = st.regs.get_float(*rhs);
                    let ufs_rc = Rc::clone(&st.ufs);
                    let mut ufs = ufs_rc.borrow_mut();
                    let e = fa.fult(s, &mut ufs, &fb);
                    drop(ufs);
                    st.regs.add(result(op, 0).value, Value::Int(e));
                    Ok(())
                }
                _ => Err(Unsupported::in_op(op, "unsupported cmpf operands")),
            }
        }

        OpKind::ExtF { arg } => encode_fp_cast(s, st, func, op, *arg, /*extend=*/ true),
        OpKind::TruncF { arg } => encode_fp_cast(s, st, func, op, *arg, /*extend=*/ false),

        OpKind::IndexCast { arg } => {
            match func.type_of(*arg) {
                Type::Tensor(_) => {
                    let res = result(op, 0);
                    let dst_elem = elem_of(&res.ty, op)?;
                    if !dst_elem.is_int_or_index() {
                        return Err(Unsupported::in_op(op, "index_cast needs integer elements"));
                    }
                    let w = scalar_width(dst_elem);
                    let t = st.regs.get_tensor(*arg);
                    let cast = t.elementwise_unary_op(s, dst_elem, |s, e| {
                        eval_index_cast(s, &e, w)
                    });
                    st.regs.add(res.value, Value::Tensor(cast));
                }
                Type::Scalar(sc) if sc.is_int_or_index() => {
                    let e = st.regs.get_expr(*arg);
                    let res = result(op, 0);
                    let dst = res.ty.as_scalar().expect("scalar result");
                    let w = scalar_width(dst);
                    let cast = eval_index_cast(s, &e, w);
                    st.regs.add(res.value, Value::from_expr(cast, dst));
                }
                _ => return Err(Unsupported::in_op(op, "unsupported type")),
            }
            Ok(())
        }

        OpKind::Constant { value } => encode_constant(s, st, op, value),

        OpKind::Select { cond, true_value, false_value } => {
            encode_select(s, st, func, op, *cond, *true_value, *false_value)
        }

        OpKind::AffineApply { map, dims, syms } => {
            if map.num_results() != 1 {
                return Err(Unsupported::in_op(op, "num results is larger than one"));
            }
            let dim_exprs: Vec<_> = dims.iter().map(|d| st.regs.get_index(*d)).collect();
            let sym_exprs: Vec<_> = syms.iter().map(|d| st.regs.get_index(*d)).collect();
            let e = encode_affine_expr(s, &map.results[0], &dim_exprs, &sym_exprs)
                .ok_or_else(|| Unsupported::in_op(op, "unsupported affine expr"))?;
            st.regs.add(result(op, 0).value, Value::Index(e));
            Ok(())
        }

        OpKind::Return { operands } => {
            for o in operands {
                let v = st.regs.get(*o).clone();
                st.ret_values.push(v);
            }
            Ok(())
        }

        OpKind::ShapeOf { arg } => {
            if func.type_of(*arg).as_tensor().is_none() {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let res = result(op, 0);
            if elem_of(&res.ty, op)? != ScalarType::Index {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let t = st.regs.get_tensor(*arg);
            let shape = Tensor::from_elems(s, ScalarType::Index, t.dims().to_vec());
            st.regs.add(res.value, Value::Tensor(shape));
            Ok(())
        }

        OpKind::ToExtentTensor { arg } => {
            // TODO: behavior on an error shape is underspecified upstream;
            // the operand passes through unchanged for now.
            log::warn!("to_extent_tensor passes its operand through: {}", op);
            let tt = func
                .type_of(*arg)
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?;
            let t = st.regs.get_tensor(*arg);
            let res = result(op, 0);
            let res_rank = res.ty.as_tensor().map(|t| t.rank()).unwrap_or(0);
            assert_eq!(tt.rank().max(1), res_rank.max(1), "extent rank mismatch");
            st.regs.add(res.value, Value::Tensor(t));
            Ok(())
        }

        OpKind::SparseConvert { arg } => {
            let t = st.regs.get_tensor(*arg);
            st.regs.add(result(op, 0).value, Value::Tensor(t));
            Ok(())
        }

        OpKind::Dim { source, index } => {
            let dims: Vec<Expr<S::Rep>> = match func.type_of(*source) {
                Type::Tensor(_) => st.regs.get_tensor(*source).dims().to_vec(),
                Type::MemRef(_) => st.regs.get_memref(*source).dims().to_vec(),
                _ => return Err(Unsupported::in_op(op, "unsupported type")),
            };
            let idx = st.regs.get_index(*index);
            let (res, wf) = encode_dim_op(s, &dims, &idx);
            st.regs.add(result(op, 0).value, Value::Index(res));
            st.well_defined(op.id, wf);
            Ok(())
        }

        OpKind::TensorCast { arg } => {
            let res = result(op, 0);
            let tt = res
                .ty
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?;
            let t = st.regs.get_tensor(*arg);
            for (i, d) in tt.dims.iter().enumerate() {
                if let Dim::Static(v) = d {
                    let lit = Index::lit(s, *v as i64);
                    let dim = t.dim(i);
                    let wf = s.eq(&dim, &lit);
                    st.well_defined(op.id, wf);
                }
            }
            st.regs.add(res.value, Value::Tensor(t));
            Ok(())
        }

        OpKind::Extract { tensor, indices } => {
            // TODO: the IR spec does not pin down out-of-bounds extracts;
            // encoded as UB until that is clarified.
            let t = st.regs.get_tensor(*tensor);
            let mut idxs: Vec<_> = indices.iter().map(|i| st.regs.get_index(*i)).collect();
            if idxs.is_empty() {
                idxs.push(Index::zero(s));
            }
            let (elem, inbounds) = t.get(s, &idxs);
            let res = result(op, 0);
            let sc = res
                .ty
                .as_scalar()
                .filter(|sc| scalar_sort(*sc) == elem.sort)
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?;
            st.regs.add(res.value, Value::from_expr(elem, sc));
            st.well_defined(op.id, inbounds);
            Ok(())
        }

        OpKind::Insert { scalar, dest, indices } => {
            let v = st.regs.get_expr(*scalar);
            let t = st.regs.get_tensor(*dest);
            if v.sort != scalar_sort(t.elem_type()) {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let idxs: Vec<_> = indices.iter().map(|i| st.regs.get_index(*i)).collect();
            let (updated, inbounds) = t.insert(s, &v, &idxs);
            st.regs.add(result(op, 0).value, Value::Tensor(updated));
            st.well_defined(op.id, inbounds);
            Ok(())
        }

        OpKind::ExtractSlice { source, offsets, sizes, strides } => {
            encode_extract_slice(s, st, func, op, *source, offsets, sizes, strides)
        }

        OpKind::InsertSlice { source, dest, offsets, sizes, strides } => {
            encode_insert_slice(s, st, func, op, *source, *dest, offsets, sizes, strides)
        }

        OpKind::FromElements { elems } => {
            let exprs: Vec<_> = elems.iter().map(|e| st.regs.get_expr(*e)).collect();
            let res = result(op, 0);
            let elem = elem_of(&res.ty, op)?;
            let t = Tensor::from_elems(s, elem, exprs);
            st.regs.add(res.value, Value::Tensor(t));
            Ok(())
        }

        OpKind::Generate { dynamic_extents, body } => {
            encode_generate(s, st, func, op, dynamic_extents, body)
        }

        OpKind::Pad { source, low, high, body } => {
            encode_pad(s, st, func, op, *source, low, high, body)
        }

        OpKind::CollapseShape { source, reassociation } => {
            let t = st.regs.get_tensor(*source);
            let res = result(op, 0);
            let res_ty = res
                .ty
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
                .clone();
            let mut new_dims = Vec::new();
            if reassociation.is_empty() {
                new_dims.push(Index::one(s));
            } else {
                for (i, group) in reassociation.iter().enumerate() {
                    let mut size = Index::one(s);
                    for idx in group {
                        let d = t.dim(*idx);
                        size = s.bv_mul(&size, &d);
                    }
                    // A static result dim that disagrees is undefined.
                    if let Dim::Static(v) = res_ty.dims[i] {
                        let lit = Index::lit(s, v as i64);
                        let wf = s.eq(&size, &lit);
                        st.well_defined(op.id, wf);
                    }
                    new_dims.push(size);
                }
            }
            let src_sz = t.get_1d_size(s);
            let dst_sz = get_1d_size(s, &new_dims);
            let wf = s.eq(&src_sz, &dst_sz);
            st.well_defined(op.id, wf);
            let reshaped = t.reshape(s, &new_dims);
            st.regs.add(res.value, Value::Tensor(reshaped));
            Ok(())
        }

        OpKind::ExpandShape { source, reassociation } => {
            encode_expand_shape(s, st, op, *source, reassociation)
        }

        OpKind::Reshape { source, new_shape } => {
            let t = st.regs.get_tensor(*source);
            let mut dims = Vec::with_capacity(new_shape.len());
            for d in new_shape {
                if *d < 0 {
                    return Err(Unsupported::in_op(op, "dynamic shape is unsupported"));
                }
                dims.push(Index::lit(s, *d));
            }
            let src_sz = t.get_1d_size(s);
            let dst_sz = get_1d_size(s, &dims);
            let wf = s.eq(&src_sz, &dst_sz);
            st.well_defined(op.id, wf);
            let reshaped = t.reshape(s, &dims);
            st.regs.add(result(op, 0).value, Value::Tensor(reshaped));
            Ok(())
        }

        OpKind::Concat { inputs, axis } => {
            if result(op, 0).ty.as_tensor().is_none() {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let mut t = st.regs.get_tensor(inputs[0]);
            for other_id in &inputs[1..] {
                let other = st.regs.get_tensor(*other_id);
                for i in 0..other.rank() {
                    if i != *axis {
                        let a = t.dim(i);
                        let b = other.dim(i);
                        let wf = s.eq(&a, &b);
                        st.well_defined(op.id, wf);
                    }
                }
                t = t.concat(s, &other, *axis);
            }
            st.regs.add(result(op, 0).value, Value::Tensor(t));
            Ok(())
        }

        OpKind::Reverse { input, axis } => {
            if result(op, 0).ty.as_tensor().is_none() {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let t = st.regs.get_tensor(*input);
            let r = t.reverse(s, *axis);
            st.regs.add(result(op, 0).value, Value::Tensor(r));
            Ok(())
        }

        OpKind::Tile { input, multiples } => {
            if result(op, 0).ty.as_tensor().is_none() {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let t = st.regs.get_tensor(*input);
            let r = t.tile(s, multiples);
            st.regs.add(result(op, 0).value, Value::Tensor(r));
            Ok(())
        }

        OpKind::InitTensor { dynamic_sizes } => {
            let res = result(op, 0);
            let tt = res
                .ty
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported tensor type"))?
                .clone();
            let dims = shaped_dims(s, st, &tt.dims, dynamic_sizes);
            let name = s.fresh_symbol("init_tensor");
            let t = Tensor::var(s, tt.elem, &name, dims);
            st.regs.add(res.value, Value::Tensor(t));
            Ok(())
        }

        OpKind::Generic { inputs, outputs, indexing_maps, iterators: _, body } => {
            encode_generic(s, st, func, op, inputs, outputs, indexing_maps, body, encode_mem_writes)
        }

        OpKind::LoopIndex { dim } => {
            let scope = st.loop_scope();
            assert!(*dim < scope.ind_vars.len(), "loop index out of range");
            let v = scope.ind_vars[*dim].clone();
            st.regs.add(result(op, 0).value, Value::Index(v));
            Ok(())
        }

        OpKind::Yield { .. } => Err(Unsupported::in_op(op, "yield outside of a loop body")),

        OpKind::Matmul { lhs, rhs } => {
            let lt = func
                .type_of(*lhs)
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "tensor semantics is supported only"))?;
            let rt = func
                .type_of(*rhs)
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "tensor semantics is supported only"))?;
            let res = result(op, 0);
            if Some(lt.elem) != res.ty.elem_type() || lt.elem != rt.elem {
                return Err(Unsupported::in_op(op, "unsupported types"));
            }
            if lt.rank() != 2 || rt.rank() != 2 {
                return Err(Unsupported::in_op(op, "unsupported form"));
            }
            let a = st.regs.get_tensor(*lhs);
            let b = st.regs.get_tensor(*rhs);
            let inner_a = a.dim(1);
            let inner_b = b.dim(0);
            let wf = s.eq(&inner_a, &inner_b);
            let ufs_rc = Rc::clone(&st.ufs);
            let mut ufs = ufs_rc.borrow_mut();
            let c = a.matmul(s, &mut ufs, &b);
            drop(ufs);
            st.regs.add(res.value, Value::Tensor(c));
            st.well_defined(op.id, wf);
            Ok(())
        }

        OpKind::Dot { lhs, rhs } => {
            let res = result(op, 0);
            let out_ty = res
                .ty
                .as_tensor()
                .ok_or_else(|| Unsupported::in_op(op, "tensor semantics is supported only"))?
                .clone();
            if out_ty.rank() != 1 || out_ty.dims != vec![Dim::Static(1)] {
                return Err(Unsupported::in_op(
                    op,
                    "the result tensor should have one element",
                ));
            }
            if func.type_of(*lhs).elem_type() != Some(out_ty.elem) {
                return Err(Unsupported::in_op(op, "casting is not supported"));
            }
            let a = st.regs.get_tensor(*lhs);
            let b = st.regs.get_tensor(*rhs);
            let a_sz = a.get_1d_size(s);
            let b_sz = b.get_1d_size(s);
            let wf = s.eq(&a_sz, &b_sz);
            st.well_defined(op.id, wf);
            let ufs_rc = Rc::clone(&st.ufs);
            let mut ufs = ufs_rc.borrow_mut();
            let d = a.dot(s, &mut ufs, &b);
            drop(ufs);
            let one = Index::one(s);
            let t = Tensor::splat(s, out_ty.elem, d, vec![one]);
            st.regs.add(res.value, Value::Tensor(t));
            Ok(())
        }

        OpKind::Fill { value, dest } => {
            let v = st.regs.get_expr(*value);
            match func.type_of(*dest) {
                Type::Tensor(tt) => {
                    let t = st.regs.get_tensor(*dest);
                    let filled = Tensor::splat(s, tt.elem, v, t.dims().to_vec());
                    st.regs.add(result(op, 0).value, Value::Tensor(filled));
                }
                Type::MemRef(mt) => {
                    if !encode_mem_writes {
                        return Err(Unsupported::in_op(
                            op,
                            "memory writes are not allowed in this scope",
                        ));
                    }
                    let mt = mt.clone();
                    let m = st.regs.get_memref(*dest);
                    let filled = Tensor::splat(s, mt.elem, v, m.dims().to_vec());
                    store_tensor_to(s, st, op, filled, &m, &mt);
                }
                _ => return Err(Unsupported::in_op(op, "unsupported type")),
            }
            Ok(())
        }

        OpKind::Copy { source, dest, input_permutation, output_permutation } => {
            if !encode_mem_writes {
                return Err(Unsupported::in_op(op, "memory writes are not allowed in this scope"));
            }
            if input_permutation.is_some() || output_permutation.is_some() {
                return Err(Unsupported::in_op(op, "copy with permutations is not supported"));
            }
            let mt = func
                .type_of(*dest)
                .as_memref()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
                .clone();
            let src = st.regs.get_memref(*source);
            let dst = st.regs.get_memref(*dest);
            for i in 0..src.rank() {
                let a = src.dim(i);
                let b = dst.dim(i);
                let wf = s.eq(&a, &b);
                st.well_defined(op.id, wf);
            }
            // The views must not overlap.
            let wf = src.noalias(s, &dst);
            st.well_defined(op.id, wf);
            let t = src.load_tensor(s, &st.mem);
            store_tensor_to(s, st, op, t, &dst, &mt);
            Ok(())
        }

        OpKind::Conv2D { image, filter, output, strides, dilations, layout } => {
            match output {
                None => {
                    let a = st.regs.get_tensor(*image);
                    let f = st.regs.get_tensor(*filter);
                    let ufs_rc = Rc::clone(&st.ufs);
                    let mut ufs = ufs_rc.borrow_mut();
                    let t = a.conv(s, &mut ufs, &f, strides, dilations, *layout);
                    drop(ufs);
                    st.regs.add(result(op, 0).value, Value::Tensor(t));
                }
                Some(out) => {
                    if !encode_mem_writes {
                        return Err(Unsupported::in_op(
                            op,
                            "memory writes are not allowed in this scope",
                        ));
                    }
                    let out_ty = func
                        .type_of(*out)
                        .as_memref()
                        .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?;
                    if !out_ty.layout.is_identity() {
                        return Err(Unsupported::in_op(
                            op,
                            "the output memref should have identity layout",
                        ));
                    }
                    let a = st.regs.get_memref(*image);
                    let f = st.regs.get_memref(*filter);
                    let o = st.regs.get_memref(*out);
                    let ufs_rc = Rc::clone(&st.ufs);
                    let mut ufs = ufs_rc.borrow_mut();
                    let success =
                        o.conv(s, &mut ufs, &mut st.mem, &a, &f, strides, dilations, *layout);
                    drop(ufs);
                    st.well_defined(op.id, success);
                }
            }
            Ok(())
        }

        OpKind::Alloc { dynamic_sizes } => {
            let res = result(op, 0);
            let mt = res
                .ty
                .as_memref()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
                .clone();
            if !mt.layout.is_identity() {
                return Err(Unsupported::in_op(
                    op,
                    "unsupported memref type for alloc: it has a non-identity layout map",
                ));
            }
            let dims = shaped_dims(s, st, &mt.dims, dynamic_sizes);
            let m = create_local_block(s, st, dims, &mt, /*writable=*/ true)?;
            st.regs.add(res.value, Value::MemRef(m));
            Ok(())
        }

        OpKind::Load { memref, indices } => {
            // TODO: the IR spec does not pin down out-of-bounds loads;
            // encoded as UB until that is clarified.
            let m = st.regs.get_memref(*memref);
            let idxs: Vec<_> = indices.iter().map(|i| st.regs.get_index(*i)).collect();
            let (value, ok) = m.get(s, &st.mem, &idxs);
            let res = result(op, 0);
            let sc = res
                .ty
                .as_scalar()
                .filter(|sc| scalar_sort(*sc) == value.sort)
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?;
            st.regs.add(res.value, Value::from_expr(value, sc));
            st.well_defined(op.id, ok);
            Ok(())
        }

        OpKind::Store { value, memref, indices } => {
            if !encode_mem_writes {
                return Err(Unsupported::in_op(op, "memory writes are not allowed in this scope"));
            }
            let m = st.regs.get_memref(*memref);
            let v = st.regs.get_expr(*value);
            if v.sort != scalar_sort(m.elem) {
                return Err(Unsupported::in_op(op, "unsupported type"));
            }
            let idxs: Vec<_> = indices.iter().map(|i| st.regs.get_index(*i)).collect();
            let ok = m.store(s, &mut st.mem, &v, &idxs);
            st.well_defined(op.id, ok);
            Ok(())
        }

        OpKind::SubView { source, offsets, sizes, strides } => {
            let src = st.regs.get_memref(*source);
            let res = result(op, 0);
            let res_ty = res
                .ty
                .as_memref()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?;
            let offset_exprs = mixed_exprs(s, st, offsets);
            let size_exprs = mixed_exprs(s, st, sizes);
            let stride_exprs = mixed_exprs(s, st, strides);
            if offsets.len() != src.rank() || sizes.len() != src.rank() || strides.len() != src.rank()
            {
                return Err(Unsupported::in_op(op, "unsupported form"));
            }
            if res_ty.rank() > src.rank() {
                return Err(Unsupported::in_op(op, "unsupported form"));
            }
            let rank_diff = src.rank() - res_ty.rank();
            let inferred: Vec<Dim> = sizes
                .iter()
                .map(|sz| match sz {
                    MixedVal::Static(v) => Dim::Static(*v as u64),
                    MixedVal::Val(_) => Dim::Dynamic,
                })
                .collect();
            let mask = compute_rank_reduction_mask(&inferred, &res_ty.dims)
                .ok_or_else(|| Unsupported::in_op(op, "subview result size mismatch"))?;
            let m = src.subview(s, &offset_exprs, &size_exprs, &stride_exprs, &mask, rank_diff);
            st.regs.add(res.value, Value::MemRef(m));
            Ok(())
        }

        OpKind::BufferCast { tensor } => {
            if !encode_mem_writes {
                return Err(Unsupported::in_op(op, "memory writes are not allowed in this scope"));
            }
            let res = result(op, 0);
            let mt = res
                .ty
                .as_memref()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
                .clone();
            let t = st.regs.get_tensor(*tensor);
            let dims = t.dims().to_vec();
            // The cast result is not writable through.
            let m = create_local_block(s, st, dims, &mt, /*writable=*/ false)?;
            store_tensor_to(s, st, op, t, &m, &mt);
            st.regs.add(res.value, Value::MemRef(m));
            Ok(())
        }

        OpKind::Clone { source } => {
            if !encode_mem_writes {
                return Err(Unsupported::in_op(op, "memory writes are not allowed in this scope"));
            }
            let src_ty = func
                .type_of(*source)
                .as_memref()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
                .clone();
            let src = st.regs.get_memref(*source);
            let dims = src.dims().to_vec();
            let m = create_local_block(s, st, dims, &src_ty, /*writable=*/ false)?;
            let t = src.load_tensor(s, &st.mem);
            store_tensor_to(s, st, op, t, &m, &src_ty);
            // The source is frozen as well.
            st.mem.set_writable(s, &src.bid, false);
            st.regs.add(result(op, 0).value, Value::MemRef(m));
            Ok(())
        }

        OpKind::TensorLoad { memref } => {
            let m = st.regs.get_memref(*memref);
            // The observed buffer must not change afterwards.
            st.mem.set_writable(s, &m.bid, false);
            let t = m.load_tensor(s, &st.mem);
            st.regs.add(result(op, 0).value, Value::Tensor(t));
            let wf = m.is_in_bounds(s, &st.mem);
            st.well_defined(op.id, wf);
            Ok(())
        }

        OpKind::TensorStore { tensor, memref } => {
            if !encode_mem_writes {
                return Err(Unsupported::in_op(op, "memory writes are not allowed in this scope"));
            }
            let mt = func
                .type_of(*memref)
                .as_memref()
                .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
                .clone();
            let t = st.regs.get_tensor(*tensor);
            let m = st.regs.get_memref(*memref);
            for i in 0..t.rank() {
                let a = t.dim(i);
                let b = m.dim(i);
                let wf = s.eq(&a, &b);
                st.well_defined(op.id, wf);
            }
            store_tensor_to(s, st, op, t, &m, &mt);
            Ok(())
        }
    }
}

fn encode_fp_cast<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    arg: ir::ValueId,
    extend: bool,
) -> EncodeResult<()> {
    let res = result(op, 0);
    let src_elem = match func.type_of(arg) {
        Type::Scalar(sc) if sc.is_float() => *sc,
        Type::Tensor(tt) if tt.elem.is_float() => tt.elem,
        _ => return Err(Unsupported::in_op(op, "unsupported fp type")),
    };
    let dst_elem = match &res.ty {
        Type::Scalar(sc) if sc.is_float() => *sc,
        Type::Tensor(tt) if tt.elem.is_float() => tt.elem,
        _ => return Err(Unsupported::in_op(op, "unsupported fp type")),
    };
    if src_elem == dst_elem {
        // A cast into the identical type is a no-op.
        let v = st.regs.get(arg).clone();
        st.regs.add(res.value, v);
        return Ok(());
    }
    let widening = src_elem == ScalarType::F32 && dst_elem == ScalarType::F64;
    if extend && !widening {
        return Err(Unsupported::in_op(op, "cannot extend into lower precision"));
    }
    if !extend && widening {
        return Err(Unsupported::in_op(op, "cannot truncate into higher precision"));
    }
    let ufs_rc = Rc::clone(&st.ufs);
    let mut ufs = ufs_rc.borrow_mut();
    match func.type_of(arg) {
        Type::Scalar(_) => {
            let f = st.regs.get_float(arg);
            let cast = if extend { f.extend(s, &mut ufs) } else { f.truncate(s, &mut ufs) };
            drop(ufs);
            st.regs.add(res.value, Value::Float(cast));
        }
        Type::Tensor(_) => {
            let t = st.regs.get_tensor(arg);
            let prec = fp_sort_of(src_elem);
            let cast = t.elementwise_unary_op(s, dst_elem, |s, e| {
                let f = Float::new(e, prec);
                if extend {
                    f.extend(s, &mut ufs).expr
                } else {
                    f.truncate(s, &mut ufs).expr
                }
            });
            drop(ufs);
            st.regs.add(res.value, Value::Tensor(cast));
        }
        _ => unreachable!(),
    }
    Ok(())
}

fn encode_constant<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    op: &ir::Op,
    value: &ir::Constant,
) -> EncodeResult<()> {
    let ufs_rc = Rc::clone(&st.ufs);
    let res = result(op, 0);
    match value {
        ir::Constant::Scalar(sc) => {
            let mut ufs = ufs_rc.borrow_mut();
            let e = crate::value::scalar_to_expr(s, &mut ufs, sc);
            drop(ufs);
            st.regs.add(res.value, Value::from_expr(e, sc.ty()));
        }
        ir::Constant::Splat { ty, value } => {
            if !ty.has_static_shape() {
                return Err(Unsupported::in_op(op, "constant tensor with dynamic shape"));
            }
            let mut ufs = ufs_rc.borrow_mut();
            let e = crate::value::scalar_to_expr(s, &mut ufs, value);
            drop(ufs);
            let dims = static_dim_exprs(s, &ty.dims);
            let t = Tensor::splat(s, ty.elem, e, dims);
            st.regs.add(res.value, Value::Tensor(t));
        }
        ir::Constant::Dense { ty, values } => {
            if !ty.has_static_shape() {
                return Err(Unsupported::in_op(op, "constant tensor with dynamic shape"));
            }
            assert_eq!(
                values.len() as u64,
                ty.num_elements(),
                "dense constant element count mismatch"
            );
            let mut ufs = ufs_rc.borrow_mut();
            let exprs: Vec<_> = values
                .iter()
                .map(|v| crate::value::scalar_to_expr(s, &mut ufs, v))
                .collect();
            drop(ufs);
            let flat = Tensor::from_elems(s, ty.elem, exprs);
            let dims = static_dim_exprs(s, &ty.dims);
            let t = flat.reshape(s, &dims);
            st.regs.add(res.value, Value::Tensor(t));
        }
        ir::Constant::Sparse { ty, indices, values } => {
            if !ty.has_static_shape() {
                return Err(Unsupported::in_op(op, "constant tensor with dynamic shape"));
            }
            let mut ufs = ufs_rc.borrow_mut();
            let exprs: Vec<_> = values
                .iter()
                .map(|v| crate::value::scalar_to_expr(s, &mut ufs, v))
                .collect();
            let zero = zero_of_type(s, &mut ufs, ty.elem);
            drop(ufs);
            let dims: Vec<u64> = ty
                .dims
                .iter()
                .map(|d| match d {
                    Dim::Static(v) => *v,
                    Dim::Dynamic => unreachable!(),
                })
                .collect();
            let t = Tensor::sparse(s, ty.elem, indices, &exprs, &dims, zero);
            st.has_const_array = true;
            st.regs.add(res.value, Value::Tensor(t));
        }
    }
    Ok(())
}

fn static_dim_exprs<S: Solver>(s: &mut S, dims: &[Dim]) -> Vec<Expr<S::Rep>> {
    if dims.is_empty() {
        return vec![Index::one(s)];
    }
    dims.iter()
        .map(|d| match d {
            Dim::Static(v) => Index::lit(s, *v as i64),
            Dim::Dynamic => panic!("dynamic dim in static shape"),
        })
        .collect()
}

fn encode_select<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    cond: ir::ValueId,
    true_value: ir::ValueId,
    false_value: ir::ValueId,
) -> EncodeResult<()> {
    match (func.type_of(true_value), func.type_of(false_value)) {
        (Type::Tensor(_), Type::Tensor(_)) => {
            let tv = st.regs.get_tensor(true_value);
            let fv = st.regs.get_tensor(false_value);
            let mut welldef = s.lists_equal(tv.dims(), fv.dims());
            let t = if func.type_of(cond).as_tensor().is_some() {
                let cv = st.regs.get_tensor(cond);
                let dims_eq = s.lists_equal(tv.dims(), cv.dims());
                welldef = s.and(&welldef, &dims_eq);
                Tensor::mk_ite(s, |s, idxs| cv.get(s, idxs).0, &tv, &fv)
            } else {
                let ce = st.regs.get_int(cond);
                Tensor::mk_ite(s, |_, _| ce.clone(), &tv, &fv)
            };
            st.regs.add(result(op, 0).value, Value::Tensor(t));
            st.well_defined(op.id, welldef);
            Ok(())
        }
        (Type::MemRef(_), Type::MemRef(_)) => {
            if func.type_of(cond).as_scalar().is_none() {
                return Err(Unsupported::in_op(
                    op,
                    "for memref operands, an i1 condition is supported only",
                ));
            }
            let tv = st.regs.get_memref(true_value);
            let fv = st.regs.get_memref(false_value);
            let ce = st.regs.get_int(cond);
            let m = MemRef::mk_ite(s, &ce, &tv, &fv);
            // Without equal dims the layout of the merged view is bogus.
            let wf = s.lists_equal(tv.dims(), fv.dims());
            st.regs.add(result(op, 0).value, Value::MemRef(m));
            st.well_defined(op.id, wf);
            Ok(())
        }
        (Type::Scalar(_), Type::Scalar(_)) => {
            let tv = st.regs.get_expr(true_value);
            let fv = st.regs.get_expr(false_value);
            let ce = st.regs.get_int(cond);
            let one = s.bv_lit(1, 1);
            let is_true = s.eq(&ce, &one);
            let e = s.ite(&is_true, &tv, &fv);
            let res = result(op, 0);
            let sc = res.ty.as_scalar().expect("scalar result");
            st.regs.add(res.value, Value::from_expr(e, sc));
            Ok(())
        }
        _ => Err(Unsupported::in_op(op, "unsupported operands")),
    }
}

fn encode_extract_slice<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    source: ir::ValueId,
    offsets: &[MixedVal],
    sizes: &[MixedVal],
    strides: &[MixedVal],
) -> EncodeResult<()> {
    let src = st.regs.get_tensor(source);
    let src_rank = func
        .type_of(source)
        .as_tensor()
        .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
        .rank();
    let res = result(op, 0);
    let res_ty = res
        .ty
        .as_tensor()
        .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
        .clone();
    if offsets.len() != sizes.len() || sizes.len() != strides.len() || strides.len() != src_rank {
        return Err(Unsupported::in_op(op, "unsupported form"));
    }
    let offset_exprs = mixed_exprs(s, st, offsets);
    let size_exprs = mixed_exprs(s, st, sizes);
    let stride_exprs = mixed_exprs(s, st, strides);

    // Output dims come from the sizes, skipping static-1 sizes that were
    // dropped from the result type.
    let res_rank = res_ty.rank();
    let mut dims = Vec::with_capacity(res_rank.max(1));
    let mut j = 0;
    for i in 0..res_rank {
        if res_ty.dims[i] == Dim::Static(1) {
            dims.push(Index::one(s));
            continue;
        }
        loop {
            if j >= sizes.len() {
                return Err(Unsupported::in_op(op, "unsupported form"));
            }
            match sizes[j] {
                MixedVal::Val(_) => break,
                MixedVal::Static(v) => {
                    if v != 1 {
                        break;
                    }
                    j += 1;
                }
            }
        }
        dims.push(size_exprs[j].clone());
        j += 1;
    }
    if dims.is_empty() {
        dims.push(Index::one(s));
    }

    let in_idxs = Index::bound_vars(s, dims.len());
    let mut out_idxs = Vec::with_capacity(src_rank);
    let mut idx = 0;
    for i in 0..src_rank {
        let size_is_one = idx >= res_rank
            || (matches!(sizes[i], MixedVal::Static(1)) && !res_ty.dims[idx].is_dynamic());
        if size_is_one {
            out_idxs.push(offset_exprs[i].clone());
        } else {
            let scaled = s.bv_mul(&in_idxs[idx], &stride_exprs[i]);
            out_idxs.push(s.bv_add(&scaled, &offset_exprs[i]));
            idx += 1;
        }
    }
    let body = src.get(s, &out_idxs).0;
    let t = Tensor::mk_lambda(s, src.elem_type(), dims, in_idxs, body);
    st.regs.add(res.value, Value::Tensor(t));
    Ok(())
}

fn encode_insert_slice<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    source: ir::ValueId,
    dest: ir::ValueId,
    offsets: &[MixedVal],
    sizes: &[MixedVal],
    strides: &[MixedVal],
) -> EncodeResult<()> {
    let src = st.regs.get_tensor(source);
    let tgt = st.regs.get_tensor(dest);
    let rank = func
        .type_of(source)
        .as_tensor()
        .map(|t| t.rank())
        .unwrap_or(0);
    let dst_rank = func.type_of(dest).as_tensor().map(|t| t.rank()).unwrap_or(0);
    let res_rank = result(op, 0)
        .ty
        .as_tensor()
        .map(|t| t.rank())
        .unwrap_or(0);
    if rank != dst_rank || rank != res_rank {
        return Err(Unsupported::in_op(
            op,
            "unsupported tensor types of src and dest: their ranks do not match",
        ));
    }
    assert_eq!(offsets.len(), rank);
    assert_eq!(sizes.len(), rank);
    assert_eq!(strides.len(), rank);
    let offset_exprs = mixed_exprs(s, st, offsets);
    let size_exprs = mixed_exprs(s, st, sizes);
    let stride_exprs = mixed_exprs(s, st, strides);

    let ind_vars = Index::bound_vars(s, rank.max(1));
    let dims = tgt.dims().to_vec();
    let mut src_idxs = Vec::with_capacity(rank);
    let mut cond = s.bool_lit(true);
    for i in 0..rank {
        let shifted = s.bv_sub(&ind_vars[i], &offset_exprs[i]);
        let quot = s.bv_udiv(&shifted, &stride_exprs[i]);
        src_idxs.push(quot);
        let rem = s.bv_urem(&shifted, &stride_exprs[i]);
        let zero = Index::zero(s);
        let aligned = s.eq(&rem, &zero);
        let extent = s.bv_mul(&size_exprs[i], &stride_exprs[i]);
        let within = s.bv_ult(&shifted, &extent);
        let both = s.and(&aligned, &within);
        cond = s.and(&cond, &both);
    }

    let (src_elem, src_ok) = src.get(s, &src_idxs);
    let (tgt_elem, tgt_ok) = tgt.get(s, &ind_vars);
    let output = s.ite(&cond, &src_elem, &tgt_elem);

    // Whenever an in-bounds target element picks the source, that source
    // read must be in bounds too.
    let pick_src = s.and(&tgt_ok, &cond);
    let body = s.implies(&pick_src, &src_ok);
    let wf = s.forall(&ind_vars, &body);
    st.well_defined(op.id, wf);
    let t = Tensor::mk_lambda(s, src.elem_type(), dims, ind_vars, output);
    st.regs.add(result(op, 0).value, Value::Tensor(t));
    Ok(())
}

fn encode_generate<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    dynamic_extents: &[ir::ValueId],
    body: &ir::Block,
) -> EncodeResult<()> {
    let res = result(op, 0);
    let res_ty = res
        .ty
        .as_tensor()
        .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
        .clone();
    let one = Index::one(s);
    let mut dyn_iter = dynamic_extents.iter();
    let mut upper = Vec::with_capacity(res_ty.rank());
    for d in &res_ty.dims {
        let extent = match d {
            Dim::Static(v) => Index::lit(s, *v as i64),
            Dim::Dynamic => {
                let id = dyn_iter.next().expect("missing dynamic extent");
                st.regs.get_index(*id)
            }
        };
        upper.push(s.bv_sub(&extent, &one));
    }

    let ind_vars = Index::bound_vars(s, upper.len());
    let mut newst = st.clone();
    let mut welldef = s.bool_lit(true);
    let identity = ttv_ir::affine::AffineMap::identity(upper.len());
    let scope = LoopScope { ind_vars: ind_vars.clone(), ind_var_upper_bounds: upper };
    let tensors = newst.with_loop_scope(scope, |newst| {
        for (arg, var) in body.args.iter().zip(ind_vars.iter()) {
            newst.regs.add(arg.value, Value::Index(var.clone()));
        }
        encode_parallel_body(s, newst, func, body, &identity, &mut welldef, None)
    })?;
    let t = tensors.into_iter().next().expect("generate yields one value");

    let inb = t.is_in_bounds(s, &ind_vars);
    let guarded = s.implies(&inb, &welldef);
    let wf = s.forall(&ind_vars, &guarded);
    st.regs.add(res.value, Value::Tensor(t));
    st.well_defined(op.id, wf);
    Ok(())
}

fn encode_pad<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    func: &ir::Fn,
    op: &ir::Op,
    source: ir::ValueId,
    low: &[MixedVal],
    high: &[MixedVal],
    body: &ir::Block,
) -> EncodeResult<()> {
    let res = result(op, 0);
    let res_ty = res
        .ty
        .as_tensor()
        .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
        .clone();
    let src = st.regs.get_tensor(source);
    let pad_low = mixed_exprs(s, st, low);
    let pad_high = mixed_exprs(s, st, high);
    assert_eq!(pad_low.len(), src.rank(), "one low pad per axis");
    assert_eq!(pad_high.len(), src.rank(), "one high pad per axis");

    let mut out_dims = Vec::with_capacity(src.rank());
    for i in 0..src.rank() {
        let d = src.dim(i);
        let grown = s.bv_add(&d, &pad_low[i]);
        out_dims.push(s.bv_add(&grown, &pad_high[i]));
    }
    let one = Index::one(s);
    let upper: Vec<_> = out_dims.iter().map(|d| s.bv_sub(d, &one)).collect();

    let ind_vars = Index::bound_vars(s, out_dims.len());
    let mut newst = st.clone();
    let mut welldef = s.bool_lit(true);
    let identity = ttv_ir::affine::AffineMap::identity(out_dims.len());
    let scope = LoopScope { ind_vars: ind_vars.clone(), ind_var_upper_bounds: upper };
    let src_for_map = src.clone();
    let pad_low_for_map = pad_low.clone();
    let mut padding_or_source = |s: &mut S, pad: &Expr<S::Rep>, idxs: &[Expr<S::Rep>]| {
        // Inside [low, low + srcDim) on every axis the source shines
        // through; outside, the body's padding value is used.
        let mut is_source = s.bool_lit(true);
        let mut src_idxs = Vec::with_capacity(idxs.len());
        for (i, idx) in idxs.iter().enumerate() {
            let lo = &pad_low_for_map[i];
            let d = src_for_map.dim(i);
            let hi = s.bv_add(lo, &d);
            let ge = s.bv_ule(lo, idx);
            let lt = s.bv_ult(idx, &hi);
            let within = s.and(&ge, &lt);
            is_source = s.and(&is_source, &within);
            src_idxs.push(s.bv_sub(idx, lo));
        }
        let elem = src_for_map.get(s, &src_idxs).0;
        s.ite(&is_source, &elem, pad)
    };
    let tensors = newst.with_loop_scope(scope, |newst| {
        for (arg, var) in body.args.iter().zip(ind_vars.iter()) {
            newst.regs.add(arg.value, Value::Index(var.clone()));
        }
        encode_parallel_body(
            s,
            newst,
            func,
            body,
            &identity,
            &mut welldef,
            Some(&mut padding_or_source),
        )
    })?;
    let t = tensors.into_iter().next().expect("pad yields one value");

    let inb = t.is_in_bounds(s, &ind_vars);
    let guarded = s.implies(&inb, &welldef);
    let wf = s.forall(&ind_vars, &guarded);
    st.well_defined(op.id, wf);

    // Statically-known output dims must match the padded sizes.
    for (i, d) in res_ty.dims.iter().enumerate() {
        if let Dim::Static(v) = d {
            let lit = Index::lit(s, *v as i64);
            let dim = t.dim(i);
            let eq = s.eq(&dim, &lit);
            st.well_defined(op.id, eq);
        }
    }
    st.regs.add(res.value, Value::Tensor(t));
    Ok(())
}

fn encode_expand_shape<S: Solver>(
    s: &mut S,
    st: &mut State<S::Rep>,
    op: &ir::Op,
    source: ir::ValueId,
    reassociation: &[Vec<usize>],
) -> EncodeResult<()> {
    let t = st.regs.get_tensor(source);
    let res = result(op, 0);
    let res_ty = res
        .ty
        .as_tensor()
        .ok_or_else(|| Unsupported::in_op(op, "unsupported type"))?
        .clone();
    // Seed with the static dims; dynamic slots are filled per group below.
    let mut new_dims: Vec<Expr<S::Rep>> = res_ty
        .dims
        .iter()
        .map(|d| match d {
            Dim::Static(v) => Index::lit(s, *v as i64),
            Dim::Dynamic => Index::zero(s),
        })
        .collect();

    for (srci, group) in reassociation.iter().enumerate() {
        let org_dim = t.dim(srci);
        let mut unknown_dim: Option<usize> = None;
        let mut const_size: u64 = 1;
        for id in group {
            match res_ty.dims[*id] {
                Dim::Dynamic => {
                    if unknown_dim.is_some() {
                        return Err(Unsupported::in_op(
                            op,
                            "more than one unknown dimension size in one group",
                        ));
                    }
                    unknown_dim = Some(*id);
                }
                Dim::Static(v) => const_size *= v,
            }
        }
        let Some(unknown_dim) = unknown_dim else {
            // Fully static group; nothing to derive.
            continue;
        };
        if Index::BITS < 64 && const_size >= (1u64 << Index::BITS) {
            return Err(Unsupported::in_op(op, "tensor size is too large"));
        }
        // The original size must divide the static product.
        let group_sz = Index::lit(s, const_size as i64);
        let rem = s.bv_urem(&org_dim, &group_sz);
        let zero = Index::zero(s);
        let wf = s.eq(&rem, &zero);
        st.well_defined(op.id, wf);
        new_dims[unknown_dim] = s.bv_udiv(&org_dim, &group_sz);
    }

    let reshaped = t.reshape(s, &new_dims);
    st.regs.add(res.value, Value::Tensor(reshaped));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term_backend::{TermConfig, TermSolver};
    use test_case::test_case;

    #[test_case(32, 8, 0x80 ; "truncate keeps low bits")]
    #[test_case(8, 32, 0xffff_ff80 ; "widen sign extends")]
    #[test_case(16, 16, 0xff80 ; "same width is a no-op")]
    fn index_cast_widths(src: u32, dst: u32, expected: u64) {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let v = s.bv_lit(src, 0xff80);
        let cast = eval_index_cast(&mut s, &v, dst);
        let expect = s.bv_lit(dst, expected);
        assert_eq!(cast, expect);
    }

    #[test]
    fn rank_reduction_mask_drops_static_ones() {
        let orig = [Dim::Static(2), Dim::Static(1), Dim::Static(3)];
        let reduced = [Dim::Static(2), Dim::Static(3)];
        assert_eq!(
            compute_rank_reduction_mask(&orig, &reduced),
            Some(vec![false, true, false])
        );
        // A non-unit axis cannot be dropped.
        let bad = [Dim::Static(2), Dim::Static(4), Dim::Static(3)];
        assert_eq!(compute_rank_reduction_mask(&bad, &reduced), None);
    }

    #[test]
    fn rank_reduction_mask_matches_dynamic_dims() {
        let orig = [Dim::Dynamic, Dim::Static(1)];
        let reduced = [Dim::Dynamic];
        assert_eq!(compute_rank_reduction_mask(&orig, &reduced), Some(vec![false, true]));
    }

    #[test]
    fn dim_op_selects_by_index_and_bounds_the_index() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let dims = vec![Index::lit(&mut s, 7), Index::lit(&mut s, 9)];
        let one = Index::one(&mut s);
        let (d, wf) = encode_dim_op(&mut s, &dims, &one);
        let nine = Index::lit(&mut s, 9);
        assert_eq!(d, nine);
        let t = s.bool_lit(true);
        assert_eq!(wf, t);
        let three = Index::lit(&mut s, 3);
        let (_, wf_oob) = encode_dim_op(&mut s, &dims, &three);
        let f = s.bool_lit(false);
        assert_eq!(wf_oob, f);
    }
}
