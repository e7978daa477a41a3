// SPDX-License-Identifier: Apache-2.0

//! The abstract value algebra: the five variants an IR value can encode to,
//! and the per-variant operations the encoders lower through.
//!
//! Tensors are immutable lambdas over an index domain; memrefs are mutable
//! views into the symbolic [`crate::memory::Memory`]. Indices and integers
//! are bit-vectors; floats live in an uninterpreted equational theory (see
//! [`crate::uf::UfRegistry`]).

use ttv_ir::ir::{ConvLayout, Scalar, ScalarType};

use crate::affine::encode_affine_expr;
use crate::error::{EncodeResult, Unsupported};
use crate::memory::Memory;
use crate::solver::{Expr, FpSort, Solver, Sort};
use crate::uf::UfRegistry;

/// Index arithmetic namespace; all indices share one fixed bit-width.
pub struct Index;

impl Index {
    pub const BITS: u32 = 32;

    pub fn sort() -> Sort {
        Sort::BitVec(Self::BITS)
    }

    pub fn lit<S: Solver>(s: &mut S, v: i64) -> Expr<S::Rep> {
        s.bv_lit(Self::BITS, v as u64)
    }

    pub fn zero<S: Solver>(s: &mut S) -> Expr<S::Rep> {
        Self::lit(s, 0)
    }

    pub fn one<S: Solver>(s: &mut S) -> Expr<S::Rep> {
        Self::lit(s, 1)
    }

    /// Fresh variables meant to be bound by a lambda or forall.
    pub fn bound_vars<S: Solver>(s: &mut S, n: usize) -> Vec<Expr<S::Rep>> {
        (0..n).map(|_| s.bound_var("idx", &Self::sort())).collect()
    }
}

pub fn scalar_sort(ty: ScalarType) -> Sort {
    match ty {
        ScalarType::Index => Index::sort(),
        ScalarType::Int(w) => Sort::BitVec(w),
        ScalarType::F32 => Sort::Fp(FpSort::F32),
        ScalarType::F64 => Sort::Fp(FpSort::F64),
    }
}

pub fn fp_sort_of(ty: ScalarType) -> FpSort {
    match ty {
        ScalarType::F32 => FpSort::F32,
        ScalarType::F64 => FpSort::F64,
        other => panic!("not a float type: {}", other),
    }
}

/// Lowers a scalar literal; float literals become per-bit-pattern
/// uninterpreted constants.
pub fn scalar_to_expr<S: Solver>(
    s: &mut S,
    ufs: &mut UfRegistry<S::Rep>,
    scalar: &Scalar,
) -> Expr<S::Rep> {
    match scalar {
        Scalar::Index(v) => Index::lit(s, *v),
        Scalar::Int { value, width } => s.bv_lit(*width, *value),
        Scalar::F32(v) => ufs.fp_const(s, FpSort::F32, v.to_bits() as u64),
        Scalar::F64(v) => ufs.fp_const(s, FpSort::F64, v.to_bits()),
    }
}

/// The zero of a scalar type, used to fill unspecified sparse elements.
pub fn zero_of_type<S: Solver>(
    s: &mut S,
    ufs: &mut UfRegistry<S::Rep>,
    ty: ScalarType,
) -> Expr<S::Rep> {
    match ty {
        ScalarType::Index => Index::zero(s),
        ScalarType::Int(w) => s.bv_lit(w, 0),
        ScalarType::F32 => ufs.fp_const(s, FpSort::F32, 0),
        ScalarType::F64 => ufs.fp_const(s, FpSort::F64, 0),
    }
}

/// Elementwise product in the element theory: uninterpreted `fp.mul` for
/// floats, `bvmul` for integers.
pub fn scalar_mul<S: Solver>(
    s: &mut S,
    ufs: &mut UfRegistry<S::Rep>,
    elem: ScalarType,
    a: &Expr<S::Rep>,
    b: &Expr<S::Rep>,
) -> Expr<S::Rep> {
    if elem.is_float() {
        let uf = ufs.fp_mul(s, fp_sort_of(elem));
        s.apply_uf(&uf, &[a.clone(), b.clone()])
    } else {
        s.bv_mul(a, b)
    }
}

/// Row-major linearization of an index tuple.
pub fn to_1d_index<S: Solver>(
    s: &mut S,
    indices: &[Expr<S::Rep>],
    dims: &[Expr<S::Rep>],
) -> Expr<S::Rep> {
    assert_eq!(indices.len(), dims.len());
    let mut acc = indices[0].clone();
    for k in 1..indices.len() {
        let scaled = s.bv_mul(&acc, &dims[k]);
        acc = s.bv_add(&scaled, &indices[k]);
    }
    acc
}

/// Inverse of [`to_1d_index`].
pub fn from_1d_index<S: Solver>(
    s: &mut S,
    linear: &Expr<S::Rep>,
    dims: &[Expr<S::Rep>],
) -> Vec<Expr<S::Rep>> {
    let rank = dims.len();
    let mut out = vec![linear.clone(); rank];
    let mut rem = linear.clone();
    for k in (1..rank).rev() {
        out[k] = s.bv_urem(&rem, &dims[k]);
        rem = s.bv_udiv(&rem, &dims[k]);
    }
    out[0] = rem;
    out
}

pub fn get_1d_size<S: Solver>(s: &mut S, dims: &[Expr<S::Rep>]) -> Expr<S::Rep> {
    let mut acc = Index::one(s);
    for d in dims {
        acc = s.bv_mul(&acc, d);
    }
    acc
}

/// `vec + 1` elementwise; loop upper bounds are inclusive, dims are not.
pub fn add_one<S: Solver>(s: &mut S, vec: &[Expr<S::Rep>]) -> Vec<Expr<S::Rep>> {
    let one = Index::one(s);
    vec.iter().map(|e| s.bv_add(e, &one)).collect()
}

pub fn sub_one<S: Solver>(s: &mut S, vec: &[Expr<S::Rep>]) -> Vec<Expr<S::Rep>> {
    let one = Index::one(s);
    vec.iter().map(|e| s.bv_sub(e, &one)).collect()
}

/// A float value under the equational theory.
#[derive(Debug, Clone, PartialEq)]
pub struct Float<R> {
    pub expr: Expr<R>,
    pub prec: FpSort,
}

impl<R: Clone + PartialEq + std::fmt::Debug> Float<R> {
    pub fn new(expr: Expr<R>, prec: FpSort) -> Float<R> {
        assert_eq!(expr.sort, Sort::Fp(prec), "float expr has wrong sort");
        Float { expr, prec }
    }

    pub fn add<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        other: &Float<R>,
    ) -> Float<R> {
        assert_eq!(self.prec, other.prec);
        let uf = ufs.fp_add(s, self.prec);
        Float { expr: s.apply_uf(&uf, &[self.expr.clone(), other.expr.clone()]), prec: self.prec }
    }

    pub fn mul<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        other: &Float<R>,
    ) -> Float<R> {
        assert_eq!(self.prec, other.prec);
        let uf = ufs.fp_mul(s, self.prec);
        Float { expr: s.apply_uf(&uf, &[self.expr.clone(), other.expr.clone()]), prec: self.prec }
    }

    pub fn neg<S: Solver<Rep = R>>(&self, s: &mut S, ufs: &mut UfRegistry<R>) -> Float<R> {
        let uf = ufs.fp_neg(s, self.prec);
        Float { expr: s.apply_uf(&uf, &[self.expr.clone()]), prec: self.prec }
    }

    pub fn abs<S: Solver<Rep = R>>(&self, s: &mut S, ufs: &mut UfRegistry<R>) -> Float<R> {
        let uf = ufs.fp_abs(s, self.prec);
        Float { expr: s.apply_uf(&uf, &[self.expr.clone()]), prec: self.prec }
    }

    /// f32 -> f64; callers reject other precision pairs.
    pub fn extend<S: Solver<Rep = R>>(&self, s: &mut S, ufs: &mut UfRegistry<R>) -> Float<R> {
        assert_eq!(self.prec, FpSort::F32);
        let uf = ufs.fp_ext(s);
        Float { expr: s.apply_uf(&uf, &[self.expr.clone()]), prec: FpSort::F64 }
    }

    /// f64 -> f32; callers reject other precision pairs.
    pub fn truncate<S: Solver<Rep = R>>(&self, s: &mut S, ufs: &mut UfRegistry<R>) -> Float<R> {
        assert_eq!(self.prec, FpSort::F64);
        let uf = ufs.fp_trunc(s);
        Float { expr: s.apply_uf(&uf, &[self.expr.clone()]), prec: FpSort::F32 }
    }

    /// Ordered less-than as an `i1` bit-vector.
    pub fn fult<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        other: &Float<R>,
    ) -> Expr<R> {
        assert_eq!(self.prec, other.prec);
        let uf = ufs.fp_ult(s, self.prec);
        s.apply_uf(&uf, &[self.expr.clone(), other.expr.clone()])
    }
}

/// An immutable N-D array: element type, dim sizes, and a lambda body.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<R> {
    elem: ScalarType,
    dims: Vec<Expr<R>>,
    /// Sort `Array([Index; rank], elem)`.
    arr: Expr<R>,
}

impl<R: Clone + PartialEq + std::fmt::Debug> Tensor<R> {
    pub fn elem_type(&self) -> ScalarType {
        self.elem
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Expr<R>] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Expr<R> {
        self.dims[axis].clone()
    }

    /// Tensor whose every element is `value`.
    pub fn splat<S: Solver<Rep = R>>(
        s: &mut S,
        elem: ScalarType,
        value: Expr<R>,
        dims: Vec<Expr<R>>,
    ) -> Tensor<R> {
        assert!(!dims.is_empty(), "tensor needs at least one dim");
        let domain: Vec<Sort> = vec![Index::sort(); dims.len()];
        let arr = s.const_array(&domain, &value);
        Tensor { elem, dims, arr }
    }

    /// Rank-1 tensor from an element list; reshape on demand.
    pub fn from_elems<S: Solver<Rep = R>>(
        s: &mut S,
        elem: ScalarType,
        elems: Vec<Expr<R>>,
    ) -> Tensor<R> {
        assert!(!elems.is_empty(), "from_elems needs at least one element");
        let domain = [Index::sort()];
        let mut arr = s.const_array(&domain, &elems[0]);
        for (k, e) in elems.iter().enumerate().skip(1) {
            let idx = Index::lit(s, k as i64);
            arr = s.array_store(&arr, &idx, e);
        }
        let len = Index::lit(s, elems.len() as i64);
        Tensor { elem, dims: vec![len], arr }
    }

    /// Sparse constructor: `values[k]` at `indices[k]`, `zero` elsewhere.
    pub fn sparse<S: Solver<Rep = R>>(
        s: &mut S,
        elem: ScalarType,
        indices: &[Vec<u64>],
        values: &[Expr<R>],
        dims: &[u64],
        zero: Expr<R>,
    ) -> Tensor<R> {
        assert_eq!(indices.len(), values.len());
        let rank = dims.len().max(1);
        let vars = Index::bound_vars(s, rank);
        let mut body = zero;
        for (tuple, value) in indices.iter().zip(values.iter()).rev() {
            assert_eq!(tuple.len(), rank, "sparse index tuple has wrong rank");
            let conds: Vec<_> = tuple
                .iter()
                .zip(vars.iter())
                .map(|(c, v)| {
                    let lit = Index::lit(s, *c as i64);
                    s.eq(v, &lit)
                })
                .collect();
            let here = s.and_many(&conds);
            body = s.ite(&here, value, &body);
        }
        let dim_exprs = if dims.is_empty() {
            vec![Index::one(s)]
        } else {
            dims.iter().map(|d| Index::lit(s, *d as i64)).collect()
        };
        Self::mk_lambda(s, elem, dim_exprs, vars, body)
    }

    /// Tensor whose body depends symbolically on the given bound vars.
    pub fn mk_lambda<S: Solver<Rep = R>>(
        s: &mut S,
        elem: ScalarType,
        dims: Vec<Expr<R>>,
        vars: Vec<Expr<R>>,
        body: Expr<R>,
    ) -> Tensor<R> {
        assert_eq!(dims.len(), vars.len(), "one bound var per dim");
        assert_eq!(body.sort, scalar_sort(elem), "lambda body sort mismatch");
        let arr = s.lambda(&vars, &body);
        Tensor { elem, dims, arr }
    }

    /// Fresh unconstrained tensor variable.
    pub fn var<S: Solver<Rep = R>>(
        s: &mut S,
        elem: ScalarType,
        name: &str,
        dims: Vec<Expr<R>>,
    ) -> Tensor<R> {
        let sort = Sort::array(vec![Index::sort(); dims.len()], scalar_sort(elem));
        let arr = s.declare(name, &sort).expect("tensor variable declaration failed");
        Tensor { elem, dims, arr }
    }

    /// Elementwise choice between `a` and `b`; `cond_fn` supplies the
    /// `i1`-typed condition for an index tuple.
    pub fn mk_ite<S: Solver<Rep = R>>(
        s: &mut S,
        mut cond_fn: impl FnMut(&mut S, &[Expr<R>]) -> Expr<R>,
        a: &Tensor<R>,
        b: &Tensor<R>,
    ) -> Tensor<R> {
        assert_eq!(a.elem, b.elem);
        let vars = Index::bound_vars(s, a.rank());
        let av = s.apply(&a.arr, &vars);
        let bv = s.apply(&b.arr, &vars);
        let c = cond_fn(s, &vars);
        let one = s.bv_lit(1, 1);
        let cb = s.eq(&c, &one);
        let body = s.ite(&cb, &av, &bv);
        Self::mk_lambda(s, a.elem, a.dims.clone(), vars, body)
    }

    /// Element plus the in-bounds predicate `AND_i idx_i < dim_i`.
    pub fn get<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        indices: &[Expr<R>],
    ) -> (Expr<R>, Expr<R>) {
        let elem = s.apply(&self.arr, indices);
        let inb = self.is_in_bounds(s, indices);
        (elem, inb)
    }

    /// Point update; returns the new tensor and the in-bounds predicate.
    pub fn insert<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        value: &Expr<R>,
        indices: &[Expr<R>],
    ) -> (Tensor<R>, Expr<R>) {
        let vars = Index::bound_vars(s, self.rank());
        let eqs: Vec<_> = vars
            .iter()
            .zip(indices.iter())
            .map(|(v, i)| s.eq(v, i))
            .collect();
        let here = s.and_many(&eqs);
        let old = s.apply(&self.arr, &vars);
        let body = s.ite(&here, value, &old);
        let t = Self::mk_lambda(s, self.elem, self.dims.clone(), vars, body);
        let inb = self.is_in_bounds(s, indices);
        (t, inb)
    }

    pub fn is_in_bounds<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        indices: &[Expr<R>],
    ) -> Expr<R> {
        assert_eq!(indices.len(), self.rank(), "index rank mismatch");
        let conds: Vec<_> = indices
            .iter()
            .zip(self.dims.iter())
            .map(|(i, d)| s.bv_ult(i, d))
            .collect();
        s.and_many(&conds)
    }

    pub fn elementwise_unary_op<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        new_elem: ScalarType,
        mut f: impl FnMut(&mut S, Expr<R>) -> Expr<R>,
    ) -> Tensor<R> {
        let vars = Index::bound_vars(s, self.rank());
        let a = s.apply(&self.arr, &vars);
        let body = f(s, a);
        Self::mk_lambda(s, new_elem, self.dims.clone(), vars, body)
    }

    /// Pointwise combination; the caller enforces `dims(self) == dims(other)`
    /// as well-definedness.
    pub fn elementwise_bin_op<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        other: &Tensor<R>,
        new_elem: ScalarType,
        mut f: impl FnMut(&mut S, Expr<R>, Expr<R>) -> Expr<R>,
    ) -> Tensor<R> {
        assert_eq!(self.rank(), other.rank(), "elementwise rank mismatch");
        let vars = Index::bound_vars(s, self.rank());
        let a = s.apply(&self.arr, &vars);
        let b = s.apply(&other.arr, &vars);
        let body = f(s, a, b);
        Self::mk_lambda(s, new_elem, self.dims.clone(), vars, body)
    }

    /// Preserves the 1-D linearization; the caller emits the size-match
    /// well-definedness condition.
    pub fn reshape<S: Solver<Rep = R>>(&self, s: &mut S, new_dims: &[Expr<R>]) -> Tensor<R> {
        assert!(!new_dims.is_empty(), "reshape to empty shape");
        let vars = Index::bound_vars(s, new_dims.len());
        let linear = to_1d_index(s, &vars, new_dims);
        let src = from_1d_index(s, &linear, &self.dims);
        let body = s.apply(&self.arr, &src);
        Self::mk_lambda(s, self.elem, new_dims.to_vec(), vars, body)
    }

    pub fn reverse<S: Solver<Rep = R>>(&self, s: &mut S, axis: usize) -> Tensor<R> {
        assert!(axis < self.rank());
        let vars = Index::bound_vars(s, self.rank());
        let mut src = vars.clone();
        let one = Index::one(s);
        let last = s.bv_sub(&self.dims[axis], &one);
        src[axis] = s.bv_sub(&last, &vars[axis]);
        let body = s.apply(&self.arr, &src);
        Self::mk_lambda(s, self.elem, self.dims.clone(), vars, body)
    }

    pub fn tile<S: Solver<Rep = R>>(&self, s: &mut S, multiples: &[u64]) -> Tensor<R> {
        assert_eq!(multiples.len(), self.rank());
        let vars = Index::bound_vars(s, self.rank());
        let mut dims = Vec::with_capacity(self.rank());
        let mut src = Vec::with_capacity(self.rank());
        for (k, m) in multiples.iter().enumerate() {
            let mlit = Index::lit(s, *m as i64);
            dims.push(s.bv_mul(&self.dims[k], &mlit));
            src.push(s.bv_urem(&vars[k], &self.dims[k]));
        }
        let body = s.apply(&self.arr, &src);
        Self::mk_lambda(s, self.elem, dims, vars, body)
    }

    /// Concatenation along `axis`; the axis dims add, all others must match
    /// (enforced by the caller).
    pub fn concat<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        other: &Tensor<R>,
        axis: usize,
    ) -> Tensor<R> {
        assert_eq!(self.rank(), other.rank());
        assert!(axis < self.rank());
        let vars = Index::bound_vars(s, self.rank());
        let mut dims = self.dims.clone();
        dims[axis] = s.bv_add(&self.dims[axis], &other.dims[axis]);
        let in_first = s.bv_ult(&vars[axis], &self.dims[axis]);
        let a = s.apply(&self.arr, &vars);
        let mut shifted = vars.clone();
        shifted[axis] = s.bv_sub(&vars[axis], &self.dims[axis]);
        let b = s.apply(&other.arr, &shifted);
        let body = s.ite(&in_first, &a, &b);
        Self::mk_lambda(s, self.elem, dims, vars, body)
    }

    /// Rank-2 matrix product; the contraction is a `sum` over the inner axis.
    pub fn matmul<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        other: &Tensor<R>,
    ) -> Tensor<R> {
        assert_eq!(self.rank(), 2, "matmul lhs must be rank 2");
        assert_eq!(other.rank(), 2, "matmul rhs must be rank 2");
        assert_eq!(self.elem, other.elem);
        let vars = Index::bound_vars(s, 2);
        let k = s.bound_var("idx", &Index::sort());
        let a = s.apply(&self.arr, &[vars[0].clone(), k.clone()]);
        let b = s.apply(&other.arr, &[k.clone(), vars[1].clone()]);
        let prod = scalar_mul(s, ufs, self.elem, &a, &b);
        let row = s.lambda(&[k], &prod);
        let sum = ufs.sum(s, &scalar_sort(self.elem));
        let body = s.apply_uf(&sum, &[row, self.dims[1].clone()]);
        let dims = vec![self.dims[0].clone(), other.dims[1].clone()];
        Self::mk_lambda(s, self.elem, dims, vars, body)
    }

    /// Valid 2-D convolution in the given layout.
    pub fn conv<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        filter: &Tensor<R>,
        strides: &[u64],
        dilations: &[u64],
        layout: ConvLayout,
    ) -> Tensor<R> {
        assert_eq!(self.rank(), 4, "conv image must be rank 4");
        assert_eq!(filter.rank(), 4, "conv filter must be rank 4");
        assert_eq!(strides.len(), 2);
        assert_eq!(dilations.len(), 2);
        let one = Index::one(s);
        // Output spatial size for the valid convolution:
        // (in - (k - 1) * dilation - 1) / stride + 1.
        let out_spatial = |s: &mut S, input: &Expr<R>, k: &Expr<R>, stride: u64, dil: u64| {
            let dil = Index::lit(s, dil as i64);
            let stride = Index::lit(s, stride as i64);
            let km1 = s.bv_sub(k, &one);
            let window = s.bv_mul(&km1, &dil);
            let reach = s.bv_add(&window, &one);
            let span = s.bv_sub(input, &reach);
            let stepped = s.bv_udiv(&span, &stride);
            s.bv_add(&stepped, &one)
        };
        let (n, in_h, in_w, in_c, f, kh, kw) = match layout {
            ConvLayout::NchwFchw => (
                self.dim(0),
                self.dim(2),
                self.dim(3),
                self.dim(1),
                filter.dim(0),
                filter.dim(2),
                filter.dim(3),
            ),
            ConvLayout::NhwcHwcf => (
                self.dim(0),
                self.dim(1),
                self.dim(2),
                self.dim(3),
                filter.dim(3),
                filter.dim(0),
                filter.dim(1),
            ),
        };
        let oh = out_spatial(s, &in_h, &kh, strides[0], dilations[0]);
        let ow = out_spatial(s, &in_w, &kw, strides[1], dilations[1]);

        let out_dims = match layout {
            ConvLayout::NchwFchw => vec![n, f, oh, ow],
            ConvLayout::NhwcHwcf => vec![n, oh, ow, f],
        };
        let out_vars = Index::bound_vars(s, 4);
        let (vn, vf, voh, vow) = match layout {
            ConvLayout::NchwFchw => (
                out_vars[0].clone(),
                out_vars[1].clone(),
                out_vars[2].clone(),
                out_vars[3].clone(),
            ),
            ConvLayout::NhwcHwcf => (
                out_vars[0].clone(),
                out_vars[3].clone(),
                out_vars[1].clone(),
                out_vars[2].clone(),
            ),
        };

        // Window tensor over (c, kh, kw), summed per output element.
        let win_vars = Index::bound_vars(s, 3);
        let (vc, vkh, vkw) = (win_vars[0].clone(), win_vars[1].clone(), win_vars[2].clone());
        let sh = Index::lit(s, strides[0] as i64);
        let sw = Index::lit(s, strides[1] as i64);
        let dh = Index::lit(s, dilations[0] as i64);
        let dw = Index::lit(s, dilations[1] as i64);
        let base_h = s.bv_mul(&voh, &sh);
        let step_h = s.bv_mul(&vkh, &dh);
        let img_h = s.bv_add(&base_h, &step_h);
        let base_w = s.bv_mul(&vow, &sw);
        let step_w = s.bv_mul(&vkw, &dw);
        let img_w = s.bv_add(&base_w, &step_w);
        let (img_idx, flt_idx) = match layout {
            ConvLayout::NchwFchw => (
                vec![vn, vc.clone(), img_h, img_w],
                vec![vf, vc.clone(), vkh.clone(), vkw.clone()],
            ),
            ConvLayout::NhwcHwcf => (
                vec![vn, img_h, img_w, vc.clone()],
                vec![vkh.clone(), vkw.clone(), vc.clone(), vf],
            ),
        };
        let img_elem = s.apply(&self.arr, &img_idx);
        let flt_elem = s.apply(&filter.arr, &flt_idx);
        let prod = scalar_mul(s, ufs, self.elem, &img_elem, &flt_elem);
        let win_dims = vec![in_c, kh, kw];
        let window = Self::mk_lambda(s, self.elem, win_dims, win_vars, prod);
        let body = window.sum(s, ufs);
        Self::mk_lambda(s, self.elem, out_dims, out_vars, body)
    }

    /// Uninterpreted total over all elements.
    pub fn sum<S: Solver<Rep = R>>(&self, s: &mut S, ufs: &mut UfRegistry<R>) -> Expr<R> {
        let arr = self.as_array(s);
        let size = self.get_1d_size(s);
        let sum = ufs.sum(s, &scalar_sort(self.elem));
        s.apply_uf(&sum, &[arr, size])
    }

    /// `sum` of the elementwise product; 1-D sizes must match (enforced by
    /// the caller).
    pub fn dot<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        other: &Tensor<R>,
    ) -> Expr<R> {
        assert_eq!(self.elem, other.elem);
        let a = self.as_array(s);
        let b = other.as_array(s);
        let l = s.bound_var("idx", &Index::sort());
        let av = s.apply(&a, &[l.clone()]);
        let bv = s.apply(&b, &[l.clone()]);
        let prod = scalar_mul(s, ufs, self.elem, &av, &bv);
        let lam = s.lambda(&[l], &prod);
        let size = self.get_1d_size(s);
        let sum = ufs.sum(s, &scalar_sort(self.elem));
        s.apply_uf(&sum, &[lam, size])
    }

    pub fn get_1d_size<S: Solver<Rep = R>>(&self, s: &mut S) -> Expr<R> {
        get_1d_size(s, &self.dims)
    }

    /// The 1-D linearized view, as an `Array(Index, elem)` value.
    pub fn as_array<S: Solver<Rep = R>>(&self, s: &mut S) -> Expr<R> {
        if self.rank() == 1 {
            return self.arr.clone();
        }
        let l = s.bound_var("idx", &Index::sort());
        let idxs = from_1d_index(s, &l, &self.dims);
        let body = s.apply(&self.arr, &idxs);
        s.lambda(&[l], &body)
    }
}

/// Affine layout of a memref view: a logical-index-to-linear-offset mapping
/// and the logical in-bounds predicate, both as lambdas.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout<R> {
    pub mapping: Expr<R>,
    pub in_bounds: Expr<R>,
}

impl<R: Clone + PartialEq + std::fmt::Debug> Layout<R> {
    pub fn identity<S: Solver<Rep = R>>(s: &mut S, dims: &[Expr<R>]) -> Layout<R> {
        let vars = Index::bound_vars(s, dims.len());
        let linear = to_1d_index(s, &vars, dims);
        let conds: Vec<_> = vars
            .iter()
            .zip(dims.iter())
            .map(|(v, d)| s.bv_ult(v, d))
            .collect();
        let inb = s.and_many(&conds);
        Layout { mapping: s.lambda(&vars, &linear), in_bounds: s.lambda(&vars, &inb) }
    }

    /// Layout from an affine map with a single result and no symbols.
    pub fn from_affine_map<S: Solver<Rep = R>>(
        s: &mut S,
        map: &ttv_ir::affine::AffineMap,
        dims: &[Expr<R>],
    ) -> EncodeResult<Layout<R>> {
        if map.is_identity() {
            return Ok(Self::identity(s, dims));
        }
        if map.num_results() != 1 || map.num_symbols != 0 || map.num_dims != dims.len() {
            return Err(Unsupported::msg("unsupported layout map form"));
        }
        let vars = Index::bound_vars(s, dims.len());
        let linear = encode_affine_expr(s, &map.results[0], &vars, &[])
            .ok_or_else(|| Unsupported::msg("unsupported affine expr in layout map"))?;
        let conds: Vec<_> = vars
            .iter()
            .zip(dims.iter())
            .map(|(v, d)| s.bv_ult(v, d))
            .collect();
        let inb = s.and_many(&conds);
        Ok(Layout { mapping: s.lambda(&vars, &linear), in_bounds: s.lambda(&vars, &inb) })
    }
}

/// A mutable view over a block of the symbolic memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemRef<R> {
    pub elem: ScalarType,
    /// Symbolic block id of width [`Memory::BID_BITS`].
    pub bid: Expr<R>,
    /// Base offset into the block, in elements.
    pub offset: Expr<R>,
    dims: Vec<Expr<R>>,
    layout: Layout<R>,
}

impl<R: Clone + PartialEq + std::fmt::Debug> MemRef<R> {
    pub fn new(
        elem: ScalarType,
        bid: Expr<R>,
        offset: Expr<R>,
        dims: Vec<Expr<R>>,
        layout: Layout<R>,
    ) -> MemRef<R> {
        assert!(!dims.is_empty(), "memref needs at least one dim");
        MemRef { elem, bid, offset, dims, layout }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Expr<R>] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Expr<R> {
        self.dims[axis].clone()
    }

    pub fn get_1d_size<S: Solver<Rep = R>>(&self, s: &mut S) -> Expr<R> {
        get_1d_size(s, &self.dims)
    }

    fn address<S: Solver<Rep = R>>(&self, s: &mut S, indices: &[Expr<R>]) -> (Expr<R>, Expr<R>) {
        assert_eq!(indices.len(), self.rank(), "memref index rank mismatch");
        let rel = s.apply(&self.layout.mapping, indices);
        let phys = s.bv_add(&self.offset, &rel);
        let logical_ok = s.apply(&self.layout.in_bounds, indices);
        (phys, logical_ok)
    }

    /// Element plus the well-definedness of the access (logical bounds,
    /// block validity, physical bounds).
    pub fn get<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        mem: &Memory<R>,
        indices: &[Expr<R>],
    ) -> (Expr<R>, Expr<R>) {
        let (phys, logical_ok) = self.address(s, indices);
        let (value, load_ok) = mem.load(s, self.elem, &self.bid, &phys);
        let ok = s.and(&logical_ok, &load_ok);
        (value, ok)
    }

    /// Stores one element; the success predicate includes writability.
    pub fn store<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        mem: &mut Memory<R>,
        value: &Expr<R>,
        indices: &[Expr<R>],
    ) -> Expr<R> {
        let (phys, logical_ok) = self.address(s, indices);
        let store_ok = mem.store_elem(s, self.elem, &self.bid, &phys, value);
        s.and(&logical_ok, &store_ok)
    }

    /// Bulk write of `len` elements of the 1-D `array` starting at logical
    /// linear offset `base`.
    pub fn store_array<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        mem: &mut Memory<R>,
        array: &Expr<R>,
        base: &Expr<R>,
        len: &Expr<R>,
        check_writable: bool,
    ) -> Expr<R> {
        let start = s.bv_add(&self.offset, base);
        mem.store_range(s, self.elem, &self.bid, &start, len, array, check_writable)
    }

    /// Materializes the view as a lambda tensor (dropping access
    /// obligations, which callers track separately when needed).
    pub fn load_tensor<S: Solver<Rep = R>>(&self, s: &mut S, mem: &Memory<R>) -> Tensor<R> {
        let vars = Index::bound_vars(s, self.rank());
        let (value, _) = self.get(s, mem, &vars);
        Tensor::mk_lambda(s, self.elem, self.dims.clone(), vars, value)
    }

    /// View with composed layout. `unused_dims[k]` marks source axes dropped
    /// from the result (their target size is 1); `rank_diff` is the number
    /// of dropped axes.
    pub fn subview<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        offsets: &[Expr<R>],
        sizes: &[Expr<R>],
        strides: &[Expr<R>],
        unused_dims: &[bool],
        rank_diff: usize,
    ) -> MemRef<R> {
        let src_rank = self.rank();
        assert_eq!(offsets.len(), src_rank);
        assert_eq!(sizes.len(), src_rank);
        assert_eq!(strides.len(), src_rank);
        assert_eq!(unused_dims.len(), src_rank);
        let dropped = unused_dims.iter().filter(|u| **u).count();
        assert_eq!(dropped, rank_diff, "reduction mask does not match rank diff");
        let new_rank = src_rank - rank_diff;
        let vars = Index::bound_vars(s, new_rank);

        let mut inner = Vec::with_capacity(src_rank);
        let mut new_dims = Vec::with_capacity(new_rank);
        let mut retained = Vec::with_capacity(new_rank);
        let mut pos = 0;
        for k in 0..src_rank {
            if unused_dims[k] {
                inner.push(offsets[k].clone());
            } else {
                let scaled = s.bv_mul(&vars[pos], &strides[k]);
                inner.push(s.bv_add(&scaled, &offsets[k]));
                new_dims.push(sizes[k].clone());
                retained.push((pos, sizes[k].clone()));
                pos += 1;
            }
        }
        let mapped = s.apply(&self.layout.mapping, &inner);
        let inner_ok = s.apply(&self.layout.in_bounds, &inner);
        let bounds: Vec<_> = retained
            .iter()
            .map(|(p, size)| s.bv_ult(&vars[*p], size))
            .collect();
        let view_ok = s.and_many(&bounds);
        let ok = s.and(&view_ok, &inner_ok);
        let layout = Layout {
            mapping: s.lambda(&vars, &mapped),
            in_bounds: s.lambda(&vars, &ok),
        };
        MemRef {
            elem: self.elem,
            bid: self.bid.clone(),
            offset: self.offset.clone(),
            dims: new_dims,
            layout,
        }
    }

    /// The views do not overlap: different blocks, or disjoint ranges within
    /// the same block.
    pub fn noalias<S: Solver<Rep = R>>(&self, s: &mut S, other: &MemRef<R>) -> Expr<R> {
        let diff_block = s.ne(&self.bid, &other.bid);
        let my_size = self.get_1d_size(s);
        let other_size = other.get_1d_size(s);
        let my_end = s.bv_add(&self.offset, &my_size);
        let other_end = s.bv_add(&other.offset, &other_size);
        let before = s.bv_ule(&my_end, &other.offset);
        let after = s.bv_ule(&other_end, &self.offset);
        let disjoint = s.or(&before, &after);
        s.or(&diff_block, &disjoint)
    }

    /// Block-id (and field-wise) ite; the caller constrains dims equal.
    pub fn mk_ite<S: Solver<Rep = R>>(
        s: &mut S,
        cond: &Expr<R>,
        a: &MemRef<R>,
        b: &MemRef<R>,
    ) -> MemRef<R> {
        assert_eq!(a.elem, b.elem);
        assert_eq!(a.rank(), b.rank());
        let one = s.bv_lit(1, 1);
        let c = s.eq(cond, &one);
        let bid = s.ite(&c, &a.bid, &b.bid);
        let offset = s.ite(&c, &a.offset, &b.offset);
        let dims: Vec<_> = a
            .dims
            .iter()
            .zip(b.dims.iter())
            .map(|(x, y)| s.ite(&c, x, y))
            .collect();
        let vars = Index::bound_vars(s, a.rank());
        let ma = s.apply(&a.layout.mapping, &vars);
        let mb = s.apply(&b.layout.mapping, &vars);
        let mapping_body = s.ite(&c, &ma, &mb);
        let ia = s.apply(&a.layout.in_bounds, &vars);
        let ib = s.apply(&b.layout.in_bounds, &vars);
        let inb_body = s.ite(&c, &ia, &ib);
        let layout = Layout {
            mapping: s.lambda(&vars, &mapping_body),
            in_bounds: s.lambda(&vars, &inb_body),
        };
        MemRef { elem: a.elem, bid, offset, dims, layout }
    }

    /// Bulk convolution into `self`, which must have identity layout
    /// (checked by the caller against the IR type).
    pub fn conv<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        ufs: &mut UfRegistry<R>,
        mem: &mut Memory<R>,
        image: &MemRef<R>,
        filter: &MemRef<R>,
        strides: &[u64],
        dilations: &[u64],
        layout: ConvLayout,
    ) -> Expr<R> {
        let t_image = image.load_tensor(s, mem);
        let t_filter = filter.load_tensor(s, mem);
        let t_res = t_image.conv(s, ufs, &t_filter, strides, dilations, layout);
        let arr = t_res.as_array(s);
        let zero = Index::zero(s);
        let len = t_res.get_1d_size(s);
        self.store_array(s, mem, &arr, &zero, &len, true)
    }

    /// Whole-view bounds: the block id is live and the linear extent fits.
    pub fn is_in_bounds<S: Solver<Rep = R>>(&self, s: &mut S, mem: &Memory<R>) -> Expr<R> {
        let valid = mem.valid_bid(s, self.elem, &self.bid);
        let size = self.get_1d_size(s);
        let end = s.bv_add(&self.offset, &size);
        let block_size = mem.size_of(s, self.elem, &self.bid);
        let fits = s.bv_ule(&end, &block_size);
        s.and(&valid, &fits)
    }
}

/// An IR value bound in the register file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<R> {
    Index(Expr<R>),
    Int(Expr<R>),
    Float(Float<R>),
    Tensor(Tensor<R>),
    MemRef(MemRef<R>),
}

impl<R: Clone + PartialEq + std::fmt::Debug> Value<R> {
    /// Wraps a scalar expression according to its IR scalar type.
    pub fn from_expr(expr: Expr<R>, ty: ScalarType) -> Value<R> {
        assert_eq!(expr.sort, scalar_sort(ty), "scalar value has wrong sort");
        match ty {
            ScalarType::Index => Value::Index(expr),
            ScalarType::Int(_) => Value::Int(expr),
            ScalarType::F32 => Value::Float(Float::new(expr, FpSort::F32)),
            ScalarType::F64 => Value::Float(Float::new(expr, FpSort::F64)),
        }
    }

    /// Underlying expression of a scalar value.
    pub fn as_expr(&self) -> &Expr<R> {
        match self {
            Value::Index(e) | Value::Int(e) => e,
            Value::Float(f) => &f.expr,
            other => panic!("not a scalar value: {:?}", other),
        }
    }

    /// Scalar type of a scalar value.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Index(_) => ScalarType::Index,
            Value::Int(e) => ScalarType::Int(e.sort.bv_width()),
            Value::Float(f) => match f.prec {
                FpSort::F32 => ScalarType::F32,
                FpSort::F64 => ScalarType::F64,
            },
            other => panic!("not a scalar value: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term_backend::{TermConfig, TermSolver};

    fn solver() -> TermSolver {
        TermSolver::new(&TermConfig).unwrap()
    }

    fn int_tensor(s: &mut TermSolver, elems: &[u64]) -> Tensor<std::rc::Rc<crate::term_backend::Term>> {
        let exprs: Vec<_> = elems.iter().map(|v| s.bv_lit(32, *v)).collect();
        Tensor::from_elems(s, ScalarType::Int(32), exprs)
    }

    #[test]
    fn get_resolves_literal_elements() {
        let mut s = solver();
        let t = int_tensor(&mut s, &[5, 6, 7]);
        let one = Index::one(&mut s);
        let (elem, inb) = t.get(&mut s, &[one]);
        let six = s.bv_lit(32, 6);
        assert_eq!(elem, six);
        let t_lit = s.bool_lit(true);
        assert_eq!(inb, t_lit);
    }

    #[test]
    fn reshape_preserves_linearization() {
        let mut s = solver();
        let t = int_tensor(&mut s, &[5, 6, 7, 8]);
        let two = Index::lit(&mut s, 2);
        let m = t.reshape(&mut s, &[two.clone(), two]);
        let zero = Index::zero(&mut s);
        let one = Index::one(&mut s);
        let (elem, _) = m.get(&mut s, &[one, zero]);
        let seven = s.bv_lit(32, 7);
        assert_eq!(elem, seven);
    }

    #[test]
    fn reshape_round_trip_is_identity_pointwise() {
        let mut s = solver();
        let t = int_tensor(&mut s, &[1, 2, 3, 4, 5, 6]);
        let shape = t.dims().to_vec();
        let back = t.reshape(&mut s, &shape);
        for i in 0..6 {
            let idx = Index::lit(&mut s, i);
            let (a, _) = t.get(&mut s, &[idx.clone()]);
            let (b, _) = back.get(&mut s, &[idx]);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn insert_then_extract_returns_value() {
        let mut s = solver();
        let t = int_tensor(&mut s, &[1, 2, 3]);
        let v = s.bv_lit(32, 42);
        let two = Index::lit(&mut s, 2);
        let (t2, inb) = t.insert(&mut s, &v, &[two.clone()]);
        let t_lit = s.bool_lit(true);
        assert_eq!(inb, t_lit);
        let (got, _) = t2.get(&mut s, &[two]);
        assert_eq!(got, v);
        // Other elements unchanged.
        let zero = Index::zero(&mut s);
        let (other, _) = t2.get(&mut s, &[zero]);
        let one_lit = s.bv_lit(32, 1);
        assert_eq!(other, one_lit);
    }

    #[test]
    fn reverse_reads_mirrored_index() {
        let mut s = solver();
        let t = int_tensor(&mut s, &[1, 2, 3]);
        let r = t.reverse(&mut s, 0);
        let zero = Index::zero(&mut s);
        let (elem, _) = r.get(&mut s, &[zero]);
        let three = s.bv_lit(32, 3);
        assert_eq!(elem, three);
    }

    #[test]
    fn tile_repeats_modulo_source_dims() {
        let mut s = solver();
        let t = int_tensor(&mut s, &[1, 2]);
        let tiled = t.tile(&mut s, &[3]);
        let six = Index::lit(&mut s, 6);
        assert_eq!(tiled.dim(0), six);
        let five = Index::lit(&mut s, 5);
        let (elem, _) = tiled.get(&mut s, &[five]);
        let two = s.bv_lit(32, 2);
        assert_eq!(elem, two);
    }

    #[test]
    fn concat_sums_axis_dim_and_selects_side() {
        let mut s = solver();
        let a = int_tensor(&mut s, &[1, 2]);
        let b = int_tensor(&mut s, &[3]);
        let c = a.concat(&mut s, &b, 0);
        let three = Index::lit(&mut s, 3);
        assert_eq!(c.dim(0), three);
        let two = Index::lit(&mut s, 2);
        let (elem, _) = c.get(&mut s, &[two]);
        let expect = s.bv_lit(32, 3);
        assert_eq!(elem, expect);
    }

    #[test]
    fn splat_reads_same_everywhere() {
        let mut s = solver();
        let v = s.bv_lit(32, 9);
        let d = Index::lit(&mut s, 4);
        let t = Tensor::splat(&mut s, ScalarType::Int(32), v.clone(), vec![d]);
        let i = s.declare("i", &Index::sort()).unwrap();
        let (elem, _) = t.get(&mut s, &[i]);
        assert_eq!(elem, v);
    }

    #[test]
    fn sparse_reads_value_or_zero() {
        let mut s = solver();
        let vals = vec![s.bv_lit(32, 7)];
        let zero = s.bv_lit(32, 0);
        let t = Tensor::sparse(
            &mut s,
            ScalarType::Int(32),
            &[vec![1, 1]],
            &vals,
            &[2, 2],
            zero.clone(),
        );
        let one = Index::one(&mut s);
        let (hit, _) = t.get(&mut s, &[one.clone(), one]);
        let seven = s.bv_lit(32, 7);
        assert_eq!(hit, seven);
        let z = Index::zero(&mut s);
        let o = Index::one(&mut s);
        let (miss, _) = t.get(&mut s, &[z, o]);
        assert_eq!(miss, zero);
    }

    #[test]
    fn matmul_contract_is_sum_over_inner_axis() {
        let mut s = solver();
        let mut ufs = UfRegistry::new();
        let two = Index::lit(&mut s, 2);
        let a = Tensor::var(&mut s, ScalarType::F32, "a", vec![two.clone(), two.clone()]);
        let b = Tensor::var(&mut s, ScalarType::F32, "b", vec![two.clone(), two.clone()]);
        let c = a.matmul(&mut s, &mut ufs, &b);
        assert_eq!(c.rank(), 2);
        let zero = Index::zero(&mut s);
        let (elem, _) = c.get(&mut s, &[zero.clone(), zero]);
        let text = s.render(&elem);
        assert!(text.contains("sum.f32"), "{}", text);
        assert!(text.contains("fp.mul.f32"), "{}", text);
    }
}
