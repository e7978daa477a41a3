// SPDX-License-Identifier: Apache-2.0

//! Evaluation of affine expressions over symbolic dim/symbol bindings.

use ttv_ir::affine::{AffineExpr, AffineMap};

use crate::solver::{Expr, Solver};

/// Translates an affine expression into a term over the given bindings.
/// Returns `None` for unsupported constructors and for negative constants.
pub fn encode_affine_expr<S: Solver>(
    s: &mut S,
    e: &AffineExpr,
    dims: &[Expr<S::Rep>],
    syms: &[Expr<S::Rep>],
) -> Option<Expr<S::Rep>> {
    match e {
        AffineExpr::Add(lhs, rhs) => {
            let l = encode_affine_expr(s, lhs, dims, syms)?;
            let r = encode_affine_expr(s, rhs, dims, syms)?;
            Some(s.bv_add(&l, &r))
        }
        AffineExpr::Mul(lhs, rhs) => {
            let l = encode_affine_expr(s, lhs, dims, syms)?;
            let r = encode_affine_expr(s, rhs, dims, syms)?;
            Some(s.bv_mul(&l, &r))
        }
        AffineExpr::Dim(pos) => {
            assert!(*pos < dims.len(), "dim id {} out of range", pos);
            Some(dims[*pos].clone())
        }
        AffineExpr::Symbol(pos) => {
            assert!(*pos < syms.len(), "symbol id {} out of range", pos);
            Some(syms[*pos].clone())
        }
        AffineExpr::Const(c) => {
            if *c < 0 {
                return None;
            }
            Some(s.bv_lit(crate::value::Index::BITS, *c as u64))
        }
    }
}

/// Routes `input` through a map whose results are all bare dims:
/// `(i, j, k) -> (j, k, i)` applied to `[a, b, c]` yields `[b, c, a]`.
pub fn apply_dim_map<R: Clone>(map: &AffineMap, input: &[Expr<R>]) -> Vec<Expr<R>> {
    if map.is_identity() {
        return input.to_vec();
    }
    map.results
        .iter()
        .map(|e| {
            let pos = e
                .as_dim()
                .unwrap_or_else(|| panic!("map result {} is not a bare dim", e));
            input[pos].clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Sort;
    use crate::term_backend::{TermConfig, TermSolver};

    #[test]
    fn evaluates_add_mul_and_bindings() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        // d0 * 2 + s0
        let e = AffineExpr::add(
            AffineExpr::mul(AffineExpr::Dim(0), AffineExpr::Const(2)),
            AffineExpr::Symbol(0),
        );
        let d = s.bv_lit(32, 5);
        let sym = s.bv_lit(32, 1);
        let r = encode_affine_expr(&mut s, &e, &[d], &[sym]).unwrap();
        let expected = s.bv_lit(32, 11);
        assert_eq!(r, expected);
    }

    #[test]
    fn negative_constant_is_rejected() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        assert!(encode_affine_expr(&mut s, &AffineExpr::Const(-1), &[], &[]).is_none());
    }

    #[test]
    fn dim_map_routes_inputs() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let a = s.bound_var("a", &Sort::BitVec(32));
        let b = s.bound_var("b", &Sort::BitVec(32));
        let m = AffineMap::new(2, 0, vec![AffineExpr::Dim(1), AffineExpr::Dim(0)]);
        let out = apply_dim_map(&m, &[a.clone(), b.clone()]);
        assert_eq!(out, vec![b, a]);
    }
}
