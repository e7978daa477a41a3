// SPDX-License-Identifier: Apache-2.0

//! Registry of the uninterpreted symbols backing the equational float theory
//! and the `sum` reduction.
//!
//! Floats are never interpreted numerically: each operation is an
//! uninterpreted function, constrained only by the axioms asserted here when
//! a symbol is first declared. The registry caches declarations so every use
//! of, say, `fp.add.f32` is the same symbol with its axioms asserted exactly
//! once.

use std::collections::HashMap;

use crate::solver::{Expr, FpSort, Solver, Sort, Uf};
use crate::value::Index;

#[derive(Debug)]
pub struct UfRegistry<R> {
    ufs: HashMap<String, Uf<R>>,
    consts: HashMap<String, Expr<R>>,
}

impl<R: Clone + PartialEq + std::fmt::Debug> Default for UfRegistry<R> {
    fn default() -> Self {
        UfRegistry { ufs: HashMap::new(), consts: HashMap::new() }
    }
}

/// Tag used in symbol names for the element sort of `sum`.
fn sort_tag(sort: &Sort) -> String {
    match sort {
        Sort::BitVec(w) => format!("bv{}", w),
        Sort::Fp(p) => p.tag().to_string(),
        other => panic!("no reduction symbol for sort {:?}", other),
    }
}

impl<R: Clone + PartialEq + std::fmt::Debug> UfRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_declare<S>(
        &mut self,
        s: &mut S,
        name: String,
        args: Vec<Sort>,
        ret: Sort,
        axioms: impl FnOnce(&mut S, &Uf<R>) -> Vec<Expr<R>>,
    ) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        if let Some(uf) = self.ufs.get(&name) {
            return uf.clone();
        }
        let uf = s.declare_uf(&name, &args, &ret).expect("uf declaration failed");
        for axiom in axioms(s, &uf) {
            s.assert(&axiom).expect("axiom assertion failed");
        }
        self.ufs.insert(name, uf.clone());
        uf
    }

    fn commutative_axiom<S>(s: &mut S, uf: &Uf<R>, sort: &Sort) -> Vec<Expr<R>>
    where
        S: Solver<Rep = R>,
    {
        let x = s.bound_var("x", sort);
        let y = s.bound_var("y", sort);
        let xy = s.apply_uf(uf, &[x.clone(), y.clone()]);
        let yx = s.apply_uf(uf, &[y.clone(), x.clone()]);
        let body = s.eq(&xy, &yx);
        vec![s.forall(&[x, y], &body)]
    }

    pub fn fp_add<S>(&mut self, s: &mut S, prec: FpSort) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let sort = Sort::Fp(prec);
        self.get_or_declare(
            s,
            format!("fp.add.{}", prec.tag()),
            vec![sort.clone(), sort.clone()],
            sort.clone(),
            |s, uf| Self::commutative_axiom(s, uf, &sort),
        )
    }

    pub fn fp_mul<S>(&mut self, s: &mut S, prec: FpSort) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let sort = Sort::Fp(prec);
        self.get_or_declare(
            s,
            format!("fp.mul.{}", prec.tag()),
            vec![sort.clone(), sort.clone()],
            sort.clone(),
            |s, uf| Self::commutative_axiom(s, uf, &sort),
        )
    }

    pub fn fp_neg<S>(&mut self, s: &mut S, prec: FpSort) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let sort = Sort::Fp(prec);
        self.get_or_declare(
            s,
            format!("fp.neg.{}", prec.tag()),
            vec![sort.clone()],
            sort.clone(),
            |s, uf| {
                // Involution.
                let x = s.bound_var("x", &sort);
                let n = s.apply_uf(uf, &[x.clone()]);
                let nn = s.apply_uf(uf, &[n]);
                let body = s.eq(&nn, &x);
                vec![s.forall(&[x], &body)]
            },
        )
    }

    pub fn fp_abs<S>(&mut self, s: &mut S, prec: FpSort) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let sort = Sort::Fp(prec);
        self.get_or_declare(
            s,
            format!("fp.abs.{}", prec.tag()),
            vec![sort.clone()],
            sort.clone(),
            |s, uf| {
                // Idempotence.
                let x = s.bound_var("x", &sort);
                let a = s.apply_uf(uf, &[x.clone()]);
                let aa = s.apply_uf(uf, &[a.clone()]);
                let body = s.eq(&aa, &a);
                vec![s.forall(&[x], &body)]
            },
        )
    }

    /// Ordered less-than; returns an `i1`-typed bit-vector, uninterpreted.
    pub fn fp_ult<S>(&mut self, s: &mut S, prec: FpSort) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let sort = Sort::Fp(prec);
        self.get_or_declare(
            s,
            format!("fp.ult.{}", prec.tag()),
            vec![sort.clone(), sort],
            Sort::BitVec(1),
            |_, _| vec![],
        )
    }

    /// Precision extension f32 -> f64.
    pub fn fp_ext<S>(&mut self, s: &mut S) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        self.get_or_declare(
            s,
            "fp.ext.f32.f64".to_string(),
            vec![Sort::Fp(FpSort::F32)],
            Sort::Fp(FpSort::F64),
            |_, _| vec![],
        )
    }

    /// Precision truncation f64 -> f32, with the round-trip axiom
    /// `forall x:f32. trunc(ext(x)) = x`.
    pub fn fp_trunc<S>(&mut self, s: &mut S) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let ext = self.fp_ext(s);
        self.get_or_declare(
            s,
            "fp.trunc.f64.f32".to_string(),
            vec![Sort::Fp(FpSort::F64)],
            Sort::Fp(FpSort::F32),
            |s, uf| {
                let x = s.bound_var("x", &Sort::Fp(FpSort::F32));
                let widened = s.apply_uf(&ext, &[x.clone()]);
                let back = s.apply_uf(uf, &[widened]);
                let body = s.eq(&back, &x);
                vec![s.forall(&[x], &body)]
            },
        )
    }

    /// The distinct uninterpreted constant for a float literal, named by its
    /// bit pattern so equal literals share one symbol.
    pub fn fp_const<S>(&mut self, s: &mut S, prec: FpSort, bits: u64) -> Expr<R>
    where
        S: Solver<Rep = R>,
    {
        let name = format!("fp.const.{}.{:x}", prec.tag(), bits);
        if let Some(e) = self.consts.get(&name) {
            return e.clone();
        }
        let e = s.declare(&name, &Sort::Fp(prec)).expect("fp constant declaration failed");
        self.consts.insert(name, e.clone());
        e
    }

    /// Uninterpreted total of a one-dimensional array of `elem` over
    /// `[0, len)`.
    pub fn sum<S>(&mut self, s: &mut S, elem: &Sort) -> Uf<R>
    where
        S: Solver<Rep = R>,
    {
        let arr_sort = Sort::array(vec![Index::sort()], elem.clone());
        self.get_or_declare(
            s,
            format!("sum.{}", sort_tag(elem)),
            vec![arr_sort, Index::sort()],
            elem.clone(),
            |_, _| vec![],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term_backend::{TermConfig, TermSolver};

    #[test]
    fn symbols_are_declared_once() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let mut ufs = UfRegistry::new();
        let a = ufs.fp_add(&mut s, FpSort::F32);
        let b = ufs.fp_add(&mut s, FpSort::F32);
        assert_eq!(a.name, b.name);
        // One commutativity axiom, not two.
        assert_eq!(s.assertions().len(), 1);
    }

    #[test]
    fn distinct_literals_get_distinct_constants() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let mut ufs = UfRegistry::new();
        let one = ufs.fp_const(&mut s, FpSort::F32, 1.0f32.to_bits() as u64);
        let one_again = ufs.fp_const(&mut s, FpSort::F32, 1.0f32.to_bits() as u64);
        let two = ufs.fp_const(&mut s, FpSort::F32, 2.0f32.to_bits() as u64);
        assert_eq!(one, one_again);
        assert_ne!(one, two);
    }

    #[test]
    fn trunc_declares_roundtrip_axiom() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let mut ufs = UfRegistry::new();
        ufs.fp_trunc(&mut s);
        assert_eq!(s.assertions().len(), 1);
        let rendered = s.assertions()[0].rep.clone();
        let text = crate::term_backend::render_term(&rendered);
        assert!(text.contains("fp.trunc.f64.f32"), "{}", text);
        assert!(text.contains("fp.ext.f32.f64"), "{}", text);
    }
}
