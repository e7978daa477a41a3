// SPDX-License-Identifier: Apache-2.0

//! The expression layer: thin wrappers over an SMT term-construction backend.
//!
//! Backends implement [`Solver`]; the encoder is generic over it. Everything
//! the encoder ever needs from a backend is here: bit-vectors, booleans,
//! arrays, lambdas, quantifiers and uninterpreted functions, plus the small
//! solving surface (`assert`/`check`) used for theory axioms and by drivers.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpSort {
    F32,
    F64,
}

impl FpSort {
    pub fn tag(&self) -> &'static str {
        match self {
            FpSort::F32 => "f32",
            FpSort::F64 => "f64",
        }
    }

    /// Carrier width used by backends that model the uninterpreted float
    /// sorts as fixed-width bit-vectors.
    pub fn carrier_bits(&self) -> u32 {
        match self {
            FpSort::F32 => 32,
            FpSort::F64 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sort {
    Bool,
    BitVec(u32),
    /// Uninterpreted float sort; only the operations declared through the UF
    /// registry apply to it.
    Fp(FpSort),
    /// N-ary array (equivalently, a lambda's sort): domain sorts to range.
    Array(Vec<Sort>, Box<Sort>),
}

impl Sort {
    pub fn array(domain: Vec<Sort>, range: Sort) -> Sort {
        assert!(!domain.is_empty(), "array sort needs a non-empty domain");
        Sort::Array(domain, Box::new(range))
    }

    pub fn bv_width(&self) -> u32 {
        match self {
            Sort::BitVec(w) => *w,
            other => panic!("bv_width on non-bit-vector sort {:?}", other),
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Sort::Bool)
    }

    pub fn is_bv(&self) -> bool {
        matches!(self, Sort::BitVec(_))
    }

    pub fn range(&self) -> &Sort {
        match self {
            Sort::Array(_, range) => range,
            other => panic!("range on non-array sort {:?}", other),
        }
    }

    pub fn domain(&self) -> &[Sort] {
        match self {
            Sort::Array(domain, _) => domain,
            other => panic!("domain on non-array sort {:?}", other),
        }
    }
}

/// A backend term together with its sort. The analog of a width-carrying
/// bit-vector wrapper, generalized to the sorts this encoder needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr<R> {
    pub sort: Sort,
    pub rep: R,
}

impl<R> Expr<R> {
    pub fn new(sort: Sort, rep: R) -> Expr<R> {
        Expr { sort, rep }
    }
}

/// Handle for a declared uninterpreted function.
#[derive(Debug, Clone)]
pub struct Uf<R> {
    pub name: String,
    pub args: Vec<Sort>,
    pub ret: Sort,
    pub rep: R,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Sat,
    Unsat,
    Unknown,
}

pub trait Solver: Sized {
    type Rep: Clone + PartialEq + std::fmt::Debug;
    type Config: Send + Sync;

    fn new(config: &Self::Config) -> io::Result<Self>;

    /// Returns a symbol name that has not been handed out before.
    fn fresh_symbol(&mut self, prefix: &str) -> String;

    fn declare(&mut self, name: &str, sort: &Sort) -> io::Result<Expr<Self::Rep>>;

    fn declare_fresh(&mut self, prefix: &str, sort: &Sort) -> io::Result<Expr<Self::Rep>> {
        let name = self.fresh_symbol(prefix);
        self.declare(&name, sort)
    }

    // Literals.
    fn bv_lit(&mut self, width: u32, value: u64) -> Expr<Self::Rep>;
    fn bool_lit(&mut self, value: bool) -> Expr<Self::Rep>;

    // Booleans.
    fn not(&mut self, a: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn and(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn or(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn implies(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn eq(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn ite(
        &mut self,
        cond: &Expr<Self::Rep>,
        then: &Expr<Self::Rep>,
        els: &Expr<Self::Rep>,
    ) -> Expr<Self::Rep>;

    fn ne(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep> {
        let e = self.eq(a, b);
        self.not(&e)
    }

    // Bit-vector arithmetic.
    fn bv_add(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_sub(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_mul(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_udiv(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_urem(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_ult(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_ule(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_and(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_or(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_xor(&mut self, a: &Expr<Self::Rep>, b: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_not(&mut self, a: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    fn bv_extract(&mut self, a: &Expr<Self::Rep>, high: u32, low: u32) -> Expr<Self::Rep>;
    fn bv_sext(&mut self, a: &Expr<Self::Rep>, extend_width: u32) -> Expr<Self::Rep>;

    // Binders, arrays and uninterpreted functions.

    /// A fresh variable intended to be bound by a later `lambda`/`forall`.
    fn bound_var(&mut self, prefix: &str, sort: &Sort) -> Expr<Self::Rep>;
    fn lambda(&mut self, vars: &[Expr<Self::Rep>], body: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    /// Full application of a lambda/array value; backends may beta-reduce.
    fn apply(&mut self, f: &Expr<Self::Rep>, args: &[Expr<Self::Rep>]) -> Expr<Self::Rep>;
    fn forall(&mut self, vars: &[Expr<Self::Rep>], body: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    /// An array mapping every index tuple of `domain` to `value`.
    fn const_array(&mut self, domain: &[Sort], value: &Expr<Self::Rep>) -> Expr<Self::Rep>;
    /// Point update of a one-dimensional array.
    fn array_store(
        &mut self,
        array: &Expr<Self::Rep>,
        index: &Expr<Self::Rep>,
        value: &Expr<Self::Rep>,
    ) -> Expr<Self::Rep>;

    fn declare_uf(&mut self, name: &str, args: &[Sort], ret: &Sort) -> io::Result<Uf<Self::Rep>>;
    fn apply_uf(&mut self, uf: &Uf<Self::Rep>, args: &[Expr<Self::Rep>]) -> Expr<Self::Rep>;

    // Solving surface.
    fn assert(&mut self, e: &Expr<Self::Rep>) -> io::Result<()>;
    fn check(&mut self) -> io::Result<Response>;
    fn render(&mut self, e: &Expr<Self::Rep>) -> String;
    fn simplify(&mut self, e: &Expr<Self::Rep>) -> Expr<Self::Rep> {
        e.clone()
    }

    // Derived helpers.
    fn and_many(&mut self, es: &[Expr<Self::Rep>]) -> Expr<Self::Rep> {
        let mut iter = es.iter();
        let mut acc = match iter.next() {
            Some(e) => e.clone(),
            None => return self.bool_lit(true),
        };
        for e in iter {
            acc = self.and(&acc, e);
        }
        acc
    }

    fn or_many(&mut self, es: &[Expr<Self::Rep>]) -> Expr<Self::Rep> {
        let mut iter = es.iter();
        let mut acc = match iter.next() {
            Some(e) => e.clone(),
            None => return self.bool_lit(false),
        };
        for e in iter {
            acc = self.or(&acc, e);
        }
        acc
    }

    /// Pairwise equality of two equal-length vectors, conjoined.
    fn lists_equal(&mut self, a: &[Expr<Self::Rep>], b: &[Expr<Self::Rep>]) -> Expr<Self::Rep> {
        assert_eq!(a.len(), b.len(), "lists_equal on different lengths");
        let eqs: Vec<_> = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| self.eq(x, y))
            .collect();
        self.and_many(&eqs)
    }

    fn is_non_zero(&mut self, a: &Expr<Self::Rep>) -> Expr<Self::Rep> {
        let zero = self.bv_lit(a.sort.bv_width(), 0);
        self.ne(a, &zero)
    }
}
