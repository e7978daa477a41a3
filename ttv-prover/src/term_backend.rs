// SPDX-License-Identifier: Apache-2.0

//! In-process backend that builds plain term ASTs.
//!
//! No external solver is involved: `check` always answers `Unknown`. The
//! value of this backend is everything else — deterministic term
//! construction, beta-reduction of lambda applications, literal folding, and
//! SMT-LIB-style rendering — which is what the unit tests and any
//! driver-side debugging need.

use std::collections::HashMap;
use std::collections::HashSet;
use std::io;
use std::rc::Rc;

use crate::solver::{Expr, Response, Solver, Sort, Uf};

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var { name: String, sort: Sort },
    BvLit { width: u32, value: u64 },
    BoolLit(bool),
    App { op: &'static str, args: Vec<Rc<Term>> },
    Extract { high: u32, low: u32, arg: Rc<Term> },
    Sext { extend: u32, arg: Rc<Term> },
    ConstArray { domain: Vec<Sort>, range: Sort, value: Rc<Term> },
    Lambda { vars: Vec<Rc<Term>>, body: Rc<Term> },
    Forall { vars: Vec<Rc<Term>>, body: Rc<Term> },
    UfApp { name: String, args: Vec<Rc<Term>> },
}

fn mask(width: u32, value: u64) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

fn as_bv_lit(t: &Rc<Term>) -> Option<(u32, u64)> {
    match &**t {
        Term::BvLit { width, value } => Some((*width, *value)),
        _ => None,
    }
}

fn as_bool_lit(t: &Rc<Term>) -> Option<bool> {
    match &**t {
        Term::BoolLit(b) => Some(*b),
        _ => None,
    }
}

fn bv(width: u32, value: u64) -> Rc<Term> {
    Rc::new(Term::BvLit { width, value: mask(width, value) })
}

fn boolean(value: bool) -> Rc<Term> {
    Rc::new(Term::BoolLit(value))
}

/// Smart constructor with the folding rules the tests rely on. Folding is
/// best-effort; anything unhandled is kept symbolic.
fn mk_app(op: &'static str, args: Vec<Rc<Term>>) -> Rc<Term> {
    match op {
        "not" => {
            if let Some(b) = as_bool_lit(&args[0]) {
                return boolean(!b);
            }
            if let Term::App { op: "not", args: inner } = &*args[0] {
                return inner[0].clone();
            }
        }
        "and" => {
            let (a, b) = (&args[0], &args[1]);
            match (as_bool_lit(a), as_bool_lit(b)) {
                (Some(false), _) | (_, Some(false)) => return boolean(false),
                (Some(true), _) => return b.clone(),
                (_, Some(true)) => return a.clone(),
                _ => {
                    if a == b {
                        return a.clone();
                    }
                }
            }
        }
        "or" => {
            let (a, b) = (&args[0], &args[1]);
            match (as_bool_lit(a), as_bool_lit(b)) {
                (Some(true), _) | (_, Some(true)) => return boolean(true),
                (Some(false), _) => return b.clone(),
                (_, Some(false)) => return a.clone(),
                _ => {
                    if a == b {
                        return a.clone();
                    }
                }
            }
        }
        "=>" => {
            let (a, b) = (&args[0], &args[1]);
            match (as_bool_lit(a), as_bool_lit(b)) {
                (Some(false), _) | (_, Some(true)) => return boolean(true),
                (Some(true), _) => return b.clone(),
                _ => {
                    if a == b {
                        return boolean(true);
                    }
                }
            }
        }
        "=" => {
            let (a, b) = (&args[0], &args[1]);
            if a == b {
                return boolean(true);
            }
            if let (Some((wa, va)), Some((wb, vb))) = (as_bv_lit(a), as_bv_lit(b)) {
                assert_eq!(wa, wb, "= on different widths");
                return boolean(va == vb);
            }
            if let (Some(ba), Some(bb)) = (as_bool_lit(a), as_bool_lit(b)) {
                return boolean(ba == bb);
            }
        }
        "ite" => {
            let (c, t, e) = (&args[0], &args[1], &args[2]);
            if let Some(b) = as_bool_lit(c) {
                return if b { t.clone() } else { e.clone() };
            }
            if t == e {
                return t.clone();
            }
        }
        "bvadd" | "bvsub" | "bvmul" | "bvudiv" | "bvurem" => {
            let (a, b) = (&args[0], &args[1]);
            if let (Some((w, va)), Some((_, vb))) = (as_bv_lit(a), as_bv_lit(b)) {
                let v = match op {
                    "bvadd" => va.wrapping_add(vb),
                    "bvsub" => va.wrapping_sub(vb),
                    "bvmul" => va.wrapping_mul(vb),
                    // SMT-LIB division semantics for a zero divisor.
                    "bvudiv" => {
                        if vb == 0 {
                            mask(w, u64::MAX)
                        } else {
                            va / vb
                        }
                    }
                    "bvurem" => {
                        if vb == 0 {
                            va
                        } else {
                            va % vb
                        }
                    }
                    _ => unreachable!(),
                };
                return bv(w, v);
            }
            match (op, as_bv_lit(a), as_bv_lit(b)) {
                ("bvadd", Some((_, 0)), _) => return b.clone(),
                ("bvadd", _, Some((_, 0))) => return a.clone(),
                ("bvsub", _, Some((_, 0))) => return a.clone(),
                ("bvmul", Some((_, 1)), _) => return b.clone(),
                ("bvmul", _, Some((_, 1))) => return a.clone(),
                ("bvmul", Some((w, 0)), _) | ("bvmul", _, Some((w, 0))) => return bv(w, 0),
                ("bvudiv", _, Some((_, 1))) => return a.clone(),
                ("bvurem", _, Some((w, 1))) => return bv(w, 0),
                _ => {}
            }
        }
        "bvult" => {
            let (a, b) = (&args[0], &args[1]);
            if a == b {
                return boolean(false);
            }
            if let (Some((_, va)), Some((_, vb))) = (as_bv_lit(a), as_bv_lit(b)) {
                return boolean(va < vb);
            }
        }
        "bvule" => {
            let (a, b) = (&args[0], &args[1]);
            if a == b {
                return boolean(true);
            }
            if let (Some((_, va)), Some((_, vb))) = (as_bv_lit(a), as_bv_lit(b)) {
                return boolean(va <= vb);
            }
        }
        "bvand" | "bvor" | "bvxor" => {
            let (a, b) = (&args[0], &args[1]);
            if let (Some((w, va)), Some((_, vb))) = (as_bv_lit(a), as_bv_lit(b)) {
                let v = match op {
                    "bvand" => va & vb,
                    "bvor" => va | vb,
                    "bvxor" => va ^ vb,
                    _ => unreachable!(),
                };
                return bv(w, v);
            }
        }
        "bvnot" => {
            if let Some((w, v)) = as_bv_lit(&args[0]) {
                return bv(w, !v);
            }
        }
        "select" => {
            // select over store / const-array with a decidable index.
            let arr = &args[0];
            let idx = &args[1..];
            match &**arr {
                Term::ConstArray { value, .. } => return value.clone(),
                Term::App { op: "store", args: st } if idx.len() == 1 => {
                    let (base, si, sv) = (&st[0], &st[1], &st[2]);
                    if si == &idx[0] {
                        return sv.clone();
                    }
                    if let (Some((_, a)), Some((_, b))) = (as_bv_lit(si), as_bv_lit(&idx[0])) {
                        if a != b {
                            let mut rec = vec![base.clone()];
                            rec.extend(idx.iter().cloned());
                            return mk_app("select", rec);
                        }
                    }
                }
                Term::Lambda { vars, body } => {
                    assert_eq!(vars.len(), idx.len(), "partial lambda application");
                    let map: HashMap<&str, Rc<Term>> = vars
                        .iter()
                        .zip(idx.iter())
                        .map(|(v, a)| (var_name(v), a.clone()))
                        .collect();
                    return subst(body, &map);
                }
                _ => {}
            }
        }
        _ => {}
    }
    Rc::new(Term::App { op, args })
}

fn var_name(t: &Rc<Term>) -> &str {
    match &**t {
        Term::Var { name, .. } => name,
        other => panic!("binder is not a variable: {:?}", other),
    }
}

fn mk_extract(high: u32, low: u32, arg: Rc<Term>) -> Rc<Term> {
    if let Some((_, v)) = as_bv_lit(&arg) {
        return bv(high - low + 1, v >> low);
    }
    Rc::new(Term::Extract { high, low, arg })
}

fn mk_sext(extend: u32, arg: Rc<Term>) -> Rc<Term> {
    if let Some((w, v)) = as_bv_lit(&arg) {
        let sign = w < 64 && (v >> (w - 1)) & 1 == 1;
        let ext = if sign { mask(w + extend, u64::MAX << w) | v } else { v };
        return bv(w + extend, ext);
    }
    Rc::new(Term::Sext { extend, arg })
}

/// Capture-free substitution: all binder names are globally unique, so a
/// plain name map suffices.
fn subst(term: &Rc<Term>, map: &HashMap<&str, Rc<Term>>) -> Rc<Term> {
    match &**term {
        Term::Var { name, .. } => match map.get(name.as_str()) {
            Some(t) => t.clone(),
            None => term.clone(),
        },
        Term::BvLit { .. } | Term::BoolLit(_) => term.clone(),
        Term::App { op, args } => {
            mk_app(*op, args.iter().map(|a| subst(a, map)).collect())
        }
        Term::Extract { high, low, arg } => mk_extract(*high, *low, subst(arg, map)),
        Term::Sext { extend, arg } => mk_sext(*extend, subst(arg, map)),
        Term::ConstArray { domain, range, value } => Rc::new(Term::ConstArray {
            domain: domain.clone(),
            range: range.clone(),
            value: subst(value, map),
        }),
        Term::Lambda { vars, body } => Rc::new(Term::Lambda {
            vars: vars.clone(),
            body: subst(body, map),
        }),
        Term::Forall { vars, body } => Rc::new(Term::Forall {
            vars: vars.clone(),
            body: subst(body, map),
        }),
        Term::UfApp { name, args } => Rc::new(Term::UfApp {
            name: name.clone(),
            args: args.iter().map(|a| subst(a, map)).collect(),
        }),
    }
}

fn sort_smt(sort: &Sort) -> String {
    match sort {
        Sort::Bool => "Bool".to_string(),
        Sort::BitVec(w) => format!("(_ BitVec {})", w),
        Sort::Fp(p) => match p.tag() {
            "f32" => "Float32".to_string(),
            _ => "Float64".to_string(),
        },
        Sort::Array(domain, range) => {
            let mut s = "(Array".to_string();
            for d in domain {
                s.push(' ');
                s.push_str(&sort_smt(d));
            }
            s.push(' ');
            s.push_str(&sort_smt(range));
            s.push(')');
            s
        }
    }
}

fn render_binders(vars: &[Rc<Term>]) -> String {
    let mut s = "(".to_string();
    for (i, v) in vars.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        match &**v {
            Term::Var { name, sort } => {
                s.push_str(&format!("({} {})", name, sort_smt(sort)));
            }
            other => panic!("binder is not a variable: {:?}", other),
        }
    }
    s.push(')');
    s
}

pub fn render_term(term: &Term) -> String {
    match term {
        Term::Var { name, .. } => name.clone(),
        Term::BvLit { width, value } => {
            if width % 4 == 0 {
                format!("#x{:0w$x}", value, w = (*width / 4) as usize)
            } else {
                let mut s = "#b".to_string();
                for bit in (0..*width).rev() {
                    s.push(if (value >> bit) & 1 == 1 { '1' } else { '0' });
                }
                s
            }
        }
        Term::BoolLit(b) => b.to_string(),
        Term::App { op, args } => {
            let mut s = format!("({}", op);
            for a in args {
                s.push(' ');
                s.push_str(&render_term(a));
            }
            s.push(')');
            s
        }
        Term::Extract { high, low, arg } => {
            format!("((_ extract {} {}) {})", high, low, render_term(arg))
        }
        Term::Sext { extend, arg } => {
            format!("((_ sign_extend {}) {})", extend, render_term(arg))
        }
        Term::ConstArray { domain, range, value } => format!(
            "((as const {}) {})",
            sort_smt(&Sort::Array(domain.clone(), Box::new(range.clone()))),
            render_term(value)
        ),
        Term::Lambda { vars, body } => {
            format!("(lambda {} {})", render_binders(vars), render_term(body))
        }
        Term::Forall { vars, body } => {
            format!("(forall {} {})", render_binders(vars), render_term(body))
        }
        Term::UfApp { name, args } => {
            if args.is_empty() {
                name.clone()
            } else {
                let mut s = format!("({}", name);
                for a in args {
                    s.push(' ');
                    s.push_str(&render_term(a));
                }
                s.push(')');
                s
            }
        }
    }
}

#[derive(Default, Clone)]
pub struct TermConfig;

pub struct TermSolver {
    next_sym: u64,
    declared: HashSet<String>,
    asserts: Vec<Expr<Rc<Term>>>,
}

impl TermSolver {
    /// Assertions recorded so far (theory axioms, driver constraints).
    pub fn assertions(&self) -> &[Expr<Rc<Term>>] {
        &self.asserts
    }

    fn bin_bv(
        &mut self,
        op: &'static str,
        a: &Expr<Rc<Term>>,
        b: &Expr<Rc<Term>>,
    ) -> Expr<Rc<Term>> {
        assert_eq!(a.sort, b.sort, "{} on mismatched sorts", op);
        assert!(a.sort.is_bv(), "{} on non-bit-vector", op);
        Expr::new(a.sort.clone(), mk_app(op, vec![a.rep.clone(), b.rep.clone()]))
    }

    fn bin_bv_pred(
        &mut self,
        op: &'static str,
        a: &Expr<Rc<Term>>,
        b: &Expr<Rc<Term>>,
    ) -> Expr<Rc<Term>> {
        assert_eq!(a.sort, b.sort, "{} on mismatched sorts", op);
        Expr::new(Sort::Bool, mk_app(op, vec![a.rep.clone(), b.rep.clone()]))
    }

    fn bin_bool(
        &mut self,
        op: &'static str,
        a: &Expr<Rc<Term>>,
        b: &Expr<Rc<Term>>,
    ) -> Expr<Rc<Term>> {
        assert!(a.sort.is_bool() && b.sort.is_bool(), "{} on non-boolean", op);
        Expr::new(Sort::Bool, mk_app(op, vec![a.rep.clone(), b.rep.clone()]))
    }
}

impl Solver for TermSolver {
    type Rep = Rc<Term>;
    type Config = TermConfig;

    fn new(_config: &TermConfig) -> io::Result<TermSolver> {
        Ok(TermSolver { next_sym: 0, declared: HashSet::new(), asserts: Vec::new() })
    }

    fn fresh_symbol(&mut self, prefix: &str) -> String {
        let n = self.next_sym;
        self.next_sym += 1;
        format!("{}!{}", prefix, n)
    }

    fn declare(&mut self, name: &str, sort: &Sort) -> io::Result<Expr<Rc<Term>>> {
        assert!(self.declared.insert(name.to_string()), "symbol declared twice: {}", name);
        Ok(Expr::new(
            sort.clone(),
            Rc::new(Term::Var { name: name.to_string(), sort: sort.clone() }),
        ))
    }

    fn bv_lit(&mut self, width: u32, value: u64) -> Expr<Rc<Term>> {
        Expr::new(Sort::BitVec(width), bv(width, value))
    }

    fn bool_lit(&mut self, value: bool) -> Expr<Rc<Term>> {
        Expr::new(Sort::Bool, boolean(value))
    }

    fn not(&mut self, a: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        assert!(a.sort.is_bool(), "not on non-boolean");
        Expr::new(Sort::Bool, mk_app("not", vec![a.rep.clone()]))
    }

    fn and(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bool("and", a, b)
    }

    fn or(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bool("or", a, b)
    }

    fn implies(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bool("=>", a, b)
    }

    fn eq(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        assert_eq!(a.sort, b.sort, "= on mismatched sorts");
        Expr::new(Sort::Bool, mk_app("=", vec![a.rep.clone(), b.rep.clone()]))
    }

    fn ite(
        &mut self,
        cond: &Expr<Rc<Term>>,
        then: &Expr<Rc<Term>>,
        els: &Expr<Rc<Term>>,
    ) -> Expr<Rc<Term>> {
        assert!(cond.sort.is_bool(), "ite condition must be boolean");
        assert_eq!(then.sort, els.sort, "ite branch sorts differ");
        Expr::new(
            then.sort.clone(),
            mk_app("ite", vec![cond.rep.clone(), then.rep.clone(), els.rep.clone()]),
        )
    }

    fn bv_add(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvadd", a, b)
    }

    fn bv_sub(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvsub", a, b)
    }

    fn bv_mul(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvmul", a, b)
    }

    fn bv_udiv(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvudiv", a, b)
    }

    fn bv_urem(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvurem", a, b)
    }

    fn bv_ult(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv_pred("bvult", a, b)
    }

    fn bv_ule(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv_pred("bvule", a, b)
    }

    fn bv_and(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvand", a, b)
    }

    fn bv_or(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvor", a, b)
    }

    fn bv_xor(&mut self, a: &Expr<Rc<Term>>, b: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        self.bin_bv("bvxor", a, b)
    }

    fn bv_not(&mut self, a: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        assert!(a.sort.is_bv(), "bvnot on non-bit-vector");
        Expr::new(a.sort.clone(), mk_app("bvnot", vec![a.rep.clone()]))
    }

    fn bv_extract(&mut self, a: &Expr<Rc<Term>>, high: u32, low: u32) -> Expr<Rc<Term>> {
        let width = a.sort.bv_width();
        assert!(low <= high && high < width, "bad extract [{high}:{low}] of width {width}");
        Expr::new(Sort::BitVec(high - low + 1), mk_extract(high, low, a.rep.clone()))
    }

    fn bv_sext(&mut self, a: &Expr<Rc<Term>>, extend_width: u32) -> Expr<Rc<Term>> {
        let width = a.sort.bv_width();
        Expr::new(Sort::BitVec(width + extend_width), mk_sext(extend_width, a.rep.clone()))
    }

    fn bound_var(&mut self, prefix: &str, sort: &Sort) -> Expr<Rc<Term>> {
        let name = self.fresh_symbol(prefix);
        Expr::new(sort.clone(), Rc::new(Term::Var { name, sort: sort.clone() }))
    }

    fn lambda(&mut self, vars: &[Expr<Rc<Term>>], body: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        assert!(!vars.is_empty(), "lambda with no binders");
        let sort = Sort::array(vars.iter().map(|v| v.sort.clone()).collect(), body.sort.clone());
        Expr::new(
            sort,
            Rc::new(Term::Lambda {
                vars: vars.iter().map(|v| v.rep.clone()).collect(),
                body: body.rep.clone(),
            }),
        )
    }

    fn apply(&mut self, f: &Expr<Rc<Term>>, args: &[Expr<Rc<Term>>]) -> Expr<Rc<Term>> {
        let (domain, range) = match &f.sort {
            Sort::Array(d, r) => (d, (**r).clone()),
            other => panic!("apply on non-array sort {:?}", other),
        };
        assert_eq!(domain.len(), args.len(), "apply arity mismatch");
        for (d, a) in domain.iter().zip(args.iter()) {
            assert_eq!(d, &a.sort, "apply argument sort mismatch");
        }
        let mut rep_args = vec![f.rep.clone()];
        rep_args.extend(args.iter().map(|a| a.rep.clone()));
        Expr::new(range, mk_app("select", rep_args))
    }

    fn forall(&mut self, vars: &[Expr<Rc<Term>>], body: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        assert!(body.sort.is_bool(), "forall body must be boolean");
        if vars.is_empty() {
            return body.clone();
        }
        Expr::new(
            Sort::Bool,
            Rc::new(Term::Forall {
                vars: vars.iter().map(|v| v.rep.clone()).collect(),
                body: body.rep.clone(),
            }),
        )
    }

    fn const_array(&mut self, domain: &[Sort], value: &Expr<Rc<Term>>) -> Expr<Rc<Term>> {
        Expr::new(
            Sort::array(domain.to_vec(), value.sort.clone()),
            Rc::new(Term::ConstArray {
                domain: domain.to_vec(),
                range: value.sort.clone(),
                value: value.rep.clone(),
            }),
        )
    }

    fn array_store(
        &mut self,
        array: &Expr<Rc<Term>>,
        index: &Expr<Rc<Term>>,
        value: &Expr<Rc<Term>>,
    ) -> Expr<Rc<Term>> {
        assert_eq!(array.sort.domain().len(), 1, "array_store is one-dimensional");
        assert_eq!(array.sort.range(), &value.sort, "array_store value sort mismatch");
        Expr::new(
            array.sort.clone(),
            mk_app("store", vec![array.rep.clone(), index.rep.clone(), value.rep.clone()]),
        )
    }

    fn declare_uf(&mut self, name: &str, args: &[Sort], ret: &Sort) -> io::Result<Uf<Rc<Term>>> {
        assert!(self.declared.insert(name.to_string()), "symbol declared twice: {}", name);
        Ok(Uf {
            name: name.to_string(),
            args: args.to_vec(),
            ret: ret.clone(),
            rep: Rc::new(Term::UfApp { name: name.to_string(), args: vec![] }),
        })
    }

    fn apply_uf(&mut self, uf: &Uf<Rc<Term>>, args: &[Expr<Rc<Term>>]) -> Expr<Rc<Term>> {
        assert_eq!(uf.args.len(), args.len(), "uf arity mismatch for {}", uf.name);
        for (d, a) in uf.args.iter().zip(args.iter()) {
            assert_eq!(d, &a.sort, "uf argument sort mismatch for {}", uf.name);
        }
        Expr::new(
            uf.ret.clone(),
            Rc::new(Term::UfApp {
                name: uf.name.clone(),
                args: args.iter().map(|a| a.rep.clone()).collect(),
            }),
        )
    }

    fn assert(&mut self, e: &Expr<Rc<Term>>) -> io::Result<()> {
        assert!(e.sort.is_bool(), "asserting a non-boolean");
        self.asserts.push(e.clone());
        Ok(())
    }

    fn check(&mut self) -> io::Result<Response> {
        Ok(Response::Unknown)
    }

    fn render(&mut self, e: &Expr<Rc<Term>>) -> String {
        render_term(&e.rep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn solver() -> TermSolver {
        TermSolver::new(&TermConfig).unwrap()
    }

    #[test]
    fn literal_arithmetic_folds() {
        let mut s = solver();
        let a = s.bv_lit(32, 6);
        let b = s.bv_lit(32, 7);
        let sum = s.bv_add(&a, &b);
        let thirteen = s.bv_lit(32, 13);
        assert_eq!(sum, thirteen);
        let p = s.bv_ult(&a, &b);
        let t = s.bool_lit(true);
        assert_eq!(p, t);
        let zero = s.bv_lit(32, 0);
        let q = s.bv_udiv(&a, &zero);
        let all_ones = s.bv_lit(32, 0xffff_ffff);
        assert_eq!(q, all_ones);
    }

    #[test]
    fn beta_reduction_applies_lambda() {
        let mut s = solver();
        let i = s.bound_var("i", &Sort::BitVec(32));
        let one = s.bv_lit(32, 1);
        let body = s.bv_add(&i, &one);
        let lam = s.lambda(&[i], &body);
        let arg = s.bv_lit(32, 41);
        let applied = s.apply(&lam, &[arg]);
        let expected = s.bv_lit(32, 42);
        assert_eq!(applied, expected);
    }

    #[test]
    fn select_over_store_resolves_literal_indices() {
        let mut s = solver();
        let base_val = s.bv_lit(8, 0);
        let arr = s.const_array(&[Sort::BitVec(32)], &base_val);
        let i1 = s.bv_lit(32, 1);
        let v1 = s.bv_lit(8, 9);
        let stored = s.array_store(&arr, &i1, &v1);
        let one = s.bv_lit(32, 1);
        let hit = s.apply(&stored, &[one]);
        assert_eq!(hit, v1);
        let two = s.bv_lit(32, 2);
        let miss = s.apply(&stored, &[two]);
        assert_eq!(miss, base_val);
    }

    #[test]
    fn render_is_smtlib_shaped() {
        let mut s = solver();
        let x = s.declare("x", &Sort::BitVec(8)).unwrap();
        let y = s.bv_lit(8, 3);
        let e = s.bv_add(&x, &y);
        assert_eq!(s.render(&e), "(bvadd x #x03)");
        let i = s.bound_var("i", &Sort::BitVec(32));
        let four = s.bv_lit(32, 4);
        let b = s.bv_ult(&i, &four);
        let q = s.forall(&[i], &b);
        assert_eq!(s.render(&q), "(forall ((i!0 (_ BitVec 32))) (bvult i!0 #x00000004))");
    }

    #[test]
    fn fresh_symbols_are_deterministic_per_instance() {
        let mut s1 = solver();
        let mut s2 = solver();
        assert_eq!(s1.fresh_symbol("i"), s2.fresh_symbol("i"));
        assert_eq!(s1.fresh_symbol("i"), s2.fresh_symbol("i"));
    }

    #[test]
    #[should_panic(expected = "declared twice")]
    fn duplicate_declaration_panics() {
        let mut s = solver();
        s.declare("x", &Sort::Bool).unwrap();
        s.declare("x", &Sort::Bool).unwrap();
    }
}
