// SPDX-License-Identifier: Apache-2.0

#![cfg(feature = "has-easy-smt")]

//! Backend over an external SMT-LIB2 process via `easy-smt`.
//!
//! Terms are built as raw s-expressions. The uninterpreted float sorts ride
//! on fixed-width bit-vector carriers; nothing ever interprets those bits,
//! since every float operation stays an uninterpreted function. Lambdas
//! require a solver that accepts them (z3); quantifier-free encodings work
//! with any SMT-LIB2 solver.

use std::io;
use std::path::PathBuf;

use easy_smt::{Context, ContextBuilder, SExpr};

use crate::solver::{Expr, Response, Solver, Sort, Uf};

#[derive(Clone)]
pub struct EasySmtConfig {
    pub solver_path: PathBuf,
    pub solver_args: Vec<String>,
    pub replay_file: Option<PathBuf>,
}

impl EasySmtConfig {
    pub fn z3() -> Self {
        Self {
            solver_path: PathBuf::from("z3"),
            solver_args: ["-nw", "-smt2", "-in"].iter().map(|s| s.to_string()).collect(),
            replay_file: None,
        }
    }

    pub fn cvc5() -> Self {
        Self {
            solver_path: PathBuf::from("cvc5"),
            solver_args: ["--lang=smt2", "--incremental"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            replay_file: None,
        }
    }
}

pub struct EasySmtSolver {
    context: Context,
    next_sym: u64,
}

impl EasySmtSolver {
    fn sort_sexpr(&self, sort: &Sort) -> SExpr {
        match sort {
            Sort::Bool => self.context.atom("Bool"),
            Sort::BitVec(w) => {
                let n = self.context.numeral(*w as i64);
                self.context.bit_vec_sort(n)
            }
            Sort::Fp(p) => {
                let n = self.context.numeral(p.carrier_bits() as i64);
                self.context.bit_vec_sort(n)
            }
            Sort::Array(domain, range) => {
                // N-ary arrays are curried into nested 2-ary array sorts.
                let mut acc = self.sort_sexpr(range);
                for d in domain.iter().rev() {
                    acc = self.context.list(vec![
                        self.context.atom("Array"),
                        self.sort_sexpr(d),
                        acc,
                    ]);
                }
                acc
            }
        }
    }

    fn app(&self, op: &str, args: Vec<SExpr>) -> SExpr {
        let mut items = vec![self.context.atom(op)];
        items.extend(args);
        self.context.list(items)
    }

    fn bin(&self, op: &str, a: &Expr<SExpr>, b: &Expr<SExpr>, sort: Sort) -> Expr<SExpr> {
        Expr::new(sort, self.app(op, vec![a.rep.clone(), b.rep.clone()]))
    }

    fn binder(&mut self, kind: &str, vars: &[Expr<SExpr>], body: &Expr<SExpr>, sort: Sort) -> Expr<SExpr> {
        let bindings: Vec<SExpr> = vars
            .iter()
            .map(|v| {
                let s = self.sort_sexpr(&v.sort);
                self.context.list(vec![v.rep.clone(), s])
            })
            .collect();
        let rep = self.context.list(vec![
            self.context.atom(kind),
            self.context.list(bindings),
            body.rep.clone(),
        ]);
        Expr::new(sort, rep)
    }
}

impl Solver for EasySmtSolver {
    type Rep = SExpr;
    type Config = EasySmtConfig;

    fn new(config: &EasySmtConfig) -> io::Result<EasySmtSolver> {
        let mut builder = ContextBuilder::new();
        if let Some(ref replay) = config.replay_file {
            builder.replay_file(Some(std::fs::File::create(replay)?));
        }
        builder.solver(&config.solver_path);
        builder.solver_args(&config.solver_args);
        let context = builder.build()?;
        Ok(EasySmtSolver { context, next_sym: 0 })
    }

    fn fresh_symbol(&mut self, prefix: &str) -> String {
        let n = self.next_sym;
        self.next_sym += 1;
        format!("{}!{}", prefix, n)
    }

    fn declare(&mut self, name: &str, sort: &Sort) -> io::Result<Expr<SExpr>> {
        let s = self.sort_sexpr(sort);
        let rep = self.context.declare_const(name, s)?;
        Ok(Expr::new(sort.clone(), rep))
    }

    fn bv_lit(&mut self, width: u32, value: u64) -> Expr<SExpr> {
        let masked = if width < 64 { value & ((1u64 << width) - 1) } else { value };
        Expr::new(Sort::BitVec(width), self.context.binary(width as usize, masked))
    }

    fn bool_lit(&mut self, value: bool) -> Expr<SExpr> {
        let rep = self.context.atom(if value { "true" } else { "false" });
        Expr::new(Sort::Bool, rep)
    }

    fn not(&mut self, a: &Expr<SExpr>) -> Expr<SExpr> {
        Expr::new(Sort::Bool, self.app("not", vec![a.rep.clone()]))
    }

    fn and(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("and", a, b, Sort::Bool)
    }

    fn or(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("or", a, b, Sort::Bool)
    }

    fn implies(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("=>", a, b, Sort::Bool)
    }

    fn eq(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        assert_eq!(a.sort, b.sort, "= on mismatched sorts");
        self.bin("=", a, b, Sort::Bool)
    }

    fn ite(&mut self, cond: &Expr<SExpr>, then: &Expr<SExpr>, els: &Expr<SExpr>) -> Expr<SExpr> {
        assert_eq!(then.sort, els.sort, "ite branch sorts differ");
        Expr::new(
            then.sort.clone(),
            self.app("ite", vec![cond.rep.clone(), then.rep.clone(), els.rep.clone()]),
        )
    }

    fn bv_add(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvadd", a, b, a.sort.clone())
    }

    fn bv_sub(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvsub", a, b, a.sort.clone())
    }

    fn bv_mul(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvmul", a, b, a.sort.clone())
    }

    fn bv_udiv(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvudiv", a, b, a.sort.clone())
    }

    fn bv_urem(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvurem", a, b, a.sort.clone())
    }

    fn bv_ult(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvult", a, b, Sort::Bool)
    }

    fn bv_ule(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvule", a, b, Sort::Bool)
    }

    fn bv_and(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvand", a, b, a.sort.clone())
    }

    fn bv_or(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvor", a, b, a.sort.clone())
    }

    fn bv_xor(&mut self, a: &Expr<SExpr>, b: &Expr<SExpr>) -> Expr<SExpr> {
        self.bin("bvxor", a, b, a.sort.clone())
    }

    fn bv_not(&mut self, a: &Expr<SExpr>) -> Expr<SExpr> {
        Expr::new(a.sort.clone(), self.app("bvnot", vec![a.rep.clone()]))
    }

    fn bv_extract(&mut self, a: &Expr<SExpr>, high: u32, low: u32) -> Expr<SExpr> {
        let width = a.sort.bv_width();
        assert!(low <= high && high < width, "bad extract");
        let op = self.context.list(vec![
            self.context.atoms().und,
            self.context.atom("extract"),
            self.context.numeral(high as i64),
            self.context.numeral(low as i64),
        ]);
        Expr::new(
            Sort::BitVec(high - low + 1),
            self.context.list(vec![op, a.rep.clone()]),
        )
    }

    fn bv_sext(&mut self, a: &Expr<SExpr>, extend_width: u32) -> Expr<SExpr> {
        let width = a.sort.bv_width();
        let op = self.context.list(vec![
            self.context.atoms().und,
            self.context.atom("sign_extend"),
            self.context.numeral(extend_width as i64),
        ]);
        Expr::new(
            Sort::BitVec(width + extend_width),
            self.context.list(vec![op, a.rep.clone()]),
        )
    }

    fn bound_var(&mut self, prefix: &str, sort: &Sort) -> Expr<SExpr> {
        let name = self.fresh_symbol(prefix);
        Expr::new(sort.clone(), self.context.atom(name))
    }

    fn lambda(&mut self, vars: &[Expr<SExpr>], body: &Expr<SExpr>) -> Expr<SExpr> {
        assert!(!vars.is_empty(), "lambda with no binders");
        let sort = Sort::array(vars.iter().map(|v| v.sort.clone()).collect(), body.sort.clone());
        // Curried to match the nested-array sorts.
        let mut acc = body.clone();
        for v in vars.iter().rev() {
            let acc_sort = Sort::array(vec![v.sort.clone()], acc.sort.clone());
            acc = self.binder("lambda", std::slice::from_ref(v), &acc, acc_sort);
        }
        Expr::new(sort, acc.rep.clone())
    }

    fn apply(&mut self, f: &Expr<SExpr>, args: &[Expr<SExpr>]) -> Expr<SExpr> {
        let (domain, range) = match &f.sort {
            Sort::Array(d, r) => (d.clone(), (**r).clone()),
            other => panic!("apply on non-array sort {:?}", other),
        };
        assert_eq!(domain.len(), args.len(), "apply arity mismatch");
        let mut rep = f.rep.clone();
        for a in args {
            rep = self.app("select", vec![rep, a.rep.clone()]);
        }
        Expr::new(range, rep)
    }

    fn forall(&mut self, vars: &[Expr<SExpr>], body: &Expr<SExpr>) -> Expr<SExpr> {
        if vars.is_empty() {
            return body.clone();
        }
        self.binder("forall", vars, body, Sort::Bool)
    }

    fn const_array(&mut self, domain: &[Sort], value: &Expr<SExpr>) -> Expr<SExpr> {
        // ((as const (Array D R)) v), nested for higher arities.
        let mut acc = value.clone();
        for d in domain.iter().rev() {
            let sort = Sort::array(vec![d.clone()], acc.sort.clone());
            let sort_sexpr = self.sort_sexpr(&sort);
            let as_const = self.context.list(vec![
                self.context.atom("as"),
                self.context.atom("const"),
                sort_sexpr,
            ]);
            acc = Expr::new(sort, self.context.list(vec![as_const, acc.rep.clone()]));
        }
        Expr::new(Sort::array(domain.to_vec(), value.sort.clone()), acc.rep.clone())
    }

    fn array_store(
        &mut self,
        array: &Expr<SExpr>,
        index: &Expr<SExpr>,
        value: &Expr<SExpr>,
    ) -> Expr<SExpr> {
        Expr::new(
            array.sort.clone(),
            self.app("store", vec![array.rep.clone(), index.rep.clone(), value.rep.clone()]),
        )
    }

    fn declare_uf(&mut self, name: &str, args: &[Sort], ret: &Sort) -> io::Result<Uf<SExpr>> {
        // A total function is an array constant; application is select.
        // This sidesteps declare-fun while staying within plain SMT-LIB2.
        let sort = Sort::array(args.to_vec(), ret.clone());
        let s = self.sort_sexpr(&sort);
        let rep = self.context.declare_const(name, s)?;
        Ok(Uf { name: name.to_string(), args: args.to_vec(), ret: ret.clone(), rep })
    }

    fn apply_uf(&mut self, uf: &Uf<SExpr>, args: &[Expr<SExpr>]) -> Expr<SExpr> {
        assert_eq!(uf.args.len(), args.len(), "uf arity mismatch for {}", uf.name);
        let mut rep = uf.rep.clone();
        for a in args {
            rep = self.app("select", vec![rep, a.rep.clone()]);
        }
        Expr::new(uf.ret.clone(), rep)
    }

    fn assert(&mut self, e: &Expr<SExpr>) -> io::Result<()> {
        self.context.assert(e.rep.clone())
    }

    fn check(&mut self) -> io::Result<Response> {
        Ok(match self.context.check()? {
            easy_smt::Response::Sat => Response::Sat,
            easy_smt::Response::Unsat => Response::Unsat,
            easy_smt::Response::Unknown => Response::Unknown,
        })
    }

    fn render(&mut self, e: &Expr<SExpr>) -> String {
        self.context.display(e.rep.clone()).to_string()
    }
}

