// SPDX-License-Identifier: Apache-2.0

//! Encoding state: the register file binding IR values to abstract values,
//! the well-definedness accumulator, the symbolic memory, and the loop-scope
//! stack.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ttv_ir::ir::{Dim, Fn, OpId, Type, ValueId};

use crate::error::EncodeResult;
use crate::memory::Memory;
use crate::solver::{Expr, Solver};
use crate::uf::UfRegistry;
use crate::value::{scalar_sort, Float, fp_sort_of, get_1d_size, Index, Layout, MemRef, Tensor, Value};

/// Write-once map from IR values to abstract values. A failed lookup or a
/// rebind is a programmer error, not a runtime condition.
#[derive(Debug, Clone)]
pub struct RegFile<R> {
    map: HashMap<ValueId, Value<R>>,
}

impl<R> Default for RegFile<R> {
    fn default() -> Self {
        RegFile { map: HashMap::new() }
    }
}

impl<R: Clone + PartialEq + std::fmt::Debug> RegFile<R> {
    pub fn add(&mut self, id: ValueId, value: Value<R>) {
        let prev = self.map.insert(id, value);
        assert!(prev.is_none(), "register rebound: {}", id);
    }

    pub fn contains(&self, id: ValueId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn get(&self, id: ValueId) -> &Value<R> {
        self.map
            .get(&id)
            .unwrap_or_else(|| panic!("no register binding for {}", id))
    }

    pub fn get_index(&self, id: ValueId) -> Expr<R> {
        match self.get(id) {
            Value::Index(e) => e.clone(),
            other => panic!("{} is not an index: {:?}", id, other),
        }
    }

    pub fn get_int(&self, id: ValueId) -> Expr<R> {
        match self.get(id) {
            Value::Int(e) => e.clone(),
            other => panic!("{} is not an integer: {:?}", id, other),
        }
    }

    pub fn get_float(&self, id: ValueId) -> Float<R> {
        match self.get(id) {
            Value::Float(f) => f.clone(),
            other => panic!("{} is not a float: {:?}", id, other),
        }
    }

    pub fn get_tensor(&self, id: ValueId) -> Tensor<R> {
        match self.get(id) {
            Value::Tensor(t) => t.clone(),
            other => panic!("{} is not a tensor: {:?}", id, other),
        }
    }

    pub fn get_memref(&self, id: ValueId) -> MemRef<R> {
        match self.get(id) {
            Value::MemRef(m) => m.clone(),
            other => panic!("{} is not a memref: {:?}", id, other),
        }
    }

    /// The underlying expression of a scalar binding.
    pub fn get_expr(&self, id: ValueId) -> Expr<R> {
        self.get(id).as_expr().clone()
    }
}

/// One loop nest being encoded: induction variables and their inclusive
/// upper bounds.
#[derive(Debug, Clone)]
pub struct LoopScope<R> {
    pub ind_vars: Vec<Expr<R>>,
    pub ind_var_upper_bounds: Vec<Expr<R>>,
}

#[derive(Debug, Clone)]
pub struct State<R> {
    pub regs: RegFile<R>,
    pub mem: Memory<R>,
    /// Shared across loop-body state clones so declared symbols stay known.
    pub ufs: Rc<RefCell<UfRegistry<R>>>,
    /// Per-op well-definedness conjuncts, in program order.
    welldefs: Vec<(OpId, Expr<R>)>,
    /// Assumptions about symbolic inputs (argument block-id domains); a
    /// driver assumes these, they are not well-definedness.
    pub preconds: Vec<Expr<R>>,
    pub ret_values: Vec<Value<R>>,
    loop_scopes: Vec<LoopScope<R>>,
    pub has_const_array: bool,
    pub has_quantifier: bool,
}

impl<R: Clone + PartialEq + std::fmt::Debug> State<R> {
    /// Fresh state with every function parameter bound: scalars become fresh
    /// constants, tensors fresh array variables with per-axis dims, memrefs
    /// fresh argument blocks with symbolic (possibly aliasing) block ids.
    pub fn new<S: Solver<Rep = R>>(s: &mut S, f: &Fn) -> EncodeResult<State<R>> {
        let mut st = State {
            regs: RegFile::default(),
            mem: Memory::new(),
            ufs: Rc::new(RefCell::new(UfRegistry::new())),
            welldefs: Vec::new(),
            preconds: Vec::new(),
            ret_values: Vec::new(),
            loop_scopes: Vec::new(),
            has_const_array: false,
            has_quantifier: false,
        };
        let mut arg_bids: Vec<Expr<R>> = Vec::new();
        for p in &f.params {
            match &p.ty {
                Type::Scalar(sc) => {
                    let e = s
                        .declare(&p.name, &scalar_sort(*sc))
                        .expect("parameter declaration failed");
                    let v = if sc.is_float() {
                        Value::Float(Float::new(e, fp_sort_of(*sc)))
                    } else {
                        Value::from_expr(e, *sc)
                    };
                    st.regs.add(p.value, v);
                }
                Type::Tensor(tt) => {
                    let dims = dims_for_param(s, &p.name, &tt.dims);
                    let t = Tensor::var(s, tt.elem, &p.name, dims);
                    st.regs.add(p.value, Value::Tensor(t));
                }
                Type::MemRef(mt) => {
                    let dims = dims_for_param(s, &p.name, &mt.dims);
                    let layout = Layout::from_affine_map(s, &mt.layout, &dims)?;
                    let size = if mt.layout.is_identity() {
                        get_1d_size(s, &dims)
                    } else {
                        // The physical extent of a strided argument is not
                        // derivable from its shape; accesses carry the size
                        // obligation symbolically.
                        log::warn!(
                            "argument {} has a non-identity layout; its block size stays symbolic",
                            p.name
                        );
                        s.declare(&format!("{}.numelem", p.name), &Index::sort())
                            .expect("block size declaration failed")
                    };
                    st.mem.add_arg_block(s, &p.name, mt.elem, size);
                    let bid_sort = crate::solver::Sort::BitVec(Memory::<R>::BID_BITS);
                    let bid = s
                        .declare(&format!("{}.bid", p.name), &bid_sort)
                        .expect("block id declaration failed");
                    arg_bids.push(bid.clone());
                    let offset = Index::zero(s);
                    let m = MemRef::new(mt.elem, bid, offset, dims, layout);
                    st.regs.add(p.value, Value::MemRef(m));
                }
            }
        }
        // Argument ids range over the argument blocks only; local blocks
        // allocated later can never be aliased by an argument view.
        let n = st.mem.num_blocks();
        let bound = s.bv_lit(Memory::<R>::BID_BITS, n as u64);
        for bid in arg_bids {
            let in_range = s.bv_ult(&bid, &bound);
            st.preconds.push(in_range);
        }
        Ok(st)
    }

    /// Records a well-definedness conjunct for `op`.
    pub fn well_defined(&mut self, op: OpId, e: Expr<R>) {
        self.welldefs.push((op, e));
    }

    /// Conjunction of the conditions recorded for one op.
    pub fn op_well_defined<S: Solver<Rep = R>>(&self, s: &mut S, op: OpId) -> Expr<R> {
        let es: Vec<_> = self
            .welldefs
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, e)| e.clone())
            .collect();
        s.and_many(&es)
    }

    /// The whole accumulated well-definedness predicate, in program order.
    pub fn well_defined_pred<S: Solver<Rep = R>>(&self, s: &mut S) -> Expr<R> {
        let es: Vec<_> = self.welldefs.iter().map(|(_, e)| e.clone()).collect();
        s.and_many(&es)
    }

    pub fn loop_scope(&self) -> &LoopScope<R> {
        self.loop_scopes.last().expect("no loop scope open")
    }

    /// Runs `f` with `scope` pushed; the scope is popped on every exit path,
    /// including early `?` returns.
    pub fn with_loop_scope<T>(
        &mut self,
        scope: LoopScope<R>,
        f: impl FnOnce(&mut Self) -> EncodeResult<T>,
    ) -> EncodeResult<T> {
        self.loop_scopes.push(scope);
        let result = f(self);
        self.loop_scopes.pop();
        result
    }
}

/// Dim expressions for a parameter's shape: literals for static axes, fresh
/// variables for dynamic ones; rank-0 shapes get a single unit dim.
fn dims_for_param<S: Solver>(
    s: &mut S,
    name: &str,
    dims: &[Dim],
) -> Vec<Expr<S::Rep>> {
    if dims.is_empty() {
        return vec![Index::one(s)];
    }
    dims.iter()
        .enumerate()
        .map(|(i, d)| match d {
            Dim::Static(v) => Index::lit(s, *v as i64),
            Dim::Dynamic => s
                .declare(&format!("{}.dim{}", name, i), &Index::sort())
                .expect("dim declaration failed"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unsupported;
    use crate::term_backend::{TermConfig, TermSolver};
    use crate::solver::Solver;

    #[test]
    #[should_panic(expected = "register rebound")]
    fn register_file_is_write_once() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let mut regs: RegFile<_> = RegFile::default();
        let e = s.bv_lit(Index::BITS, 1);
        regs.add(ValueId(0), crate::value::Value::Index(e.clone()));
        regs.add(ValueId(0), crate::value::Value::Index(e));
    }

    #[test]
    #[should_panic(expected = "no register binding")]
    fn missing_lookup_is_a_hard_failure() {
        let regs: RegFile<std::rc::Rc<crate::term_backend::Term>> = RegFile::default();
        regs.get(ValueId(3));
    }

    #[test]
    fn loop_scope_is_released_on_error_paths() {
        let mut s = TermSolver::new(&TermConfig).unwrap();
        let f = ttv_ir::builder::FnBuilder::new("f").build();
        let mut st: State<_> = State::new(&mut s, &f).unwrap();
        let scope = LoopScope { ind_vars: vec![], ind_var_upper_bounds: vec![] };
        let r: EncodeResult<()> =
            st.with_loop_scope(scope, |_| Err(Unsupported::msg("boom")));
        assert!(r.is_err());
        assert!(st.loop_scopes.is_empty());
    }
}
