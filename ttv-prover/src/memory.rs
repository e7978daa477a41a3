// SPDX-License-Identifier: Apache-2.0

//! The symbolic memory: an ordered table of blocks, each a 1-D content
//! array with a size and a writability predicate.
//!
//! Memref block ids are symbolic bit-vectors; loads and stores resolve them
//! by folding an ite chain over the concrete block table, so two views with
//! equal ids alias and distinct local blocks never do. Writability only ever
//! transitions from writable to read-only.

use ttv_ir::ir::ScalarType;

use crate::solver::{Expr, Solver, Sort};
use crate::value::{scalar_sort, Index};

#[derive(Debug, Clone, PartialEq)]
pub struct MemBlock<R> {
    pub elem: ScalarType,
    /// 1-D size in elements.
    pub size: Expr<R>,
    pub writable: Expr<R>,
    /// Sort `Array(Index, elem)`.
    pub array: Expr<R>,
    /// Local blocks come from allocation-like ops and never alias argument
    /// blocks; argument blocks pre-exist the function.
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Memory<R> {
    blocks: Vec<MemBlock<R>>,
}

impl<R> Default for Memory<R> {
    fn default() -> Self {
        Memory { blocks: Vec::new() }
    }
}

impl<R: Clone + PartialEq + std::fmt::Debug> Memory<R> {
    /// Width of block-id bit-vectors.
    pub const BID_BITS: u32 = 8;

    pub fn new() -> Memory<R> {
        Memory { blocks: Vec::new() }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, i: usize) -> &MemBlock<R> {
        &self.blocks[i]
    }

    pub fn bid_lit<S: Solver<Rep = R>>(s: &mut S, i: usize) -> Expr<R> {
        s.bv_lit(Self::BID_BITS, i as u64)
    }

    fn block_sort(elem: ScalarType) -> Sort {
        Sort::array(vec![Index::sort()], scalar_sort(elem))
    }

    /// Fresh non-aliasing block with unconstrained contents; returns its
    /// (concrete) block id expression.
    pub fn add_local_block<S: Solver<Rep = R>>(
        &mut self,
        s: &mut S,
        elem: ScalarType,
        size: Expr<R>,
        writable: bool,
    ) -> Expr<R> {
        let array = s
            .declare_fresh("mem.local", &Self::block_sort(elem))
            .expect("block array declaration failed");
        let writable = s.bool_lit(writable);
        self.blocks.push(MemBlock { elem, size, writable, array, is_local: true });
        Self::bid_lit(s, self.blocks.len() - 1)
    }

    /// Pre-existing block backing a function argument; returns its index.
    /// The caller pairs it with a symbolic block id so arguments may alias.
    pub fn add_arg_block<S: Solver<Rep = R>>(
        &mut self,
        s: &mut S,
        name: &str,
        elem: ScalarType,
        size: Expr<R>,
    ) -> usize {
        let array = s
            .declare(&format!("{}.mem", name), &Self::block_sort(elem))
            .expect("block array declaration failed");
        let writable = s.bool_lit(true);
        self.blocks.push(MemBlock { elem, size, writable, array, is_local: false });
        self.blocks.len() - 1
    }

    fn matching(&self, elem: ScalarType) -> Vec<usize> {
        (0..self.blocks.len())
            .filter(|i| self.blocks[*i].elem == elem)
            .collect()
    }

    /// Reads `bid[index]`; the second result is true iff the id resolves to
    /// a block of this element type and the index is inside it.
    pub fn load<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        elem: ScalarType,
        bid: &Expr<R>,
        index: &Expr<R>,
    ) -> (Expr<R>, Expr<R>) {
        let matches = self.matching(elem);
        if matches.is_empty() {
            let undef = s
                .declare_fresh("mem.undef", &scalar_sort(elem))
                .expect("undef declaration failed");
            return (undef, s.bool_lit(false));
        }
        let mut value = {
            let blk = &self.blocks[*matches.last().unwrap()];
            s.apply(&blk.array, std::slice::from_ref(index))
        };
        for i in matches.iter().rev().skip(1) {
            let blk = &self.blocks[*i];
            let here = Self::bid_lit(s, *i);
            let cond = s.eq(bid, &here);
            let v = s.apply(&blk.array, std::slice::from_ref(index));
            value = s.ite(&cond, &v, &value);
        }
        let mut oks = Vec::with_capacity(matches.len());
        for i in &matches {
            let blk = &self.blocks[*i];
            let here = Self::bid_lit(s, *i);
            let is_here = s.eq(bid, &here);
            let fits = s.bv_ult(index, &blk.size);
            oks.push(s.and(&is_here, &fits));
        }
        (value, s.or_many(&oks))
    }

    /// Writes one element; success requires a matching writable block and an
    /// in-range index.
    pub fn store_elem<S: Solver<Rep = R>>(
        &mut self,
        s: &mut S,
        elem: ScalarType,
        bid: &Expr<R>,
        index: &Expr<R>,
        value: &Expr<R>,
    ) -> Expr<R> {
        let matches = self.matching(elem);
        let mut oks = Vec::with_capacity(matches.len());
        for i in matches {
            let here = Self::bid_lit(s, i);
            let is_here = s.eq(bid, &here);
            let blk = &self.blocks[i];
            let fits = s.bv_ult(index, &blk.size);
            let here_ok = s.and(&is_here, &fits);
            oks.push(s.and(&here_ok, &blk.writable.clone()));
            let stored = s.array_store(&blk.array.clone(), index, value);
            let new_array = s.ite(&is_here, &stored, &blk.array.clone());
            self.blocks[i].array = new_array;
        }
        s.or_many(&oks)
    }

    /// Bulk write of `len` elements from the 1-D `src` array into
    /// `[start, start+len)` of the matching block.
    pub fn store_range<S: Solver<Rep = R>>(
        &mut self,
        s: &mut S,
        elem: ScalarType,
        bid: &Expr<R>,
        start: &Expr<R>,
        len: &Expr<R>,
        src: &Expr<R>,
        check_writable: bool,
    ) -> Expr<R> {
        let end = s.bv_add(start, len);
        let matches = self.matching(elem);
        let mut oks = Vec::with_capacity(matches.len());
        for i in matches {
            let here = Self::bid_lit(s, i);
            let is_here = s.eq(bid, &here);
            let blk = self.blocks[i].clone();
            let fits = s.bv_ule(&end, &blk.size);
            let mut ok = s.and(&is_here, &fits);
            if check_writable {
                ok = s.and(&ok, &blk.writable);
            }
            oks.push(ok);
            let l = s.bound_var("idx", &Index::sort());
            let lo = s.bv_ule(start, &l);
            let hi = s.bv_ult(&l, &end);
            let in_range = s.and(&lo, &hi);
            let rel = s.bv_sub(&l, start);
            let from_src = s.apply(src, std::slice::from_ref(&rel));
            let from_old = s.apply(&blk.array, std::slice::from_ref(&l));
            let body = s.ite(&in_range, &from_src, &from_old);
            let updated = s.lambda(std::slice::from_ref(&l), &body);
            let new_array = s.ite(&is_here, &updated, &blk.array);
            self.blocks[i].array = new_array;
        }
        s.or_many(&oks)
    }

    /// Flips writability of the addressed block. Only the writable ->
    /// read-only direction is ever requested; the transition is monotonic.
    pub fn set_writable<S: Solver<Rep = R>>(
        &mut self,
        s: &mut S,
        bid: &Expr<R>,
        writable: bool,
    ) {
        let flag = s.bool_lit(writable);
        for i in 0..self.blocks.len() {
            let here = Self::bid_lit(s, i);
            let is_here = s.eq(bid, &here);
            let old = self.blocks[i].writable.clone();
            self.blocks[i].writable = s.ite(&is_here, &flag, &old);
        }
    }

    pub fn writable_of<S: Solver<Rep = R>>(&self, s: &mut S, bid: &Expr<R>) -> Expr<R> {
        let mut acc = s.bool_lit(false);
        for i in 0..self.blocks.len() {
            let here = Self::bid_lit(s, i);
            let is_here = s.eq(bid, &here);
            acc = s.ite(&is_here, &self.blocks[i].writable.clone(), &acc);
        }
        acc
    }

    /// 1-D size of the addressed block; zero when the id resolves to no
    /// block of this element type.
    pub fn size_of<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        elem: ScalarType,
        bid: &Expr<R>,
    ) -> Expr<R> {
        let mut acc = Index::zero(s);
        for i in self.matching(elem) {
            let here = Self::bid_lit(s, i);
            let is_here = s.eq(bid, &here);
            acc = s.ite(&is_here, &self.blocks[i].size.clone(), &acc);
        }
        acc
    }

    /// True iff the id addresses some block of this element type.
    pub fn valid_bid<S: Solver<Rep = R>>(
        &self,
        s: &mut S,
        elem: ScalarType,
        bid: &Expr<R>,
    ) -> Expr<R> {
        let eqs: Vec<_> = self
            .matching(elem)
            .into_iter()
            .map(|i| {
                let here = Self::bid_lit(s, i);
                s.eq(bid, &here)
            })
            .collect();
        s.or_many(&eqs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term_backend::{TermConfig, TermSolver};

    fn solver() -> TermSolver {
        TermSolver::new(&TermConfig).unwrap()
    }

    #[test]
    fn store_then_load_same_block_resolves() {
        let mut s = solver();
        let mut m: Memory<_> = Memory::new();
        let size = Index::lit(&mut s, 4);
        let bid = m.add_local_block(&mut s, ScalarType::Int(32), size, true);
        let idx = Index::lit(&mut s, 2);
        let v = s.bv_lit(32, 9);
        let ok = m.store_elem(&mut s, ScalarType::Int(32), &bid, &idx, &v);
        let t = s.bool_lit(true);
        assert_eq!(ok, t);
        let (val, ok2) = m.load(&mut s, ScalarType::Int(32), &bid, &idx);
        assert_eq!(val, v);
        assert_eq!(ok2, t);
    }

    #[test]
    fn store_to_read_only_block_is_unsatisfiable() {
        let mut s = solver();
        let mut m: Memory<_> = Memory::new();
        let size = Index::lit(&mut s, 4);
        let bid = m.add_local_block(&mut s, ScalarType::Int(32), size, true);
        m.set_writable(&mut s, &bid, false);
        let idx = Index::zero(&mut s);
        let v = s.bv_lit(32, 1);
        let ok = m.store_elem(&mut s, ScalarType::Int(32), &bid, &idx, &v);
        let f = s.bool_lit(false);
        assert_eq!(ok, f);
    }

    #[test]
    fn writability_never_returns() {
        let mut s = solver();
        let mut m: Memory<_> = Memory::new();
        let size = Index::lit(&mut s, 4);
        let bid = m.add_local_block(&mut s, ScalarType::F32, size, true);
        m.set_writable(&mut s, &bid, false);
        let w = m.writable_of(&mut s, &bid);
        let f = s.bool_lit(false);
        assert_eq!(w, f);
    }

    #[test]
    fn load_from_unknown_elem_type_fails() {
        let mut s = solver();
        let m: Memory<_> = Memory::new();
        let bid = s.bv_lit(Memory::<std::rc::Rc<crate::term_backend::Term>>::BID_BITS, 0);
        let idx = Index::zero(&mut s);
        let (_, ok) = m.load(&mut s, ScalarType::F32, &bid, &idx);
        let f = s.bool_lit(false);
        assert_eq!(ok, f);
    }
}
