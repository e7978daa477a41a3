// SPDX-License-Identifier: Apache-2.0

//! Programmatic construction of IR functions.
//!
//! The builder owns id allocation for the whole function, including nested
//! loop-body blocks, so every `ValueId` is unique across the function.

use crate::ir::{
    Block, BlockArg, Constant, Fn, Op, OpId, OpKind, OpResult, Param, Type, TypeTable, ValueId,
};

struct BlockFrame {
    args: Vec<BlockArg>,
    ops: Vec<Op>,
}

pub struct FnBuilder {
    name: String,
    params: Vec<Param>,
    types: TypeTable,
    next_value: u32,
    next_op: u32,
    frames: Vec<BlockFrame>,
}

impl FnBuilder {
    pub fn new(name: &str) -> FnBuilder {
        FnBuilder {
            name: name.to_string(),
            params: Vec::new(),
            types: TypeTable::default(),
            next_value: 0,
            next_op: 0,
            frames: vec![BlockFrame { args: Vec::new(), ops: Vec::new() }],
        }
    }

    fn fresh_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.types.insert(id, ty);
        id
    }

    /// Declares a function parameter. Parameters must be declared before any
    /// ops so their ids precede op results.
    pub fn param(&mut self, name: &str, ty: Type) -> ValueId {
        assert!(
            self.frames.len() == 1 && self.frames[0].ops.is_empty(),
            "params must be declared before ops"
        );
        let value = self.fresh_value(ty.clone());
        self.params.push(Param { value, name: name.to_string(), ty });
        value
    }

    /// Appends an op with the given result types; returns the result ids.
    pub fn push(&mut self, kind: OpKind, result_tys: &[Type]) -> Vec<ValueId> {
        let id = OpId(self.next_op);
        self.next_op += 1;
        let results: Vec<OpResult> = result_tys
            .iter()
            .map(|ty| OpResult { value: self.fresh_value(ty.clone()), ty: ty.clone() })
            .collect();
        let values = results.iter().map(|r| r.value).collect();
        self.frames
            .last_mut()
            .expect("builder has no open block")
            .ops
            .push(Op { id, results, kind });
        values
    }

    /// Single-result convenience wrapper around [`FnBuilder::push`].
    pub fn push1(&mut self, kind: OpKind, ty: Type) -> ValueId {
        self.push(kind, std::slice::from_ref(&ty))[0]
    }

    /// Zero-result convenience wrapper around [`FnBuilder::push`].
    pub fn push0(&mut self, kind: OpKind) {
        self.push(kind, &[]);
    }

    pub fn constant(&mut self, value: Constant) -> ValueId {
        let ty = value.ty();
        self.push1(OpKind::Constant { value }, ty)
    }

    pub fn index_const(&mut self, value: i64) -> ValueId {
        self.constant(Constant::Scalar(crate::ir::Scalar::Index(value)))
    }

    pub fn ret(&mut self, operands: &[ValueId]) {
        self.push0(OpKind::Return { operands: operands.to_vec() });
    }

    /// Opens a nested block (a loop body); returns its argument ids. Ops
    /// pushed until the matching [`FnBuilder::end_block`] land in the nested
    /// block.
    pub fn begin_block(&mut self, arg_tys: &[Type]) -> Vec<ValueId> {
        let args: Vec<BlockArg> = arg_tys
            .iter()
            .map(|ty| BlockArg { value: self.fresh_value(ty.clone()), ty: ty.clone() })
            .collect();
        let values = args.iter().map(|a| a.value).collect();
        self.frames.push(BlockFrame { args, ops: Vec::new() });
        values
    }

    pub fn end_block(&mut self) -> Block {
        assert!(self.frames.len() > 1, "end_block without begin_block");
        let frame = self.frames.pop().unwrap();
        Block { args: frame.args, ops: frame.ops }
    }

    pub fn build(self) -> Fn {
        assert!(self.frames.len() == 1, "unterminated nested block");
        let frame = self.frames.into_iter().next().unwrap();
        Fn {
            name: self.name,
            params: self.params,
            body: Block { args: frame.args, ops: frame.ops },
            types: self.types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Scalar, ScalarType};

    #[test]
    fn builds_a_function_with_nested_block() {
        let mut b = FnBuilder::new("f");
        let x = b.param("x", Type::index());
        let args = b.begin_block(&[Type::index()]);
        b.push0(OpKind::Yield { operands: vec![args[0]] });
        let body = b.end_block();
        let t = b.push1(
            OpKind::Generate { dynamic_extents: vec![x], body },
            Type::tensor(ScalarType::Index, &[-1]),
        );
        b.ret(&[t]);
        let f = b.build();
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.body.ops.len(), 2);
        assert_eq!(f.type_of(t), &Type::tensor(ScalarType::Index, &[-1]));
    }

    #[test]
    fn constant_result_type_follows_payload() {
        let mut b = FnBuilder::new("g");
        let c = b.constant(Constant::Scalar(Scalar::Int { value: 7, width: 32 }));
        b.ret(&[c]);
        let f = b.build();
        assert_eq!(f.type_of(c), &Type::int(32));
    }
}
