// SPDX-License-Identifier: Apache-2.0

//! The tensor-IR object model: types, constants, the operation catalog, and
//! functions. The encoder consumes values of these types directly; there is
//! no textual format here.

use std::collections::HashMap;
use std::fmt;

use crate::affine::AffineMap;

/// Strongly-typed wrapper for SSA value ids.
///
/// Ids are dense per function and cover parameters, block arguments and op
/// results alike; the [`crate::builder::FnBuilder`] allocates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Strongly-typed wrapper for op ids, used to key per-op well-definedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Loop/index arithmetic; a fixed-width bit-vector in the encoding.
    Index,
    /// Signless integer of the given bit width.
    Int(u32),
    F32,
    F64,
}

impl ScalarType {
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    pub fn is_int_or_index(&self) -> bool {
        matches!(self, ScalarType::Int(_) | ScalarType::Index)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Index => write!(f, "index"),
            ScalarType::Int(w) => write!(f, "i{}", w),
            ScalarType::F32 => write!(f, "f32"),
            ScalarType::F64 => write!(f, "f64"),
        }
    }
}

/// One axis of a shaped type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(u64),
    Dynamic,
}

impl Dim {
    /// MLIR-style shorthand: negative means dynamic.
    pub fn from_i64(v: i64) -> Dim {
        if v < 0 {
            Dim::Dynamic
        } else {
            Dim::Static(v as u64)
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dim::Dynamic)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(v) => write!(f, "{}", v),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub elem: ScalarType,
    pub dims: Vec<Dim>,
}

impl TensorType {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn has_static_shape(&self) -> bool {
        self.dims.iter().all(|d| !d.is_dynamic())
    }

    /// Number of elements; only meaningful for static shapes.
    pub fn num_elements(&self) -> u64 {
        self.dims
            .iter()
            .map(|d| match d {
                Dim::Static(v) => *v,
                Dim::Dynamic => panic!("num_elements on dynamic shape"),
            })
            .product()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRefType {
    pub elem: ScalarType,
    pub dims: Vec<Dim>,
    /// Layout map from logical indices to a linear offset. Identity unless
    /// the memref was produced by a view-producing op.
    pub layout: AffineMap,
}

impl MemRefType {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarType),
    Tensor(TensorType),
    MemRef(MemRefType),
}

impl Type {
    pub fn index() -> Type {
        Type::Scalar(ScalarType::Index)
    }

    pub fn int(width: u32) -> Type {
        Type::Scalar(ScalarType::Int(width))
    }

    pub fn f32() -> Type {
        Type::Scalar(ScalarType::F32)
    }

    pub fn f64() -> Type {
        Type::Scalar(ScalarType::F64)
    }

    /// `Type::tensor(ScalarType::F32, &[2, -1])` is `tensor<2x?xf32>`.
    pub fn tensor(elem: ScalarType, dims: &[i64]) -> Type {
        Type::Tensor(TensorType {
            elem,
            dims: dims.iter().map(|d| Dim::from_i64(*d)).collect(),
        })
    }

    pub fn memref(elem: ScalarType, dims: &[i64]) -> Type {
        let rank = dims.len();
        Type::MemRef(MemRefType {
            elem,
            dims: dims.iter().map(|d| Dim::from_i64(*d)).collect(),
            layout: AffineMap::identity(rank),
        })
    }

    pub fn memref_with_layout(elem: ScalarType, dims: &[i64], layout: AffineMap) -> Type {
        Type::MemRef(MemRefType {
            elem,
            dims: dims.iter().map(|d| Dim::from_i64(*d)).collect(),
            layout,
        })
    }

    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Type::MemRef(m) => Some(m),
            _ => None,
        }
    }

    /// Element type of a shaped type.
    pub fn elem_type(&self) -> Option<ScalarType> {
        match self {
            Type::Tensor(t) => Some(t.elem),
            Type::MemRef(m) => Some(m.elem),
            Type::Scalar(_) => None,
        }
    }

    pub fn is_shaped(&self) -> bool {
        matches!(self, Type::Tensor(_) | Type::MemRef(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn shape(f: &mut fmt::Formatter<'_>, dims: &[Dim], elem: &ScalarType) -> fmt::Result {
            for d in dims {
                write!(f, "{}x", d)?;
            }
            write!(f, "{}", elem)
        }
        match self {
            Type::Scalar(s) => write!(f, "{}", s),
            Type::Tensor(t) => {
                write!(f, "tensor<")?;
                shape(f, &t.dims, &t.elem)?;
                write!(f, ">")
            }
            Type::MemRef(m) => {
                write!(f, "memref<")?;
                shape(f, &m.dims, &m.elem)?;
                if !m.layout.is_identity() {
                    write!(f, ", {}", m.layout)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A scalar literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Index(i64),
    Int { value: u64, width: u32 },
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn ty(&self) -> ScalarType {
        match self {
            Scalar::Index(_) => ScalarType::Index,
            Scalar::Int { width, .. } => ScalarType::Int(*width),
            Scalar::F32(_) => ScalarType::F32,
            Scalar::F64(_) => ScalarType::F64,
        }
    }
}

/// Payload of a `Constant` op.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Scalar(Scalar),
    /// Every element is `value`; the shape must be fully static.
    Splat { ty: TensorType, value: Scalar },
    /// Row-major element list; the shape must be fully static.
    Dense { ty: TensorType, values: Vec<Scalar> },
    /// Values at the listed index tuples; zero elsewhere.
    Sparse {
        ty: TensorType,
        indices: Vec<Vec<u64>>,
        values: Vec<Scalar>,
    },
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Scalar(s) => Type::Scalar(s.ty()),
            Constant::Splat { ty, .. }
            | Constant::Dense { ty, .. }
            | Constant::Sparse { ty, .. } => Type::Tensor(ty.clone()),
        }
    }
}

/// A static integer or a dynamic index operand; offsets/sizes/strides of the
/// slice and view ops are lists of these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixedVal {
    Static(i64),
    Val(ValueId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    Parallel,
    Reduction,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvLayout {
    /// image `NxCxHxW`, filter `FxCxKHxKW`, output `NxFxOHxOW`.
    NchwFchw,
    /// image `NxHxWxC`, filter `KHxKWxCxF`, output `NxOHxOWxF`.
    NhwcHwcf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPred {
    /// Ordered less-than.
    Olt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockArg {
    pub value: ValueId,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub args: Vec<BlockArg>,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpResult {
    pub value: ValueId,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub id: OpId,
    pub results: Vec<OpResult>,
    pub kind: OpKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    // Arithmetic; float or signless-integer, scalar or (broadcast) tensor.
    Add { lhs: ValueId, rhs: ValueId },
    Sub { lhs: ValueId, rhs: ValueId },
    Mul { lhs: ValueId, rhs: ValueId },
    Neg { arg: ValueId },
    Abs { arg: ValueId },
    CmpF { pred: FloatPred, lhs: ValueId, rhs: ValueId },
    ExtF { arg: ValueId },
    TruncF { arg: ValueId },
    BitAnd { lhs: ValueId, rhs: ValueId },
    BitOr { lhs: ValueId, rhs: ValueId },
    BitXor { lhs: ValueId, rhs: ValueId },
    BitNot { arg: ValueId },
    IndexCast { arg: ValueId },
    Constant { value: Constant },
    Select { cond: ValueId, true_value: ValueId, false_value: ValueId },
    AffineApply { map: AffineMap, dims: Vec<ValueId>, syms: Vec<ValueId> },
    Return { operands: Vec<ValueId> },

    // Shape interrogation.
    ShapeOf { arg: ValueId },
    ToExtentTensor { arg: ValueId },
    Dim { source: ValueId, index: ValueId },
    TensorCast { arg: ValueId },
    SparseConvert { arg: ValueId },

    // Tensor algebra.
    Extract { tensor: ValueId, indices: Vec<ValueId> },
    Insert { scalar: ValueId, dest: ValueId, indices: Vec<ValueId> },
    ExtractSlice {
        source: ValueId,
        offsets: Vec<MixedVal>,
        sizes: Vec<MixedVal>,
        strides: Vec<MixedVal>,
    },
    InsertSlice {
        source: ValueId,
        dest: ValueId,
        offsets: Vec<MixedVal>,
        sizes: Vec<MixedVal>,
        strides: Vec<MixedVal>,
    },
    FromElements { elems: Vec<ValueId> },
    /// Parallel loop with a user-supplied body yielding each element.
    Generate { dynamic_extents: Vec<ValueId>, body: Block },
    /// Pads `source` with the value computed by `body`.
    Pad {
        source: ValueId,
        low: Vec<MixedVal>,
        high: Vec<MixedVal>,
        body: Block,
    },
    CollapseShape { source: ValueId, reassociation: Vec<Vec<usize>> },
    ExpandShape { source: ValueId, reassociation: Vec<Vec<usize>> },
    Reshape { source: ValueId, new_shape: Vec<i64> },
    Concat { inputs: Vec<ValueId>, axis: usize },
    Reverse { input: ValueId, axis: usize },
    Tile { input: ValueId, multiples: Vec<u64> },
    InitTensor { dynamic_sizes: Vec<ValueId> },

    // The general loop-nest construct.
    Generic {
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
        indexing_maps: Vec<AffineMap>,
        iterators: Vec<IteratorKind>,
        body: Block,
    },
    /// Current induction variable of the enclosing loop nest.
    LoopIndex { dim: usize },
    /// Terminator of loop bodies; consumed by the loop encoders.
    Yield { operands: Vec<ValueId> },

    // Named tensor/buffer computations.
    Matmul { lhs: ValueId, rhs: ValueId },
    Dot { lhs: ValueId, rhs: ValueId },
    Fill { value: ValueId, dest: ValueId },
    Copy {
        source: ValueId,
        dest: ValueId,
        input_permutation: Option<AffineMap>,
        output_permutation: Option<AffineMap>,
    },
    Conv2D {
        image: ValueId,
        filter: ValueId,
        /// Buffer-semantics output; tensor semantics when absent.
        output: Option<ValueId>,
        strides: Vec<u64>,
        dilations: Vec<u64>,
        layout: ConvLayout,
    },

    // Memref algebra.
    Alloc { dynamic_sizes: Vec<ValueId> },
    Load { memref: ValueId, indices: Vec<ValueId> },
    Store { value: ValueId, memref: ValueId, indices: Vec<ValueId> },
    SubView {
        source: ValueId,
        offsets: Vec<MixedVal>,
        sizes: Vec<MixedVal>,
        strides: Vec<MixedVal>,
    },
    BufferCast { tensor: ValueId },
    Clone { source: ValueId },
    TensorLoad { memref: ValueId },
    TensorStore { tensor: ValueId, memref: ValueId },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Add { .. } => "add",
            OpKind::Sub { .. } => "sub",
            OpKind::Mul { .. } => "mul",
            OpKind::Neg { .. } => "neg",
            OpKind::Abs { .. } => "abs",
            OpKind::CmpF { .. } => "cmpf",
            OpKind::ExtF { .. } => "extf",
            OpKind::TruncF { .. } => "truncf",
            OpKind::BitAnd { .. } => "bit_and",
            OpKind::BitOr { .. } => "bit_or",
            OpKind::BitXor { .. } => "bit_xor",
            OpKind::BitNot { .. } => "bit_not",
            OpKind::IndexCast { .. } => "index_cast",
            OpKind::Constant { .. } => "constant",
            OpKind::Select { .. } => "select",
            OpKind::AffineApply { .. } => "affine_apply",
            OpKind::Return { .. } => "return",
            OpKind::ShapeOf { .. } => "shape_of",
            OpKind::ToExtentTensor { .. } => "to_extent_tensor",
            OpKind::Dim { .. } => "dim",
            OpKind::TensorCast { .. } => "tensor_cast",
            OpKind::SparseConvert { .. } => "sparse_convert",
            OpKind::Extract { .. } => "extract",
            OpKind::Insert { .. } => "insert",
            OpKind::ExtractSlice { .. } => "extract_slice",
            OpKind::InsertSlice { .. } => "insert_slice",
            OpKind::FromElements { .. } => "from_elements",
            OpKind::Generate { .. } => "generate",
            OpKind::Pad { .. } => "pad",
            OpKind::CollapseShape { .. } => "collapse_shape",
            OpKind::ExpandShape { .. } => "expand_shape",
            OpKind::Reshape { .. } => "reshape",
            OpKind::Concat { .. } => "concat",
            OpKind::Reverse { .. } => "reverse",
            OpKind::Tile { .. } => "tile",
            OpKind::InitTensor { .. } => "init_tensor",
            OpKind::Generic { .. } => "generic",
            OpKind::LoopIndex { .. } => "loop_index",
            OpKind::Yield { .. } => "yield",
            OpKind::Matmul { .. } => "matmul",
            OpKind::Dot { .. } => "dot",
            OpKind::Fill { .. } => "fill",
            OpKind::Copy { .. } => "copy",
            OpKind::Conv2D { .. } => "conv_2d",
            OpKind::Alloc { .. } => "alloc",
            OpKind::Load { .. } => "load",
            OpKind::Store { .. } => "store",
            OpKind::SubView { .. } => "subview",
            OpKind::BufferCast { .. } => "buffer_cast",
            OpKind::Clone { .. } => "clone",
            OpKind::TensorLoad { .. } => "tensor_load",
            OpKind::TensorStore { .. } => "tensor_store",
        }
    }

    /// Value operands in source order. Static entries of mixed lists and
    /// nested blocks do not contribute.
    pub fn operands(&self) -> Vec<ValueId> {
        fn mixed(out: &mut Vec<ValueId>, vals: &[MixedVal]) {
            for v in vals {
                if let MixedVal::Val(id) = v {
                    out.push(*id);
                }
            }
        }
        let mut out = Vec::new();
        match self {
            OpKind::Add { lhs, rhs }
            | OpKind::Sub { lhs, rhs }
            | OpKind::Mul { lhs, rhs }
            | OpKind::BitAnd { lhs, rhs }
            | OpKind::BitOr { lhs, rhs }
            | OpKind::BitXor { lhs, rhs }
            | OpKind::CmpF { lhs, rhs, .. }
            | OpKind::Matmul { lhs, rhs }
            | OpKind::Dot { lhs, rhs } => out.extend([*lhs, *rhs]),
            OpKind::Neg { arg }
            | OpKind::Abs { arg }
            | OpKind::ExtF { arg }
            | OpKind::TruncF { arg }
            | OpKind::BitNot { arg }
            | OpKind::IndexCast { arg }
            | OpKind::ShapeOf { arg }
            | OpKind::ToExtentTensor { arg }
            | OpKind::TensorCast { arg }
            | OpKind::SparseConvert { arg } => out.push(*arg),
            OpKind::Constant { .. } | OpKind::LoopIndex { .. } => {}
            OpKind::Select { cond, true_value, false_value } => {
                out.extend([*cond, *true_value, *false_value])
            }
            OpKind::AffineApply { dims, syms, .. } => {
                out.extend(dims.iter().copied());
                out.extend(syms.iter().copied());
            }
            OpKind::Return { operands } | OpKind::Yield { operands } => {
                out.extend(operands.iter().copied())
            }
            OpKind::Dim { source, index } => out.extend([*source, *index]),
            OpKind::Extract { tensor, indices } => {
                out.push(*tensor);
                out.extend(indices.iter().copied());
            }
            OpKind::Insert { scalar, dest, indices } => {
                out.extend([*scalar, *dest]);
                out.extend(indices.iter().copied());
            }
            OpKind::ExtractSlice { source, offsets, sizes, strides } => {
                out.push(*source);
                mixed(&mut out, offsets);
                mixed(&mut out, sizes);
                mixed(&mut out, strides);
            }
            OpKind::InsertSlice { source, dest, offsets, sizes, strides } => {
                out.extend([*source, *dest]);
                mixed(&mut out, offsets);
                mixed(&mut out, sizes);
                mixed(&mut out, strides);
            }
            OpKind::FromElements { elems } => out.extend(elems.iter().copied()),
            OpKind::Generate { dynamic_extents, .. } => {
                out.extend(dynamic_extents.iter().copied())
            }
            OpKind::Pad { source, low, high, .. } => {
                out.push(*source);
                mixed(&mut out, low);
                mixed(&mut out, high);
            }
            OpKind::CollapseShape { source, .. }
            | OpKind::ExpandShape { source, .. }
            | OpKind::Reshape { source, .. } => out.push(*source),
            OpKind::Concat { inputs, .. } => out.extend(inputs.iter().copied()),
            OpKind::Reverse { input, .. } | OpKind::Tile { input, .. } => out.push(*input),
            OpKind::InitTensor { dynamic_sizes } | OpKind::Alloc { dynamic_sizes } => {
                out.extend(dynamic_sizes.iter().copied())
            }
            OpKind::Generic { inputs, outputs, .. } => {
                out.extend(inputs.iter().copied());
                out.extend(outputs.iter().copied());
            }
            OpKind::Fill { value, dest } => out.extend([*value, *dest]),
            OpKind::Copy { source, dest, .. } => out.extend([*source, *dest]),
            OpKind::Conv2D { image, filter, output, .. } => {
                out.extend([*image, *filter]);
                if let Some(o) = output {
                    out.push(*o);
                }
            }
            OpKind::Load { memref, indices } => {
                out.push(*memref);
                out.extend(indices.iter().copied());
            }
            OpKind::Store { value, memref, indices } => {
                out.extend([*value, *memref]);
                out.extend(indices.iter().copied());
            }
            OpKind::SubView { source, offsets, sizes, strides } => {
                out.push(*source);
                mixed(&mut out, offsets);
                mixed(&mut out, sizes);
                mixed(&mut out, strides);
            }
            OpKind::BufferCast { tensor } => out.push(*tensor),
            OpKind::Clone { source } => out.push(*source),
            OpKind::TensorLoad { memref } => out.push(*memref),
            OpKind::TensorStore { tensor, memref } => out.extend([*tensor, *memref]),
        }
        out
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", r.value)?;
        }
        if !self.results.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", self.kind.name())?;
        let operands = self.kind.operands();
        for (i, o) in operands.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " " } else { ", " }, o)?;
        }
        for (i, r) in self.results.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " : " } else { ", " }, r.ty)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: ValueId,
    pub name: String,
    pub ty: Type,
}

/// Types of every SSA value in a function (params, block args, op results).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeTable {
    map: HashMap<ValueId, Type>,
}

impl TypeTable {
    pub fn insert(&mut self, value: ValueId, ty: Type) {
        let prev = self.map.insert(value, ty);
        assert!(prev.is_none(), "type registered twice for {}", value);
    }

    pub fn get(&self, value: ValueId) -> &Type {
        self.map
            .get(&value)
            .unwrap_or_else(|| panic!("no type recorded for {}", value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fn {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub types: TypeTable,
}

impl Fn {
    pub fn type_of(&self, value: ValueId) -> &Type {
        self.types.get(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn type_display() {
        assert_eq!(Type::tensor(ScalarType::F32, &[2, -1]).to_string(), "tensor<2x?xf32>");
        assert_eq!(Type::memref(ScalarType::Int(8), &[4]).to_string(), "memref<4xi8>");
        assert_eq!(Type::index().to_string(), "index");
    }

    #[test]
    fn dim_from_i64() {
        assert_eq!(Dim::from_i64(3), Dim::Static(3));
        assert!(Dim::from_i64(-1).is_dynamic());
    }

    #[test]
    #[should_panic(expected = "type registered twice")]
    fn type_table_rejects_rebind() {
        let mut t = TypeTable::default();
        t.insert(ValueId(0), Type::index());
        t.insert(ValueId(0), Type::f32());
    }
}
