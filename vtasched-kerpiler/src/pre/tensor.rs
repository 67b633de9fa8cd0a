use smallvec::*;

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add, Sub, Mul, Max, Min, Shr, Shl,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Max => "max",
            BinOp::Min => "min",
            BinOp::Shr => ">>",
            BinOp::Shl => "<<",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReduceAxis {
    pub name: &'static str,
    pub extent: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    // external input
    Placeholder,
    // zero padding on the two spatial axes of a packed tensor
    Pad { input: NodeId, pad: [usize; 2] },
    // sum over (k_o, d_i, d_j, k_i) of data * kernel, operands upcast first
    Conv { data: NodeId, kernel: NodeId, strides: [usize; 2], reduce: [ReduceAxis; 4] },
    // elementwise op with iteration axes
    Broadcast { op: BinOp, lhs: NodeId, rhs: NodeId },
    // axis-less scalar
    BroadcastConst { value: i64 },
    // dtype narrowing or widening
    Cast { input: NodeId },
    // graph root, stores its input to global memory
    Output { input: NodeId },
}

impl Op {
    pub fn upstream(&self) -> SmallVec<[NodeId; 2]> {
        match *self {
            Op::Placeholder | Op::BroadcastConst { .. } => smallvec![],
            Op::Pad { input, .. } => smallvec![input],
            Op::Conv { data, kernel, .. } => smallvec![data, kernel],
            Op::Broadcast { lhs, rhs, .. } => smallvec![lhs, rhs],
            Op::Cast { input } => smallvec![input],
            Op::Output { input } => smallvec![input],
        }
    }
    // injective ops may be inlined into their consumers
    pub fn is_injective(&self) -> bool {
        matches!(self, Op::Pad { .. } | Op::Broadcast { .. } | Op::BroadcastConst { .. } | Op::Cast { .. } | Op::Output { .. })
    }
}
