//! Computation graph records stored in the session arena.

use std::fmt;

use arbor_buffer::{NumericBuffer, Shape};

/// Index of a tensor in its session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Operations recorded in the computation graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // === Binary element-wise (broadcasting) ===
    Add,
    Sub,
    Mul,
    Div,

    // === Unary element-wise ===
    Neg,
    Exp,
    Log,
    PowScalar { exponent: f64 },
    Relu,

    // === Reductions ===
    Sum { axis: usize, keepdim: bool },
    Max { axis: usize, keepdim: bool },

    // === Linear algebra ===
    Transpose,
    MatMul,
}

impl Op {
    /// Number of operands.
    pub fn arity(&self) -> usize {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::MatMul => 2,
            Op::Neg
            | Op::Exp
            | Op::Log
            | Op::PowScalar { .. }
            | Op::Relu
            | Op::Sum { .. }
            | Op::Max { .. }
            | Op::Transpose => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Neg => "neg",
            Op::Exp => "exp",
            Op::Log => "log",
            Op::PowScalar { .. } => "pow",
            Op::Relu => "relu",
            Op::Sum { .. } => "sum",
            Op::Max { .. } => "max",
            Op::Transpose => "transpose",
            Op::MatMul => "matmul",
        }
    }
}

/// The producing operation of a tracked tensor.
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    pub inputs: Vec<TensorId>,
    /// Operand shapes at record time; gradient rules restore these exactly.
    pub input_shapes: Vec<Shape>,
}

/// Arena slot for one tensor.
pub(crate) struct Entry {
    pub value: NumericBuffer,
    pub grad: Option<NumericBuffer>,
    pub requires_grad: bool,
    /// Set once the tensor has been an operand; locks `requires_grad`.
    pub used: bool,
    pub node: Option<Node>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("shape", self.value.shape())
            .field("device", &self.value.device())
            .field("requires_grad", &self.requires_grad)
            .field("op", &self.node.as_ref().map(|n| n.op.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity() {
        assert_eq!(Op::Add.arity(), 2);
        assert_eq!(Op::MatMul.arity(), 2);
        assert_eq!(Op::Sum { axis: 0, keepdim: true }.arity(), 1);
        assert_eq!(Op::PowScalar { exponent: 2.0 }.arity(), 1);
        assert_eq!(Op::Max { axis: 1, keepdim: false }.arity(), 1);
    }

    #[test]
    fn test_display_id() {
        assert_eq!(TensorId(3).to_string(), "%3");
        assert_eq!(TensorId(3).index(), 3);
    }
}
