//! Forward kernels and local derivative rules for each [`Op`].
//!
//! Derivative rules follow standard calculus with broadcasting:
//!
//! | Op | Forward | Gradient w.r.t. inputs |
//! |----|---------|------------------------|
//! | Add | a + b | (g, g) |
//! | Sub | a - b | (g, -g) |
//! | Mul | a * b | (g * b, g * a) |
//! | Div | a / b | (g / b, -g * a / b^2) |
//! | Neg | -x | -g |
//! | Exp | e^x | g * e^x |
//! | Log | ln(x) | g / x |
//! | PowScalar | x^p | g * p * x^(p-1) |
//! | Relu | max(0, x) | g * (x > 0) |
//! | Sum | sum(x, axis) | broadcast g back to x's shape |
//! | Max | max(x, axis) | g routed to the first maximum of each slice |
//! | Transpose | x^T | g^T |
//! | MatMul | a @ b | (g @ b^T, a^T @ g) |
//!
//! Binary gradients are summed back to each operand's recorded shape, so a
//! broadcast operand receives a gradient of its own shape.

use arbor_buffer::{NumericBuffer, Result, Shape};
use arbor_kernels as k;

use crate::node::Op;

impl Op {
    /// Run the forward kernel.
    pub(crate) fn forward(&self, inputs: &[&NumericBuffer]) -> Result<NumericBuffer> {
        debug_assert_eq!(inputs.len(), self.arity());
        match self {
            Op::Add => k::add(inputs[0], inputs[1]),
            Op::Sub => k::sub(inputs[0], inputs[1]),
            Op::Mul => k::mul(inputs[0], inputs[1]),
            Op::Div => k::div(inputs[0], inputs[1]),
            Op::Neg => k::neg(inputs[0]),
            Op::Exp => k::exp(inputs[0]),
            Op::Log => k::log(inputs[0]),
            Op::PowScalar { exponent } => k::powf(inputs[0], *exponent),
            Op::Relu => k::relu(inputs[0]),
            Op::Sum { axis, keepdim } => k::sum(inputs[0], *axis, *keepdim),
            Op::Max { axis, keepdim } => {
                let (values, _) = k::max(inputs[0], *axis, *keepdim)?;
                Ok(values)
            }
            Op::Transpose => k::transpose(inputs[0]),
            Op::MatMul => k::matmul(inputs[0], inputs[1]),
        }
    }

    /// Gradients with respect to each input, given the upstream gradient
    /// `grad` of the output. Each result has the matching `input_shapes` entry.
    pub(crate) fn local_gradients(
        &self,
        inputs: &[&NumericBuffer],
        input_shapes: &[Shape],
        output: &NumericBuffer,
        grad: &NumericBuffer,
    ) -> Result<Vec<NumericBuffer>> {
        match self {
            Op::Add => Ok(vec![
                k::sum_to(grad, &input_shapes[0])?,
                k::sum_to(grad, &input_shapes[1])?,
            ]),
            Op::Sub => Ok(vec![
                k::sum_to(grad, &input_shapes[0])?,
                k::sum_to(&k::neg(grad)?, &input_shapes[1])?,
            ]),
            Op::Mul => {
                let (a, b) = (inputs[0], inputs[1]);
                Ok(vec![
                    k::sum_to(&k::mul(grad, b)?, &input_shapes[0])?,
                    k::sum_to(&k::mul(grad, a)?, &input_shapes[1])?,
                ])
            }
            Op::Div => {
                let (a, b) = (inputs[0], inputs[1]);
                // d/db (a/b) = -a / b^2
                let b_sq = k::mul(b, b)?;
                let grad_b = k::neg(&k::div(&k::mul(grad, a)?, &b_sq)?)?;
                Ok(vec![
                    k::sum_to(&k::div(grad, b)?, &input_shapes[0])?,
                    k::sum_to(&grad_b, &input_shapes[1])?,
                ])
            }
            Op::Neg => Ok(vec![k::neg(grad)?]),
            Op::Exp => Ok(vec![k::mul(grad, output)?]),
            Op::Log => Ok(vec![k::div(grad, inputs[0])?]),
            Op::PowScalar { exponent } => {
                let slope = k::scale(&k::powf(inputs[0], exponent - 1.0)?, *exponent)?;
                Ok(vec![k::mul(grad, &slope)?])
            }
            Op::Relu => Ok(vec![k::mul(grad, &k::relu_mask(inputs[0])?)?]),
            Op::Sum { axis, keepdim } => {
                let restored = if *keepdim {
                    k::broadcast_to(grad, &input_shapes[0])?
                } else {
                    k::broadcast_to(&k::unsqueeze(grad, *axis)?, &input_shapes[0])?
                };
                Ok(vec![restored])
            }
            Op::Max { axis, keepdim } => {
                let (_, picks) = k::max(inputs[0], *axis, true)?;
                let mask = k::axial_mask(inputs[0], &picks, *axis)?;
                let grad = if *keepdim {
                    k::broadcast_to(grad, &input_shapes[0])?
                } else {
                    k::broadcast_to(&k::unsqueeze(grad, *axis)?, &input_shapes[0])?
                };
                Ok(vec![k::mul(&grad, &mask)?])
            }
            Op::Transpose => Ok(vec![k::transpose(grad)?]),
            Op::MatMul => {
                let (a, b) = (inputs[0], inputs[1]);
                Ok(vec![
                    k::matmul(grad, &k::transpose(b)?)?,
                    k::matmul(&k::transpose(a)?, grad)?,
                ])
            }
        }
    }
}
