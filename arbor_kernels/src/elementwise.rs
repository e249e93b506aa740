//! Element-wise kernels. Binary kernels broadcast NumPy-style.

use arbor_buffer::{NumericBuffer, Result};

use crate::indices::expand;
use crate::co_resident;

/// Addition: a + b
pub fn add(a: &NumericBuffer, b: &NumericBuffer) -> Result<NumericBuffer> {
    binary_op_broadcast(a, b, |x, y| x + y)
}

/// Subtraction: a - b
pub fn sub(a: &NumericBuffer, b: &NumericBuffer) -> Result<NumericBuffer> {
    binary_op_broadcast(a, b, |x, y| x - y)
}

/// Multiplication: a * b
pub fn mul(a: &NumericBuffer, b: &NumericBuffer) -> Result<NumericBuffer> {
    binary_op_broadcast(a, b, |x, y| x * y)
}

/// Division: a / b
pub fn div(a: &NumericBuffer, b: &NumericBuffer) -> Result<NumericBuffer> {
    binary_op_broadcast(a, b, |x, y| x / y)
}

/// Negate: -x
pub fn neg(x: &NumericBuffer) -> Result<NumericBuffer> {
    unary_op(x, |v| -v)
}

/// Exponential: e^x
pub fn exp(x: &NumericBuffer) -> Result<NumericBuffer> {
    unary_op(x, f64::exp)
}

/// Natural logarithm: ln(x)
pub fn log(x: &NumericBuffer) -> Result<NumericBuffer> {
    unary_op(x, f64::ln)
}

/// Power with a constant exponent: x^p
pub fn powf(x: &NumericBuffer, p: f64) -> Result<NumericBuffer> {
    unary_op(x, |v| v.powf(p))
}

/// ReLU: max(0, x)
pub fn relu(x: &NumericBuffer) -> Result<NumericBuffer> {
    unary_op(x, |v| v.max(0.0))
}

/// 1.0 where x > 0, else 0.0
pub fn relu_mask(x: &NumericBuffer) -> Result<NumericBuffer> {
    unary_op(x, |v| if v > 0.0 { 1.0 } else { 0.0 })
}

/// Scale every element: x * s
pub fn scale(x: &NumericBuffer, s: f64) -> Result<NumericBuffer> {
    unary_op(x, |v| v * s)
}

fn unary_op<F>(x: &NumericBuffer, op: F) -> Result<NumericBuffer>
where
    F: Fn(f64) -> f64,
{
    let data: Vec<f64> = x.values()?.iter().map(|&v| op(v)).collect();
    x.new_like(x.shape().clone(), data)
}

/// Binary operation with broadcasting. Output lands on the operands' device.
fn binary_op_broadcast<F>(a: &NumericBuffer, b: &NumericBuffer, op: F) -> Result<NumericBuffer>
where
    F: Fn(f64, f64) -> f64,
{
    co_resident(a, b)?;
    let out_shape = a.shape().broadcast_result(b.shape())?;

    let a_values = a.values()?;
    let b_values = b.values()?;
    let a_broadcast = expand(&a_values, a.shape(), &out_shape);
    let b_broadcast = expand(&b_values, b.shape(), &out_shape);

    let data: Vec<f64> = a_broadcast
        .iter()
        .zip(b_broadcast.iter())
        .map(|(&x, &y)| op(x, y))
        .collect();

    a.new_like(out_shape, data)
}
