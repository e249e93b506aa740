//! Finite difference utilities for gradient verification.
//!
//! Graph functions are written once as `Fn(&[Tensor]) -> Result<Tensor>` and
//! evaluated both through the backward engine and by central differences.
//! A non-scalar output is treated as the sum of its elements.

use arbor_buffer::{NumericBuffer, Result};
use arbor_kernels as k;

use crate::session::Session;
use crate::tensor::Tensor;

/// Compute gradients of a plain function using central finite differences.
///
/// ```
/// use arbor_graph::finite_diff_grad;
///
/// // f(x, y) = x^2 + y^2
/// let f = |v: &[f64]| v[0] * v[0] + v[1] * v[1];
/// let grads = finite_diff_grad(f, &[3.0, 4.0], 1e-6);
///
/// assert!((grads[0] - 6.0).abs() < 1e-5);
/// assert!((grads[1] - 8.0).abs() < 1e-5);
/// ```
pub fn finite_diff_grad<F>(f: F, point: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut grads = Vec::with_capacity(point.len());
    let mut perturbed = point.to_vec();

    for i in 0..point.len() {
        perturbed[i] = point[i] + eps;
        let f_plus = f(&perturbed);

        perturbed[i] = point[i] - eps;
        let f_minus = f(&perturbed);

        perturbed[i] = point[i];

        grads.push((f_plus - f_minus) / (2.0 * eps));
    }

    grads
}

/// Evaluate a graph function on fresh constant tensors and sum its output.
fn evaluate<F>(f: &F, inputs: &[NumericBuffer]) -> Result<f64>
where
    F: for<'s> Fn(&[Tensor<'s>]) -> Result<Tensor<'s>>,
{
    let session = Session::new();
    let tensors = inputs
        .iter()
        .map(|b| Ok(session.constant(b.try_clone()?)))
        .collect::<Result<Vec<_>>>()?;
    let out = f(&tensors)?;
    let total = out.to_vec()?.iter().sum();
    Ok(total)
}

/// Central-difference gradient of a graph function with respect to each
/// of its (host) inputs.
pub fn finite_diff_tensor_grad<F>(f: F, inputs: &[NumericBuffer], eps: f64) -> Result<Vec<Vec<f64>>>
where
    F: for<'s> Fn(&[Tensor<'s>]) -> Result<Tensor<'s>>,
{
    let mut grads = Vec::with_capacity(inputs.len());

    for input_idx in 0..inputs.len() {
        let point = inputs[input_idx].to_vec()?;
        let mut input_grads = Vec::with_capacity(point.len());

        for elem_idx in 0..point.len() {
            let shifted = |delta: f64| -> Result<f64> {
                let mut data = point.clone();
                data[elem_idx] += delta;
                let mut perturbed = inputs
                    .iter()
                    .map(NumericBuffer::try_clone)
                    .collect::<Result<Vec<_>>>()?;
                perturbed[input_idx] = NumericBuffer::from_vec(data, inputs[input_idx].shape().clone())?;
                evaluate(&f, &perturbed)
            };
            let f_plus = shifted(eps)?;
            let f_minus = shifted(-eps)?;
            input_grads.push((f_plus - f_minus) / (2.0 * eps));
        }

        grads.push(input_grads);
    }

    Ok(grads)
}

/// Gradient of a graph function with respect to each of its (host) inputs,
/// computed by the backward engine.
pub fn autodiff_grad<F>(f: F, inputs: &[NumericBuffer]) -> Result<Vec<Vec<f64>>>
where
    F: for<'s> Fn(&[Tensor<'s>]) -> Result<Tensor<'s>>,
{
    let session = Session::new();
    let vars = inputs
        .iter()
        .map(|b| Ok(session.var(b.try_clone()?)))
        .collect::<Result<Vec<_>>>()?;

    let out = f(&vars)?;
    let seed = session.constant(k::ones_like(&out.value()?)?);
    out.backward(Some(&seed))?;

    vars.iter()
        .zip(inputs)
        .map(|(v, input)| match v.grad()? {
            Some(grad) => grad.to_vec(),
            // Inputs the output does not depend on have zero gradient.
            None => Ok(vec![0.0; input.numel()]),
        })
        .collect()
}

/// Compute the maximum absolute difference between two gradient vectors.
pub fn max_grad_error(grad1: &[f64], grad2: &[f64]) -> f64 {
    assert_eq!(grad1.len(), grad2.len());
    grad1
        .iter()
        .zip(grad2.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}
