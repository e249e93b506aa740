//! Matrix kernels (2-D only).

use arbor_buffer::{NumericBuffer, Result, Shape, ShapeError};

use crate::co_resident;

fn require_matrix(x: &NumericBuffer) -> Result<(usize, usize)> {
    if x.shape().ndim() != 2 {
        return Err(ShapeError::Rank {
            expected: 2,
            actual: x.shape().ndim(),
        }
        .into());
    }
    Ok((x.shape().dim(0), x.shape().dim(1)))
}

/// Swap the two axes of a matrix.
pub fn transpose(x: &NumericBuffer) -> Result<NumericBuffer> {
    let (rows, cols) = require_matrix(x)?;
    let values = x.values()?;

    let mut data = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            data[j * rows + i] = values[i * cols + j];
        }
    }

    x.new_like(Shape::new(vec![cols, rows]), data)
}

/// Matrix multiplication: (M, K) @ (K, N) -> (M, N)
pub fn matmul(a: &NumericBuffer, b: &NumericBuffer) -> Result<NumericBuffer> {
    co_resident(a, b)?;
    let (m, k) = require_matrix(a)?;
    let (k2, n) = require_matrix(b)?;
    if k != k2 {
        return Err(ShapeError::MatMul {
            lhs: a.shape().clone(),
            rhs: b.shape().clone(),
        }
        .into());
    }

    let a_values = a.values()?;
    let b_values = b.values()?;

    let mut data = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for l in 0..k {
                sum += a_values[i * k + l] * b_values[l * n + j];
            }
            data[i * n + j] = sum;
        }
    }

    a.new_like(Shape::new(vec![m, n]), data)
}
