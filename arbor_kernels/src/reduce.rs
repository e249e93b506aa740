//! Reductions and the shape plumbing gradient rules rely on.

use arbor_buffer::{NumericBuffer, Result, Shape, ShapeError};

use crate::co_resident;
use crate::indices::{expand, reduce_sum};

/// Sum along one axis. `keepdim` keeps the axis with size 1.
pub fn sum(x: &NumericBuffer, axis: usize, keepdim: bool) -> Result<NumericBuffer> {
    x.shape().check_axis(axis)?;
    let values = x.values()?;
    let (data, out_shape) = reduce_sum(&values, x.shape(), &[axis], keepdim);
    x.new_like(out_shape, data)
}

/// Sum every element into a 0-d scalar.
pub fn sum_all(x: &NumericBuffer) -> Result<NumericBuffer> {
    let total: f64 = x.values()?.iter().sum();
    x.new_like(Shape::scalar(), vec![total])
}

/// Split `shape` around `axis` into (outer, len, inner) extents.
fn axis_extents(shape: &Shape, axis: usize) -> (usize, usize, usize) {
    let dims = shape.dims();
    let outer = dims[..axis].iter().product();
    let inner = dims[axis + 1..].iter().product();
    (outer, dims[axis], inner)
}

/// Maximum along one axis, with the index of the first maximum.
///
/// Returns `(values, indices)`; both have the reduced shape and the indices
/// are stored as whole numbers in `f64`.
pub fn max(
    x: &NumericBuffer,
    axis: usize,
    keepdim: bool,
) -> Result<(NumericBuffer, NumericBuffer)> {
    let out_shape = x.shape().reduce_axis(axis, keepdim)?;
    let values = x.values()?;
    let (outer, len, inner) = axis_extents(x.shape(), axis);

    let mut maxima = Vec::with_capacity(outer * inner);
    let mut indices = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let base = o * len * inner + i;
            let mut best = 0;
            for j in 1..len {
                if values[base + j * inner] > values[base + best * inner] {
                    best = j;
                }
            }
            maxima.push(values[base + best * inner]);
            indices.push(best as f64);
        }
    }

    Ok((
        x.new_like(out_shape.clone(), maxima)?,
        x.new_like(out_shape, indices)?,
    ))
}

/// Ones where the position along `axis` equals the matching entry of `idx`,
/// zeros elsewhere. `idx` holds one index per slice, as returned by [`max`].
pub fn axial_mask(x: &NumericBuffer, idx: &NumericBuffer, axis: usize) -> Result<NumericBuffer> {
    co_resident(x, idx)?;
    x.shape().check_axis(axis)?;
    let (outer, len, inner) = axis_extents(x.shape(), axis);
    if idx.numel() != outer * inner {
        return Err(ShapeError::DataLength {
            expected: outer * inner,
            actual: idx.numel(),
        }
        .into());
    }

    let picks = idx.values()?;
    let mut mask = vec![0.0; x.numel()];
    for o in 0..outer {
        for i in 0..inner {
            let pick = picks[o * inner + i];
            if pick >= 0.0 && (pick as usize) < len {
                mask[o * len * inner + (pick as usize) * inner + i] = 1.0;
            }
        }
    }
    x.new_like(x.shape().clone(), mask)
}

/// Broadcast to a larger shape by replication.
pub fn broadcast_to(x: &NumericBuffer, shape: &Shape) -> Result<NumericBuffer> {
    if x.shape().broadcast_with(shape).as_ref() != Some(shape) {
        return Err(ShapeError::Incompatible {
            lhs: x.shape().clone(),
            rhs: shape.clone(),
        }
        .into());
    }
    let values = x.values()?;
    x.new_like(shape.clone(), expand(&values, x.shape(), shape))
}

/// Sum over broadcast axes so the result has `shape`.
/// Inverse of [`broadcast_to`] for gradients.
pub fn sum_to(x: &NumericBuffer, shape: &Shape) -> Result<NumericBuffer> {
    if shape.broadcast_with(x.shape()).as_ref() != Some(x.shape()) {
        return Err(ShapeError::Incompatible {
            lhs: x.shape().clone(),
            rhs: shape.clone(),
        }
        .into());
    }
    if x.shape() == shape {
        return x.try_clone();
    }

    let axes = shape.reduction_axes_from(x.shape());
    let values = x.values()?;
    let (data, _) = reduce_sum(&values, x.shape(), &axes, false);
    x.new_like(shape.clone(), data)
}

/// Insert a size-1 dimension at `axis`.
pub fn unsqueeze(x: &NumericBuffer, axis: usize) -> Result<NumericBuffer> {
    let shape = x.shape().unsqueeze(axis)?;
    reshape(x, &shape)
}

/// Reinterpret with a new shape holding the same number of elements.
pub fn reshape(x: &NumericBuffer, shape: &Shape) -> Result<NumericBuffer> {
    if x.numel() != shape.numel() {
        return Err(ShapeError::DataLength {
            expected: shape.numel(),
            actual: x.numel(),
        }
        .into());
    }
    let values = x.values()?.into_owned();
    x.new_like(shape.clone(), values)
}

/// Accumulate in place: dst += src. Shapes must match exactly.
pub fn accumulate(dst: &mut NumericBuffer, src: &NumericBuffer) -> Result<()> {
    co_resident(dst, src)?;
    if dst.shape() != src.shape() {
        return Err(ShapeError::Incompatible {
            lhs: dst.shape().clone(),
            rhs: src.shape().clone(),
        }
        .into());
    }
    let summed: Vec<f64> = dst
        .values()?
        .iter()
        .zip(src.values()?.iter())
        .map(|(d, s)| d + s)
        .collect();
    dst.overwrite(&summed)
}

/// Buffer of `x`'s shape and device filled with `value`.
pub fn full_like(x: &NumericBuffer, value: f64) -> Result<NumericBuffer> {
    x.ensure_live()?;
    x.new_like(x.shape().clone(), vec![value; x.numel()])
}

pub fn zeros_like(x: &NumericBuffer) -> Result<NumericBuffer> {
    full_like(x, 0.0)
}

pub fn ones_like(x: &NumericBuffer) -> Result<NumericBuffer> {
    full_like(x, 1.0)
}
