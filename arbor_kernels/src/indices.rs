//! Row-major index iteration and broadcast/reduce layout helpers.

use arbor_buffer::Shape;

/// Iterator over all multi-dimensional indices of a shape, in row-major order.
pub struct TensorIndices<'a> {
    shape: &'a Shape,
    current: Vec<usize>,
    done: bool,
}

impl<'a> TensorIndices<'a> {
    pub fn new(shape: &'a Shape) -> Self {
        TensorIndices {
            shape,
            current: vec![0; shape.ndim()],
            done: shape.numel() == 0,
        }
    }
}

impl Iterator for TensorIndices<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        // A 0-d shape has exactly one (empty) index.
        if self.shape.ndim() == 0 {
            self.done = true;
            return Some(vec![]);
        }

        let result = self.current.clone();

        // Odometer increment, rightmost first.
        let mut i = self.shape.ndim() - 1;
        loop {
            self.current[i] += 1;
            if self.current[i] < self.shape.dim(i) {
                break;
            }
            self.current[i] = 0;
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
        }

        Some(result)
    }
}

/// Replicate `values` (laid out as `from`) across the broadcast shape `to`.
/// Caller guarantees `from` broadcasts to `to`.
pub(crate) fn expand(values: &[f64], from: &Shape, to: &Shape) -> Vec<f64> {
    if from == to {
        return values.to_vec();
    }

    let offset = to.ndim() - from.ndim();
    let from_strides = from.contiguous_strides();

    TensorIndices::new(to)
        .map(|out_idx| {
            let flat: usize = (0..from.ndim())
                .map(|i| {
                    if from.dim(i) == 1 {
                        0
                    } else {
                        out_idx[offset + i] * from_strides.0[i]
                    }
                })
                .sum();
            values[flat]
        })
        .collect()
}

/// Sum `values` (laid out as `shape`) over `axes`, dropping or keeping them.
pub(crate) fn reduce_sum(values: &[f64], shape: &Shape, axes: &[usize], keepdims: bool) -> (Vec<f64>, Shape) {
    let ndim = shape.ndim();

    let out_dims: Vec<usize> = (0..ndim)
        .filter_map(|i| {
            if axes.contains(&i) {
                keepdims.then_some(1)
            } else {
                Some(shape.dim(i))
            }
        })
        .collect();
    let out_shape = Shape::new(out_dims);
    let out_strides = out_shape.contiguous_strides();

    let mut data = vec![0.0; out_shape.numel()];
    for (in_flat, in_idx) in TensorIndices::new(shape).enumerate() {
        let out_idx: Vec<usize> = (0..ndim)
            .filter_map(|i| {
                if axes.contains(&i) {
                    keepdims.then_some(0)
                } else {
                    Some(in_idx[i])
                }
            })
            .collect();
        data[out_strides.index(&out_idx)] += values[in_flat];
    }

    (data, out_shape)
}
