//! Shape and stride utilities for buffers.

use std::fmt;

use crate::error::{Result, ShapeError};

/// A buffer shape (dimensions). The empty shape is a 0-d scalar.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    /// Create a new shape from dimensions without validation.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// Create a shape, rejecting zero-sized dimensions.
    pub fn try_new(dims: Vec<usize>) -> Result<Self> {
        let shape = Shape(dims);
        shape.validate()?;
        Ok(shape)
    }

    /// Create a scalar shape (0-dimensional).
    pub fn scalar() -> Self {
        Shape(vec![])
    }

    /// Fail if any dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.0.iter().any(|&d| d == 0) {
            return Err(ShapeError::ZeroDimension { shape: self.clone() }.into());
        }
        Ok(())
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Get dimension at index.
    pub fn dim(&self, idx: usize) -> usize {
        self.0[idx]
    }

    /// Get dimensions as slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Check if this is a 0-d scalar shape.
    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the shape holds exactly one element, whatever its rank.
    pub fn is_single(&self) -> bool {
        self.numel() == 1
    }

    /// Compute row-major (C-contiguous) strides for this shape.
    pub fn contiguous_strides(&self) -> Strides {
        let ndim = self.0.len();
        if ndim == 0 {
            return Strides(vec![]);
        }

        let mut strides = vec![1usize; ndim];
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        Strides(strides)
    }

    /// Check if two shapes are broadcast-compatible.
    /// Returns the broadcast result shape if compatible.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let mut result = vec![0usize; ndim];

        for (i, slot) in result.iter_mut().enumerate() {
            let d1 = if i < ndim - self.ndim() {
                1
            } else {
                self.0[i - (ndim - self.ndim())]
            };
            let d2 = if i < ndim - other.ndim() {
                1
            } else {
                other.0[i - (ndim - other.ndim())]
            };

            *slot = if d1 == d2 || d2 == 1 {
                d1
            } else if d1 == 1 {
                d2
            } else {
                return None;
            };
        }

        Some(Shape(result))
    }

    /// Like [`Shape::broadcast_with`] but reports incompatibility as an error.
    pub fn broadcast_result(&self, other: &Shape) -> Result<Shape> {
        self.broadcast_with(other).ok_or_else(|| {
            ShapeError::Incompatible {
                lhs: self.clone(),
                rhs: other.clone(),
            }
            .into()
        })
    }

    /// Axes that were broadcast when going from this shape to `broadcast_shape`.
    /// Includes missing leading axes and size-1 axes that were stretched.
    pub fn reduction_axes_from(&self, broadcast_shape: &Shape) -> Vec<usize> {
        let mut axes = Vec::new();
        let offset = broadcast_shape.ndim() - self.ndim();

        for i in 0..offset {
            axes.push(i);
        }

        for i in 0..self.ndim() {
            if self.0[i] == 1 && broadcast_shape.0[offset + i] > 1 {
                axes.push(offset + i);
            }
        }

        axes
    }

    /// Fail unless `axis` indexes a dimension of this shape.
    pub fn check_axis(&self, axis: usize) -> Result<()> {
        if axis >= self.ndim() {
            return Err(ShapeError::AxisOutOfRange {
                axis,
                ndim: self.ndim(),
            }
            .into());
        }
        Ok(())
    }

    /// Shape after reducing `axis`: removed, or kept with size 1.
    pub fn reduce_axis(&self, axis: usize, keepdim: bool) -> Result<Shape> {
        self.check_axis(axis)?;
        let mut dims = self.0.clone();
        if keepdim {
            dims[axis] = 1;
        } else {
            dims.remove(axis);
        }
        Ok(Shape(dims))
    }

    /// Shape with a size-1 dimension inserted at `axis`.
    pub fn unsqueeze(&self, axis: usize) -> Result<Shape> {
        if axis > self.ndim() {
            return Err(ShapeError::AxisOutOfRange {
                axis,
                ndim: self.ndim(),
            }
            .into());
        }
        let mut dims = self.0.clone();
        dims.insert(axis, 1);
        Ok(Shape(dims))
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(s: [usize; N]) -> Self {
        Shape(s.to_vec())
    }
}

/// Buffer strides (step size in each dimension).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Strides(pub Vec<usize>);

impl Strides {
    pub fn new(strides: Vec<usize>) -> Self {
        Strides(strides)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Compute flat index from multi-dimensional indices.
    pub fn index(&self, indices: &[usize]) -> usize {
        debug_assert_eq!(self.0.len(), indices.len());
        self.0.iter().zip(indices.iter()).map(|(s, i)| s * i).sum()
    }
}
