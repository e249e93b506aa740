//! Error types shared by every arbor crate.

use thiserror::Error;

use crate::device::Device;
use crate::shape::Shape;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TensorError>;

/// Operand shapes that cannot be combined, or a backward seed that does not fit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// Shapes are not broadcast compatible.
    #[error("shapes {lhs} and {rhs} are not broadcast compatible")]
    Incompatible { lhs: Shape, rhs: Shape },

    /// Axis does not exist in the operand.
    #[error("axis {axis} is out of range for a tensor with {ndim} dimensions")]
    AxisOutOfRange { axis: usize, ndim: usize },

    /// Flat data does not match the requested shape.
    #[error("data length {actual} does not match shape with {expected} elements")]
    DataLength { expected: usize, actual: usize },

    /// Dimensions must be positive.
    #[error("shape {shape} contains a zero-sized dimension")]
    ZeroDimension { shape: Shape },

    /// Operation requires a specific rank.
    #[error("expected tensor of rank {expected}, got rank {actual}")]
    Rank { expected: usize, actual: usize },

    /// Inner dimensions of a matrix product differ.
    #[error("cannot multiply matrices of shapes {lhs} and {rhs}")]
    MatMul { lhs: Shape, rhs: Shape },

    /// Non-scalar backward root without a seed.
    #[error("backward on non-scalar tensor of shape {shape} requires a seed gradient")]
    MissingSeed { shape: Shape },

    /// Seed does not match the root.
    #[error("seed gradient shape {actual} does not match output shape {expected}")]
    SeedMismatch { expected: Shape, actual: Shape },
}

/// Allocation, transfer and placement failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Accelerator pool cannot satisfy the allocation.
    #[error("accelerator out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// Host read of a buffer that lives on the accelerator.
    #[error("buffer resides on the accelerator; transfer it to the host first")]
    NotOnHost,

    /// Operands live on different devices.
    #[error("operands live on different devices ({lhs} and {rhs})")]
    DeviceMismatch { lhs: Device, rhs: Device },

    /// Both operands are on the accelerator but in different pools.
    #[error("operands live in different accelerator pools")]
    PoolMismatch,

    /// The accelerator pool lock was poisoned by a panicking thread.
    #[error("accelerator pool is poisoned")]
    Poisoned,
}

/// Kernel use of a buffer whose accelerator storage was released.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("buffer of shape {shape} was freed from the accelerator")]
pub struct UseAfterFreeError {
    pub shape: Shape,
}

/// Top-level error for every fallible arbor operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    UseAfterFree(#[from] UseAfterFreeError),

    /// `requires_grad` changed after the tensor was used as an operand.
    #[error("requires_grad cannot change after the tensor has been used in an operation")]
    GradFlagLocked,

    /// Backward called on a tensor that does not track gradients.
    #[error("tensor does not track gradients")]
    NoGradient,
}

impl TensorError {
    pub fn is_shape(&self) -> bool {
        matches!(self, TensorError::Shape(_))
    }

    pub fn is_device(&self) -> bool {
        matches!(self, TensorError::Device(_))
    }

    pub fn is_use_after_free(&self) -> bool {
        matches!(self, TensorError::UseAfterFree(_))
    }
}
