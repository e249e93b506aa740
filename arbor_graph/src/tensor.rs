//! Tensor handles with operator overloading.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use arbor_buffer::{Device, NumericBuffer, Result, Shape, TensorError};

use crate::backward;
use crate::node::{Op, TensorId};
use crate::session::Session;

/// A value in a [`Session`], optionally tracking gradients.
///
/// `Tensor` is a cheap `Copy` handle; the buffers live in the session arena.
/// Operations return `Result`. The `+ - * /` and unary `-` operators call
/// the same operations and panic on failure.
#[derive(Clone, Copy)]
pub struct Tensor<'s> {
    session: &'s Session,
    id: TensorId,
}

impl<'s> Tensor<'s> {
    pub(crate) fn new(session: &'s Session, id: TensorId) -> Self {
        Self { session, id }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn shape(&self) -> Shape {
        self.session.arena().entry(self.id).value.shape().clone()
    }

    pub fn ndim(&self) -> usize {
        self.session.arena().entry(self.id).value.shape().ndim()
    }

    pub fn numel(&self) -> usize {
        self.session.arena().entry(self.id).value.numel()
    }

    pub fn device(&self) -> Device {
        self.session.arena().entry(self.id).value.device()
    }

    pub fn is_on_host(&self) -> bool {
        self.session.arena().entry(self.id).value.is_on_host()
    }

    pub fn is_freed(&self) -> bool {
        self.session.arena().entry(self.id).value.is_freed()
    }

    /// True for tensors created directly rather than by an operation.
    pub fn is_leaf(&self) -> bool {
        self.session.arena().entry(self.id).node.is_none()
    }

    pub fn requires_grad(&self) -> bool {
        self.session.arena().entry(self.id).requires_grad
    }

    /// Toggle gradient tracking on a tensor that no operation has consumed.
    ///
    /// Fails with [`TensorError::GradFlagLocked`] once the tensor has been an
    /// operand, or when it was produced by a tracked operation.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<()> {
        let mut arena = self.session.arena_mut();
        let entry = arena.entry_mut(self.id);
        if entry.used || entry.node.is_some() {
            return Err(TensorError::GradFlagLocked);
        }
        entry.requires_grad = requires_grad;
        Ok(())
    }

    // ========================================================================
    // Values and gradients
    // ========================================================================

    /// Host copy of the value. Fails if the value is not on the host.
    pub fn value(&self) -> Result<NumericBuffer> {
        let arena = self.session.arena();
        let value = &arena.entry(self.id).value;
        value.host_values()?;
        value.try_clone()
    }

    pub fn to_vec(&self) -> Result<Vec<f64>> {
        let arena = self.session.arena();
        Ok(arena.entry(self.id).value.host_values()?.to_vec())
    }

    /// The single element of a one-element host tensor.
    pub fn item(&self) -> Result<f64> {
        let arena = self.session.arena();
        let value = &arena.entry(self.id).value;
        value.host_values()?;
        value.item()
    }

    /// Host copy of the accumulated gradient, or `None` before any backward
    /// pass has reached this tensor.
    pub fn grad(&self) -> Result<Option<NumericBuffer>> {
        let arena = self.session.arena();
        match &arena.entry(self.id).grad {
            Some(grad) => {
                grad.host_values()?;
                Ok(Some(grad.try_clone()?))
            }
            None => Ok(None),
        }
    }

    /// Reset the gradient to zero in place, keeping its device.
    pub fn zero_grad(&self) -> Result<()> {
        let mut arena = self.session.arena_mut();
        if let Some(grad) = arena.entry_mut(self.id).grad.as_mut() {
            let zeros = vec![0.0; grad.numel()];
            grad.overwrite(&zeros)?;
        }
        Ok(())
    }

    // ========================================================================
    // Device transfer
    // ========================================================================

    /// Move value and gradient to the session's accelerator.
    ///
    /// Both move or neither does: if either upload fails the tensor stays
    /// where it was. Buffers already on the accelerator are left alone.
    pub fn to_accelerator(&self) -> Result<()> {
        let mut arena = self.session.arena_mut();
        let entry = arena.entry_mut(self.id);
        entry.value.ensure_live()?;

        let accel = self.session.accelerator();
        let value = match entry.value.is_on_host() {
            true => Some(entry.value.to_accelerator(accel)?),
            false => None,
        };
        let grad = match &entry.grad {
            Some(g) if g.is_on_host() => Some(g.to_accelerator(accel)?),
            _ => None,
        };

        if let Some(value) = value {
            log::debug!("moved {} {} to accelerator", self.id, value.shape());
            entry.value = value;
        }
        if grad.is_some() {
            entry.grad = grad;
        }
        Ok(())
    }

    /// Copy value and gradient back to the host and release their device
    /// memory. Buffers already on the host are left alone.
    pub fn to_host(&self) -> Result<()> {
        let mut arena = self.session.arena_mut();
        let entry = arena.entry_mut(self.id);
        entry.value.ensure_live()?;

        let value = match entry.value.is_on_host() {
            true => None,
            false => Some(entry.value.to_host()?),
        };
        let grad = match &entry.grad {
            Some(g) if !g.is_on_host() => Some(g.to_host()?),
            _ => None,
        };

        if let Some(value) = value {
            log::debug!("moved {} {} to host", self.id, value.shape());
            entry.value = value;
        }
        if grad.is_some() {
            entry.grad = grad;
        }
        Ok(())
    }

    /// Release the device memory behind the value and gradient.
    ///
    /// Host tensors are unaffected. Afterwards every operation on this
    /// tensor fails with [`arbor_buffer::UseAfterFreeError`].
    pub fn free_accelerator(&self) {
        let mut arena = self.session.arena_mut();
        let entry = arena.entry_mut(self.id);
        entry.value.free();
        if let Some(grad) = entry.grad.as_mut() {
            grad.free();
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn unary(self, op: Op) -> Result<Tensor<'s>> {
        let id = self.session.apply(op, &[self.id])?;
        Ok(Tensor::new(self.session, id))
    }

    fn binary(self, other: Tensor<'s>, op: Op) -> Result<Tensor<'s>> {
        assert!(
            std::ptr::eq(self.session, other.session),
            "tensors from different sessions cannot be combined"
        );
        let id = self.session.apply(op, &[self.id, other.id])?;
        Ok(Tensor::new(self.session, id))
    }

    /// Element-wise sum with broadcasting.
    pub fn add(self, other: Tensor<'s>) -> Result<Tensor<'s>> {
        self.binary(other, Op::Add)
    }

    pub fn sub(self, other: Tensor<'s>) -> Result<Tensor<'s>> {
        self.binary(other, Op::Sub)
    }

    /// Element-wise product with broadcasting.
    pub fn mul(self, other: Tensor<'s>) -> Result<Tensor<'s>> {
        self.binary(other, Op::Mul)
    }

    pub fn div(self, other: Tensor<'s>) -> Result<Tensor<'s>> {
        self.binary(other, Op::Div)
    }

    pub fn neg(self) -> Result<Tensor<'s>> {
        self.unary(Op::Neg)
    }

    pub fn exp(self) -> Result<Tensor<'s>> {
        self.unary(Op::Exp)
    }

    pub fn log(self) -> Result<Tensor<'s>> {
        self.unary(Op::Log)
    }

    pub fn powf(self, exponent: f64) -> Result<Tensor<'s>> {
        self.unary(Op::PowScalar { exponent })
    }

    pub fn relu(self) -> Result<Tensor<'s>> {
        self.unary(Op::Relu)
    }

    /// Sum along `axis`. With `keepdim` the axis stays with size 1,
    /// otherwise it is removed.
    pub fn sum(self, axis: usize, keepdim: bool) -> Result<Tensor<'s>> {
        self.unary(Op::Sum { axis, keepdim })
    }

    /// Maximum along `axis`. The gradient flows only to the first maximum
    /// of each slice.
    pub fn max(self, axis: usize, keepdim: bool) -> Result<Tensor<'s>> {
        self.unary(Op::Max { axis, keepdim })
    }

    /// Index of the first maximum along `axis`, as a constant tensor.
    pub fn argmax(self, axis: usize, keepdim: bool) -> Result<Tensor<'s>> {
        let (_, picks) = {
            let arena = self.session.arena();
            arbor_kernels::max(&arena.entry(self.id).value, axis, keepdim)?
        };
        Ok(self.session.constant(picks))
    }

    pub fn transpose(self) -> Result<Tensor<'s>> {
        self.unary(Op::Transpose)
    }

    pub fn matmul(self, other: Tensor<'s>) -> Result<Tensor<'s>> {
        self.binary(other, Op::MatMul)
    }

    // ========================================================================
    // Backward
    // ========================================================================

    /// Accumulate d(self)/d(x) into the gradient of every tensor `x` that
    /// tracks gradients and reaches `self`.
    ///
    /// `seed` is the upstream gradient and must match this tensor's shape
    /// and device. It may be omitted when this tensor has a single element,
    /// in which case a seed of one is used. On error no gradient changes.
    pub fn backward(&self, seed: Option<&Tensor<'s>>) -> Result<()> {
        backward::backward(self.session, self.id, seed.map(|s| s.id))
    }
}

impl fmt::Debug for Tensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.session.arena();
        let entry = arena.entry(self.id);
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", entry.value.shape())
            .field("device", &entry.value.device())
            .field("requires_grad", &entry.requires_grad)
            .field("op", &entry.node.as_ref().map(|n| n.op.name()))
            .finish()
    }
}

impl fmt::Display for Tensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.session.arena();
        let entry = arena.entry(self.id);
        write!(f, "{}", entry.value)?;
        if entry.requires_grad {
            write!(f, " (requires_grad)")?;
        }
        Ok(())
    }
}

impl PartialEq for Tensor<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.session, other.session) && self.id == other.id
    }
}

impl Eq for Tensor<'_> {}

// ============================================================================
// Operator overloading
// ============================================================================

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $symbol:literal) => {
        impl<'s> $trait for Tensor<'s> {
            type Output = Tensor<'s>;

            fn $method(self, rhs: Tensor<'s>) -> Tensor<'s> {
                Tensor::$method(self, rhs)
                    .unwrap_or_else(|e| panic!(concat!("tensor `", $symbol, "` failed: {}"), e))
            }
        }

        impl<'s> $trait<&Tensor<'s>> for Tensor<'s> {
            type Output = Tensor<'s>;

            fn $method(self, rhs: &Tensor<'s>) -> Tensor<'s> {
                $trait::$method(self, *rhs)
            }
        }

        impl<'s> $trait<Tensor<'s>> for &Tensor<'s> {
            type Output = Tensor<'s>;

            fn $method(self, rhs: Tensor<'s>) -> Tensor<'s> {
                $trait::$method(*self, rhs)
            }
        }

        impl<'s> $trait<&Tensor<'s>> for &Tensor<'s> {
            type Output = Tensor<'s>;

            fn $method(self, rhs: &Tensor<'s>) -> Tensor<'s> {
                $trait::$method(*self, *rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, "+");
impl_binary_op!(Sub, sub, "-");
impl_binary_op!(Mul, mul, "*");
impl_binary_op!(Div, div, "/");

impl<'s> Neg for Tensor<'s> {
    type Output = Tensor<'s>;

    fn neg(self) -> Tensor<'s> {
        Tensor::neg(self).unwrap_or_else(|e| panic!("tensor negation failed: {}", e))
    }
}

impl<'s> Neg for &Tensor<'s> {
    type Output = Tensor<'s>;

    fn neg(self) -> Tensor<'s> {
        -*self
    }
}
