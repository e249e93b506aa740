//! # arbor_kernels - Kernels over arbor buffers
//!
//! Pure functions from [`NumericBuffer`]s to a new [`NumericBuffer`]. Each
//! kernel checks that its operands are live and co-resident, computes in
//! row-major order, and places the result on the operands' device.
//!
//! | Category | Kernels |
//! |----------|---------|
//! | Binary (broadcasting) | [`add`], [`sub`], [`mul`], [`div`] |
//! | Unary | [`neg`], [`exp`], [`log`], [`powf`], [`relu`], [`relu_mask`], [`scale`] |
//! | Reduction | [`sum`], [`sum_all`], [`sum_to`], [`max`] |
//! | Layout | [`broadcast_to`], [`unsqueeze`], [`reshape`], [`transpose`] |
//! | Linear algebra | [`matmul`] |
//! | Gradient plumbing | [`accumulate`], [`axial_mask`], [`zeros_like`], [`ones_like`], [`full_like`] |

use arbor_buffer::{DeviceError, NumericBuffer, Result};

pub mod elementwise;
pub mod indices;
pub mod linalg;
pub mod reduce;

pub use elementwise::{add, div, exp, log, mul, neg, powf, relu, relu_mask, scale, sub};
pub use linalg::{matmul, transpose};
pub use reduce::{
    accumulate, axial_mask, broadcast_to, full_like, max, ones_like, reshape, sum, sum_all,
    sum_to, unsqueeze, zeros_like,
};

/// Fail unless both operands are live and on the same device (and pool).
pub(crate) fn co_resident(a: &NumericBuffer, b: &NumericBuffer) -> Result<()> {
    a.ensure_live()?;
    b.ensure_live()?;
    if a.device() != b.device() {
        return Err(DeviceError::DeviceMismatch {
            lhs: a.device(),
            rhs: b.device(),
        }
        .into());
    }
    if let (Some(lhs), Some(rhs)) = (a.accelerator(), b.accelerator()) {
        if !lhs.same_pool(rhs) {
            return Err(DeviceError::PoolMismatch.into());
        }
    }
    log::trace!("kernel on {} for {} and {}", a.device(), a.shape(), b.shape());
    Ok(())
}
