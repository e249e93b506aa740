//! # arbor_graph - Reverse-mode autodiff over arbor buffers
//!
//! A [`Session`] owns an arena of tensors. Each operation on a [`Tensor`]
//! runs a kernel eagerly and, when any operand tracks gradients, records a
//! graph node for the backward pass.
//!
//! ## Overview
//!
//! - [`Session`] - Arena owning values, gradients and graph nodes
//! - [`Tensor`] - `Copy` handle into the arena, with operator overloading
//! - [`Op`] and [`Node`] - Recorded operations and their operands
//! - [`finite_diff_tensor_grad`] - Numerical gradients for verification
//!
//! ## Example
//!
//! ```
//! use arbor_graph::prelude::*;
//!
//! let session = Session::new();
//! let a = session.var(NumericBuffer::from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap());
//! let b = session.var(NumericBuffer::from_vec(vec![5.0, 6.0, 7.0, 8.0], [2, 2]).unwrap());
//!
//! // z = sum(sum(a * b + a))
//! let z = (a * b + a).sum(0, false).unwrap().sum(0, false).unwrap();
//! z.backward(None).unwrap();
//!
//! assert_eq!(a.grad().unwrap().unwrap().to_vec().unwrap(), vec![6.0, 7.0, 8.0, 9.0]);
//! assert_eq!(b.grad().unwrap().unwrap().to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
//! ```

mod backward;
pub mod finite_diff;
pub mod node;
mod ops;
pub mod session;
pub mod tensor;

pub use finite_diff::{autodiff_grad, finite_diff_grad, finite_diff_tensor_grad, max_grad_error};
pub use node::{Node, Op, TensorId};
pub use session::{Session, SessionConfig};
pub use tensor::Tensor;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::node::{Op, TensorId};
    pub use crate::session::{Session, SessionConfig};
    pub use crate::tensor::Tensor;
    pub use arbor_buffer::prelude::*;
}
