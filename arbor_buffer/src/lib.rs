//! # arbor_buffer - Shaped buffers with explicit device placement
//!
//! The storage layer of the arbor autodiff engine:
//! - [`Shape`] and [`Strides`] - dimensions, row-major layout, broadcasting
//! - [`NumericBuffer`] - owned `f64` storage on the host or the accelerator
//! - [`Accelerator`] - capacity-limited accelerator memory pool
//! - [`TensorError`] - the error taxonomy shared by every arbor crate
//!
//! ## Example
//!
//! ```
//! use arbor_buffer::prelude::*;
//!
//! let accel = Accelerator::new(AcceleratorConfig::default());
//! let host = NumericBuffer::from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
//!
//! let on_device = host.copy_to(Device::Accelerator, &accel).unwrap();
//! assert!(on_device.host_values().is_err());
//!
//! let back = on_device.to_host().unwrap();
//! assert_eq!(back.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
//! ```

pub mod buffer;
pub mod device;
pub mod error;
pub mod shape;

pub use buffer::NumericBuffer;
pub use device::{Accelerator, AcceleratorConfig, Device, DeviceSlice};
pub use error::{DeviceError, Result, ShapeError, TensorError, UseAfterFreeError};
pub use shape::{Shape, Strides};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::buffer::NumericBuffer;
    pub use crate::device::{Accelerator, AcceleratorConfig, Device};
    pub use crate::error::{DeviceError, Result, ShapeError, TensorError, UseAfterFreeError};
    pub use crate::shape::{Shape, Strides};
}
