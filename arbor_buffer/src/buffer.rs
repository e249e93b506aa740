//! NumericBuffer - shaped f64 storage tagged with its device.

use std::borrow::Cow;
use std::fmt;

use crate::device::{Accelerator, Device, DeviceSlice};
use crate::error::{DeviceError, Result, ShapeError, UseAfterFreeError};
use crate::shape::{Shape, Strides};

enum Storage {
    Host(Vec<f64>),
    Accelerator(DeviceSlice),
    /// Accelerator storage that was explicitly released.
    Freed,
}

/// An owned, contiguous block of `f64` values with a shape and a device tag.
pub struct NumericBuffer {
    shape: Shape,
    strides: Strides,
    storage: Storage,
}

impl NumericBuffer {
    /// Create a host buffer from flat row-major data.
    pub fn from_vec(data: Vec<f64>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        if data.len() != shape.numel() {
            return Err(ShapeError::DataLength {
                expected: shape.numel(),
                actual: data.len(),
            }
            .into());
        }
        Ok(Self::host_unchecked(data, shape))
    }

    /// Create a 0-d host scalar.
    pub fn scalar(value: f64) -> Self {
        Self::host_unchecked(vec![value], Shape::scalar())
    }

    /// Create a zero-filled host buffer.
    pub fn zeros(shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        Ok(Self::host_unchecked(vec![0.0; shape.numel()], shape))
    }

    /// Allocate a zero-filled buffer on `device`.
    pub fn allocate(shape: impl Into<Shape>, device: Device, accel: &Accelerator) -> Result<Self> {
        let host = Self::zeros(shape)?;
        match device {
            Device::Host => Ok(host),
            Device::Accelerator => host.to_accelerator(accel),
        }
    }

    fn host_unchecked(data: Vec<f64>, shape: Shape) -> Self {
        let strides = shape.contiguous_strides();
        NumericBuffer {
            shape,
            strides,
            storage: Storage::Host(data),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Device of the storage. Freed buffers report the accelerator they left.
    pub fn device(&self) -> Device {
        match self.storage {
            Storage::Host(_) => Device::Host,
            Storage::Accelerator(_) | Storage::Freed => Device::Accelerator,
        }
    }

    pub fn is_on_host(&self) -> bool {
        matches!(self.storage, Storage::Host(_))
    }

    pub fn is_freed(&self) -> bool {
        matches!(self.storage, Storage::Freed)
    }

    /// Fail with [`UseAfterFreeError`] if the storage was released.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_freed() {
            return Err(UseAfterFreeError {
                shape: self.shape.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// The accelerator pool backing this buffer, if any.
    pub fn accelerator(&self) -> Option<&Accelerator> {
        match &self.storage {
            Storage::Accelerator(slice) => Some(slice.accelerator()),
            _ => None,
        }
    }

    /// Read every value. Host buffers are borrowed; accelerator buffers are
    /// copied out of the pool for kernel execution.
    pub fn values(&self) -> Result<Cow<'_, [f64]>> {
        match &self.storage {
            Storage::Host(data) => Ok(Cow::Borrowed(data.as_slice())),
            Storage::Accelerator(slice) => Ok(Cow::Owned(slice.download()?)),
            Storage::Freed => Err(UseAfterFreeError {
                shape: self.shape.clone(),
            }
            .into()),
        }
    }

    /// Read values of a host-resident buffer. Never transfers implicitly.
    pub fn host_values(&self) -> Result<&[f64]> {
        match &self.storage {
            Storage::Host(data) => Ok(data),
            Storage::Accelerator(_) => Err(DeviceError::NotOnHost.into()),
            Storage::Freed => Err(UseAfterFreeError {
                shape: self.shape.clone(),
            }
            .into()),
        }
    }

    /// Owned copy of host-resident values.
    pub fn to_vec(&self) -> Result<Vec<f64>> {
        self.host_values().map(|v| v.to_vec())
    }

    /// Value of a single-element host buffer.
    pub fn item(&self) -> Result<f64> {
        if !self.shape.is_single() {
            return Err(ShapeError::DataLength {
                expected: 1,
                actual: self.numel(),
            }
            .into());
        }
        Ok(self.host_values()?[0])
    }

    /// Build a buffer on the same device (and pool) as `self`.
    pub fn new_like(&self, shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        let host = Self::from_vec(data, shape)?;
        match &self.storage {
            Storage::Host(_) => Ok(host),
            Storage::Accelerator(slice) => host.to_accelerator(slice.accelerator()),
            Storage::Freed => Err(UseAfterFreeError {
                shape: self.shape.clone(),
            }
            .into()),
        }
    }

    /// Deep copy on the same device.
    pub fn try_clone(&self) -> Result<Self> {
        let values = self.values()?.into_owned();
        self.new_like(self.shape.clone(), values)
    }

    /// Copy to `device`, preserving element order and bits.
    pub fn copy_to(&self, device: Device, accel: &Accelerator) -> Result<Self> {
        match device {
            Device::Host => self.to_host(),
            Device::Accelerator => self.to_accelerator(accel),
        }
    }

    /// Copy into accelerator memory. Already-resident buffers are duplicated
    /// within their own pool.
    pub fn to_accelerator(&self, accel: &Accelerator) -> Result<Self> {
        let slice = match &self.storage {
            Storage::Host(data) => accel.upload(data)?,
            Storage::Accelerator(slice) => slice.accelerator().upload(&slice.download()?)?,
            Storage::Freed => {
                return Err(UseAfterFreeError {
                    shape: self.shape.clone(),
                }
                .into())
            }
        };
        log::debug!("transfer {} host -> accelerator", self.shape);
        Ok(NumericBuffer {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            storage: Storage::Accelerator(slice),
        })
    }

    /// Copy into host memory.
    pub fn to_host(&self) -> Result<Self> {
        let data = match &self.storage {
            Storage::Host(data) => data.clone(),
            Storage::Accelerator(slice) => {
                log::debug!("transfer {} accelerator -> host", self.shape);
                slice.download()?
            }
            Storage::Freed => {
                return Err(UseAfterFreeError {
                    shape: self.shape.clone(),
                }
                .into())
            }
        };
        Ok(Self::host_unchecked(data, self.shape.clone()))
    }

    /// Release accelerator storage. No-op for host or already freed buffers.
    pub fn free(&mut self) {
        if let Storage::Accelerator(_) = self.storage {
            log::debug!("free accelerator storage of {}", self.shape);
            // Dropping the slice returns its bytes to the pool.
            self.storage = Storage::Freed;
        }
    }

    /// Overwrite all values in place without reallocating.
    pub fn overwrite(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.numel() {
            return Err(ShapeError::DataLength {
                expected: self.numel(),
                actual: values.len(),
            }
            .into());
        }
        match &mut self.storage {
            Storage::Host(data) => {
                data.copy_from_slice(values);
                Ok(())
            }
            Storage::Accelerator(slice) => slice.write(values),
            Storage::Freed => Err(UseAfterFreeError {
                shape: self.shape.clone(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for NumericBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.storage {
            Storage::Host(_) => "host",
            Storage::Accelerator(_) => "accelerator",
            Storage::Freed => "freed",
        };
        f.debug_struct("NumericBuffer")
            .field("shape", &self.shape)
            .field("storage", &state)
            .finish()
    }
}

impl fmt::Display for NumericBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match &self.storage {
            Storage::Host(data) => data,
            Storage::Accelerator(_) => return write!(f, "<{} values on accelerator>", self.shape),
            Storage::Freed => return write!(f, "<{} values freed>", self.shape),
        };
        if self.shape.ndim() < 2 {
            return write_row(f, data);
        }
        let cols = self.shape.dim(self.shape.ndim() - 1);
        write!(f, "[")?;
        for (i, row) in data.chunks(cols).enumerate() {
            if i > 0 {
                write!(f, ",\n ")?;
            }
            write_row(f, row)?;
        }
        write!(f, "]")
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &[f64]) -> fmt::Result {
    write!(f, "[")?;
    for (i, v) in row.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{:.6}", v)?;
    }
    write!(f, "]")
}
