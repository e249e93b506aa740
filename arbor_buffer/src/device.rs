//! Device placement and the accelerator memory pool.
//!
//! The accelerator is an emulated device: it owns a separate, capacity-limited
//! address space and stores values as raw bit patterns. Buffers reach it only
//! through explicit transfers, and every allocation is accounted against the
//! configured capacity so exhaustion surfaces as [`DeviceError::OutOfMemory`].

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{DeviceError, Result};

/// Environment variable overriding the accelerator capacity (in bytes).
pub const CAPACITY_ENV: &str = "ARBOR_ACCELERATOR_CAPACITY";

/// Default accelerator capacity: 256 MiB.
pub const DEFAULT_CAPACITY_BYTES: usize = 256 * 1024 * 1024;

/// Where a buffer's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Host,
    Accelerator,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Host => write!(f, "host"),
            Device::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Accelerator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorConfig {
    /// Total bytes the pool may hand out.
    pub capacity_bytes: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        AcceleratorConfig {
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl AcceleratorConfig {
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        AcceleratorConfig { capacity_bytes }
    }

    /// Read the capacity from [`CAPACITY_ENV`], falling back to the default.
    pub fn from_env() -> Self {
        match std::env::var(CAPACITY_ENV) {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(capacity_bytes) => AcceleratorConfig { capacity_bytes },
                Err(_) => {
                    log::warn!("ignoring unparsable {}={:?}", CAPACITY_ENV, raw);
                    AcceleratorConfig::default()
                }
            },
            Err(_) => AcceleratorConfig::default(),
        }
    }
}

struct Pool {
    capacity: usize,
    used: usize,
    next_id: u64,
    allocations: HashMap<u64, Vec<u64>>,
}

impl Pool {
    fn insert(&mut self, bits: Vec<u64>) -> Result<u64> {
        let requested = bits.len() * mem::size_of::<f64>();
        let available = self.capacity - self.used;
        if requested > available {
            return Err(DeviceError::OutOfMemory {
                requested,
                available,
            }
            .into());
        }
        let id = self.next_id;
        self.next_id += 1;
        self.used += requested;
        self.allocations.insert(id, bits);
        log::trace!("accelerator alloc #{id}: {requested} bytes ({} in use)", self.used);
        Ok(id)
    }

    fn release(&mut self, id: u64) {
        if let Some(bits) = self.allocations.remove(&id) {
            self.used -= bits.len() * mem::size_of::<f64>();
            log::trace!("accelerator free #{id} ({} in use)", self.used);
        }
    }
}

/// Shared handle to an accelerator memory pool.
#[derive(Clone)]
pub struct Accelerator {
    pool: Arc<Mutex<Pool>>,
}

impl fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accelerator")
            .field("capacity_bytes", &self.capacity_bytes())
            .field("used_bytes", &self.used_bytes())
            .field("live_allocations", &self.live_allocations())
            .finish()
    }
}

impl Default for Accelerator {
    fn default() -> Self {
        Accelerator::new(AcceleratorConfig::default())
    }
}

impl Accelerator {
    pub fn new(config: AcceleratorConfig) -> Self {
        log::debug!("accelerator pool with {} bytes", config.capacity_bytes);
        Accelerator {
            pool: Arc::new(Mutex::new(Pool {
                capacity: config.capacity_bytes,
                used: 0,
                next_id: 0,
                allocations: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Pool>> {
        self.pool.lock().map_err(|_| DeviceError::Poisoned.into())
    }

    // Counters stay consistent even if a holder panicked, so reads recover the guard.
    fn lock_for_read(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity_bytes(&self) -> usize {
        self.lock_for_read().capacity
    }

    pub fn used_bytes(&self) -> usize {
        self.lock_for_read().used
    }

    pub fn available_bytes(&self) -> usize {
        let pool = self.lock_for_read();
        pool.capacity - pool.used
    }

    pub fn live_allocations(&self) -> usize {
        self.lock_for_read().allocations.len()
    }

    /// True when both handles refer to the same pool.
    pub fn same_pool(&self, other: &Accelerator) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool)
    }

    /// Copy host values into a fresh allocation.
    pub(crate) fn upload(&self, values: &[f64]) -> Result<DeviceSlice> {
        let bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
        let id = self.lock()?.insert(bits)?;
        Ok(DeviceSlice {
            accel: self.clone(),
            id,
            len: values.len(),
        })
    }
}

/// One live allocation inside an accelerator pool. Released on drop.
pub struct DeviceSlice {
    accel: Accelerator,
    id: u64,
    len: usize,
}

impl DeviceSlice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn accelerator(&self) -> &Accelerator {
        &self.accel
    }

    /// Copy the allocation back into host values.
    pub(crate) fn download(&self) -> Result<Vec<f64>> {
        let pool = self.accel.lock()?;
        let bits = pool
            .allocations
            .get(&self.id)
            .expect("live DeviceSlice always has a pool entry");
        Ok(bits.iter().map(|&b| f64::from_bits(b)).collect())
    }

    /// Overwrite the allocation in place; `values` must have the same length.
    pub(crate) fn write(&self, values: &[f64]) -> Result<()> {
        debug_assert_eq!(values.len(), self.len);
        let mut pool = self.accel.lock()?;
        let bits = pool
            .allocations
            .get_mut(&self.id)
            .expect("live DeviceSlice always has a pool entry");
        for (dst, src) in bits.iter_mut().zip(values) {
            *dst = src.to_bits();
        }
        Ok(())
    }
}

impl Drop for DeviceSlice {
    fn drop(&mut self) {
        let mut pool = self.accel.lock_for_read();
        pool.release(self.id);
    }
}

impl fmt::Debug for DeviceSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSlice")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}
