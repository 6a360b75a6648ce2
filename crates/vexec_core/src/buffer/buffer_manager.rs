use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use vexec_error::{DbError, Result};

/// Accounts for memory used by growable buffers and hash tables.
///
/// Every component that grows a buffer for longer than a single call reserves
/// the growth here first. A manager may refuse a reservation, in which case
/// the component must surface the error instead of growing anyways.
pub trait BufferManager: Debug + Sync + Send {
    /// Try to reserve some number of bytes.
    ///
    /// This should never error when attempting to reserve zero bytes.
    fn try_reserve(&self, size_bytes: usize) -> Result<()>;

    /// Return previously reserved bytes to the manager.
    fn release(&self, size_bytes: usize);

    /// Total bytes currently reserved.
    fn reserved_bytes(&self) -> usize;
}

pub type BufferManagerRef = Arc<dyn BufferManager>;

/// Placeholder buffer manager, accepts everything and tracks nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopBufferManager;

impl NopBufferManager {
    pub fn new_ref() -> BufferManagerRef {
        Arc::new(NopBufferManager)
    }
}

impl BufferManager for NopBufferManager {
    fn try_reserve(&self, _size_bytes: usize) -> Result<()> {
        Ok(())
    }

    fn release(&self, _size_bytes: usize) {
        // Ok
    }

    fn reserved_bytes(&self) -> usize {
        0
    }
}

/// Buffer manager tracking cumulative bytes, optionally refusing reservations
/// past a limit.
#[derive(Debug, Default)]
pub struct TrackingBufferManager {
    limit: Option<usize>,
    reserved: AtomicUsize,
}

impl TrackingBufferManager {
    pub fn new(limit: Option<usize>) -> Self {
        TrackingBufferManager {
            limit,
            reserved: AtomicUsize::new(0),
        }
    }

    pub fn new_ref(limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self::new(limit))
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

impl BufferManager for TrackingBufferManager {
    fn try_reserve(&self, size_bytes: usize) -> Result<()> {
        if size_bytes == 0 {
            return Ok(());
        }

        let limit = match self.limit {
            Some(limit) => limit,
            None => {
                self.reserved.fetch_add(size_bytes, Ordering::Relaxed);
                return Ok(());
            }
        };

        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(size_bytes);
            if next > limit {
                return Err(DbError::memory_limit_exceeded(size_bytes, current, limit));
            }
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, size_bytes: usize) {
        let prev = self.reserved.fetch_sub(size_bytes, Ordering::AcqRel);
        debug_assert!(prev >= size_bytes, "released more bytes than reserved");
    }

    fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }
}

/// Bytes reserved on behalf of a single component.
///
/// Released back to the manager on drop, or explicitly through
/// [`Reservation::release_all`].
#[derive(Debug)]
pub struct Reservation {
    manager: BufferManagerRef,
    /// Size in bytes of the memory reservation.
    size: usize,
}

impl Reservation {
    /// Create an empty reservation against a manager.
    pub fn new(manager: &BufferManagerRef) -> Self {
        Reservation {
            manager: manager.clone(),
            size: 0,
        }
    }

    /// Create a reservation with some initial size.
    pub fn try_with_size(manager: &BufferManagerRef, size_bytes: usize) -> Result<Self> {
        let mut reservation = Self::new(manager);
        reservation.grow(size_bytes)?;
        Ok(reservation)
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Grow the reservation by some number of bytes.
    pub fn grow(&mut self, additional_bytes: usize) -> Result<()> {
        self.manager.try_reserve(additional_bytes)?;
        self.size += additional_bytes;
        Ok(())
    }

    /// Shrink the reservation, returning bytes to the manager.
    pub fn shrink(&mut self, bytes: usize) {
        let bytes = bytes.min(self.size);
        self.manager.release(bytes);
        self.size -= bytes;
    }

    /// Resize the reservation to exactly `size_bytes`.
    pub fn resize(&mut self, size_bytes: usize) -> Result<()> {
        if size_bytes > self.size {
            self.grow(size_bytes - self.size)
        } else {
            self.shrink(self.size - size_bytes);
            Ok(())
        }
    }

    /// Release everything held by this reservation. Idempotent.
    pub fn release_all(&mut self) {
        if self.size > 0 {
            self.manager.release(self.size);
            self.size = 0;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Compute the next capacity for a buffer that needs to fit `needed` items.
///
/// Buffers grow geometrically so the amortized cost of pushes stays constant.
pub const fn next_capacity(current: usize, needed: usize) -> usize {
    let doubled = if current < 8 { 8 } else { current * 2 };
    if doubled > needed { doubled } else { needed }
}

/// Make room for `additional` more elements in a vec, growing geometrically
/// and accounting the growth against the reservation.
pub fn reserve_vec<T>(
    vec: &mut Vec<T>,
    additional: usize,
    reservation: &mut Reservation,
) -> Result<()> {
    let needed = vec.len() + additional;
    if needed <= vec.capacity() {
        return Ok(());
    }
    let new_cap = next_capacity(vec.capacity(), needed);
    let grow_bytes = (new_cap - vec.capacity()) * std::mem::size_of::<T>();
    reservation.grow(grow_bytes)?;
    vec.reserve_exact(new_cap - vec.len());
    Ok(())
}
