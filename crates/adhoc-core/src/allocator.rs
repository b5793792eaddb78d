//! Explicit memory accounting for unified tables
//!
//! A [`BufferAllocator`] is a cheap, cloneable handle that tracks how many
//! bytes the tables created through it currently hold. It is passed into
//! every unification call instead of living in process-wide state, so two
//! calls (or two tests) never observe each other's usage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{AdhocError, Result};

#[derive(Debug)]
struct AllocatorState {
    name: String,
    limit: usize,
    allocated: AtomicUsize,
    peak: AtomicUsize,
}

/// Byte-accounting allocator handle
#[derive(Debug, Clone)]
pub struct BufferAllocator {
    state: Arc<AllocatorState>,
}

impl BufferAllocator {
    /// Create an allocator that refuses reservations beyond `limit` bytes
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            state: Arc::new(AllocatorState {
                name: name.into(),
                limit,
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Create an allocator without a practical limit
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, usize::MAX)
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn limit(&self) -> usize {
        self.state.limit
    }

    /// Bytes currently reserved
    pub fn allocated(&self) -> usize {
        self.state.allocated.load(Ordering::Acquire)
    }

    /// Highest value `allocated` has reached
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::Acquire)
    }

    /// Reserve `bytes`, returning a guard that gives them back on drop
    pub fn reserve(&self, bytes: usize) -> Result<Reservation> {
        self.acquire(bytes)?;
        Ok(Reservation {
            allocator: self.clone(),
            bytes,
        })
    }

    fn acquire(&self, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }

        let limit = self.state.limit;
        let mut current = self.state.allocated.load(Ordering::Acquire);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|next| *next <= limit)
                .ok_or(AdhocError::AllocationLimit {
                    requested: bytes,
                    limit,
                })?;

            match self.state.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.state.peak.fetch_max(next, Ordering::AcqRel);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        if bytes > 0 {
            self.state.allocated.fetch_sub(bytes, Ordering::AcqRel);
        }
    }
}

impl Default for BufferAllocator {
    fn default() -> Self {
        Self::unbounded("root")
    }
}

/// Bytes held against a [`BufferAllocator`]
///
/// Freed exactly once: either explicitly via [`Reservation::free`] (which is
/// idempotent) or when the guard is dropped.
#[derive(Debug)]
pub struct Reservation {
    allocator: BufferAllocator,
    bytes: usize,
}

impl Reservation {
    pub fn size(&self) -> usize {
        self.bytes
    }

    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    /// Grow or shrink the reservation to exactly `bytes`.
    ///
    /// On failure the reservation keeps its previous size.
    pub fn resize(&mut self, bytes: usize) -> Result<()> {
        if bytes > self.bytes {
            self.allocator.acquire(bytes - self.bytes)?;
        } else {
            self.allocator.release(self.bytes - bytes);
        }
        self.bytes = bytes;
        Ok(())
    }

    /// Return all reserved bytes to the allocator
    pub fn free(&mut self) {
        if self.bytes > 0 {
            debug!(
                allocator = self.allocator.name(),
                bytes = self.bytes,
                "Releasing reservation"
            );
            self.allocator.release(self.bytes);
            self.bytes = 0;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.free();
    }
}
