//! Counting admission control for simultaneous downloads.
//!
//! A thin wrapper around [`tokio::sync::Semaphore`]: `acquire` suspends the
//! calling task until a slot is free and returns a [`GatePermit`] that
//! releases the slot when dropped (or explicitly through
//! [`GatePermit::release`]). Tokio's semaphore is FIFO, so every blocked task
//! is eventually admitted.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Minimum allowed gate capacity.
pub const MIN_CAPACITY: usize = 1;

/// Maximum allowed gate capacity.
pub const MAX_CAPACITY: usize = 16;

/// Default number of simultaneous downloads.
pub const DEFAULT_CAPACITY: usize = 3;

/// Error returned when a gate can no longer admit work.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Capacity outside the supported range.
    #[error("invalid gate capacity {value}: must be between {MIN_CAPACITY} and {MAX_CAPACITY}")]
    InvalidCapacity {
        /// The rejected value.
        value: usize,
    },

    /// The gate was closed while waiting.
    #[error("concurrency gate closed")]
    Closed,

    /// Shutdown was requested while waiting for a slot.
    #[error("cancelled while waiting for a slot")]
    Cancelled,
}

/// Bounded admission gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One occupied slot; dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Returns the slot to the gate.
    pub fn release(self) {
        trace!("gate slot released");
    }
}

impl ConcurrencyGate {
    /// Creates a gate admitting at most `capacity` holders at once.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidCapacity`] outside `1..=16`.
    pub fn new(capacity: usize) -> Result<Self, GateError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(GateError::InvalidCapacity { value: capacity });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Closed`] if the gate was closed.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        trace!(in_flight = self.in_flight(), "gate slot acquired");
        Ok(GatePermit { _permit: permit })
    }

    /// Waits for a free slot unless shutdown is requested first.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Cancelled`] when `cancel` fires before a slot frees up.
    pub async fn acquire_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<GatePermit, GateError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(GateError::Cancelled),
            permit = self.acquire() => permit,
        }
    }

    /// Stops admitting new holders; pending `acquire` calls fail with [`GateError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}
