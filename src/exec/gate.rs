//! Admission gate: weighted counting gate bounding concurrently running provers.
//!
//! A slot is an RAII permit. Dropping the [`ExecutionSlot`] returns the unit,
//! so release happens exactly once on every path, including panics and
//! cancelled futures. A release without an acquire cannot be expressed.

use crate::exec::context::{ExecutionContext, Interruption};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission failure; never has side effects on the gate
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("context cancelled while waiting for an execution slot")]
    Cancelled,
    #[error("deadline exceeded while waiting for an execution slot")]
    DeadlineExceeded,
}

impl From<Interruption> for AdmissionError {
    fn from(value: Interruption) -> Self {
        match value {
            Interruption::Cancelled => AdmissionError::Cancelled,
            Interruption::DeadlineExceeded => AdmissionError::DeadlineExceeded,
        }
    }
}

/// Counting gate with capacity fixed at construction
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    /// Create a gate; a capacity of 0 is normalised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            log::warn!("Admission gate capacity 0 normalised to 1");
            1
        } else {
            capacity
        };
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Units currently held
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a free unit, giving up when `ctx` is cancelled or expires.
    ///
    /// An already-done context fails immediately even if a unit is free.
    pub async fn acquire(&self, ctx: &ExecutionContext) -> Result<ExecutionSlot, AdmissionError> {
        if let Some(interruption) = ctx.interruption() {
            return Err(interruption.into());
        }

        tokio::select! {
            biased;
            interruption = ctx.done() => Err(interruption.into()),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                // The semaphore is never closed
                let permit = permit.map_err(|_| AdmissionError::Cancelled)?;
                Ok(ExecutionSlot { _permit: permit })
            }
        }
    }

}

/// One held unit of gate capacity; released on drop
#[derive(Debug)]
pub struct ExecutionSlot {
    _permit: OwnedSemaphorePermit,
}

impl ExecutionSlot {
    /// Return the unit now instead of at end of scope
    pub fn release(self) {}
}
