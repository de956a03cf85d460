//! Bounded gate on concurrent environment creation.
//!
//! The backend can only build a limited number of vaults at once. Every
//! fixture shares one gate through the provisioner, so the (K+1)th caller
//! waits for a permit instead of receiving a capacity error from the backend.
//!
//! ```no_run
//! use vault_harness_core::capacity::CapacityGate;
//!
//! # async fn demo() {
//! let gate = CapacityGate::new(2);
//! let permit = gate.acquire().await.unwrap();
//! // ... create the environment ...
//! drop(permit); // next waiter proceeds
//! # }
//! ```

use crate::error::ProvisioningError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Shared, cloneable capacity limit.
#[derive(Debug, Clone)]
pub struct CapacityGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. The slot is returned when this is dropped.
#[derive(Debug)]
pub struct CapacityPermit {
    _permit: OwnedSemaphorePermit,
}

impl CapacityGate {
    /// Creates a gate admitting at most `capacity` concurrent holders.
    ///
    /// A capacity of zero is raised to one; a gate nobody can pass would
    /// deadlock the suite.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<CapacityPermit, ProvisioningError> {
        if self.semaphore.available_permits() == 0 {
            debug!(capacity = self.capacity, "Provisioning capacity exhausted, waiting");
        }
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ProvisioningError::CapacityClosed)?;
        Ok(CapacityPermit { _permit: permit })
    }

    /// Stops admitting new holders; pending waiters fail with `CapacityClosed`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
