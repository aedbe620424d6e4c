use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of requests in flight at once.
///
/// Waiters are served first-come-first-served and park without polling.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

/// A held slot. Dropping it releases the slot, whichever way the request ends.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> GatePermit {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("admission gate semaphore is never closed");
        GatePermit { _permit: permit }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }
}
