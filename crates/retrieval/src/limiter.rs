//! Outbound fetch concurrency limit
//!
//! One permit per in-flight HTTP request. Permits are only ever taken around
//! a single leaf request, never while waiting on other fetches.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hard upper bound on simultaneous outbound fetches
pub const MAX_CONCURRENT_FETCHES: usize = 4;

#[derive(Debug, Clone)]
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl FetchLimiter {
    /// `capacity` is clamped to `1..=MAX_CONCURRENT_FETCHES`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CONCURRENT_FETCHES);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. `None` only if the limiter was closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for FetchLimiter {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_FETCHES)
    }
}
