//! Bounded worker pool for event-delivery callbacks.
//!
//! Publishers and the receive path never run subscriber code on their own
//! thread; deliveries are submitted here so a slow handler cannot stall the
//! caller, and the permit bound keeps a burst of events from spawning
//! unbounded work.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::trace;

pub struct DeliveryPool {
    permits: Arc<Semaphore>,
}

impl DeliveryPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run `task` on the pool. Returns immediately; the task waits for a
    /// free permit.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                trace!("delivery pool closed, dropping task");
                return;
            };
            task();
        });
    }
}
