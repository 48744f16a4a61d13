//! Receive half of the pub/sub registry.
//!
//! Handlers key on the exact (type, subject) pair: one subject can carry
//! several message shapes, and only an exact match dispatches. An event
//! nobody handles is logged once per pair and silently dropped afterwards;
//! the already-warned set is bounded so repeated junk cannot grow memory or
//! storm the log.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;
use metrics::counter;
use tracing::{error, info_span, warn};

use crate::cache::lock::{lock_guard, read_guard, write_guard};
use crate::domain::events::WireEvent;

use super::envelope::EventEnvelope;
use super::pool::DeliveryPool;

const SOURCE: &str = "events::receiver";

pub(crate) const METRIC_DELIVERY_FAILURE: &str = "switchyard_event_delivery_failure_total";

const WARNED_PAIR_LIMIT: usize = 64;

type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

pub struct ReceiverRegistry {
    handlers: RwLock<HashMap<(String, String), Vec<Handler>>>,
    warned: Mutex<LruCache<(String, String), ()>>,
    pool: Arc<DeliveryPool>,
}

impl ReceiverRegistry {
    pub fn new(pool: Arc<DeliveryPool>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            warned: Mutex::new(LruCache::new(
                NonZeroUsize::new(WARNED_PAIR_LIMIT).unwrap_or(NonZeroUsize::MIN),
            )),
            pool,
        }
    }

    /// Register a typed handler for `T`'s (type, subject) pair. Multiple
    /// handlers per pair are delivered independently.
    pub fn listen<T: WireEvent>(&self, handler: impl Fn(T) + Send + Sync + 'static) {
        let wrapped: Handler = Arc::new(move |envelope: &EventEnvelope| {
            match envelope.decode::<T>() {
                Ok(message) => handler(message),
                Err(err) => {
                    error!(
                        event_type = %envelope.event_type,
                        subject = %envelope.subject,
                        error = %err,
                        "failed to decode event payload"
                    );
                    counter!(METRIC_DELIVERY_FAILURE, "event_type" => T::TYPE).increment(1);
                }
            }
        });

        write_guard(&self.handlers, SOURCE, "listen")
            .entry((T::TYPE.to_string(), T::SUBJECT.to_string()))
            .or_default()
            .push(wrapped);
    }

    /// Dispatch one envelope to every handler registered for its exact
    /// (type, subject) pair.
    ///
    /// Each handler runs on the delivery pool; a panic in one handler is
    /// caught, counted and never reaches its siblings or the caller.
    pub fn process(&self, envelope: &EventEnvelope) {
        if envelope.event_type.is_empty() || envelope.subject.is_empty() {
            error!("received an event with no type or subject");
            return;
        }

        let key = (envelope.event_type.clone(), envelope.subject.clone());
        let handlers = read_guard(&self.handlers, SOURCE, "process")
            .get(&key)
            .cloned();

        let Some(handlers) = handlers else {
            let mut warned = lock_guard(&self.warned, SOURCE, "process.warned");
            if warned.get(&key).is_none() {
                warned.put(key.clone(), ());
                warn!(
                    event_type = %key.0,
                    subject = %key.1,
                    "no handler registered for incoming event, dropping this and subsequent deliveries"
                );
            }
            return;
        };

        for handler in handlers {
            let envelope = envelope.clone();
            let span = info_span!(
                "event_delivery",
                event_type = %envelope.event_type,
                subject = %envelope.subject,
                event_id = %envelope.id,
            );
            self.pool.submit(move || {
                let _entered = span.enter();
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(&envelope)));
                if outcome.is_err() {
                    error!(
                        event_type = %envelope.event_type,
                        subject = %envelope.subject,
                        "event handler panicked"
                    );
                    counter!(METRIC_DELIVERY_FAILURE, "event_type" => envelope.event_type.clone())
                        .increment(1);
                }
            });
        }
    }

    /// Whether any handler is registered for this pair. The publisher's
    /// direct wiring uses this to decide routability.
    pub fn handles(&self, event_type: &str, subject: &str) -> bool {
        read_guard(&self.handlers, SOURCE, "handles")
            .contains_key(&(event_type.to_string(), subject.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::domain::events::{PublishAction, ServiceAccountChange};

    async fn wait_for(expected: usize, counter: &AtomicUsize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {expected} deliveries, saw {}",
            counter.load(Ordering::SeqCst)
        );
    }

    fn registry() -> ReceiverRegistry {
        ReceiverRegistry::new(Arc::new(DeliveryPool::new(4)))
    }

    fn empty_account_change() -> EventEnvelope {
        EventEnvelope::encode(
            &ServiceAccountChange {
                action: PublishAction::Empty,
                service_account: None,
            },
            false,
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delivers_to_every_registered_handler() {
        let registry = registry();
        let delivered = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let delivered = delivered.clone();
            registry.listen::<ServiceAccountChange>(move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.process(&empty_account_change());
        wait_for(3, &delivered).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_handler_does_not_starve_siblings() {
        let registry = registry();
        let delivered = Arc::new(AtomicUsize::new(0));

        registry.listen::<ServiceAccountChange>(|_| panic!("handler exploded"));
        let counter = delivered.clone();
        registry.listen::<ServiceAccountChange>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.process(&empty_account_change());
        registry.process(&empty_account_change());
        wait_for(2, &delivered).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unhandled_pairs_are_dropped_quietly() {
        let registry = registry();

        // Nothing registered: both deliveries are dropped, the second one
        // without a second warning.
        registry.process(&empty_account_change());
        registry.process(&empty_account_change());

        assert!(!registry.handles(ServiceAccountChange::TYPE, ServiceAccountChange::SUBJECT));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn undecodable_payload_does_not_reach_the_handler() {
        let registry = registry();
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = delivered.clone();
        registry.listen::<ServiceAccountChange>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut envelope = empty_account_change();
        envelope.data = bytes::Bytes::from_static(b"{broken");
        registry.process(&envelope);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }
}
