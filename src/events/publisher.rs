//! Publish half of the pub/sub registry.
//!
//! Transport channels that know how to move an envelope (a broker binding,
//! the internal HTTP forwarder) register themselves per event type; code
//! that wants to emit an event calls [`PublisherRegistry::publish`] and
//! never learns which channels exist. The payload is serialized once per
//! distinct compression setting, not once per channel.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use metrics::counter;
use tracing::{error, info_span, trace};

use crate::cache::lock::{read_guard, write_guard};
use crate::domain::events::WireEvent;

use super::envelope::EventEnvelope;
use super::pool::DeliveryPool;
use super::receiver::ReceiverRegistry;

const SOURCE: &str = "events::publisher";

pub(crate) const METRIC_PUBLISH_UNROUTABLE: &str = "switchyard_event_publish_unroutable_total";
pub(crate) const METRIC_PUBLISH_FAILURE: &str = "switchyard_event_publish_failure_total";

type ChannelFn = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

#[derive(Clone)]
struct ChannelSink {
    channel: String,
    compress: bool,
    deliver: ChannelFn,
}

pub struct PublisherRegistry {
    sinks: RwLock<HashMap<String, Vec<ChannelSink>>>,
    direct: RwLock<Option<Arc<ReceiverRegistry>>>,
    pool: Arc<DeliveryPool>,
}

impl PublisherRegistry {
    pub fn new(pool: Arc<DeliveryPool>) -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            direct: RwLock::new(None),
            pool,
        }
    }

    /// Register a transport channel for one event type. `compress` selects
    /// which serialized variant the channel receives.
    pub fn register_channel(
        &self,
        event_type: &str,
        channel: &str,
        compress: bool,
        deliver: impl Fn(EventEnvelope) + Send + Sync + 'static,
    ) {
        write_guard(&self.sinks, SOURCE, "register_channel")
            .entry(event_type.to_string())
            .or_default()
            .push(ChannelSink {
                channel: channel.to_string(),
                compress,
                deliver: Arc::new(deliver),
            });
        trace!(event_type, channel, compress, "publish channel registered");
    }

    /// Wire an in-process receiver. Single-binary deployments route events
    /// straight into it without a transport hop; a wired receiver counts as
    /// a destination for routability.
    pub fn wire_direct(&self, receiver: Arc<ReceiverRegistry>) {
        *write_guard(&self.direct, SOURCE, "wire_direct") = Some(receiver);
    }

    pub fn has_channels(&self, event_type: &str) -> bool {
        read_guard(&self.sinks, SOURCE, "has_channels").contains_key(event_type)
    }

    /// Route one message to every registered channel and the direct
    /// receiver, asynchronously on the delivery pool.
    ///
    /// A message with no destination at all is a wiring bug, not a
    /// transient condition: it is logged as an error and counted.
    pub fn publish<T: WireEvent>(&self, message: &T) {
        let sinks = read_guard(&self.sinks, SOURCE, "publish")
            .get(T::TYPE)
            .cloned()
            .unwrap_or_default();
        // A wired receiver only counts as a destination if something in it
        // actually handles this (type, subject) pair.
        let direct = read_guard(&self.direct, SOURCE, "publish.direct")
            .clone()
            .filter(|receiver| receiver.handles(T::TYPE, T::SUBJECT));

        if sinks.is_empty() && direct.is_none() {
            error!(
                event_type = T::TYPE,
                subject = T::SUBJECT,
                "publishing event with no destination"
            );
            counter!(METRIC_PUBLISH_UNROUTABLE, "event_type" => T::TYPE).increment(1);
            return;
        }

        let wants_plain = direct.is_some() || sinks.iter().any(|s| !s.compress);
        let wants_compressed = sinks.iter().any(|s| s.compress);

        let plain = match wants_plain {
            true => match EventEnvelope::encode(message, false) {
                Ok(envelope) => Some(envelope),
                Err(err) => {
                    error!(event_type = T::TYPE, error = %err, "failed to encode event");
                    counter!(METRIC_PUBLISH_FAILURE, "event_type" => T::TYPE).increment(1);
                    return;
                }
            },
            false => None,
        };
        let compressed = match wants_compressed {
            true => match EventEnvelope::encode(message, true) {
                Ok(envelope) => Some(envelope),
                Err(err) => {
                    error!(event_type = T::TYPE, error = %err, "failed to encode event");
                    counter!(METRIC_PUBLISH_FAILURE, "event_type" => T::TYPE).increment(1);
                    return;
                }
            },
            false => None,
        };

        if let (Some(receiver), Some(envelope)) = (direct, plain.as_ref()) {
            // process() already fans out on the pool; no extra hop needed.
            receiver.process(envelope);
        }

        for sink in sinks {
            let variant = if sink.compress { &compressed } else { &plain };
            let Some(envelope) = variant.clone() else {
                continue;
            };
            let span = info_span!(
                "event_publish",
                event_type = %envelope.event_type,
                channel = %sink.channel,
            );
            let channel = sink.channel.clone();
            self.pool.submit(move || {
                let _entered = span.enter();
                let deliver = sink.deliver.clone();
                if catch_unwind(AssertUnwindSafe(|| deliver(envelope))).is_err() {
                    error!(channel = %channel, "publish channel panicked");
                    counter!(METRIC_PUBLISH_FAILURE, "channel" => channel.clone()).increment(1);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
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

    fn empty_change() -> ServiceAccountChange {
        ServiceAccountChange {
            action: PublishAction::Empty,
            service_account: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn each_channel_gets_its_compression_variant() {
        let pool = Arc::new(DeliveryPool::new(4));
        let registry = PublisherRegistry::new(pool);
        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        for (channel, compress) in [("broker-a", true), ("broker-b", false), ("broker-c", true)] {
            let seen = seen.clone();
            let count = count.clone();
            registry.register_channel(
                ServiceAccountChange::TYPE,
                channel,
                compress,
                move |envelope| {
                    // the envelope must decode regardless of variant
                    envelope.decode::<ServiceAccountChange>().unwrap();
                    seen.lock().unwrap().push((
                        envelope.event_type.clone(),
                        envelope.compressed,
                    ));
                    count.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        registry.publish(&empty_change());
        wait_for(3, &count).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|(_, compressed)| *compressed).count(), 2);
        assert_eq!(seen.iter().filter(|(_, compressed)| !compressed).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn direct_receiver_counts_as_a_destination() {
        let pool = Arc::new(DeliveryPool::new(4));
        let registry = PublisherRegistry::new(pool.clone());
        let receiver = Arc::new(ReceiverRegistry::new(pool));
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = delivered.clone();
        receiver.listen::<ServiceAccountChange>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.wire_direct(receiver);

        registry.publish(&empty_change());
        wait_for(1, &delivered).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unroutable_publish_does_not_panic() {
        let pool = Arc::new(DeliveryPool::new(4));
        let registry = PublisherRegistry::new(pool);

        assert!(!registry.has_channels(ServiceAccountChange::TYPE));
        registry.publish(&empty_change());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn direct_receiver_without_a_handler_is_not_a_destination() {
        let pool = Arc::new(DeliveryPool::new(4));
        let registry = PublisherRegistry::new(pool.clone());
        let receiver = Arc::new(ReceiverRegistry::new(pool));

        // The receiver is wired but handles nothing for this type, so the
        // publish is unroutable rather than silently dropped downstream.
        registry.wire_direct(receiver.clone());
        registry.publish(&empty_change());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!receiver.handles(
            ServiceAccountChange::TYPE,
            ServiceAccountChange::SUBJECT
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_channel_does_not_block_others() {
        let pool = Arc::new(DeliveryPool::new(4));
        let registry = PublisherRegistry::new(pool);
        let delivered = Arc::new(AtomicUsize::new(0));

        registry.register_channel(ServiceAccountChange::TYPE, "bad", false, |_| {
            panic!("channel down")
        });
        let counter = delivered.clone();
        registry.register_channel(ServiceAccountChange::TYPE, "good", false, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.publish(&empty_change());
        registry.publish(&empty_change());
        wait_for(2, &delivered).await;
    }
}
