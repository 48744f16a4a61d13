//! Subscribes the cache to the three change subjects and fans every decoded
//! event out to the registered listeners.
//!
//! Listeners are registered explicitly by the wiring code; there is no
//! ambient discovery. During a strategy swap more than one listener may be
//! live for a moment, so fan-out reads the list fresh on every delivery.

use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::domain::events::{EnvironmentChange, FeatureValuesChange, ServiceAccountChange};
use crate::events::ReceiverRegistry;

use super::lock::{read_guard, write_guard};
use super::CacheListener;

const SOURCE: &str = "cache::ingest";

pub struct EventIngest {
    listeners: RwLock<Vec<Arc<dyn CacheListener>>>,
}

impl EventIngest {
    /// Create the ingest and subscribe it to the three event subjects.
    /// Subscription happens exactly once, here.
    pub fn new(registry: &ReceiverRegistry) -> Arc<Self> {
        let ingest = Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
        });

        let this = ingest.clone();
        registry.listen::<EnvironmentChange>(move |change| {
            trace!(environment_id = %change.environment.id, "received environment change");
            this.each(|listener| listener.update_environment(&change));
        });

        let this = ingest.clone();
        registry.listen::<ServiceAccountChange>(move |change| {
            trace!("received service account change");
            this.each(|listener| listener.update_service_account(&change));
        });

        let this = ingest.clone();
        registry.listen::<FeatureValuesChange>(move |batch| {
            trace!(count = batch.features.len(), "received feature value batch");
            // Each item is delivered independently, in array order; the
            // per-feature version checks make the net effect order-safe.
            for change in &batch.features {
                this.each(|listener| listener.update_feature(change));
            }
        });

        ingest
    }

    /// Register a listener. Every subsequent event reaches it.
    pub fn register(&self, listener: Arc<dyn CacheListener>) {
        write_guard(&self.listeners, SOURCE, "register").push(listener);
    }

    fn each(&self, apply: impl Fn(&dyn CacheListener)) {
        let listeners: Vec<Arc<dyn CacheListener>> =
            read_guard(&self.listeners, SOURCE, "each").clone();
        for listener in &listeners {
            apply(listener.as_ref());
        }
    }
}
