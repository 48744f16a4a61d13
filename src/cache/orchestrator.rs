//! Connectivity-driven strategy switching.
//!
//! The orchestrator presents the same read/write contract as the cache
//! store but delegates to whichever strategy the event-stream connectivity
//! currently justifies. It starts in passthrough: an empty cache must not
//! serve until the stream has proven it can keep it fresh.

use std::sync::{Arc, Mutex, RwLock};

use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::events::{EnvironmentChange, FeatureValueChange, ServiceAccountChange};
use crate::upstream::UpstreamClient;

use super::config::{CacheConfig, ReconnectPolicy};
use super::lock::{lock_guard, read_guard, write_guard};
use super::passthrough::PassthroughSource;
use super::store::{FeatureCache, FeatureCollection};
use super::CacheListener;

const SOURCE: &str = "cache::orchestrator";

const METRIC_MODE_SWITCH: &str = "switchyard_cache_mode_switch_total";

/// Which strategy is currently serving lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cached,
    Passthrough,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Passthrough => "passthrough",
        }
    }
}

/// The two strategies, swapped atomically behind one reference. Delegation
/// clones the enum (two `Arc` bumps), so a concurrent swap is never
/// observed half-applied.
#[derive(Clone)]
enum Strategy {
    Cached(Arc<FeatureCache>),
    Passthrough(Arc<PassthroughSource>),
}

pub struct CacheOrchestrator {
    config: CacheConfig,
    upstream: Arc<dyn UpstreamClient>,
    passthrough: Arc<PassthroughSource>,
    active: RwLock<Strategy>,
    // Serializes transitions; `active` alone cannot dedupe edge triggers.
    connected: Mutex<bool>,
}

impl CacheOrchestrator {
    pub fn new(config: CacheConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        let passthrough = Arc::new(PassthroughSource::new(upstream.clone()));
        Self {
            config,
            upstream,
            active: RwLock::new(Strategy::Passthrough(passthrough.clone())),
            passthrough,
            connected: Mutex::new(false),
        }
    }

    pub fn mode(&self) -> CacheMode {
        match *read_guard(&self.active, SOURCE, "mode") {
            Strategy::Cached(_) => CacheMode::Cached,
            Strategy::Passthrough(_) => CacheMode::Passthrough,
        }
    }

    /// Feed one edge of the transport's CONNECTED/DISCONNECTED stream.
    /// Repeated signals for the current state are ignored.
    pub fn set_connected(&self, connected: bool) {
        let mut state = lock_guard(&self.connected, SOURCE, "set_connected");
        if *state == connected {
            return;
        }
        *state = connected;

        if connected {
            // Fresh cache either way: the default variant discarded its
            // contents on disconnect, the serve-stale variant wipes now.
            // Population is lazy, via fetch-through; there is no bulk
            // reload.
            let cache = Arc::new(FeatureCache::new(&self.config, self.upstream.clone()));
            *write_guard(&self.active, SOURCE, "set_connected.swap") = Strategy::Cached(cache);
            counter!(METRIC_MODE_SWITCH, "to" => "cached").increment(1);
            info!("event stream connected, serving from cache");
            return;
        }

        match self.config.reconnect_policy {
            ReconnectPolicy::WipeOnDisconnect => {
                *write_guard(&self.active, SOURCE, "set_connected.swap") =
                    Strategy::Passthrough(self.passthrough.clone());
                counter!(METRIC_MODE_SWITCH, "to" => "passthrough").increment(1);
                warn!("event stream disconnected, serving passthrough");
            }
            ReconnectPolicy::ServeStaleWipeOnReconnect => {
                warn!("event stream disconnected, continuing to serve possibly stale cache");
            }
        }
    }

    fn active(&self) -> Strategy {
        read_guard(&self.active, SOURCE, "active").clone()
    }

    /// Same contract as the cache store's lookup, via whichever strategy is
    /// active.
    pub async fn lookup(&self, environment_id: Uuid, eval_key: &str) -> Option<FeatureCollection> {
        match self.active() {
            Strategy::Cached(cache) => cache.lookup(environment_id, eval_key).await,
            Strategy::Passthrough(passthrough) => {
                passthrough.lookup(environment_id, eval_key).await
            }
        }
    }
}

impl CacheListener for CacheOrchestrator {
    fn update_environment(&self, change: &EnvironmentChange) {
        match self.active() {
            Strategy::Cached(cache) => cache.update_environment(change),
            Strategy::Passthrough(passthrough) => passthrough.update_environment(change),
        }
    }

    fn update_service_account(&self, change: &ServiceAccountChange) {
        match self.active() {
            Strategy::Cached(cache) => cache.update_service_account(change),
            Strategy::Passthrough(passthrough) => passthrough.update_service_account(change),
        }
    }

    fn update_feature(&self, change: &FeatureValueChange) {
        match self.active() {
            Strategy::Cached(cache) => cache.update_feature(change),
            Strategy::Passthrough(passthrough) => passthrough.update_feature(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::features::{
        EnvironmentPayload, PermissionGrant, RoleType, ServiceAccountPayload,
    };
    use crate::upstream::MemoryUpstream;

    fn seeded_upstream(environment_id: Uuid, eval_key: &str) -> Arc<MemoryUpstream> {
        let upstream = Arc::new(MemoryUpstream::new());
        upstream.put_environment(EnvironmentPayload {
            id: environment_id,
            version: 1,
            features: vec![],
            service_account_ids: vec![],
        });
        upstream.put_service_account(ServiceAccountPayload {
            id: Uuid::new_v4(),
            version: 1,
            client_eval_key: eval_key.to_string(),
            server_eval_key: format!("{eval_key}-server"),
            permissions: vec![PermissionGrant {
                environment_id,
                roles: BTreeSet::from([RoleType::Read]),
            }],
        });
        upstream
    }

    #[tokio::test]
    async fn starts_in_passthrough() {
        let environment_id = Uuid::new_v4();
        let upstream = seeded_upstream(environment_id, "key");
        let orchestrator = CacheOrchestrator::new(CacheConfig::default(), upstream.clone());

        assert_eq!(orchestrator.mode(), CacheMode::Passthrough);

        orchestrator.lookup(environment_id, "key").await.unwrap();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), 2);
    }

    #[tokio::test]
    async fn connect_switches_to_a_cold_cache() {
        let environment_id = Uuid::new_v4();
        let upstream = seeded_upstream(environment_id, "key");
        let orchestrator = CacheOrchestrator::new(CacheConfig::default(), upstream.clone());

        orchestrator.set_connected(true);
        assert_eq!(orchestrator.mode(), CacheMode::Cached);

        // First lookup populates via fetch-through, the rest are map reads.
        orchestrator.lookup(environment_id, "key").await.unwrap();
        let after_first = upstream.environment_calls();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), after_first);
    }

    #[tokio::test]
    async fn default_policy_wipes_on_disconnect() {
        let environment_id = Uuid::new_v4();
        let upstream = seeded_upstream(environment_id, "key");
        let orchestrator = CacheOrchestrator::new(CacheConfig::default(), upstream.clone());

        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();

        orchestrator.set_connected(false);
        assert_eq!(orchestrator.mode(), CacheMode::Passthrough);

        // Every lookup during the outage hits upstream.
        let before = upstream.environment_calls();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), before + 2);

        // Reconnect starts cold: exactly one fetch-through per key again.
        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();
        let after_reconnect = upstream.environment_calls();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), after_reconnect);
    }

    #[tokio::test]
    async fn serve_stale_policy_keeps_the_cache_through_an_outage() {
        let environment_id = Uuid::new_v4();
        let upstream = seeded_upstream(environment_id, "key");
        let config = CacheConfig {
            reconnect_policy: ReconnectPolicy::ServeStaleWipeOnReconnect,
            ..Default::default()
        };
        let orchestrator = CacheOrchestrator::new(config, upstream.clone());

        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();
        let warm = upstream.environment_calls();

        // Outage: still cached, still serving, no upstream traffic.
        orchestrator.set_connected(false);
        assert_eq!(orchestrator.mode(), CacheMode::Cached);
        orchestrator.lookup(environment_id, "key").await.unwrap();
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), warm);

        // Reconnect wipes: the next lookup fetches through again.
        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), warm + 1);
    }

    #[tokio::test]
    async fn duplicate_signals_do_not_reset_the_cache() {
        let environment_id = Uuid::new_v4();
        let upstream = seeded_upstream(environment_id, "key");
        let orchestrator = CacheOrchestrator::new(CacheConfig::default(), upstream.clone());

        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();
        let warm = upstream.environment_calls();

        // A redundant CONNECTED must not discard the populated cache.
        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();
        assert_eq!(upstream.environment_calls(), warm);
    }

    #[tokio::test]
    async fn updates_reach_the_active_cache() {
        let environment_id = Uuid::new_v4();
        let upstream = seeded_upstream(environment_id, "key");
        let orchestrator = CacheOrchestrator::new(CacheConfig::default(), upstream.clone());
        orchestrator.set_connected(true);
        orchestrator.lookup(environment_id, "key").await.unwrap();

        use crate::domain::events::PublishAction;
        orchestrator.update_environment(&EnvironmentChange {
            action: PublishAction::Delete,
            environment: EnvironmentPayload {
                id: environment_id,
                version: 2,
                features: vec![],
                service_account_ids: vec![],
            },
        });

        assert!(orchestrator.lookup(environment_id, "key").await.is_none());
    }
}
