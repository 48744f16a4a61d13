//! The no-cache strategy.
//!
//! Active while the event stream cannot vouch for cache freshness. Every
//! lookup performs two upstream fetches and nothing is retained, so there is
//! no state to keep fresh and no negative caching.

use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use crate::domain::events::{EnvironmentChange, FeatureValueChange, ServiceAccountChange};
use crate::upstream::UpstreamClient;

use super::snapshot::EnvironmentSnapshot;
use super::store::FeatureCollection;
use super::CacheListener;

pub struct PassthroughSource {
    upstream: Arc<dyn UpstreamClient>,
}

impl PassthroughSource {
    pub fn new(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self { upstream }
    }

    /// Same contract as the cached lookup, minus the caching: service
    /// account by key, then environment by id, fresh on every call.
    pub async fn lookup(&self, environment_id: Uuid, eval_key: &str) -> Option<FeatureCollection> {
        let account = match self.upstream.service_account(eval_key).await {
            Ok(account) => account,
            Err(err) => {
                trace!(error = %err, "passthrough service account fetch failed");
                return None;
            }
        };

        let grant = account.grant_for(environment_id)?.clone();

        let payload = match self.upstream.environment(environment_id).await {
            Ok(payload) => payload,
            Err(err) => {
                trace!(%environment_id, error = %err, "passthrough environment fetch failed");
                return None;
            }
        };

        Some(FeatureCollection {
            snapshot: Arc::new(EnvironmentSnapshot::new(&payload)),
            grant,
            service_account_id: account.id,
        })
    }
}

// Change events are no-ops here: with nothing cached there is nothing to
// keep fresh.
impl CacheListener for PassthroughSource {
    fn update_environment(&self, _change: &EnvironmentChange) {}

    fn update_service_account(&self, _change: &ServiceAccountChange) {}

    fn update_feature(&self, _change: &FeatureValueChange) {}
}
