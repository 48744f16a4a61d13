//! The cached strategy: hot-path lookups over shared concurrent maps, kept
//! fresh by the change-event stream.
//!
//! Read path: [`FeatureCache::lookup`], called on every SDK evaluation
//! request. Write path: the three `update_*` methods, called from event
//! ingestion. The only shared mutable state are the maps below; every
//! operation touches a handful of keys and no cross-key transaction is
//! needed. A concurrent delete racing a fetch-through can leave one lookup
//! momentarily stale; the next event or lookup self-corrects.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::domain::events::{
    EnvironmentChange, FeatureValueChange, PublishAction, ServiceAccountChange,
};
use crate::domain::features::{PermissionGrant, ServiceAccountPayload};
use crate::upstream::UpstreamClient;

use super::config::CacheConfig;
use super::lock::lock_guard;
use super::snapshot::EnvironmentSnapshot;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_FETCH_THROUGH: &str = "switchyard_cache_fetch_through_total";
pub(crate) const METRIC_NEGATIVE_HIT: &str = "switchyard_cache_negative_hit_total";
pub(crate) const METRIC_STALE_EVENT: &str = "switchyard_cache_stale_event_total";

/// Everything a request needs to build a permission-filtered feature list.
#[derive(Clone)]
pub struct FeatureCollection {
    pub snapshot: Arc<EnvironmentSnapshot>,
    pub grant: PermissionGrant,
    pub service_account_id: Uuid,
}

/// Cached resolution of one (environment, eval key) pair. The grant may be
/// empty; lookups report that as absent while keeping the resolution cached.
#[derive(Clone)]
struct ResolvedPair {
    grant: PermissionGrant,
    service_account_id: Uuid,
}

/// The cache store.
///
/// Environments and service accounts are tenant-sized, so the primary maps
/// are unbounded; only the miss caches and the resolved-pair index are
/// capacity-bounded (no TTL, evicted by capacity or explicit invalidation).
pub struct FeatureCache {
    upstream: Arc<dyn UpstreamClient>,
    environments: DashMap<Uuid, Arc<EnvironmentSnapshot>>,
    accounts_by_key: DashMap<String, Arc<ServiceAccountPayload>>,
    accounts_by_id: DashMap<Uuid, Arc<ServiceAccountPayload>>,
    resolved_pairs: Mutex<LruCache<(Uuid, String), ResolvedPair>>,
    environment_misses: Mutex<LruCache<Uuid, ()>>,
    credential_misses: Mutex<LruCache<String, ()>>,
}

impl FeatureCache {
    pub fn new(config: &CacheConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            upstream,
            environments: DashMap::new(),
            accounts_by_key: DashMap::new(),
            accounts_by_id: DashMap::new(),
            resolved_pairs: Mutex::new(LruCache::new(config.resolved_pair_limit_non_zero())),
            environment_misses: Mutex::new(LruCache::new(
                config.environment_miss_limit_non_zero(),
            )),
            credential_misses: Mutex::new(LruCache::new(config.credential_miss_limit_non_zero())),
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Resolve the feature snapshot and permission grant for one
    /// (environment, eval key) pair.
    ///
    /// Never fails: "no such environment", "no such key", "no grant" and
    /// "upstream unreachable" all come back as `None`, so an unauthenticated
    /// caller cannot distinguish missing access from missing data.
    pub async fn lookup(&self, environment_id: Uuid, eval_key: &str) -> Option<FeatureCollection> {
        if lock_guard(&self.environment_misses, SOURCE, "lookup.environment_miss")
            .get(&environment_id)
            .is_some()
        {
            counter!(METRIC_NEGATIVE_HIT, "kind" => "environment").increment(1);
            return None;
        }

        if lock_guard(&self.credential_misses, SOURCE, "lookup.credential_miss")
            .get(eval_key)
            .is_some()
        {
            counter!(METRIC_NEGATIVE_HIT, "kind" => "credential").increment(1);
            return None;
        }

        let pair = self.resolve_pair(environment_id, eval_key).await?;
        if pair.grant.is_empty() {
            return None;
        }

        let snapshot = self.resolve_environment(environment_id).await?;

        Some(FeatureCollection {
            snapshot,
            grant: pair.grant,
            service_account_id: pair.service_account_id,
        })
    }

    async fn resolve_pair(&self, environment_id: Uuid, eval_key: &str) -> Option<ResolvedPair> {
        let pair_key = (environment_id, eval_key.to_string());
        if let Some(pair) =
            lock_guard(&self.resolved_pairs, SOURCE, "resolve_pair.get").get(&pair_key)
        {
            return Some(pair.clone());
        }

        let account = self.resolve_account(eval_key).await?;

        // "Not listed" is not cached as a pair: it is re-derived from the
        // cached account record, which is a map read.
        let grant = account.listed_grant_for(environment_id)?.clone();
        let pair = ResolvedPair {
            grant,
            service_account_id: account.id,
        };
        lock_guard(&self.resolved_pairs, SOURCE, "resolve_pair.put")
            .put(pair_key, pair.clone());
        Some(pair)
    }

    async fn resolve_account(&self, eval_key: &str) -> Option<Arc<ServiceAccountPayload>> {
        if let Some(account) = self.accounts_by_key.get(eval_key) {
            return Some(account.clone());
        }

        counter!(METRIC_FETCH_THROUGH, "entity" => "service_account").increment(1);
        match self.upstream.service_account(eval_key).await {
            Ok(account) => {
                let account = Arc::new(account);
                self.index_account(&account);
                Some(account)
            }
            Err(err) => {
                trace!(error = %err, "service account fetch-through failed");
                lock_guard(&self.credential_misses, SOURCE, "resolve_account.miss")
                    .put(eval_key.to_string(), ());
                None
            }
        }
    }

    async fn resolve_environment(&self, environment_id: Uuid) -> Option<Arc<EnvironmentSnapshot>> {
        if let Some(snapshot) = self.environments.get(&environment_id) {
            return Some(snapshot.clone());
        }

        counter!(METRIC_FETCH_THROUGH, "entity" => "environment").increment(1);
        match self.upstream.environment(environment_id).await {
            Ok(payload) => {
                let snapshot = Arc::new(EnvironmentSnapshot::new(&payload));
                self.environments.insert(environment_id, snapshot.clone());
                Some(snapshot)
            }
            Err(err) => {
                trace!(%environment_id, error = %err, "environment fetch-through failed");
                lock_guard(&self.environment_misses, SOURCE, "resolve_environment.miss")
                    .put(environment_id, ());
                None
            }
        }
    }

    /// Index a record under both eval keys and its id. Either key resolves
    /// to the same record.
    fn index_account(&self, account: &Arc<ServiceAccountPayload>) {
        self.accounts_by_key
            .insert(account.client_eval_key.clone(), account.clone());
        self.accounts_by_key
            .insert(account.server_eval_key.clone(), account.clone());
        self.accounts_by_id.insert(account.id, account.clone());
    }

    // ========================================================================
    // Event path
    // ========================================================================

    pub fn update_environment(&self, change: &EnvironmentChange) {
        if change.action == PublishAction::Empty {
            return;
        }

        let environment_id = change.environment.id;

        if change.action == PublishAction::Delete {
            self.environments.remove(&environment_id);
            self.invalidate_pairs_for_environment(environment_id);
            lock_guard(&self.environment_misses, SOURCE, "update_environment.delete")
                .put(environment_id, ());
            debug!(%environment_id, "environment removed from cache");
            return;
        }

        let existing_version = self
            .environments
            .get(&environment_id)
            .map(|s| s.environment_version());

        match existing_version {
            // Ties re-apply: at-least-once delivery may resend the version
            // we already hold, and rejecting it would wedge on partial state.
            Some(current) if change.environment.version < current => {
                trace!(
                    %environment_id,
                    incoming = change.environment.version,
                    current,
                    "discarding stale environment update"
                );
                counter!(METRIC_STALE_EVENT, "entity" => "environment").increment(1);
            }
            _ => {
                lock_guard(&self.environment_misses, SOURCE, "update_environment.apply")
                    .pop(&environment_id);
                self.environments.insert(
                    environment_id,
                    Arc::new(EnvironmentSnapshot::new(&change.environment)),
                );
            }
        }
    }

    pub fn update_service_account(&self, change: &ServiceAccountChange) {
        if change.action == PublishAction::Empty {
            return;
        }
        let Some(incoming) = change.service_account.as_ref() else {
            return;
        };

        if change.action == PublishAction::Delete {
            if let Some((_, existing)) = self.accounts_by_id.remove(&incoming.id) {
                self.drop_credential(&existing.client_eval_key);
                self.drop_credential(&existing.server_eval_key);
                debug!(service_account_id = %incoming.id, "service account removed from cache");
            }
            return;
        }

        let existing = self.accounts_by_id.get(&incoming.id).map(|a| a.clone());
        let Some(existing) = existing else {
            self.clear_credential_miss(&incoming.client_eval_key);
            self.clear_credential_miss(&incoming.server_eval_key);
            self.index_account(&Arc::new(incoming.clone()));
            return;
        };

        if incoming.version < existing.version {
            trace!(
                service_account_id = %incoming.id,
                incoming = incoming.version,
                current = existing.version,
                "discarding stale service account update"
            );
            counter!(METRIC_STALE_EVENT, "entity" => "service_account").increment(1);
            return;
        }

        self.clear_credential_miss(&incoming.client_eval_key);
        self.clear_credential_miss(&incoming.server_eval_key);

        // Key rotation: the rotated-out key must stop resolving immediately,
        // not at the next full resolution.
        if existing.client_eval_key != incoming.client_eval_key {
            self.drop_credential(&existing.client_eval_key);
        }
        if existing.server_eval_key != incoming.server_eval_key {
            self.drop_credential(&existing.server_eval_key);
        }

        self.index_account(&Arc::new(incoming.clone()));

        // Revocation: any environment whose grant the new record dropped or
        // changed loses its resolved pairs, under old and new keys alike.
        for old_grant in &existing.permissions {
            let unchanged = incoming
                .listed_grant_for(old_grant.environment_id)
                .is_some_and(|new_grant| new_grant.roles == old_grant.roles);
            if unchanged {
                continue;
            }
            for key in [
                &existing.client_eval_key,
                &existing.server_eval_key,
                &incoming.client_eval_key,
                &incoming.server_eval_key,
            ] {
                self.invalidate_pair(old_grant.environment_id, key);
            }
        }
    }

    pub fn update_feature(&self, change: &FeatureValueChange) {
        if change.action == PublishAction::Empty {
            return;
        }

        // Updates for environments nobody has asked about are dropped, not
        // fetched through; the next lookup repopulates full state anyway.
        let Some(snapshot) = self
            .environments
            .get(&change.environment_id)
            .map(|s| s.clone())
        else {
            debug!(
                environment_id = %change.environment_id,
                feature_key = %change.feature.definition.key,
                "dropping feature update for uncached environment"
            );
            return;
        };

        let feature_id = change.feature.definition.id;

        if change.action == PublishAction::Delete {
            snapshot.remove(feature_id);
            trace!(%feature_id, "removed feature");
            return;
        }

        let Some(existing) = snapshot.get(feature_id) else {
            // A feature the snapshot has never seen is never a merge
            // conflict; take it wholesale.
            trace!(
                feature_key = %change.feature.definition.key,
                "inserting previously unseen feature"
            );
            snapshot.set_entry(change.feature.clone());
            return;
        };

        // Definition and state advance on independent version tracks. A
        // whole-record comparison would drop a legitimate state update that
        // rides along with an unrelated definition bump, or vice versa.
        if change.feature.definition.version > existing.definition.version {
            trace!(%feature_id, "feature definition updated");
            snapshot.set_definition(&change.feature);
        }

        if let Some(incoming_state) = change.feature.state.as_ref() {
            match existing.state.as_ref() {
                None => {
                    trace!(%feature_id, "feature state set");
                    snapshot.set_state(&change.feature);
                }
                Some(current) if current.version < incoming_state.version => {
                    trace!(%feature_id, version = incoming_state.version, "feature state updated");
                    snapshot.set_state(&change.feature);
                }
                Some(current) if current.version == incoming_state.version => {
                    trace!(%feature_id, "feature state redelivered unchanged, ignoring");
                }
                Some(current) => {
                    trace!(
                        %feature_id,
                        incoming = incoming_state.version,
                        current = current.version,
                        "discarding stale feature state"
                    );
                    counter!(METRIC_STALE_EVENT, "entity" => "feature").increment(1);
                }
            }
        }
    }

    // ========================================================================
    // Invalidation plumbing
    // ========================================================================

    fn clear_credential_miss(&self, eval_key: &str) {
        lock_guard(&self.credential_misses, SOURCE, "clear_credential_miss").pop(eval_key);
    }

    /// Remove the record index for a key, remember the key as absent, and
    /// drop every resolved pair derived from it.
    fn drop_credential(&self, eval_key: &str) {
        self.accounts_by_key.remove(eval_key);
        lock_guard(&self.credential_misses, SOURCE, "drop_credential")
            .put(eval_key.to_string(), ());

        let mut pairs = lock_guard(&self.resolved_pairs, SOURCE, "drop_credential.pairs");
        let stale: Vec<(Uuid, String)> = pairs
            .iter()
            .filter(|((_, key), _)| key == eval_key)
            .map(|(pair_key, _)| pair_key.clone())
            .collect();
        for pair_key in stale {
            pairs.pop(&pair_key);
        }
    }

    fn invalidate_pair(&self, environment_id: Uuid, eval_key: &str) {
        lock_guard(&self.resolved_pairs, SOURCE, "invalidate_pair")
            .pop(&(environment_id, eval_key.to_string()));
    }

    fn invalidate_pairs_for_environment(&self, environment_id: Uuid) {
        let mut pairs = lock_guard(&self.resolved_pairs, SOURCE, "invalidate_pairs_for_env");
        let stale: Vec<(Uuid, String)> = pairs
            .iter()
            .filter(|((env, _), _)| *env == environment_id)
            .map(|(pair_key, _)| pair_key.clone())
            .collect();
        for pair_key in stale {
            pairs.pop(&pair_key);
        }
    }
}
