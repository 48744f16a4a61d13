//! Per-environment feature snapshot with a derived content fingerprint.
//!
//! One snapshot holds the full feature set of a single environment. Writes
//! for an environment are serialized by the cache store's event path, while
//! reads may happen concurrently from request threads; the map itself is a
//! concurrency-safe collection, so no external locking is needed.

use std::sync::RwLock;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::features::{EnvironmentFeature, EnvironmentPayload};

use super::lock::{read_guard, write_guard};

const SOURCE: &str = "cache::snapshot";

/// Fingerprint length in hex characters.
const ETAG_LEN: usize = 16;

/// Cached representation of one environment's feature set.
///
/// The etag is a pure function of the (feature id, state version) set and is
/// recomputed synchronously after every mutation, so `etag()` is O(1).
pub struct EnvironmentSnapshot {
    environment_id: Uuid,
    environment_version: i64,
    features: DashMap<Uuid, EnvironmentFeature>,
    etag: RwLock<String>,
}

impl EnvironmentSnapshot {
    /// Build a snapshot from an authoritative full-state payload.
    pub fn new(payload: &EnvironmentPayload) -> Self {
        let features = DashMap::new();
        for feature in &payload.features {
            features.insert(feature.definition.id, feature.clone());
        }

        let snapshot = Self {
            environment_id: payload.id,
            environment_version: payload.version,
            features,
            etag: RwLock::new(String::new()),
        };
        snapshot.recompute_etag();
        snapshot
    }

    pub fn environment_id(&self) -> Uuid {
        self.environment_id
    }

    pub fn environment_version(&self) -> i64 {
        self.environment_version
    }

    pub fn get(&self, feature_id: Uuid) -> Option<EnvironmentFeature> {
        self.features.get(&feature_id).map(|f| f.clone())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// All entries in stable feature-id order.
    pub fn features(&self) -> Vec<EnvironmentFeature> {
        let mut entries: Vec<EnvironmentFeature> =
            self.features.iter().map(|f| f.clone()).collect();
        entries.sort_by_key(|f| f.definition.id);
        entries
    }

    /// Insert or replace an entry wholesale, definition and state together.
    pub fn set_entry(&self, feature: EnvironmentFeature) {
        self.features.insert(feature.definition.id, feature);
        self.recompute_etag();
    }

    /// Replace the definition half of an entry, leaving any existing state
    /// untouched. Inserts the whole entry if absent.
    pub fn set_definition(&self, feature: &EnvironmentFeature) {
        match self.features.get_mut(&feature.definition.id) {
            Some(mut existing) => existing.definition = feature.definition.clone(),
            None => {
                self.features
                    .insert(feature.definition.id, feature.clone());
            }
        }
        self.recompute_etag();
    }

    /// Replace the state half of an entry, leaving the definition untouched.
    /// Inserts the whole entry if absent.
    pub fn set_state(&self, feature: &EnvironmentFeature) {
        match self.features.get_mut(&feature.definition.id) {
            Some(mut existing) => existing.state = feature.state.clone(),
            None => {
                self.features
                    .insert(feature.definition.id, feature.clone());
            }
        }
        self.recompute_etag();
    }

    /// Delete an entry entirely. Returns whether it existed.
    pub fn remove(&self, feature_id: Uuid) -> bool {
        let removed = self.features.remove(&feature_id).is_some();
        if removed {
            self.recompute_etag();
        }
        removed
    }

    /// The current fingerprint. Cheap; cached from the last mutation.
    pub fn etag(&self) -> String {
        read_guard(&self.etag, SOURCE, "etag").clone()
    }

    fn recompute_etag(&self) {
        // Stable secondary ordering by feature id keeps the digest a pure
        // function of the content, independent of insertion order.
        let mut entries: Vec<(Uuid, Option<i64>)> = self
            .features
            .iter()
            .map(|f| (f.definition.id, f.state.as_ref().map(|s| s.version)))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let concatenated = entries
            .iter()
            .map(|(id, version)| match version {
                Some(version) => format!("{id}-{version}"),
                None => format!("{id}-0000"),
            })
            .collect::<Vec<_>>()
            .join("-");

        let digest = Sha256::digest(concatenated.as_bytes());
        let mut tag = hex::encode(digest);
        tag.truncate(ETAG_LEN);

        *write_guard(&self.etag, SOURCE, "recompute_etag") = tag;
    }
}
