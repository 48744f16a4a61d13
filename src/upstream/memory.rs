//! In-process upstream used by tests and local development.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::features::{EnvironmentPayload, ServiceAccountPayload};

use super::{UpstreamClient, UpstreamError};

/// In-memory management server stand-in. Lives in the main tree because it
/// is tiny and integration tests and local wiring both need it.
///
/// Call counters expose how often the cache actually fetched through, which
/// is how the negative-cache guarantees are asserted.
#[derive(Default)]
pub struct MemoryUpstream {
    environments: DashMap<Uuid, EnvironmentPayload>,
    accounts: DashMap<String, ServiceAccountPayload>,
    environment_calls: AtomicUsize,
    service_account_calls: AtomicUsize,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_environment(&self, environment: EnvironmentPayload) {
        self.environments.insert(environment.id, environment);
    }

    pub fn remove_environment(&self, id: Uuid) {
        self.environments.remove(&id);
    }

    /// Index the account under both eval keys, the same way the management
    /// server resolves either key to the one record.
    pub fn put_service_account(&self, account: ServiceAccountPayload) {
        self.accounts
            .insert(account.client_eval_key.clone(), account.clone());
        self.accounts
            .insert(account.server_eval_key.clone(), account);
    }

    pub fn remove_service_account(&self, account: &ServiceAccountPayload) {
        self.accounts.remove(&account.client_eval_key);
        self.accounts.remove(&account.server_eval_key);
    }

    pub fn environment_calls(&self) -> usize {
        self.environment_calls.load(Ordering::Relaxed)
    }

    pub fn service_account_calls(&self) -> usize {
        self.service_account_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UpstreamClient for MemoryUpstream {
    async fn environment(&self, id: Uuid) -> Result<EnvironmentPayload, UpstreamError> {
        self.environment_calls.fetch_add(1, Ordering::Relaxed);
        self.environments
            .get(&id)
            .map(|e| e.clone())
            .ok_or(UpstreamError::not_found("environment"))
    }

    async fn service_account(
        &self,
        eval_key: &str,
    ) -> Result<ServiceAccountPayload, UpstreamError> {
        self.service_account_calls.fetch_add(1, Ordering::Relaxed);
        self.accounts
            .get(eval_key)
            .map(|a| a.clone())
            .ok_or(UpstreamError::not_found("service-account"))
    }
}
