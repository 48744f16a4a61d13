//! HTTP implementation of the upstream boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use uuid::Uuid;

use crate::domain::features::{EnvironmentPayload, ServiceAccountPayload};

use super::{UpstreamClient, UpstreamError};

/// Fetch-through client against the management server's internal cache API.
///
/// Authenticates with the edge node's own API key; the per-request timeout
/// comes from settings so a wedged upstream degrades into a miss instead of
/// a hung lookup.
pub struct RestUpstream {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestUpstream {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| UpstreamError::unavailable(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        entity: &'static str,
    ) -> Result<T, UpstreamError> {
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| UpstreamError::unavailable(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(entity, url, "upstream entity not found");
                Err(UpstreamError::not_found(entity))
            }
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|err| UpstreamError::protocol(err.to_string())),
            status => Err(UpstreamError::protocol(format!(
                "{entity} fetch returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl UpstreamClient for RestUpstream {
    async fn environment(&self, id: Uuid) -> Result<EnvironmentPayload, UpstreamError> {
        let url = format!("{}/internal/v1/cache/environments/{id}", self.base_url);
        self.fetch(url, "environment").await
    }

    async fn service_account(
        &self,
        eval_key: &str,
    ) -> Result<ServiceAccountPayload, UpstreamError> {
        let url = format!(
            "{}/internal/v1/cache/service-accounts/{eval_key}",
            self.base_url
        );
        self.fetch(url, "service-account").await
    }
}
