//! Boundary to the management server (the system of record).
//!
//! The cache only ever performs two synchronous calls against it: fetch a
//! full environment by id and fetch a full service account by eval key.
//! Everything else about the management server is out of scope here.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::features::{EnvironmentPayload, ServiceAccountPayload};

mod memory;
mod rest;

pub use memory::MemoryUpstream;
pub use rest::RestUpstream;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("management server unavailable: {message}")]
    Unavailable { message: String },
    #[error("unexpected upstream response: {message}")]
    Protocol { message: String },
}

impl UpstreamError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Fetch-through client used on cache miss and by the passthrough strategy.
///
/// Callers collapse every error into "absent"; the variants only matter for
/// logging. Implementations carry their own request timeout.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn environment(&self, id: Uuid) -> Result<EnvironmentPayload, UpstreamError>;

    async fn service_account(
        &self,
        eval_key: &str,
    ) -> Result<ServiceAccountPayload, UpstreamError>;
}
