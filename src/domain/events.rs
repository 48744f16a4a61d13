//! Change-event payloads consumed and produced by the edge node.
//!
//! Every event carries a [`PublishAction`] tag. Delivery is at-least-once
//! and may be reordered; consumers resolve both with the version rules in
//! the cache layer, so these shapes stay plain data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::features::{EnvironmentFeature, EnvironmentPayload, ServiceAccountPayload};

/// A message shape routable by the pub/sub registries.
///
/// `TYPE` names the message shape, `SUBJECT` the channel it travels on; the
/// receiver registry dispatches on the exact pair.
pub trait WireEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
    const SUBJECT: &'static str;
}

/// Action tag carried on every change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishAction {
    Create,
    Update,
    Delete,
    /// Signals "nothing to publish" (e.g. a tenant with zero environments);
    /// cache consumers ignore it.
    Empty,
}

/// Full-state environment change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentChange {
    pub action: PublishAction,
    pub environment: EnvironmentPayload,
}

impl WireEvent for EnvironmentChange {
    const TYPE: &'static str = "environment-change.v1";
    const SUBJECT: &'static str = "switchyard/environment";
}

/// Full-state service-account change. `service_account` is absent for
/// `Empty` signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountChange {
    pub action: PublishAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountPayload>,
}

impl WireEvent for ServiceAccountChange {
    const TYPE: &'static str = "service-account-change.v1";
    const SUBJECT: &'static str = "switchyard/service-account";
}

/// A single feature change within one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureValueChange {
    pub action: PublishAction,
    pub environment_id: Uuid,
    pub feature: EnvironmentFeature,
}

/// Feature changes are batched on the wire; one message may carry updates
/// for many features and environments. Items are delivered to listeners
/// independently, in array order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureValuesChange {
    pub features: Vec<FeatureValueChange>,
}

impl WireEvent for FeatureValuesChange {
    const TYPE: &'static str = "feature-value-change.v1";
    const SUBJECT: &'static str = "switchyard/feature";
}
