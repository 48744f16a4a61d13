//! Domain types for feature definitions, per-environment feature state and
//! service-account permissions.
//!
//! These are the payload shapes exchanged with the management server and
//! carried inside change events; the cache treats feature values and rollout
//! strategies as opaque JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The value type of a feature. Fixed at feature creation; a feature never
/// changes kind afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Boolean,
    Text,
    Number,
    Json,
}

impl FeatureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Number => "number",
            Self::Json => "json",
        }
    }
}

impl Display for FeatureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity half of a feature: stable `id`, renameable `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    pub id: Uuid,
    pub key: String,
    pub kind: FeatureKind,
    pub version: i64,
}

/// Rollout strategy attached to a feature state. Evaluated downstream by
/// SDKs; this node only stores and forwards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// The current value of a feature in one environment.
///
/// `version` increases monotonically and is the only conflict-resolution
/// signal the cache uses; the merge logic that produces new versions lives
/// in the management server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureState {
    pub id: Uuid,
    pub version: i64,
    pub value: serde_json::Value,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub retired: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollout_strategies: Vec<RolloutStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_by: Option<Uuid>,
}

/// One entry of an environment snapshot: a definition paired with its
/// optional state and the enrichment-produced properties map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFeature {
    pub definition: FeatureDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FeatureState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

impl EnvironmentFeature {
    /// Copy with the properties map removed, for service accounts whose
    /// grant does not carry `RoleType::ExtendedData`.
    pub fn without_properties(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            state: self.state.clone(),
            properties: None,
        }
    }
}

/// Capability tags a service account holds in one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Read,
    Lock,
    Unlock,
    ChangeValue,
    ExtendedData,
}

impl RoleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::ChangeValue => "change_value",
            Self::ExtendedData => "extended_data",
        }
    }
}

impl Display for RoleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            "change_value" => Ok(Self::ChangeValue),
            "extended_data" => Ok(Self::ExtendedData),
            _ => Err(()),
        }
    }
}

/// Per-environment permission grant. An empty role set is treated as no
/// access everywhere in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub environment_id: Uuid,
    #[serde(default)]
    pub roles: BTreeSet<RoleType>,
}

impl PermissionGrant {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn has_role(&self, role: RoleType) -> bool {
        self.roles.contains(&role)
    }
}

/// Full environment payload as served by the management server and carried
/// in environment change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPayload {
    pub id: Uuid,
    pub version: i64,
    #[serde(default)]
    pub features: Vec<EnvironmentFeature>,
    #[serde(default)]
    pub service_account_ids: Vec<Uuid>,
}

/// Full service-account payload. Both eval keys resolve to the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountPayload {
    pub id: Uuid,
    pub version: i64,
    pub client_eval_key: String,
    pub server_eval_key: String,
    #[serde(default)]
    pub permissions: Vec<ServiceAccountPermission>,
}

/// A grant as listed on a service-account payload.
pub type ServiceAccountPermission = PermissionGrant;

impl ServiceAccountPayload {
    /// The grant for one environment, if any. Empty grants are reported as
    /// absent: a listed environment with no roles confers no access.
    pub fn grant_for(&self, environment_id: Uuid) -> Option<&PermissionGrant> {
        self.permissions
            .iter()
            .find(|p| p.environment_id == environment_id)
            .filter(|p| !p.is_empty())
    }

    /// The grant for one environment including empty ones. Used where the
    /// cache needs to distinguish "listed with no roles" from "not listed".
    pub fn listed_grant_for(&self, environment_id: Uuid) -> Option<&PermissionGrant> {
        self.permissions
            .iter()
            .find(|p| p.environment_id == environment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(environment_id: Uuid, roles: &[RoleType]) -> PermissionGrant {
        PermissionGrant {
            environment_id,
            roles: roles.iter().copied().collect(),
        }
    }

    #[test]
    fn empty_grant_confers_no_access() {
        let env = Uuid::new_v4();
        let account = ServiceAccountPayload {
            id: Uuid::new_v4(),
            version: 1,
            client_eval_key: "client".into(),
            server_eval_key: "server".into(),
            permissions: vec![grant(env, &[])],
        };

        assert!(account.grant_for(env).is_none());
        assert!(account.listed_grant_for(env).is_some());
    }

    #[test]
    fn grant_for_finds_matching_environment() {
        let env_a = Uuid::new_v4();
        let env_b = Uuid::new_v4();
        let account = ServiceAccountPayload {
            id: Uuid::new_v4(),
            version: 1,
            client_eval_key: "client".into(),
            server_eval_key: "server".into(),
            permissions: vec![
                grant(env_a, &[RoleType::Read]),
                grant(env_b, &[RoleType::Read, RoleType::Lock]),
            ],
        };

        assert!(account.grant_for(env_a).is_some());
        assert!(account.grant_for(env_b).unwrap().has_role(RoleType::Lock));
        assert!(account.grant_for(Uuid::new_v4()).is_none());
    }

    #[test]
    fn role_type_round_trips_through_str() {
        for role in [
            RoleType::Read,
            RoleType::Lock,
            RoleType::Unlock,
            RoleType::ChangeValue,
            RoleType::ExtendedData,
        ] {
            assert_eq!(role.as_str().parse::<RoleType>(), Ok(role));
        }
        assert!("owner".parse::<RoleType>().is_err());
    }

    #[test]
    fn without_properties_strips_only_properties() {
        let feature = EnvironmentFeature {
            definition: FeatureDefinition {
                id: Uuid::new_v4(),
                key: "checkout-v2".into(),
                kind: FeatureKind::Boolean,
                version: 3,
            },
            state: None,
            properties: Some(BTreeMap::from([(
                "origin".to_string(),
                "enricher".to_string(),
            )])),
        };

        let stripped = feature.without_properties();
        assert!(stripped.properties.is_none());
        assert_eq!(stripped.definition, feature.definition);
    }
}
