//! Cache configuration.
//!
//! Controls the bounded miss caches and the orchestrator's reconnect
//! behavior via `switchyard.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

// Default capacities for the bounded caches
const DEFAULT_ENVIRONMENT_MISS_LIMIT: usize = 10_000;
const DEFAULT_CREDENTIAL_MISS_LIMIT: usize = 10_000;
const DEFAULT_RESOLVED_PAIR_LIMIT: usize = 10_000;

/// What the orchestrator does with cache contents around a connectivity
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Drop the cache the moment the event stream is lost and serve every
    /// request passthrough until it returns. Reconnects start cold.
    #[default]
    WipeOnDisconnect,
    /// Keep serving the (possibly stale) cache while disconnected; wipe it
    /// the moment connectivity returns. Trades a staleness window during
    /// the outage for availability without a passthrough thundering herd.
    ServeStaleWipeOnReconnect,
}

/// Cache configuration from `switchyard.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum environment ids remembered as known-absent.
    pub environment_miss_limit: usize,
    /// Maximum SDK keys remembered as known-absent.
    pub credential_miss_limit: usize,
    /// Maximum resolved (environment, key) permission pairs.
    pub resolved_pair_limit: usize,
    /// Reconnect policy for the orchestrator.
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            environment_miss_limit: DEFAULT_ENVIRONMENT_MISS_LIMIT,
            credential_miss_limit: DEFAULT_CREDENTIAL_MISS_LIMIT,
            resolved_pair_limit: DEFAULT_RESOLVED_PAIR_LIMIT,
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            environment_miss_limit: settings.environment_miss_limit,
            credential_miss_limit: settings.credential_miss_limit,
            resolved_pair_limit: settings.resolved_pair_limit,
            reconnect_policy: settings.reconnect_policy,
        }
    }
}

impl CacheConfig {
    /// Environment-miss limit as NonZeroUsize, clamping to 1 if zero.
    pub fn environment_miss_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.environment_miss_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Credential-miss limit as NonZeroUsize, clamping to 1 if zero.
    pub fn credential_miss_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.credential_miss_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Resolved-pair limit as NonZeroUsize, clamping to 1 if zero.
    pub fn resolved_pair_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.resolved_pair_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.environment_miss_limit, 10_000);
        assert_eq!(config.credential_miss_limit, 10_000);
        assert_eq!(config.resolved_pair_limit, 10_000);
        assert_eq!(config.reconnect_policy, ReconnectPolicy::WipeOnDisconnect);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            environment_miss_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.environment_miss_limit_non_zero().get(), 1);
    }

    #[test]
    fn reconnect_policy_deserializes_snake_case() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"reconnect_policy":"serve_stale_wipe_on_reconnect"}"#)
                .unwrap();
        assert_eq!(
            config.reconnect_policy,
            ReconnectPolicy::ServeStaleWipeOnReconnect
        );
    }
}
