//! Coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`PermissionCoordinator`](crate::PermissionCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Lifetime of a new request, and hence of any grant it yields.
    pub default_ttl: Duration,

    /// How often the dispatcher sweeps expired records and grants.
    pub sweep_interval: Duration,

    /// How long `request` waits for the log to confirm its own append.
    pub replication_timeout: Duration,

    /// Capacity of the coordinator event channel.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(48 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            replication_timeout: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(172_800));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.replication_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"default_ttl": {"secs": 3600, "nanos": 0}}"#).unwrap();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
