//! Configuration for the protocol engine

use std::time::Duration;

use pymesh_core::{MESH_PORT, STALE_AGE};
use serde::{Deserialize, Serialize};

/// Prefix advertised when this node becomes a border router
pub const DEFAULT_BR_PREFIX: &str = "2001:dead:beef:cafe::/64";

/// Leader probe-round settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Time between probe rounds
    pub probe_interval: Duration,
    /// Routers asked for neighbors per round
    pub routers_per_round: usize,
    /// A router asked within this window is skipped
    pub probe_recency: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            routers_per_round: 5,
            probe_recency: Duration::from_secs(60),
        }
    }
}

impl LeaderConfig {
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_routers_per_round(mut self, count: usize) -> Self {
        self.routers_per_round = count;
        self
    }

    pub fn with_probe_recency(mut self, recency: Duration) -> Self {
        self.probe_recency = recency;
        self
    }
}

/// Duplicate-send suppression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionConfig {
    pub enabled: bool,
    /// Same (packet type, destination) is not re-sent within this window
    pub window: Duration,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: Duration::from_secs(35),
        }
    }
}

impl SuppressionConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Configuration for a [`MeshProtocolEngine`](crate::MeshProtocolEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Application port for mesh-internal traffic
    pub port: u16,
    /// Age after which neighbors and router reports are ignored
    pub stale_age: Duration,
    pub leader: LeaderConfig,
    pub suppression: SuppressionConfig,
    /// How often non-leader routers refresh their copy of the mesh views
    pub topology_query_interval: Duration,
    /// Also fetch the complete leader table on each topology refresh
    pub mirror_leader_data: bool,
    /// Prefix advertised by [`border_router_set`](crate::MeshProtocolEngine::border_router_set)
    pub border_router_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: MESH_PORT,
            stale_age: STALE_AGE,
            leader: LeaderConfig::default(),
            suppression: SuppressionConfig::default(),
            topology_query_interval: Duration::from_secs(60),
            mirror_leader_data: false,
            border_router_prefix: DEFAULT_BR_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_stale_age(mut self, stale_age: Duration) -> Self {
        self.stale_age = stale_age;
        self
    }

    pub fn with_leader(mut self, leader: LeaderConfig) -> Self {
        self.leader = leader;
        self
    }

    pub fn with_suppression(mut self, suppression: SuppressionConfig) -> Self {
        self.suppression = suppression;
        self
    }

    pub fn with_topology_query_interval(mut self, interval: Duration) -> Self {
        self.topology_query_interval = interval;
        self
    }

    pub fn with_mirror_leader_data(mut self, mirror: bool) -> Self {
        self.mirror_leader_data = mirror;
        self
    }

    pub fn with_border_router_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.border_router_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.port, 1234);
        assert_eq!(config.stale_age, Duration::from_secs(300));
        assert_eq!(config.leader.probe_interval, Duration::from_secs(30));
        assert_eq!(config.leader.routers_per_round, 5);
        assert!(!config.suppression.enabled);
        assert_eq!(config.suppression.window, Duration::from_secs(35));
    }

    #[test]
    fn test_config_from_json() {
        let json = serde_json::json!({
            "port": 4000,
            "stale_age": { "secs": 120, "nanos": 0 },
            "leader": {
                "probe_interval": { "secs": 10, "nanos": 0 },
                "routers_per_round": 2,
                "probe_recency": { "secs": 20, "nanos": 0 }
            },
            "suppression": { "enabled": true, "window": { "secs": 35, "nanos": 0 } },
            "topology_query_interval": { "secs": 60, "nanos": 0 },
            "mirror_leader_data": true,
            "border_router_prefix": "2001:db8::/64"
        });
        let config: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.leader.routers_per_round, 2);
        assert!(config.suppression.enabled);
        assert!(config.mirror_leader_data);
    }
}
