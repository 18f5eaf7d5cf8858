//! Configuration for a Pymesh node

use std::time::Duration;

use pymesh_messaging::MeshagingConfig;
use pymesh_protocol::EngineConfig;
use pymesh_stats::StatsConfig;
use serde::{Deserialize, Serialize};

/// Default interval between protocol ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Default dwell before a lone leader restarts
pub const DEFAULT_SINGLE_LEADER_DWELL: Duration = Duration::from_secs(180);

/// Default radio transmit power
pub const DEFAULT_TX_POWER: u8 = 14;

/// Single-leader watchdog settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// How long the lone-leader condition must hold before a restart
    pub dwell: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dwell: DEFAULT_SINGLE_LEADER_DWELL,
        }
    }
}

impl WatchdogConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }
}

/// Configuration for a [`MeshOrchestrator`](crate::MeshOrchestrator)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub tick_interval: Duration,
    /// Transmit power used when the radio is brought back up
    pub tx_power: u8,
    pub engine: EngineConfig,
    pub messaging: MeshagingConfig,
    pub stats: StatsConfig,
    pub watchdog: WatchdogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            tx_power: DEFAULT_TX_POWER,
            engine: EngineConfig::default(),
            messaging: MeshagingConfig::default(),
            stats: StatsConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults with statistics kept in memory
    pub fn in_memory() -> Self {
        Self::default().with_stats(StatsConfig::in_memory())
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_tx_power(mut self, tx_power: u8) -> Self {
        self.tx_power = tx_power;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_messaging(mut self, messaging: MeshagingConfig) -> Self {
        self.messaging = messaging;
        self
    }

    pub fn with_stats(mut self, stats: StatsConfig) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }
}
