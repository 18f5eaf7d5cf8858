//! Duplicate-send suppression
//!
//! Remembers when each (packet type, destination) pair was last sent and
//! refuses a repeat within the configured window. Switched off by default;
//! when off every send is allowed and nothing is recorded.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::Instant;

use pymesh_core::PacketType;

use crate::config::SuppressionConfig;

#[derive(Debug, Default)]
pub struct SuppressionTable {
    config: SuppressionConfig,
    last_sent: HashMap<(PacketType, Ipv6Addr), Instant>,
}

impl SuppressionTable {
    pub fn new(config: SuppressionConfig) -> Self {
        Self {
            config,
            last_sent: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Check a send and record it if allowed
    pub fn allow(&mut self, packet_type: PacketType, dest: Ipv6Addr, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }
        let key = (packet_type, dest);
        if let Some(last) = self.last_sent.get(&key) {
            if now.saturating_duration_since(*last) < self.config.window {
                return false;
            }
        }
        self.last_sent.insert(key, now);
        true
    }

    /// Forget entries older than the window
    pub fn purge(&mut self, now: Instant) {
        let window = self.config.window;
        self.last_sent
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn addr(last: u16) -> Ipv6Addr {
        Ipv6Addr::new(0xfdde, 0xad00, 0xbeef, 0, 0, 0, 0, last)
    }

    #[test]
    fn test_disabled_allows_everything() {
        let mut table = SuppressionTable::default();
        let now = Instant::now();
        for _ in 0..3 {
            assert!(table.allow(PacketType::LeaderAskNeighbors, addr(1), now));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_window() {
        let mut table = SuppressionTable::new(SuppressionConfig::enabled());
        let t0 = Instant::now();

        assert!(table.allow(PacketType::LeaderAskNeighbors, addr(1), t0));
        assert!(!table.allow(PacketType::LeaderAskNeighbors, addr(1), t0 + Duration::from_secs(34)));
        // different type or destination is independent
        assert!(table.allow(PacketType::RouterAskMacs, addr(1), t0));
        assert!(table.allow(PacketType::LeaderAskNeighbors, addr(2), t0));

        assert!(table.allow(PacketType::LeaderAskNeighbors, addr(1), t0 + Duration::from_secs(35)));
    }

    #[test]
    fn test_purge() {
        let mut table = SuppressionTable::new(SuppressionConfig::enabled());
        let t0 = Instant::now();
        table.allow(PacketType::RouterAskMacs, addr(1), t0);
        table.allow(PacketType::RouterAskMacs, addr(2), t0 + Duration::from_secs(20));

        table.purge(t0 + Duration::from_secs(40));
        assert_eq!(table.len(), 1);
    }
}
