//! Router-side copy of the leader's mesh views
//!
//! Non-leader routers cannot compute the mesh-wide views themselves. They
//! ask the leader periodically and keep the last answer of each kind here.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use pymesh_core::{
    Connection, LeaderData, LookupError, Mac, MacDetails, NodeInfo, topology_mac,
};

#[derive(Debug, Clone)]
struct CachedDetails {
    info: Option<NodeInfo>,
    fetched_at: Instant,
}

/// Outcome of a cached per-mac lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedLookup {
    /// Fresh answer from the leader
    Hit(Result<NodeInfo, LookupError>),
    /// Answer exists but is older than the refresh window
    Expired(Duration),
    /// Never asked
    Miss,
}

#[derive(Debug, Default)]
pub struct TopologyCache {
    macs: BTreeSet<Mac>,
    connections: Vec<Connection>,
    details: HashMap<Mac, CachedDetails>,
    leader_data: Option<LeaderData>,
    last_query: Option<Instant>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh round is due
    pub fn query_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_query
            .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }

    pub fn mark_queried(&mut self, now: Instant) {
        self.last_query = Some(now);
    }

    pub fn set_macs(&mut self, macs: Vec<Mac>) {
        self.macs = macs.into_iter().collect();
    }

    pub fn macs(&self) -> &BTreeSet<Mac> {
        &self.macs
    }

    pub fn set_connections(&mut self, connections: Vec<Connection>) {
        self.connections = connections;
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn set_details(&mut self, details: MacDetails, now: Instant) {
        self.details.insert(
            topology_mac(details.mac),
            CachedDetails {
                info: details.info,
                fetched_at: now,
            },
        );
    }

    /// Look up cached details for one node
    ///
    /// Answers older than `max_age` are dropped once reported, so the table
    /// only holds macs asked about within the last window.
    pub fn details(&mut self, mac: Mac, now: Instant, max_age: Duration) -> CachedLookup {
        let key = topology_mac(mac);
        let lookup = match self.details.get(&key) {
            None => CachedLookup::Miss,
            Some(cached) if now.saturating_duration_since(cached.fetched_at) > max_age => {
                CachedLookup::Expired(now.saturating_duration_since(cached.fetched_at))
            }
            Some(cached) => {
                CachedLookup::Hit(cached.info.clone().ok_or(LookupError::NotFound(mac)))
            }
        };
        self.details
            .retain(|_, cached| now.saturating_duration_since(cached.fetched_at) <= max_age);
        lookup
    }

    pub fn details_len(&self) -> usize {
        self.details.len()
    }

    pub fn set_leader_data(&mut self, data: LeaderData) {
        self.leader_data = Some(data);
    }

    pub fn leader_data(&self) -> Option<&LeaderData> {
        self.leader_data.as_ref()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use pymesh_core::NodeRole;

    use super::*;

    fn info(mac: Mac) -> NodeInfo {
        NodeInfo {
            mac,
            rloc16: 0x0400,
            role: NodeRole::Router,
            age_secs: 3,
            neighbors: Vec::new(),
        }
    }

    #[test]
    fn test_query_due() {
        let mut cache = TopologyCache::new();
        let t0 = Instant::now();
        let interval = Duration::from_secs(60);

        assert!(cache.query_due(t0, interval));
        cache.mark_queried(t0);
        assert!(!cache.query_due(t0 + Duration::from_secs(59), interval));
        assert!(cache.query_due(t0 + Duration::from_secs(60), interval));
    }

    #[test]
    fn test_details_lookup() {
        let mut cache = TopologyCache::new();
        let t0 = Instant::now();
        let max_age = Duration::from_secs(60);

        assert_eq!(cache.details(0x10, t0, max_age), CachedLookup::Miss);

        cache.set_details(MacDetails { mac: 0x10, info: Some(info(0x10)) }, t0);
        cache.set_details(MacDetails { mac: 0x11, info: None }, t0);

        assert_eq!(cache.details(0x10, t0, max_age), CachedLookup::Hit(Ok(info(0x10))));
        assert_eq!(
            cache.details(0x11, t0, max_age),
            CachedLookup::Hit(Err(LookupError::NotFound(0x11)))
        );
        assert_eq!(
            cache.details(0x10, t0 + Duration::from_secs(61), max_age),
            CachedLookup::Expired(Duration::from_secs(61))
        );
    }

    #[test]
    fn test_expired_details_are_dropped() {
        let mut cache = TopologyCache::new();
        let t0 = Instant::now();
        let max_age = Duration::from_secs(60);

        for mac in 0x100..0x140 {
            cache.set_details(MacDetails { mac, info: None }, t0);
        }
        assert_eq!(cache.details_len(), 0x40);

        let later = t0 + Duration::from_secs(61);
        assert_eq!(
            cache.details(0x100, later, max_age),
            CachedLookup::Expired(Duration::from_secs(61))
        );
        assert_eq!(cache.details_len(), 0);
        assert_eq!(cache.details(0x100, later, max_age), CachedLookup::Miss);
    }

    #[test]
    fn test_details_keyed_by_topology_width() {
        let mut cache = TopologyCache::new();
        let t0 = Instant::now();
        let max_age = Duration::from_secs(60);
        let wide: Mac = 0x70b3_d549_9000_0021;

        cache.set_details(MacDetails { mac: wide, info: Some(info(0x21)) }, t0);
        assert_eq!(cache.details(0x21, t0, max_age), CachedLookup::Hit(Ok(info(0x21))));
        assert_eq!(cache.details(wide, t0, max_age), CachedLookup::Hit(Ok(info(0x21))));
    }

    #[test]
    fn test_macs_dedup() {
        let mut cache = TopologyCache::new();
        cache.set_macs(vec![3, 1, 3, 2]);
        assert_eq!(cache.macs().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
