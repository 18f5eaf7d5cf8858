//! Topology records exchanged between routers and the leader
//!
//! ## Wire formats (big-endian)
//!
//! ```text
//! NeighborData: [mac:u16][rloc16:u16][role:u8][rssi:i8][age:u8]            (7 bytes)
//! RouterData:   [mac:u16][rloc16:u16][lat:f32][lon:f32][count:u8] + NeighborData*
//! LeaderData:   [mac:u64][rloc16:u16][count:u8] + RouterData*
//! ```
//!
//! 16-bit mac fields carry the low bits of the node mac. Timestamps are
//! node-local receipt times and never travel on the wire, so decoders take
//! the receipt instant explicitly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::addr::{Mac, topology_mac};
use crate::error::{LookupError, WireError};
use crate::transport::NeighborEntry;

/// Age after which neighbors and leader-side router entries are stale
pub const STALE_AGE_SECS: u64 = 300;

/// Default stale window as a duration
pub const STALE_AGE: Duration = Duration::from_secs(STALE_AGE_SECS);

pub(crate) fn need<B: Buf>(buf: &B, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        Err(WireError::Truncated {
            needed,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn count_u8(what: &'static str, count: usize) -> Result<u8, WireError> {
    u8::try_from(count).map_err(|_| WireError::TooManyEntries {
        what,
        count,
        max: u8::MAX as usize,
    })
}

/// Role of a node inside the mesh
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum NodeRole {
    #[default]
    Disabled = 0,
    Detached = 1,
    Child = 2,
    Router = 3,
    Leader = 4,
    /// Leader that has never seen another router
    LeaderSingle = 5,
}

impl NodeRole {
    /// Leader of a partition, alone or not
    pub fn is_leader(&self) -> bool {
        matches!(self, NodeRole::Leader | NodeRole::LeaderSingle)
    }

    /// Takes part in routing (and therefore reports neighbors)
    pub fn is_router(&self) -> bool {
        matches!(
            self,
            NodeRole::Router | NodeRole::Leader | NodeRole::LeaderSingle
        )
    }
}

impl TryFrom<u8> for NodeRole {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Detached),
            2 => Ok(Self::Child),
            3 => Ok(Self::Router),
            4 => Ok(Self::Leader),
            5 => Ok(Self::LeaderSingle),
            _ => Err(WireError::InvalidRole(value)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Disabled => "disabled",
            NodeRole::Detached => "detached",
            NodeRole::Child => "child",
            NodeRole::Router => "router",
            NodeRole::Leader => "leader",
            NodeRole::LeaderSingle => "leader-single",
        };
        f.write_str(name)
    }
}

/// A direct neighbor as seen by one router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborData {
    pub mac: Mac,
    pub rloc16: u16,
    pub role: NodeRole,
    pub rssi: i8,
    /// Seconds since last heard, saturating at 255
    pub age: u8,
}

impl NeighborData {
    /// Packed size in bytes
    pub const PACKED_SIZE: usize = 7;

    /// Convert a stack neighbor row, dropping it if stale
    pub fn from_entry(entry: &NeighborEntry) -> Option<Self> {
        if u64::from(entry.age) > STALE_AGE_SECS {
            return None;
        }
        Some(Self {
            mac: topology_mac(entry.mac),
            rloc16: entry.rloc16,
            role: entry.role,
            rssi: entry.rssi,
            age: entry.age.min(u32::from(u8::MAX)) as u8,
        })
    }

    pub fn pack<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.mac as u16);
        buf.put_u16(self.rloc16);
        buf.put_u8(self.role as u8);
        buf.put_i8(self.rssi);
        buf.put_u8(self.age);
    }

    pub fn unpack<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        need(buf, Self::PACKED_SIZE)?;
        let mac = Mac::from(buf.get_u16());
        let rloc16 = buf.get_u16();
        let role = NodeRole::try_from(buf.get_u8())?;
        let rssi = buf.get_i8();
        let age = buf.get_u8();
        Ok(Self {
            mac,
            rloc16,
            role,
            rssi,
            age,
        })
    }
}

/// GPS position carried in router reports
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoCoord {
    pub lat: f32,
    pub lon: f32,
}

impl GeoCoord {
    pub fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }
}

/// A router's view of its own neighborhood
#[derive(Debug, Clone, PartialEq)]
pub struct RouterData {
    pub mac: Mac,
    pub rloc16: u16,
    pub coord: GeoCoord,
    /// When this record was built or received on this node
    pub timestamp: Instant,
    pub neighbors: BTreeMap<Mac, NeighborData>,
}

impl RouterData {
    /// Fixed part of the packed record
    pub const HEADER_SIZE: usize = 13;

    pub fn new(mac: Mac, rloc16: u16, timestamp: Instant) -> Self {
        Self {
            mac: topology_mac(mac),
            rloc16,
            coord: GeoCoord::default(),
            timestamp,
            neighbors: BTreeMap::new(),
        }
    }

    pub fn with_coord(mut self, coord: GeoCoord) -> Self {
        self.coord = coord;
        self
    }

    pub fn with_neighbors(mut self, neighbors: impl IntoIterator<Item = NeighborData>) -> Self {
        self.neighbors
            .extend(neighbors.into_iter().map(|n| (n.mac, n)));
        self
    }

    /// Build from a stack neighbor table, skipping stale rows
    pub fn from_neighbor_table(
        mac: Mac,
        rloc16: u16,
        coord: GeoCoord,
        table: &[NeighborEntry],
        now: Instant,
    ) -> Self {
        Self::new(mac, rloc16, now)
            .with_coord(coord)
            .with_neighbors(table.iter().filter_map(NeighborData::from_entry))
    }

    /// Routers always report as routers
    pub fn role(&self) -> NodeRole {
        NodeRole::Router
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    pub fn packed_size(&self) -> usize {
        Self::HEADER_SIZE + self.neighbors.len() * NeighborData::PACKED_SIZE
    }

    pub fn pack<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        let count = count_u8("neighbors", self.neighbors.len())?;
        buf.put_u16(self.mac as u16);
        buf.put_u16(self.rloc16);
        buf.put_f32(self.coord.lat);
        buf.put_f32(self.coord.lon);
        buf.put_u8(count);
        for neighbor in self.neighbors.values() {
            neighbor.pack(buf);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(self.packed_size());
        self.pack(&mut buf)?;
        Ok(buf)
    }

    pub fn unpack<B: Buf>(buf: &mut B, received_at: Instant) -> Result<Self, WireError> {
        need(buf, Self::HEADER_SIZE)?;
        let mac = Mac::from(buf.get_u16());
        let rloc16 = buf.get_u16();
        let lat = buf.get_f32();
        let lon = buf.get_f32();
        let count = buf.get_u8() as usize;
        need(buf, count * NeighborData::PACKED_SIZE)?;

        let mut neighbors = BTreeMap::new();
        for _ in 0..count {
            let neighbor = NeighborData::unpack(buf)?;
            neighbors.insert(neighbor.mac, neighbor);
        }

        Ok(Self {
            mac,
            rloc16,
            coord: GeoCoord { lat, lon },
            timestamp: received_at,
            neighbors,
        })
    }

    /// Decode a complete record, rejecting trailing bytes
    pub fn from_bytes(data: &[u8], received_at: Instant) -> Result<Self, WireError> {
        let mut buf = data;
        let router = Self::unpack(&mut buf, received_at)?;
        if !buf.is_empty() {
            return Err(WireError::TrailingBytes(buf.len()));
        }
        Ok(router)
    }
}

/// A direct link between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Lower mac of the pair
    pub a: Mac,
    /// Higher mac of the pair
    pub b: Mac,
    pub rssi: i8,
}

impl Connection {
    pub const PACKED_SIZE: usize = 17;

    /// Normalized link between two macs
    pub fn new(x: Mac, y: Mac, rssi: i8) -> Self {
        Self {
            a: x.min(y),
            b: x.max(y),
            rssi,
        }
    }

    pub fn pack<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.a);
        buf.put_u64(self.b);
        buf.put_i8(self.rssi);
    }

    pub fn unpack<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        need(buf, Self::PACKED_SIZE)?;
        let a = buf.get_u64();
        let b = buf.get_u64();
        let rssi = buf.get_i8();
        Ok(Self::new(a, b, rssi))
    }
}

/// Details about one node, answered from the leader's table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub mac: Mac,
    pub rloc16: u16,
    pub role: NodeRole,
    /// Seconds since the leader last heard about this node
    pub age_secs: u16,
    pub neighbors: Vec<NeighborData>,
}

impl NodeInfo {
    /// Fixed part of the packed body (mac excluded)
    pub const BODY_HEADER_SIZE: usize = 6;

    /// Pack everything except the mac
    pub fn pack_body<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        let count = count_u8("neighbors", self.neighbors.len())?;
        buf.put_u16(self.rloc16);
        buf.put_u8(self.role as u8);
        buf.put_u16(self.age_secs);
        buf.put_u8(count);
        for neighbor in &self.neighbors {
            neighbor.pack(buf);
        }
        Ok(())
    }

    pub fn unpack_body<B: Buf>(mac: Mac, buf: &mut B) -> Result<Self, WireError> {
        need(buf, Self::BODY_HEADER_SIZE)?;
        let rloc16 = buf.get_u16();
        let role = NodeRole::try_from(buf.get_u8())?;
        let age_secs = buf.get_u16();
        let count = buf.get_u8() as usize;
        need(buf, count * NeighborData::PACKED_SIZE)?;
        let neighbors = (0..count)
            .map(|_| NeighborData::unpack(buf))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            mac,
            rloc16,
            role,
            age_secs,
            neighbors,
        })
    }
}

/// The leader's aggregate of all router reports
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderData {
    pub mac: Mac,
    pub rloc16: u16,
    pub routers: BTreeMap<Mac, RouterData>,
}

impl LeaderData {
    /// Fixed part of the packed record
    pub const HEADER_SIZE: usize = 11;

    pub fn new(mac: Mac, rloc16: u16) -> Self {
        Self {
            mac: topology_mac(mac),
            rloc16,
            routers: BTreeMap::new(),
        }
    }

    /// Insert or replace a router report, returning the previous one
    pub fn update_router(&mut self, router: RouterData) -> Option<RouterData> {
        self.routers.insert(router.mac, router)
    }

    pub fn router(&self, mac: Mac) -> Option<&RouterData> {
        self.routers.get(&topology_mac(mac))
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    /// Drop router reports older than `max_age`, returning the purged macs
    pub fn purge_stale(&mut self, now: Instant, max_age: Duration) -> Vec<Mac> {
        let stale: Vec<Mac> = self
            .routers
            .values()
            .filter(|r| r.is_stale(now, max_age))
            .map(|r| r.mac)
            .collect();
        for mac in &stale {
            self.routers.remove(mac);
        }
        stale
    }

    /// Every mac known in the mesh: routers plus their reported neighbors
    pub fn all_macs(&self) -> BTreeSet<Mac> {
        let mut macs = BTreeSet::new();
        for router in self.routers.values() {
            macs.insert(router.mac);
            macs.extend(router.neighbors.keys().copied());
        }
        macs
    }

    /// Every direct link, each pair reported once with the strongest rssi seen
    pub fn connections(&self) -> Vec<Connection> {
        let mut links: BTreeMap<(Mac, Mac), i8> = BTreeMap::new();
        for router in self.routers.values() {
            for neighbor in router.neighbors.values() {
                let link = Connection::new(router.mac, neighbor.mac, neighbor.rssi);
                links
                    .entry((link.a, link.b))
                    .and_modify(|rssi| *rssi = (*rssi).max(link.rssi))
                    .or_insert(link.rssi);
            }
        }
        links
            .into_iter()
            .map(|((a, b), rssi)| Connection { a, b, rssi })
            .collect()
    }

    /// Look up one node
    ///
    /// Routers are answered from their own report. Other nodes are answered
    /// from the freshest neighbor record that mentions them.
    pub fn node_info(
        &self,
        mac: Mac,
        now: Instant,
        max_age: Duration,
    ) -> Result<NodeInfo, LookupError> {
        let mac = topology_mac(mac);
        if let Some(router) = self.routers.get(&mac) {
            let age = router.age(now);
            if age > max_age {
                return Err(LookupError::Stale {
                    mac,
                    age_secs: age.as_secs(),
                });
            }
            let role = if mac == self.mac {
                NodeRole::Leader
            } else {
                NodeRole::Router
            };
            return Ok(NodeInfo {
                mac,
                rloc16: router.rloc16,
                role,
                age_secs: age.as_secs().min(u64::from(u16::MAX)) as u16,
                neighbors: router.neighbors.values().copied().collect(),
            });
        }

        self.routers
            .values()
            .filter(|r| !r.is_stale(now, max_age))
            .filter_map(|r| r.neighbors.get(&mac))
            .min_by_key(|n| n.age)
            .map(|n| NodeInfo {
                mac,
                rloc16: n.rloc16,
                role: n.role,
                age_secs: u16::from(n.age),
                neighbors: Vec::new(),
            })
            .ok_or(LookupError::NotFound(mac))
    }

    /// RLOC16 of a node, if any report mentions it
    pub fn resolve_rloc(&self, mac: Mac) -> Option<u16> {
        let mac = topology_mac(mac);
        if let Some(router) = self.routers.get(&mac) {
            return Some(router.rloc16);
        }
        self.routers
            .values()
            .find_map(|r| r.neighbors.get(&mac).map(|n| n.rloc16))
    }

    pub fn pack<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        let count = count_u8("routers", self.routers.len())?;
        buf.put_u64(self.mac);
        buf.put_u16(self.rloc16);
        buf.put_u8(count);
        for router in self.routers.values() {
            router.pack(buf)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let size = Self::HEADER_SIZE
            + self
                .routers
                .values()
                .map(RouterData::packed_size)
                .sum::<usize>();
        let mut buf = Vec::with_capacity(size);
        self.pack(&mut buf)?;
        Ok(buf)
    }

    pub fn unpack<B: Buf>(buf: &mut B, received_at: Instant) -> Result<Self, WireError> {
        need(buf, Self::HEADER_SIZE)?;
        let mac = topology_mac(buf.get_u64());
        let rloc16 = buf.get_u16();
        let count = buf.get_u8() as usize;

        let mut routers = BTreeMap::new();
        for _ in 0..count {
            let router = RouterData::unpack(buf, received_at)?;
            routers.insert(router.mac, router);
        }

        Ok(Self {
            mac,
            rloc16,
            routers,
        })
    }

    /// Decode a complete record, rejecting trailing bytes
    pub fn from_bytes(data: &[u8], received_at: Instant) -> Result<Self, WireError> {
        let mut buf = data;
        let leader = Self::unpack(&mut buf, received_at)?;
        if !buf.is_empty() {
            return Err(WireError::TrailingBytes(buf.len()));
        }
        Ok(leader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(mac: Mac, rssi: i8, age: u8) -> NeighborData {
        NeighborData {
            mac,
            rloc16: 0x0400 + mac as u16,
            role: NodeRole::Child,
            rssi,
            age,
        }
    }

    fn router(mac: Mac, now: Instant, neighbors: &[NeighborData]) -> RouterData {
        RouterData::new(mac, 0x0800 + mac as u16, now)
            .with_coord(GeoCoord::new(45.5, -73.25))
            .with_neighbors(neighbors.iter().copied())
    }

    #[test]
    fn test_neighbor_roundtrip() {
        let n = NeighborData {
            mac: 0xbeef,
            rloc16: 0x0c01,
            role: NodeRole::Router,
            rssi: -92,
            age: 255,
        };
        let mut buf = Vec::new();
        n.pack(&mut buf);
        assert_eq!(buf.len(), NeighborData::PACKED_SIZE);
        assert_eq!(buf, vec![0xbe, 0xef, 0x0c, 0x01, 3, (-92i8) as u8, 255]);

        let decoded = NeighborData::unpack(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, n);
    }

    #[test]
    fn test_neighbor_from_entry_filters_stale() {
        let mut entry = NeighborEntry {
            mac: 5,
            age: 300,
            rloc16: 0x0405,
            role: NodeRole::Child,
            rssi: -60,
        };
        let kept = NeighborData::from_entry(&entry).unwrap();
        assert_eq!(kept.age, 255);

        entry.age = 301;
        assert!(NeighborData::from_entry(&entry).is_none());
    }

    #[test]
    fn test_invalid_role_rejected() {
        let bytes = [0, 1, 0, 2, 9, 0, 0];
        assert_eq!(
            NeighborData::unpack(&mut &bytes[..]),
            Err(WireError::InvalidRole(9))
        );
    }

    #[test]
    fn test_router_roundtrip() {
        let now = Instant::now();
        let r = router(0x11, now, &[neighbor(0x21, -40, 3), neighbor(0x22, -80, 40)]);

        let bytes = r.to_bytes().unwrap();
        assert_eq!(bytes.len(), RouterData::HEADER_SIZE + 2 * NeighborData::PACKED_SIZE);

        let decoded = RouterData::from_bytes(&bytes, now).unwrap();
        assert_eq!(decoded, r);
        assert_eq!(decoded.role(), NodeRole::Router);
    }

    #[test]
    fn test_router_truncated() {
        let now = Instant::now();
        let r = router(0x11, now, &[neighbor(0x21, -40, 3)]);
        let bytes = r.to_bytes().unwrap();

        let err = RouterData::from_bytes(&bytes[..bytes.len() - 1], now).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn test_router_trailing_bytes() {
        let now = Instant::now();
        let mut bytes = router(0x11, now, &[]).to_bytes().unwrap();
        bytes.push(0);
        assert_eq!(
            RouterData::from_bytes(&bytes, now),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_router_too_many_neighbors() {
        let now = Instant::now();
        let neighbors: Vec<_> = (0..256).map(|m| neighbor(m, -50, 1)).collect();
        let r = router(0x11, now, &neighbors);
        assert!(matches!(
            r.to_bytes(),
            Err(WireError::TooManyEntries { count: 256, .. })
        ));
    }

    #[test]
    fn test_leader_roundtrip() {
        let now = Instant::now();
        let mut leader = LeaderData::new(0x70b3_d549_9000_0001, 0xfc00);
        leader.update_router(router(0x11, now, &[neighbor(0x21, -40, 3)]));
        leader.update_router(router(0x12, now, &[]));

        let bytes = leader.to_bytes().unwrap();
        let decoded = LeaderData::from_bytes(&bytes, now).unwrap();
        assert_eq!(decoded, leader);
    }

    #[test]
    fn test_purge_stale_routers() {
        let start = Instant::now();
        let mut leader = LeaderData::new(1, 0);
        leader.update_router(router(0x11, start, &[]));
        leader.update_router(router(0x12, start + Duration::from_secs(1), &[]));

        let now = start + Duration::from_secs(301);
        let purged = leader.purge_stale(now, STALE_AGE);

        assert_eq!(purged, vec![0x11]);
        assert!(leader.router(0x11).is_none());
        assert!(leader.router(0x12).is_some());
    }

    #[test]
    fn test_all_macs_union_without_duplicates() {
        let now = Instant::now();
        let mut leader = LeaderData::new(1, 0);
        leader.update_router(router(0x11, now, &[neighbor(0x21, -40, 1), neighbor(0x12, -50, 1)]));
        leader.update_router(router(0x12, now, &[neighbor(0x11, -45, 1), neighbor(0x22, -60, 1)]));

        let macs: Vec<Mac> = leader.all_macs().into_iter().collect();
        assert_eq!(macs, vec![0x11, 0x12, 0x21, 0x22]);
    }

    #[test]
    fn test_connections_deduplicated() {
        let now = Instant::now();
        let mut leader = LeaderData::new(1, 0);
        leader.update_router(router(0x11, now, &[neighbor(0x12, -70, 1)]));
        leader.update_router(router(0x12, now, &[neighbor(0x11, -60, 1), neighbor(0x22, -80, 1)]));

        let links = leader.connections();
        assert_eq!(
            links,
            vec![Connection::new(0x11, 0x12, -60), Connection::new(0x12, 0x22, -80)]
        );
    }

    #[test]
    fn test_wide_macs_share_one_key() {
        let now = Instant::now();
        let leader_mac: Mac = 0x70b3_d549_9000_0010;
        let router_mac: Mac = 0x70b3_d549_9000_0020;
        let entry = |mac: Mac, rloc16: u16| NeighborEntry {
            mac,
            age: 2,
            rloc16,
            role: NodeRole::Router,
            rssi: -50,
        };

        // the leader's own report is built locally from full macs
        let own = RouterData::from_neighbor_table(
            leader_mac,
            0x0400,
            GeoCoord::default(),
            &[entry(router_mac, 0x0800)],
            now,
        );
        // the remote report arrives through the wire
        let remote = RouterData::new(router_mac, 0x0800, now)
            .with_neighbors(NeighborData::from_entry(&entry(leader_mac, 0x0400)));
        let remote = RouterData::from_bytes(&remote.to_bytes().unwrap(), now).unwrap();

        let mut leader = LeaderData::new(leader_mac, 0x0400);
        leader.update_router(own);
        leader.update_router(remote);

        let macs: Vec<Mac> = leader.all_macs().into_iter().collect();
        assert_eq!(macs, vec![0x10, 0x20]);
        assert_eq!(leader.connections(), vec![Connection::new(0x10, 0x20, -50)]);

        let info = leader.node_info(leader_mac, now, STALE_AGE).unwrap();
        assert_eq!(info.role, NodeRole::Leader);
        assert_eq!(leader.resolve_rloc(router_mac), Some(0x0800));
        assert!(leader.router(router_mac).is_some());
    }

    #[test]
    fn test_node_info_lookups() {
        let start = Instant::now();
        let mut leader = LeaderData::new(0x11, 0xfc00);
        leader.update_router(router(0x11, start, &[neighbor(0x21, -40, 9)]));
        leader.update_router(router(0x12, start, &[neighbor(0x21, -50, 2)]));

        let info = leader.node_info(0x11, start, STALE_AGE).unwrap();
        assert_eq!(info.role, NodeRole::Leader);
        assert_eq!(info.neighbors.len(), 1);

        let child = leader.node_info(0x21, start, STALE_AGE).unwrap();
        assert_eq!(child.role, NodeRole::Child);
        assert_eq!(child.age_secs, 2);

        assert_eq!(
            leader.node_info(0x99, start, STALE_AGE),
            Err(LookupError::NotFound(0x99))
        );

        let later = start + Duration::from_secs(400);
        assert!(matches!(
            leader.node_info(0x12, later, STALE_AGE),
            Err(LookupError::Stale { mac: 0x12, .. })
        ));
        assert_eq!(
            leader.node_info(0x21, later, STALE_AGE),
            Err(LookupError::NotFound(0x21))
        );
    }

    #[test]
    fn test_resolve_rloc() {
        let now = Instant::now();
        let mut leader = LeaderData::new(1, 0);
        leader.update_router(router(0x11, now, &[neighbor(0x21, -40, 1)]));

        assert_eq!(leader.resolve_rloc(0x11), Some(0x0811));
        assert_eq!(leader.resolve_rloc(0x21), Some(0x0421));
        assert_eq!(leader.resolve_rloc(0x33), None);
    }

    #[test]
    fn test_node_info_body_roundtrip() {
        let info = NodeInfo {
            mac: 0x21,
            rloc16: 0x0421,
            role: NodeRole::Child,
            age_secs: 42,
            neighbors: vec![neighbor(0x11, -40, 1)],
        };
        let mut buf = Vec::new();
        info.pack_body(&mut buf).unwrap();
        let decoded = NodeInfo::unpack_body(0x21, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, info);
    }
}
