//! Boundary to the underlying mesh radio stack
//!
//! The [`MeshTransport`] trait is everything the protocol layer needs from
//! the Thread-like stack underneath it: role and table queries, address
//! resolution, border-router configuration and a datagram socket bound to
//! the application port. Routing itself stays inside the stack.
//!
//! ## Implementations
//!
//! - [`MockMeshTransport`](crate::MockMeshTransport): in-memory mesh for tests
//!   and simulation
//! - radio bindings live outside this workspace

use std::net::{Ipv6Addr, SocketAddrV6};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::addr::{Mac, NodeAddr};
use crate::error::TransportError;
use crate::topology::NodeRole;

/// One row of the stack's neighbor table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub mac: Mac,
    /// Seconds since the neighbor was last heard
    pub age: u32,
    pub rloc16: u16,
    pub role: NodeRole,
    pub rssi: i8,
}

/// One row of the stack's router table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterEntry {
    pub mac: Mac,
    pub rloc16: u16,
    pub id: u8,
    pub path_cost: u8,
    pub age: u32,
}

/// Identity of the current partition leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub mac: Mac,
    pub rloc16: u16,
    pub partition_id: u32,
}

/// A border router advertised in the network data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderRouterInfo {
    pub rloc16: u16,
    pub net_prefix: String,
    pub priority: i8,
}

/// A datagram received on the application socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub source: SocketAddrV6,
    pub data: Vec<u8>,
}

/// Mesh stack contract consumed by the protocol engine
///
/// Query methods are synchronous snapshots of stack state. Datagram I/O is
/// async; `try_recv` never waits and returns `Ok(None)` once the socket is
/// drained.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Role the stack currently holds
    fn current_role(&self) -> NodeRole;

    /// Whether this node is a leader that has never seen another router
    fn is_single_leader(&self) -> bool;

    /// This node's hardware address
    fn own_mac(&self) -> Mac;

    /// This node's RLOC16
    fn own_short_address(&self) -> u16;

    /// Snapshot of the neighbor table
    fn neighbor_table(&self) -> Vec<NeighborEntry>;

    /// Snapshot of the router table
    fn router_table(&self) -> Vec<RouterEntry>;

    /// Current leader, if attached to a partition
    fn leader_info(&self) -> Option<LeaderInfo>;

    /// Unicast addresses configured on the mesh interface
    fn unicast_addresses(&self) -> Vec<Ipv6Addr>;

    /// Resolve a node reference to a routable address
    fn resolve(&self, target: NodeAddr) -> Option<Ipv6Addr>;

    /// Subscribe to a multicast group
    fn join_multicast(&self, group: Ipv6Addr, key: &[u8]) -> Result<(), TransportError>;

    /// Enable or disable border-router advertisement for a prefix
    fn border_router(
        &self,
        enable: bool,
        net_prefix: &str,
        priority: i8,
    ) -> Result<(), TransportError>;

    /// Border routers currently advertised in the partition
    fn border_routers(&self) -> Vec<BorderRouterInfo> {
        Vec::new()
    }

    /// Bind the application socket; receive calls fail until this is done
    fn bind(&self, port: u16) -> Result<(), TransportError>;

    /// Send a datagram
    async fn send_to(&self, dest: SocketAddrV6, data: Vec<u8>) -> Result<(), TransportError>;

    /// Receive one pending datagram without waiting
    async fn try_recv(&self) -> Result<Option<Datagram>, TransportError>;

    /// Power the radio down; sends fail until [`resume`](Self::resume)
    fn suspend(&self);

    /// Power the radio back up with the given transmit power
    fn resume(&self, tx_power: u8);

    /// Whether the node is attached to a partition
    fn is_connected(&self) -> bool {
        matches!(
            self.current_role(),
            NodeRole::Child | NodeRole::Router | NodeRole::Leader | NodeRole::LeaderSingle
        )
    }
}
