//! In-memory mesh for tests and simulation
//!
//! A [`MockMesh`] plays the role of the radio stack for any number of
//! nodes: it owns their role, neighbor and router tables and routes
//! datagrams between their application sockets by mesh-local address.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pymesh_core::{MockMesh, NodeRole};
//!
//! let mesh = MockMesh::new();
//! let leader = mesh.add_node(0x11, 0x0400);
//! let router = mesh.add_node(0x12, 0x0800);
//! mesh.connect(0x11, 0x12, -60);
//! router.set_role(NodeRole::Router);
//! mesh.elect_leader(0x11);
//! ```

use std::collections::VecDeque;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::addr::{LEADER_ALOC16, MESH_PORT, Mac, NodeAddr, mac_of, mesh_local_eid, rloc16_of, rloc_address};
use crate::error::TransportError;
use crate::topology::NodeRole;
use crate::transport::{
    BorderRouterInfo, Datagram, LeaderInfo, MeshTransport, NeighborEntry, RouterEntry,
};

#[derive(Debug)]
struct MockNodeState {
    rloc16: u16,
    role: NodeRole,
    single_leader: bool,
    neighbors: Vec<NeighborEntry>,
    routers: Vec<RouterEntry>,
    leader: Option<LeaderInfo>,
    bound_port: Option<u16>,
    suspended: bool,
    tx_power: u8,
    multicast: Vec<Ipv6Addr>,
    border_router: Option<BorderRouterInfo>,
    drop_outbound: bool,
    sent: Vec<(SocketAddrV6, Vec<u8>)>,
}

impl MockNodeState {
    fn new(rloc16: u16) -> Self {
        Self {
            rloc16,
            role: NodeRole::Detached,
            single_leader: false,
            neighbors: Vec::new(),
            routers: Vec::new(),
            leader: None,
            bound_port: None,
            suspended: false,
            tx_power: 14,
            multicast: Vec::new(),
            border_router: None,
            drop_outbound: false,
            sent: Vec::new(),
        }
    }

    fn attached(&self) -> bool {
        !self.suspended && !matches!(self.role, NodeRole::Disabled | NodeRole::Detached)
    }
}

#[derive(Debug)]
struct MockNode {
    state: RwLock<MockNodeState>,
    inbox: Mutex<VecDeque<Datagram>>,
}

#[derive(Debug, Default)]
struct MockMeshInner {
    nodes: DashMap<Mac, Arc<MockNode>>,
    rloc_index: DashMap<u16, Mac>,
    leader: RwLock<Option<Mac>>,
}

impl MockMeshInner {
    fn node(&self, mac: Mac) -> Option<Arc<MockNode>> {
        self.nodes.get(&mac).map(|n| Arc::clone(n.value()))
    }

    /// Map a destination address onto a node mac
    fn route(&self, addr: &Ipv6Addr) -> Option<Mac> {
        if let Some(rloc16) = rloc16_of(addr) {
            if rloc16 == LEADER_ALOC16 {
                return *self.leader.read();
            }
            return self.rloc_index.get(&rloc16).map(|m| *m.value());
        }
        mac_of(addr).filter(|mac| self.nodes.contains_key(mac))
    }
}

/// A simulated mesh partition
#[derive(Debug, Clone, Default)]
pub struct MockMesh {
    inner: Arc<MockMeshInner>,
}

impl MockMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detached node and return its transport
    pub fn add_node(&self, mac: Mac, rloc16: u16) -> Arc<MockMeshTransport> {
        let node = Arc::new(MockNode {
            state: RwLock::new(MockNodeState::new(rloc16)),
            inbox: Mutex::new(VecDeque::new()),
        });
        self.inner.nodes.insert(mac, Arc::clone(&node));
        self.inner.rloc_index.insert(rloc16, mac);
        Arc::new(MockMeshTransport {
            mac,
            node,
            mesh: Arc::clone(&self.inner),
        })
    }

    /// Transport handle for an existing node
    pub fn transport(&self, mac: Mac) -> Option<Arc<MockMeshTransport>> {
        self.inner.node(mac).map(|node| {
            Arc::new(MockMeshTransport {
                mac,
                node,
                mesh: Arc::clone(&self.inner),
            })
        })
    }

    /// Remove a node entirely (power loss)
    pub fn remove_node(&self, mac: Mac) {
        if let Some((_, node)) = self.inner.nodes.remove(&mac) {
            self.inner.rloc_index.remove(&node.state.read().rloc16);
        }
        for entry in self.inner.nodes.iter() {
            entry.state.write().neighbors.retain(|n| n.mac != mac);
        }
        self.refresh_tables();
    }

    /// Make two nodes radio neighbors
    pub fn connect(&self, a: Mac, b: Mac, rssi: i8) {
        let (Some(node_a), Some(node_b)) = (self.inner.node(a), self.inner.node(b)) else {
            return;
        };
        Self::add_neighbor(&node_a, b, &node_b, rssi);
        Self::add_neighbor(&node_b, a, &node_a, rssi);
    }

    fn add_neighbor(node: &MockNode, peer_mac: Mac, peer: &MockNode, rssi: i8) {
        let (rloc16, role) = {
            let peer_state = peer.state.read();
            (peer_state.rloc16, peer_state.role)
        };
        let mut state = node.state.write();
        state.neighbors.retain(|n| n.mac != peer_mac);
        state.neighbors.push(NeighborEntry {
            mac: peer_mac,
            age: 0,
            rloc16,
            role,
            rssi,
        });
    }

    /// Break the radio link between two nodes
    pub fn disconnect(&self, a: Mac, b: Mac) {
        if let Some(node) = self.inner.node(a) {
            node.state.write().neighbors.retain(|n| n.mac != b);
        }
        if let Some(node) = self.inner.node(b) {
            node.state.write().neighbors.retain(|n| n.mac != a);
        }
    }

    /// Age every neighbor entry by `secs`
    pub fn age_neighbors(&self, secs: u32) {
        for entry in self.inner.nodes.iter() {
            for neighbor in entry.state.write().neighbors.iter_mut() {
                neighbor.age = neighbor.age.saturating_add(secs);
            }
        }
    }

    /// Give `mac` the leader role and attach every node to its partition
    pub fn elect_leader(&self, mac: Mac) {
        for entry in self.inner.nodes.iter() {
            let mut state = entry.state.write();
            if *entry.key() == mac {
                state.role = NodeRole::Leader;
            } else if state.role.is_leader() {
                state.role = NodeRole::Router;
            }
        }
        *self.inner.leader.write() = Some(mac);
        self.refresh_tables();
    }

    /// Recompute router tables, leader info, single-leader flags and the
    /// roles recorded in neighbor rows
    pub fn refresh_tables(&self) {
        let leader = *self.inner.leader.read();
        let snapshot: Vec<(Mac, u16, NodeRole)> = self
            .inner
            .nodes
            .iter()
            .map(|entry| {
                let state = entry.state.read();
                (*entry.key(), state.rloc16, state.role)
            })
            .collect();

        let routers: Vec<RouterEntry> = snapshot
            .iter()
            .filter(|(_, _, role)| role.is_router())
            .enumerate()
            .map(|(i, (mac, rloc16, _))| RouterEntry {
                mac: *mac,
                rloc16: *rloc16,
                id: i as u8,
                path_cost: 1,
                age: 0,
            })
            .collect();

        let leader_info = leader.and_then(|lm| {
            snapshot
                .iter()
                .find(|(mac, _, _)| *mac == lm)
                .map(|(mac, rloc16, _)| LeaderInfo {
                    mac: *mac,
                    rloc16: *rloc16,
                    partition_id: 0x5eed_0001,
                })
        });

        for entry in self.inner.nodes.iter() {
            let mac = *entry.key();
            let mut state = entry.state.write();
            state.routers = routers.iter().filter(|r| r.mac != mac).copied().collect();
            state.leader = if state.role == NodeRole::Detached || state.role == NodeRole::Disabled {
                None
            } else {
                leader_info
            };
            state.single_leader = state.role.is_leader() && state.routers.is_empty();
            for neighbor in state.neighbors.iter_mut() {
                if let Some((_, rloc16, role)) = snapshot.iter().find(|(m, _, _)| *m == neighbor.mac)
                {
                    neighbor.rloc16 = *rloc16;
                    neighbor.role = *role;
                }
            }
        }
    }
}

/// One node's view of a [`MockMesh`]
#[derive(Debug)]
pub struct MockMeshTransport {
    mac: Mac,
    node: Arc<MockNode>,
    mesh: Arc<MockMeshInner>,
}

impl MockMeshTransport {
    pub fn set_role(&self, role: NodeRole) {
        self.node.state.write().role = role;
    }

    /// Override the single-leader flag computed by the mesh
    pub fn set_single_leader(&self, single: bool) {
        self.node.state.write().single_leader = single;
    }

    pub fn set_neighbors(&self, neighbors: Vec<NeighborEntry>) {
        self.node.state.write().neighbors = neighbors;
    }

    pub fn set_router_table(&self, routers: Vec<RouterEntry>) {
        self.node.state.write().routers = routers;
    }

    pub fn set_leader(&self, leader: Option<LeaderInfo>) {
        self.node.state.write().leader = leader;
    }

    /// Silently lose every outbound datagram
    pub fn set_drop_outbound(&self, drop: bool) {
        self.node.state.write().drop_outbound = drop;
    }

    /// Every datagram this node has sent (including dropped ones)
    pub fn sent(&self) -> Vec<(SocketAddrV6, Vec<u8>)> {
        self.node.state.read().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.node.state.write().sent.clear();
    }

    /// Queue a datagram as if it had arrived from the radio
    pub fn inject(&self, source: SocketAddrV6, data: Vec<u8>) {
        self.node.inbox.lock().push_back(Datagram { source, data });
    }

    /// Datagrams waiting in the socket
    pub fn pending(&self) -> usize {
        self.node.inbox.lock().len()
    }

    pub fn is_bound(&self) -> bool {
        self.node.state.read().bound_port.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.node.state.read().suspended
    }

    pub fn tx_power(&self) -> u8 {
        self.node.state.read().tx_power
    }

    pub fn multicast_groups(&self) -> Vec<Ipv6Addr> {
        self.node.state.read().multicast.clone()
    }

    pub fn border_router_config(&self) -> Option<BorderRouterInfo> {
        self.node.state.read().border_router.clone()
    }

    fn source_addr(&self) -> SocketAddrV6 {
        let port = self.node.state.read().bound_port.unwrap_or(MESH_PORT);
        SocketAddrV6::new(mesh_local_eid(self.mac), port, 0, 0)
    }
}

#[async_trait]
impl MeshTransport for MockMeshTransport {
    fn current_role(&self) -> NodeRole {
        let state = self.node.state.read();
        if state.suspended {
            NodeRole::Disabled
        } else {
            state.role
        }
    }

    fn is_single_leader(&self) -> bool {
        let state = self.node.state.read();
        state.role.is_leader() && state.single_leader
    }

    fn own_mac(&self) -> Mac {
        self.mac
    }

    fn own_short_address(&self) -> u16 {
        self.node.state.read().rloc16
    }

    fn neighbor_table(&self) -> Vec<NeighborEntry> {
        self.node.state.read().neighbors.clone()
    }

    fn router_table(&self) -> Vec<RouterEntry> {
        self.node.state.read().routers.clone()
    }

    fn leader_info(&self) -> Option<LeaderInfo> {
        self.node.state.read().leader
    }

    fn unicast_addresses(&self) -> Vec<Ipv6Addr> {
        let state = self.node.state.read();
        if !state.attached() {
            return Vec::new();
        }
        vec![mesh_local_eid(self.mac), rloc_address(state.rloc16)]
    }

    fn resolve(&self, target: NodeAddr) -> Option<Ipv6Addr> {
        if !self.node.state.read().attached() {
            return None;
        }
        match target {
            NodeAddr::Mac(mac) if self.mesh.nodes.contains_key(&mac) => Some(mesh_local_eid(mac)),
            NodeAddr::Mac(_) => None,
            NodeAddr::Rloc(rloc16) => Some(rloc_address(rloc16)),
        }
    }

    fn join_multicast(&self, group: Ipv6Addr, _key: &[u8]) -> Result<(), TransportError> {
        if !group.is_multicast() {
            return Err(TransportError::Rejected(format!("{} is not multicast", group)));
        }
        let mut state = self.node.state.write();
        if !state.multicast.contains(&group) {
            state.multicast.push(group);
        }
        Ok(())
    }

    fn border_router(
        &self,
        enable: bool,
        net_prefix: &str,
        priority: i8,
    ) -> Result<(), TransportError> {
        let mut state = self.node.state.write();
        state.border_router = enable.then(|| BorderRouterInfo {
            rloc16: state.rloc16,
            net_prefix: net_prefix.to_string(),
            priority,
        });
        Ok(())
    }

    fn border_routers(&self) -> Vec<BorderRouterInfo> {
        self.mesh
            .nodes
            .iter()
            .filter_map(|entry| entry.state.read().border_router.clone())
            .collect()
    }

    fn bind(&self, port: u16) -> Result<(), TransportError> {
        self.node.state.write().bound_port = Some(port);
        Ok(())
    }

    async fn send_to(&self, dest: SocketAddrV6, data: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut state = self.node.state.write();
            if state.suspended {
                return Err(TransportError::Suspended);
            }
            if state.bound_port.is_none() {
                return Err(TransportError::NotBound);
            }
            state.sent.push((dest, data.clone()));
            if state.drop_outbound {
                return Ok(());
            }
        }

        let target = self
            .mesh
            .route(dest.ip())
            .and_then(|mac| self.mesh.node(mac))
            .ok_or_else(|| TransportError::SendFailed(format!("no route to {}", dest.ip())))?;

        {
            let state = target.state.read();
            if state.suspended || state.bound_port != Some(dest.port()) {
                return Err(TransportError::SendFailed(format!(
                    "port {} unreachable on {}",
                    dest.port(),
                    dest.ip()
                )));
            }
        }

        let source = self.source_addr();
        target.inbox.lock().push_back(Datagram { source, data });
        Ok(())
    }

    async fn try_recv(&self) -> Result<Option<Datagram>, TransportError> {
        if self.node.state.read().bound_port.is_none() {
            return Err(TransportError::NotBound);
        }
        Ok(self.node.inbox.lock().pop_front())
    }

    fn suspend(&self) {
        self.node.state.write().suspended = true;
        self.node.inbox.lock().clear();
    }

    fn resume(&self, tx_power: u8) {
        let mut state = self.node.state.write();
        state.suspended = false;
        state.tx_power = tx_power;
    }
}
