//! The protocol state machine
//!
//! [`MeshProtocolEngine`] owns the application socket of one node. Each
//! [`tick`](MeshProtocolEngine::tick) it:
//!
//! 1. picks up the role the stack currently reports
//! 2. binds the socket on the first tick
//! 3. rebuilds this node's [`RouterData`] from the neighbor table
//! 4. drains every pending datagram and dispatches it by packet type
//! 5. runs the duties of its role (leader probe rounds, router topology
//!    queries)
//! 6. emits outbound messages whose address has resolved
//!
//! Nothing here fails the tick. Transport errors and malformed packets are
//! logged and dropped; the next tick tries again.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pymesh_core::{
    AckPacket, BorderRouterHeader, Clock, Connection, GeoCoord, LeaderData, LookupError, Mac,
    MacDetails, MeshTransport, MessagePacket, NodeAddr, NodeInfo, NodeRole, Packet, PacketType,
    RouterData, format_mac, rloc_address, topology_mac,
};
use pymesh_messaging::{Meshaging, MeshagingConfig, MessageKind, ReceivedMessage};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::suppression::SuppressionTable;
use crate::topology_cache::{CachedLookup, TopologyCache};

/// Traffic handed to this node because it is a border router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorderRouterDelivery {
    /// Mesh node that sent the datagram
    pub source: SocketAddrV6,
    /// External destination address
    pub dest: Ipv6Addr,
    /// External destination port
    pub port: u16,
    /// Inner framed packet, header stripped
    pub packet: Vec<u8>,
}

impl BorderRouterDelivery {
    /// Decode the inner packet as a MESSAGE
    pub fn message(&self) -> Option<MessagePacket> {
        match Packet::decode(&self.packet, Instant::now()) {
            Ok(Packet::Message(message)) => Some(message),
            _ => None,
        }
    }
}

/// Called for every datagram addressed outside the mesh
pub type BorderRouterCallback = Box<dyn Fn(BorderRouterDelivery) + Send + Sync>;

/// Running totals for one engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub datagrams_received: u64,
    pub packets_dropped: u64,
    pub packets_sent: u64,
    pub send_failures: u64,
    pub suppressed: u64,
    pub border_router_deliveries: u64,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub role: NodeRole,
    pub datagrams: usize,
    pub probes_sent: usize,
    pub queries_sent: usize,
    pub messages_sent: usize,
}

#[derive(Debug)]
struct LeaderState {
    data: LeaderData,
    last_round: Option<Instant>,
    probed: HashMap<Mac, Instant>,
}

impl LeaderState {
    fn new(mac: Mac, rloc16: u16) -> Self {
        Self {
            data: LeaderData::new(mac, rloc16),
            last_round: None,
            probed: HashMap::new(),
        }
    }

    fn round_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_round
            .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }
}

/// Protocol engine for one node
pub struct MeshProtocolEngine {
    transport: Arc<dyn MeshTransport>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    own_mac: Mac,
    role: NodeRole,
    bound: bool,
    coord: GeoCoord,
    own_data: RouterData,
    leader: Option<LeaderState>,
    cache: TopologyCache,
    messaging: Meshaging,
    suppression: SuppressionTable,
    br_callback: Option<BorderRouterCallback>,
    counters: EngineCounters,
}

impl fmt::Debug for MeshProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshProtocolEngine")
            .field("mac", &format_mac(self.own_mac))
            .field("role", &self.role)
            .field("bound", &self.bound)
            .field("is_leader", &self.leader.is_some())
            .field("border_router", &self.br_callback.is_some())
            .field("counters", &self.counters)
            .finish()
    }
}

impl MeshProtocolEngine {
    pub fn new(
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        messaging: MeshagingConfig,
    ) -> Self {
        let own_mac = transport.own_mac();
        let own_data = RouterData::new(own_mac, transport.own_short_address(), clock.now());
        let suppression = SuppressionTable::new(config.suppression);
        Self {
            transport,
            clock,
            config,
            own_mac,
            role: NodeRole::Disabled,
            bound: false,
            coord: GeoCoord::default(),
            own_data,
            leader: None,
            cache: TopologyCache::new(),
            messaging: Meshaging::new(messaging),
            suppression,
            br_callback: None,
            counters: EngineCounters::default(),
        }
    }

    pub fn own_mac(&self) -> Mac {
        self.own_mac
    }

    /// Role seen on the last tick
    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    pub fn messaging(&self) -> &Meshaging {
        &self.messaging
    }

    pub fn messaging_mut(&mut self) -> &mut Meshaging {
        &mut self.messaging
    }

    /// This node's latest neighborhood report
    pub fn own_router_data(&self) -> &RouterData {
        &self.own_data
    }

    /// Aggregate table, only while this node is the leader
    pub fn leader_data(&self) -> Option<&LeaderData> {
        self.leader.as_ref().map(|state| &state.data)
    }

    /// Last complete table fetched from the leader
    pub fn mirrored_leader_data(&self) -> Option<&LeaderData> {
        self.cache.leader_data()
    }

    /// Position reported in this node's RouterData
    pub fn set_location(&mut self, lat: f32, lon: f32) {
        self.coord = GeoCoord::new(lat, lon);
        self.own_data.coord = self.coord;
    }

    /// Forget all protocol state, as after a reboot
    pub fn reset(&mut self) {
        info!(mac = %format_mac(self.own_mac), "Resetting protocol state");
        self.role = NodeRole::Disabled;
        self.bound = false;
        self.leader = None;
        self.cache.clear();
        self.messaging.clear();
        self.suppression = SuppressionTable::new(self.config.suppression);
    }

    /// Run one round of protocol duties
    pub async fn tick(&mut self) -> TickSummary {
        let now = self.clock.now();
        self.update_role();

        let mut summary = TickSummary {
            role: self.role,
            ..TickSummary::default()
        };

        if !self.ensure_bound() {
            return summary;
        }

        self.refresh_own_data(now);
        summary.datagrams = self.drain_inbound(now).await;

        if self.role.is_leader() {
            summary.probes_sent = self.leader_duties(now).await;
        } else if self.transport.is_connected() {
            summary.queries_sent = self.router_duties(now).await;
        }

        summary.messages_sent = self.flush_outbound().await;
        self.suppression.purge(now);

        trace!(
            role = %summary.role,
            datagrams = summary.datagrams,
            probes = summary.probes_sent,
            messages = summary.messages_sent,
            "Tick complete"
        );
        summary
    }

    fn update_role(&mut self) {
        let role = self.transport.current_role();
        if role != self.role {
            info!(
                mac = %format_mac(self.own_mac),
                from = %self.role,
                to = %role,
                "Role changed"
            );
            self.role = role;
        }

        if role.is_leader() {
            if self.leader.is_none() {
                info!(mac = %format_mac(self.own_mac), "Taking over leader duties");
                self.leader = Some(LeaderState::new(
                    self.own_mac,
                    self.transport.own_short_address(),
                ));
                self.cache.clear();
            }
        } else if self.leader.take().is_some() {
            info!(mac = %format_mac(self.own_mac), "Dropping leader table");
        }
    }

    fn ensure_bound(&mut self) -> bool {
        if self.bound {
            return true;
        }
        match self.transport.bind(self.config.port) {
            Ok(()) => {
                debug!(port = self.config.port, "Bound application socket");
                self.bound = true;
                true
            }
            Err(e) => {
                warn!(port = self.config.port, error = %e, "Bind failed, retrying next tick");
                false
            }
        }
    }

    fn refresh_own_data(&mut self, now: Instant) {
        let rloc16 = self.transport.own_short_address();
        let neighbors = self.transport.neighbor_table();
        self.own_data =
            RouterData::from_neighbor_table(self.own_mac, rloc16, self.coord, &neighbors, now);
        if let Some(state) = self.leader.as_mut() {
            state.data.rloc16 = rloc16;
        }
    }

    async fn drain_inbound(&mut self, now: Instant) -> usize {
        let mut count = 0;
        loop {
            match self.transport.try_recv().await {
                Ok(Some(datagram)) => {
                    count += 1;
                    self.counters.datagrams_received += 1;
                    self.handle_datagram(datagram.source, &datagram.data, now)
                        .await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    break;
                }
            }
        }
        count
    }

    /// Process one inbound datagram
    pub async fn handle_datagram(&mut self, source: SocketAddrV6, data: &[u8], now: Instant) {
        if BorderRouterHeader::matches(data) {
            self.deliver_external(source, data);
            return;
        }

        let packet = match Packet::decode(data, now) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.packets_dropped += 1;
                debug!(from = %source.ip(), len = data.len(), error = %e, "Dropping malformed packet");
                return;
            }
        };

        trace!(from = %source.ip(), packet_type = ?packet.packet_type(), "Dispatching packet");
        self.dispatch(packet, *source.ip(), now).await;
    }

    fn deliver_external(&mut self, source: SocketAddrV6, data: &[u8]) {
        let Some(callback) = &self.br_callback else {
            self.counters.packets_dropped += 1;
            debug!(from = %source.ip(), "Border-router packet but no callback registered");
            return;
        };
        let Some((header, inner)) = BorderRouterHeader::strip(data) else {
            return;
        };
        debug!(
            from = %source.ip(),
            dest = %header.dest,
            port = header.port,
            len = inner.len(),
            "Delivering external packet"
        );
        self.counters.border_router_deliveries += 1;
        callback(BorderRouterDelivery {
            source,
            dest: header.dest,
            port: header.port,
            packet: inner.to_vec(),
        });
    }

    async fn dispatch(&mut self, packet: Packet, from: Ipv6Addr, now: Instant) {
        match packet {
            Packet::Message(message) => {
                // ACK every copy, duplicates included
                let ack = Packet::MessageAck(AckPacket {
                    mac: self.own_mac,
                    id: message.id,
                });
                self.send_packet(ack, from, now).await;
                let received = ReceivedMessage::from_packet(message, self.clock.now_utc());
                self.messaging.add_received(received);
            }
            Packet::MessageAck(ack) => {
                self.messaging.apply_ack(ack);
            }
            Packet::LeaderAskNeighbors => {
                let report = Packet::RouterNeighbors(self.own_data.clone());
                self.send_packet(report, from, now).await;
            }
            Packet::RouterNeighbors(router) => match self.leader.as_mut() {
                Some(state) => {
                    debug!(
                        router = %format_mac(router.mac),
                        neighbors = router.neighbors.len(),
                        "Router report"
                    );
                    state.data.update_router(router);
                }
                None => debug!(router = %format_mac(router.mac), "Ignoring router report, not leader"),
            },
            Packet::RouterAskLeaderData => {
                if let Some(data) = self.leader_data().cloned() {
                    self.send_packet(Packet::LeaderData(data), from, now).await;
                }
            }
            Packet::LeaderData(data) => {
                self.cache.set_macs(data.all_macs().into_iter().collect());
                self.cache.set_connections(data.connections());
                self.cache.set_leader_data(data);
            }
            Packet::RouterAskMacs => {
                if let Some(data) = self.leader_data() {
                    let macs = data.all_macs().into_iter().collect();
                    self.send_packet(Packet::LeaderMacs(macs), from, now).await;
                }
            }
            Packet::LeaderMacs(macs) => self.cache.set_macs(macs),
            Packet::RouterAskConnections => {
                if let Some(data) = self.leader_data() {
                    let links = data.connections();
                    self.send_packet(Packet::LeaderConnections(links), from, now)
                        .await;
                }
            }
            Packet::LeaderConnections(links) => self.cache.set_connections(links),
            Packet::RouterAskMacDetails(mac) => {
                if let Some(data) = self.leader_data() {
                    let info = data.node_info(mac, now, self.config.stale_age).ok();
                    let reply = Packet::LeaderMacDetails(MacDetails { mac, info });
                    self.send_packet(reply, from, now).await;
                }
            }
            Packet::LeaderMacDetails(details) => self.cache.set_details(details, now),
        }
    }

    /// Encode and send one packet; false when suppressed or not sent
    async fn send_packet(&mut self, packet: Packet, dest: Ipv6Addr, now: Instant) -> bool {
        let packet_type = packet.packet_type();
        let suppressible = !matches!(packet_type, PacketType::Message | PacketType::MessageAck);
        if suppressible && !self.suppression.allow(packet_type, dest, now) {
            self.counters.suppressed += 1;
            trace!(packet_type = ?packet_type, dest = %dest, "Suppressed duplicate send");
            return false;
        }

        let data = match packet.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!(packet_type = ?packet_type, error = %e, "Failed to encode packet");
                return false;
            }
        };

        let target = SocketAddrV6::new(dest, self.config.port, 0, 0);
        match self.transport.send_to(target, data).await {
            Ok(()) => {
                self.counters.packets_sent += 1;
                true
            }
            Err(e) => {
                self.counters.send_failures += 1;
                debug!(packet_type = ?packet_type, dest = %dest, error = %e, "Send failed");
                false
            }
        }
    }

    async fn leader_duties(&mut self, now: Instant) -> usize {
        let own_mac = self.own_mac;
        let stale_age = self.config.stale_age;
        let leader_config = self.config.leader;
        let own_report = self.own_data.clone();
        let routers = self.transport.router_table();

        let Some(state) = self.leader.as_mut() else {
            return 0;
        };
        state.data.update_router(own_report);

        if !state.round_due(now, leader_config.probe_interval) {
            return 0;
        }
        state.last_round = Some(now);

        let purged = state.data.purge_stale(now, stale_age);
        if !purged.is_empty() {
            info!(count = purged.len(), "Purged stale router reports");
        }

        state
            .probed
            .retain(|_, at| now.saturating_duration_since(*at) < leader_config.probe_recency);
        let targets: Vec<(Mac, u16)> = routers
            .iter()
            .filter(|r| r.mac != own_mac && !state.probed.contains_key(&r.mac))
            .take(leader_config.routers_per_round)
            .map(|r| (r.mac, r.rloc16))
            .collect();
        for (mac, _) in &targets {
            state.probed.insert(*mac, now);
        }

        let mut sent = 0;
        for (mac, rloc16) in targets {
            let dest = self
                .transport
                .resolve(NodeAddr::Rloc(rloc16))
                .unwrap_or_else(|| rloc_address(rloc16));
            trace!(router = %format_mac(mac), "Asking router for neighbors");
            if self.send_packet(Packet::LeaderAskNeighbors, dest, now).await {
                sent += 1;
            }
        }
        if sent > 0 {
            debug!(probed = sent, "Leader probe round");
        }
        sent
    }

    fn leader_address(&self) -> Option<Ipv6Addr> {
        self.transport
            .leader_info()
            .map(|leader| rloc_address(leader.rloc16))
    }

    async fn router_duties(&mut self, now: Instant) -> usize {
        if !self
            .cache
            .query_due(now, self.config.topology_query_interval)
        {
            return 0;
        }
        let Some(leader) = self.leader_address() else {
            return 0;
        };
        self.cache.mark_queried(now);

        let mut queries = vec![Packet::RouterAskMacs, Packet::RouterAskConnections];
        if self.config.mirror_leader_data {
            queries.push(Packet::RouterAskLeaderData);
        }

        let mut sent = 0;
        for query in queries {
            if self.send_packet(query, leader, now).await {
                sent += 1;
            }
        }
        sent
    }

    /// Ask the leader for its complete table
    pub async fn request_leader_data(&mut self) -> EngineResult<()> {
        let leader = self.leader_address().ok_or(EngineError::NotConnected)?;
        let now = self.clock.now();
        self.send_packet(Packet::RouterAskLeaderData, leader, now)
            .await;
        Ok(())
    }

    /// Every mac known to be in the mesh
    pub fn mesh_macs(&self) -> BTreeSet<Mac> {
        match self.leader_data() {
            Some(data) => data.all_macs(),
            None => self.cache.macs().clone(),
        }
    }

    /// Every direct radio link known in the mesh
    pub fn mesh_connections(&self) -> Vec<Connection> {
        match self.leader_data() {
            Some(data) => data.connections(),
            None => self.cache.connections().to_vec(),
        }
    }

    /// Details about one node
    ///
    /// The leader answers from its own table. Other nodes answer from the
    /// last reply of the leader and ask it again on a miss; the fresh answer
    /// is available after a later tick.
    pub async fn node_info(&mut self, mac: Mac) -> Result<NodeInfo, LookupError> {
        let now = self.clock.now();
        if let Some(data) = self.leader_data() {
            return data.node_info(mac, now, self.config.stale_age);
        }

        if topology_mac(mac) == self.own_data.mac {
            return Ok(NodeInfo {
                mac: self.own_data.mac,
                rloc16: self.own_data.rloc16,
                role: self.role,
                age_secs: 0,
                neighbors: self.own_data.neighbors.values().copied().collect(),
            });
        }

        let error = match self
            .cache
            .details(mac, now, self.config.topology_query_interval)
        {
            CachedLookup::Hit(result) => return result,
            CachedLookup::Expired(age) => LookupError::Stale {
                mac,
                age_secs: age.as_secs(),
            },
            CachedLookup::Miss => LookupError::NotFound(mac),
        };

        if let Some(leader) = self.leader_address() {
            self.send_packet(Packet::RouterAskMacDetails(mac), leader, now)
                .await;
        }
        Err(error)
    }

    /// Queue an application message and try to emit it right away
    pub async fn send_message(&mut self, mac: Mac, payload: Vec<u8>, id: u16) -> bool {
        let queued = self.messaging.send(
            mac,
            MessageKind::Application,
            payload,
            id,
            self.clock.now_utc(),
        );
        if queued {
            let now = self.clock.now();
            self.emit_message(mac, now).await;
        }
        queued
    }

    /// Emit messages that are waiting for an address or due for a retry
    pub async fn flush_outbound(&mut self) -> usize {
        let now = self.clock.now();
        let mut macs = self.messaging.pending_resolution();
        macs.extend(self.messaging.retry_due(now));

        let mut sent = 0;
        for mac in macs {
            if self.emit_message(mac, now).await {
                sent += 1;
            }
        }
        sent
    }

    async fn emit_message(&mut self, mac: Mac, now: Instant) -> bool {
        let Some(message) = self.messaging.outbound(mac) else {
            return false;
        };
        let Some(ip) = message
            .ip
            .or_else(|| self.transport.resolve(NodeAddr::Mac(mac)))
        else {
            trace!(mac = %format_mac(mac), "Destination not resolved yet");
            return false;
        };
        if message.attempts > 0 {
            debug!(mac = %format_mac(mac), id = message.id, attempt = message.attempts + 1, "Re-sending message");
        }
        let packet = Packet::Message(message.to_packet(self.own_mac));

        if self.send_packet(packet, ip, now).await {
            self.messaging.mark_sent(mac, ip, now);
            true
        } else {
            false
        }
    }

    /// Enable or disable border-router service on this node
    ///
    /// While enabled, traffic other nodes address outside the mesh is handed
    /// to `callback` instead of being dispatched.
    pub fn border_router_set(
        &mut self,
        enable: bool,
        priority: i8,
        callback: Option<BorderRouterCallback>,
    ) -> EngineResult<()> {
        self.transport
            .border_router(enable, &self.config.border_router_prefix, priority)?;
        self.br_callback = if enable { callback } else { None };
        info!(
            enable,
            priority,
            prefix = %self.config.border_router_prefix,
            "Border router configured"
        );
        Ok(())
    }

    /// Send a payload to an address outside the mesh through the
    /// highest-priority border router
    pub async fn send_external(
        &mut self,
        dest: Ipv6Addr,
        port: u16,
        payload: Vec<u8>,
        id: u16,
    ) -> EngineResult<()> {
        let border_router = self
            .transport
            .border_routers()
            .into_iter()
            .max_by_key(|br| br.priority)
            .ok_or(EngineError::NoBorderRouter)?;

        let inner = Packet::Message(MessagePacket {
            mac: self.own_mac,
            id,
            payload,
        })
        .encode()?;
        let data = BorderRouterHeader::new(dest, port).wrap(&inner);
        let target = SocketAddrV6::new(rloc_address(border_router.rloc16), self.config.port, 0, 0);

        debug!(
            via = %format!("{:#06x}", border_router.rloc16),
            dest = %dest,
            port,
            "Sending external packet"
        );
        self.transport.send_to(target, data).await?;
        self.counters.packets_sent += 1;
        Ok(())
    }
}
