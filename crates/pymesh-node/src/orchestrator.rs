//! Node orchestrator
//!
//! One [`MeshOrchestrator`] owns the protocol engine, the statistics jobs and
//! the single-leader watchdog for a node. All of that state sits behind one
//! async mutex, so the periodic tick and application calls never interleave.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;

use pymesh_core::{
    Clock, Connection, LeaderData, LookupError, Mac, MeshTransport, NodeInfo, NodeRole,
    SystemClock, format_mac, mesh_local_eid,
};
use pymesh_messaging::ReceivedMessage;
use pymesh_protocol::{BorderRouterCallback, EngineCounters, MeshProtocolEngine, TickSummary};
use pymesh_stats::{StatRequest, Statistics, StatsTick, StatusReport};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::scheduler::TickScheduler;
use crate::watchdog::SingleLeaderWatchdog;

/// Called instead of the default radio power-cycle when the watchdog fires
pub type RestartHook = Box<dyn Fn(&dyn MeshTransport) + Send + Sync>;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Never started, or shut down
    Stopped,
    Running,
    /// Ticks cancelled and radio suspended
    Paused,
}

/// Application message to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub mac: Mac,
    pub id: u16,
    pub payload: Vec<u8>,
}

impl SendRequest {
    pub fn new(mac: Mac, id: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            mac,
            id,
            payload: payload.into(),
        }
    }
}

/// What one orchestrator tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub engine: TickSummary,
    pub stats: StatsTick,
    /// Messages emitted after the statistics step
    pub flushed: usize,
    /// Whether the watchdog restarted the node
    pub restarted: bool,
}

struct NodeState {
    engine: MeshProtocolEngine,
    stats: Statistics,
    watchdog: SingleLeaderWatchdog,
    restart_hook: Option<RestartHook>,
    tx_power: u8,
    restarts: u64,
}

struct Control {
    run_state: RunState,
    shutdown_tx: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    mac: Mac,
    config: NodeConfig,
    transport: Arc<dyn MeshTransport>,
    clock: Arc<dyn Clock>,
    state: Mutex<NodeState>,
    control: Mutex<Control>,
}

/// Coordinator and application facade for one mesh node
#[derive(Clone)]
pub struct MeshOrchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for MeshOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshOrchestrator")
            .field("mac", &format_mac(self.inner.mac))
            .field("tick_interval", &self.inner.config.tick_interval)
            .finish()
    }
}

impl MeshOrchestrator {
    /// Create an orchestrator on the system clock
    pub async fn new(transport: Arc<dyn MeshTransport>, config: NodeConfig) -> NodeResult<Self> {
        Self::with_clock(transport, Arc::new(SystemClock), config).await
    }

    /// Create an orchestrator with an explicit clock
    ///
    /// Statistics jobs left over from a previous run are reloaded here.
    #[instrument(skip_all, fields(mac = %format_mac(transport.own_mac())))]
    pub async fn with_clock(
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
        config: NodeConfig,
    ) -> NodeResult<Self> {
        let mac = transport.own_mac();
        let stats = Statistics::open(config.stats.clone()).await?;
        let engine = MeshProtocolEngine::new(
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.engine.clone(),
            config.messaging,
        );
        let state = NodeState {
            engine,
            stats,
            watchdog: SingleLeaderWatchdog::new(config.watchdog),
            restart_hook: None,
            tx_power: config.tx_power,
            restarts: 0,
        };

        info!(jobs = state.stats.jobs().count(), "Node created");

        Ok(Self {
            inner: Arc::new(Inner {
                mac,
                config,
                transport,
                clock,
                state: Mutex::new(state),
                control: Mutex::new(Control {
                    run_state: RunState::Stopped,
                    shutdown_tx: None,
                    task: None,
                }),
            }),
        })
    }

    pub fn mac(&self) -> Mac {
        self.inner.mac
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub async fn run_state(&self) -> RunState {
        self.inner.control.lock().await.run_state
    }

    /// Replace the watchdog's default radio power-cycle
    pub async fn set_restart_hook(&self, hook: impl Fn(&dyn MeshTransport) + Send + Sync + 'static) {
        self.inner.state.lock().await.restart_hook = Some(Box::new(hook));
    }

    /// Number of watchdog restarts so far
    pub async fn restarts(&self) -> u64 {
        self.inner.state.lock().await.restarts
    }

    /// Start ticking in the background
    #[instrument(skip(self), fields(mac = %format_mac(self.inner.mac)))]
    pub async fn start(&self) -> NodeResult<()> {
        let mut control = self.inner.control.lock().await;
        if control.run_state != RunState::Stopped {
            return Err(NodeError::AlreadyStarted);
        }
        self.spawn_scheduler(&mut control);
        info!("Node started");
        Ok(())
    }

    /// Cancel ticking and power the radio down
    ///
    /// Probes in flight are left where they are.
    #[instrument(skip(self), fields(mac = %format_mac(self.inner.mac)))]
    pub async fn pause(&self) -> NodeResult<()> {
        let mut control = self.inner.control.lock().await;
        if control.run_state != RunState::Running {
            return Err(NodeError::NotStarted);
        }
        Self::stop_scheduler(&mut control).await?;
        self.inner.transport.suspend();
        control.run_state = RunState::Paused;
        info!("Node paused");
        Ok(())
    }

    /// Power the radio back up and start ticking again
    #[instrument(skip(self), fields(mac = %format_mac(self.inner.mac)))]
    pub async fn resume(&self, tx_power: u8) -> NodeResult<()> {
        let mut control = self.inner.control.lock().await;
        match control.run_state {
            RunState::Running => return Err(NodeError::AlreadyStarted),
            RunState::Stopped => return Err(NodeError::NotStarted),
            RunState::Paused => {}
        }
        self.inner.state.lock().await.tx_power = tx_power;
        self.inner.transport.resume(tx_power);
        self.spawn_scheduler(&mut control);
        info!(tx_power, "Node resumed");
        Ok(())
    }

    /// Stop ticking and flush statistics
    #[instrument(skip(self), fields(mac = %format_mac(self.inner.mac)))]
    pub async fn shutdown(&self) -> NodeResult<()> {
        let mut control = self.inner.control.lock().await;
        Self::stop_scheduler(&mut control).await?;
        control.run_state = RunState::Stopped;
        self.inner.state.lock().await.stats.shutdown().await?;
        info!("Node shut down");
        Ok(())
    }

    fn spawn_scheduler(&self, control: &mut Control) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = TickScheduler::spawn(self.clone(), self.inner.config.tick_interval, shutdown_rx);
        control.shutdown_tx = Some(shutdown_tx);
        control.task = Some(task);
        control.run_state = RunState::Running;
    }

    async fn stop_scheduler(control: &mut Control) -> NodeResult<()> {
        if let Some(shutdown_tx) = control.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = control.task.take() {
            task.await?;
        }
        Ok(())
    }

    /// Run one full round of node duties
    ///
    /// Order: protocol duties, statistics probes, a second outbound flush so
    /// new probes leave in the same tick, then the watchdog.
    #[instrument(skip(self), fields(mac = %format_mac(self.inner.mac)))]
    pub async fn tick(&self) -> TickReport {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let engine = state.engine.tick().await;
        let now = self.inner.clock.now();
        let stats = state
            .stats
            .tick(state.engine.messaging_mut(), now, self.inner.clock.now_utc())
            .await;
        let flushed = state.engine.flush_outbound().await;

        let single_leader =
            state.engine.role().is_leader() && self.inner.transport.is_single_leader();
        let restarted = state.watchdog.observe(single_leader, now);
        if restarted {
            self.restart(state).await;
        }

        debug!(
            role = %engine.role,
            probes = stats.probes_queued,
            flushed,
            restarted,
            "Node tick"
        );
        TickReport {
            engine,
            stats,
            flushed,
            restarted,
        }
    }

    async fn restart(&self, state: &mut NodeState) {
        state.restarts += 1;
        warn!(restarts = state.restarts, "Restarting isolated leader");

        let transport = self.inner.transport.as_ref();
        match &state.restart_hook {
            Some(hook) => hook(transport),
            None => {
                transport.suspend();
                transport.resume(state.tx_power);
            }
        }

        state.engine.reset();
        state.watchdog.reset();
        if let Err(e) = state.stats.reload().await {
            warn!(error = %e, "Failed to reload statistics after restart");
        }
    }

    // ---- facade ----

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// This node's mesh-local address
    pub fn ip(&self) -> Option<Ipv6Addr> {
        let addresses = self.inner.transport.unicast_addresses();
        let eid = mesh_local_eid(self.inner.mac);
        if addresses.contains(&eid) {
            Some(eid)
        } else {
            addresses.into_iter().next()
        }
    }

    /// Role seen on the last tick
    pub async fn role(&self) -> NodeRole {
        self.inner.state.lock().await.engine.role()
    }

    pub async fn get_node_info(&self, mac: Mac) -> Result<NodeInfo, LookupError> {
        self.inner.state.lock().await.engine.node_info(mac).await
    }

    pub async fn mesh_macs(&self) -> BTreeSet<Mac> {
        self.inner.state.lock().await.engine.mesh_macs()
    }

    pub async fn mesh_connections(&self) -> Vec<Connection> {
        self.inner.state.lock().await.engine.mesh_connections()
    }

    /// Copy of the aggregate table while this node is the leader
    pub async fn leader_data(&self) -> Option<LeaderData> {
        self.inner.state.lock().await.engine.leader_data().cloned()
    }

    pub async fn counters(&self) -> EngineCounters {
        self.inner.state.lock().await.engine.counters()
    }

    /// Queue an application message; false when the request is malformed
    pub async fn send_message(&self, request: SendRequest) -> bool {
        self.inner
            .state
            .lock()
            .await
            .engine
            .send_message(request.mac, request.payload, request.id)
            .await
    }

    pub async fn message_was_ack(&self, mac: Mac, id: u16) -> bool {
        self.inner
            .state
            .lock()
            .await
            .engine
            .messaging()
            .was_acked(mac, id)
    }

    pub async fn get_received_message(&self) -> Option<ReceivedMessage> {
        self.inner
            .state
            .lock()
            .await
            .engine
            .messaging_mut()
            .take_received()
    }

    /// Start a probe job; returns its id
    pub async fn statistics_start(&self, request: StatRequest) -> NodeResult<u32> {
        let now = self.inner.clock.now_utc();
        let id = self
            .inner
            .state
            .lock()
            .await
            .stats
            .start_job(request, now)
            .await?;
        Ok(id)
    }

    /// Job status, or a sentinel command (see [`pymesh_stats::StatusQuery`])
    pub async fn statistics_get(&self, id: u32) -> NodeResult<StatusReport> {
        let report = self.inner.state.lock().await.stats.status(id).await?;
        Ok(report)
    }

    pub async fn border_router_set(
        &self,
        enable: bool,
        priority: i8,
        callback: Option<BorderRouterCallback>,
    ) -> NodeResult<()> {
        self.inner
            .state
            .lock()
            .await
            .engine
            .border_router_set(enable, priority, callback)?;
        Ok(())
    }

    /// Send a payload outside the mesh through the best border router
    pub async fn send_external(
        &self,
        dest: Ipv6Addr,
        port: u16,
        payload: Vec<u8>,
        id: u16,
    ) -> NodeResult<()> {
        self.inner
            .state
            .lock()
            .await
            .engine
            .send_external(dest, port, payload, id)
            .await?;
        Ok(())
    }

    pub async fn set_location(&self, lat: f32, lon: f32) {
        self.inner.state.lock().await.engine.set_location(lat, lon);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pymesh_core::{ManualClock, MockMesh, MockMeshTransport};
    use pymesh_stats::JobState;

    use super::*;

    async fn node(mesh: &MockMesh, mac: Mac, clock: &Arc<ManualClock>) -> MeshOrchestrator {
        let transport = mesh.transport(mac).unwrap();
        MeshOrchestrator::with_clock(
            transport as Arc<dyn MeshTransport>,
            Arc::clone(clock) as Arc<dyn Clock>,
            NodeConfig::in_memory(),
        )
        .await
        .unwrap()
    }

    fn pair() -> (MockMesh, Arc<MockMeshTransport>, Arc<MockMeshTransport>) {
        let mesh = MockMesh::new();
        let a = mesh.add_node(0x20, 0x0400);
        let b = mesh.add_node(0x10, 0x0800);
        a.set_role(NodeRole::Router);
        b.set_role(NodeRole::Router);
        mesh.connect(0x20, 0x10, -50);
        mesh.elect_leader(0x10);
        (mesh, a, b)
    }

    #[tokio::test]
    async fn test_facade_message_round_trip() {
        let (mesh, _, _) = pair();
        let clock = Arc::new(ManualClock::new());
        let a = node(&mesh, 0x20, &clock).await;
        let b = node(&mesh, 0x10, &clock).await;
        a.tick().await;
        b.tick().await;

        assert!(a.is_connected());
        assert_eq!(a.ip(), Some(mesh_local_eid(0x20)));

        assert!(a.send_message(SendRequest::new(0x10, 7, b"ping".to_vec())).await);
        assert!(!a.send_message(SendRequest::new(0, 8, b"bad".to_vec())).await);
        b.tick().await;
        a.tick().await;

        assert!(a.message_was_ack(0x10, 7).await);
        let received = b.get_received_message().await.unwrap();
        assert_eq!(received.mac, 0x20);
        assert_eq!(received.payload, b"ping");
    }

    #[tokio::test]
    async fn test_statistics_through_facade() {
        let (mesh, _, _) = pair();
        let clock = Arc::new(ManualClock::new());
        let a = node(&mesh, 0x20, &clock).await;
        let b = node(&mesh, 0x10, &clock).await;
        a.tick().await;
        b.tick().await;

        let id = a.statistics_start(StatRequest::new(0x10, 2, 10)).await.unwrap();
        for _ in 0..4 {
            a.tick().await;
            b.tick().await;
        }

        match a.statistics_get(id).await.unwrap() {
            StatusReport::Job(summary) => {
                assert_eq!(summary.state, JobState::Done);
                assert_eq!(summary.sent, 2);
                assert_eq!(summary.acked, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (mesh, a, _) = pair();
        let clock = Arc::new(ManualClock::new());
        let node = node(&mesh, 0x20, &clock).await;
        assert_eq!(node.run_state().await, RunState::Stopped);
        assert!(matches!(node.pause().await, Err(NodeError::NotStarted)));

        node.start().await.unwrap();
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

        node.pause().await.unwrap();
        assert_eq!(node.run_state().await, RunState::Paused);
        assert!(a.is_suspended());
        assert!(!node.is_connected());

        node.resume(20).await.unwrap();
        assert_eq!(node.run_state().await, RunState::Running);
        assert!(!a.is_suspended());
        assert_eq!(a.tx_power(), 20);

        node.shutdown().await.unwrap();
        assert_eq!(node.run_state().await, RunState::Stopped);
    }

    #[tokio::test]
    async fn test_scheduler_ticks_in_background() {
        let (mesh, a, _) = pair();
        let transport = mesh.transport(0x20).unwrap();
        let node = MeshOrchestrator::new(
            transport as Arc<dyn MeshTransport>,
            NodeConfig::in_memory().with_tick_interval(Duration::from_millis(10)),
        )
        .await
        .unwrap();

        assert!(!a.is_bound());
        node.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.is_bound());
        assert_eq!(node.role().await, NodeRole::Router);
        node.shutdown().await.unwrap();
    }
}
