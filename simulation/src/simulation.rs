//! Discrete-time driver for many nodes
//!
//! Every node runs a full [`MeshOrchestrator`] over one shared
//! [`MockMesh`]. A step ticks each node once and then moves the shared clock
//! by one tick interval. The leader ticks last in each step, so its probes
//! find the other nodes already bound.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pymesh_core::{Clock, Mac, ManualClock, MeshTransport, MockMesh, MockMeshTransport};
use pymesh_logging::NodeContextGuard;
use pymesh_node::{MeshOrchestrator, NodeConfig, NodeResult, TickReport};
use tracing::{debug, info};

use crate::topology::Topology;

/// A running simulated partition
pub struct SimMesh {
    mesh: MockMesh,
    clock: Arc<ManualClock>,
    topology: Topology,
    nodes: BTreeMap<Mac, MeshOrchestrator>,
    tick_interval: Duration,
    steps: u64,
}

impl SimMesh {
    /// Build the mock partition and one orchestrator per node
    pub async fn new(topology: Topology, config: NodeConfig) -> NodeResult<Self> {
        let mesh = MockMesh::new();
        for entry in &topology.nodes {
            let transport = mesh.add_node(entry.mac, entry.rloc16);
            transport.set_role(entry.role);
        }
        for link in &topology.links {
            mesh.connect(link.a, link.b, link.rssi);
        }
        match topology.leader {
            Some(leader) => mesh.elect_leader(leader),
            None => mesh.refresh_tables(),
        }

        let clock = Arc::new(ManualClock::new());
        let mut nodes = BTreeMap::new();
        for entry in &topology.nodes {
            let Some(transport) = mesh.transport(entry.mac) else {
                continue;
            };
            let node = MeshOrchestrator::with_clock(
                transport as Arc<dyn MeshTransport>,
                Arc::clone(&clock) as Arc<dyn Clock>,
                config.clone(),
            )
            .await?;
            nodes.insert(entry.mac, node);
        }

        info!(nodes = nodes.len(), leader = ?topology.leader, "Simulation ready");
        Ok(Self {
            mesh,
            clock,
            topology,
            nodes,
            tick_interval: config.tick_interval,
            steps: 0,
        })
    }

    pub fn mesh(&self) -> &MockMesh {
        &self.mesh
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn node(&self, mac: Mac) -> Option<&MeshOrchestrator> {
        self.nodes.get(&mac)
    }

    pub fn transport(&self, mac: Mac) -> Option<Arc<MockMeshTransport>> {
        self.mesh.transport(mac)
    }

    pub fn leader(&self) -> Option<Mac> {
        self.topology.leader
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Simulated time since the start
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Tick every node once, then advance the clock
    pub async fn step(&mut self) -> BTreeMap<Mac, TickReport> {
        self.steps += 1;
        let leader = self.topology.leader;
        let order = self
            .nodes
            .keys()
            .copied()
            .filter(|mac| Some(*mac) != leader)
            .chain(leader.filter(|mac| self.nodes.contains_key(mac)));

        let mut reports = BTreeMap::new();
        for mac in order.collect::<Vec<_>>() {
            let Some(node) = self.nodes.get(&mac) else {
                continue;
            };
            let _ctx = NodeContextGuard::new(mac);
            reports.insert(mac, node.tick().await);
        }

        debug!(step = self.steps, elapsed_secs = self.elapsed().as_secs(), "Step complete");
        self.clock.advance(self.tick_interval);
        reports
    }

    /// Step until `done` holds or `max_steps` have run; returns whether it held
    pub async fn run_until<F>(&mut self, max_steps: u64, mut done: F) -> bool
    where
        F: FnMut(&BTreeMap<Mac, TickReport>) -> bool,
    {
        for _ in 0..max_steps {
            let reports = self.step().await;
            if done(&reports) {
                return true;
            }
        }
        false
    }

    /// Run a fixed number of steps
    pub async fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step().await;
        }
    }

    /// Flush statistics on every node
    pub async fn shutdown(&self) -> NodeResult<()> {
        for node in self.nodes.values() {
            node.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pymesh_core::NodeRole;

    use super::*;

    #[tokio::test]
    async fn test_step_ticks_every_node() {
        let mut sim = SimMesh::new(Topology::star(2, 1), NodeConfig::in_memory())
            .await
            .unwrap();
        let reports = sim.step().await;

        assert_eq!(reports.len(), 4);
        assert_eq!(reports[&0x10].engine.role, NodeRole::Leader);
        assert_eq!(reports[&0x20].engine.role, NodeRole::Router);
        assert_eq!(reports[&0x21].engine.role, NodeRole::Child);
        // the leader ticks after the routers have bound
        assert_eq!(reports[&0x10].engine.probes_sent, 1);
        assert_eq!(sim.elapsed(), Duration::from_secs(10));
    }
}
