//! Pre-defined Pymesh scenarios
//!
//! Each scenario builds a partition, drives it step by step and prints what
//! happened. The returned outcome lets tests check the same run.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use pymesh_core::{Connection, LookupError, Mac, NodeInfo, NodeRole, format_mac};
use pymesh_messaging::ReceivedMessage;
use pymesh_node::{NodeConfig, SendRequest, WatchdogConfig};
use pymesh_stats::{JobState, JobSummary, StatRequest, StatusReport};
use tracing::info;

use crate::simulation::SimMesh;
use crate::topology::Topology;

const MAX_STEPS: u64 = 30;

/// Result of [`run_topology_scenario`]
#[derive(Debug, Clone)]
pub struct TopologyOutcome {
    pub steps: u64,
    pub macs: BTreeSet<Mac>,
    pub connections: Vec<Connection>,
    /// Details for the last child, as seen from a non-leader router
    pub remote_info: Option<NodeInfo>,
}

/// Leader aggregation over a star partition
///
/// Runs until the leader knows every node, then asks a router for a
/// child's details through the leader.
pub async fn run_topology_scenario(routers: usize, children: usize) -> Result<TopologyOutcome> {
    info!(routers, children, "=== Topology scenario ===");
    let topology = Topology::star(routers, children);
    println!("{}", topology.visualize());

    let expected: BTreeSet<Mac> = topology.macs().into_iter().collect();
    let mut sim = SimMesh::new(topology, NodeConfig::in_memory()).await?;
    let leader_mac = sim.leader().unwrap_or(0x10);

    let mut converged = false;
    for _ in 0..MAX_STEPS {
        sim.step().await;
        let Some(leader) = sim.node(leader_mac) else {
            break;
        };
        if leader.mesh_macs().await == expected {
            converged = true;
            break;
        }
    }

    let leader = sim.node(leader_mac).context("leader missing from simulation")?;
    let macs = leader.mesh_macs().await;
    let connections = leader.mesh_connections().await;
    println!(
        "\nLeader {} after {} steps ({}s): {} nodes, {} links{}",
        format_mac(leader_mac),
        sim.steps(),
        sim.elapsed().as_secs(),
        macs.len(),
        connections.len(),
        if converged { "" } else { " (incomplete)" }
    );
    for link in &connections {
        println!("  {} <-> {}  rssi {}", format_mac(link.a), format_mac(link.b), link.rssi);
    }

    let remote_info = remote_lookup(&mut sim, &expected).await;
    if let Some(info) = &remote_info {
        println!(
            "\nRouter view of {}: {} at {:#06x}, {} neighbors",
            format_mac(info.mac),
            info.role,
            info.rloc16,
            info.neighbors.len()
        );
    }

    Ok(TopologyOutcome {
        steps: sim.steps(),
        macs,
        connections,
        remote_info,
    })
}

/// Ask a non-leader router about the highest child mac, stepping until the
/// leader's answer arrives
async fn remote_lookup(sim: &mut SimMesh, macs: &BTreeSet<Mac>) -> Option<NodeInfo> {
    let asker = sim
        .topology()
        .nodes
        .iter()
        .find(|n| n.role == NodeRole::Router && Some(n.mac) != sim.leader())?
        .mac;
    let target = sim
        .topology()
        .nodes
        .iter()
        .filter(|n| n.role == NodeRole::Child && macs.contains(&n.mac))
        .map(|n| n.mac)
        .max()?;

    for _ in 0..3 {
        let node = sim.node(asker)?;
        match node.get_node_info(target).await {
            Ok(info) => return Some(info),
            Err(LookupError::NotFound(_) | LookupError::Stale { .. }) => {
                sim.step().await;
            }
        }
    }
    None
}

/// Result of [`run_message_scenario`]
#[derive(Debug, Clone)]
pub struct MessageOutcome {
    pub acked: bool,
    pub steps: u64,
    pub received: Option<ReceivedMessage>,
}

/// One application message and its ACK between two nodes of a star
pub async fn run_message_scenario(from: Mac, to: Mac, payload: &str) -> Result<MessageOutcome> {
    info!(from = %format_mac(from), to = %format_mac(to), "=== Message scenario ===");
    let mut sim = SimMesh::new(Topology::star(3, 1), NodeConfig::in_memory()).await?;
    sim.step().await;

    let sender = sim.node(from).context("sender missing from simulation")?.clone();
    let receiver = sim.node(to).context("receiver missing from simulation")?.clone();
    let id = 1;
    let queued = sender
        .send_message(SendRequest::new(to, id, payload.as_bytes().to_vec()))
        .await;
    println!("{} -> {}: {:?} (queued: {})", format_mac(from), format_mac(to), payload, queued);

    let mut acked = false;
    for _ in 0..5 {
        sim.step().await;
        if sender.message_was_ack(to, id).await {
            acked = true;
            break;
        }
    }

    let received = receiver.get_received_message().await;
    match &received {
        Some(message) => println!(
            "{} received {:?} from {}",
            format_mac(to),
            String::from_utf8_lossy(&message.payload),
            format_mac(message.mac)
        ),
        None => println!("{} received nothing", format_mac(to)),
    }
    println!("ACK: {}", if acked { "yes" } else { "no" });

    Ok(MessageOutcome {
        acked,
        steps: sim.steps(),
        received,
    })
}

/// Probe reliability from one router to the leader
pub async fn run_stats_scenario(repetitions: u16, period_secs: u32) -> Result<JobSummary> {
    info!(repetitions, period_secs, "=== Statistics scenario ===");
    let mut sim = SimMesh::new(Topology::star(2, 0), NodeConfig::in_memory()).await?;
    sim.step().await;

    let prober = sim.node(0x20).context("prober missing from simulation")?.clone();
    let id = prober
        .statistics_start(StatRequest::new(0x10, repetitions, period_secs))
        .await?;

    let max_steps = u64::from(repetitions) * 2 + 5;
    let mut summary = None;
    for _ in 0..max_steps {
        sim.step().await;
        if let StatusReport::Job(job) = prober.statistics_get(id).await? {
            let done = job.state == JobState::Done;
            summary = Some(job);
            if done {
                break;
            }
        }
    }

    let summary = summary.context("job never reported")?;
    println!(
        "Job {}: {}/{} acked ({:.0}%), {:?}",
        summary.id,
        summary.acked,
        summary.sent,
        summary.success_rate * 100.0,
        summary.state
    );
    Ok(summary)
}

/// Result of [`run_watchdog_scenario`]
#[derive(Debug, Clone, Copy)]
pub struct WatchdogOutcome {
    /// Simulated time until the first restart
    pub restarted_after: Option<Duration>,
    pub restarts: u64,
}

/// A leader alone in its partition restarts after the dwell time
pub async fn run_watchdog_scenario(dwell: Duration) -> Result<WatchdogOutcome> {
    info!(dwell_secs = dwell.as_secs(), "=== Watchdog scenario ===");
    let config = NodeConfig::in_memory().with_watchdog(WatchdogConfig::default().with_dwell(dwell));
    let mut sim = SimMesh::new(Topology::line(1), config).await?;
    let max_steps = dwell.as_secs() / sim_tick_secs() + 5;

    let mut restarted_after = None;
    for _ in 0..max_steps {
        let elapsed = sim.elapsed();
        let reports = sim.step().await;
        if reports.values().any(|report| report.restarted) {
            restarted_after = Some(elapsed);
            break;
        }
    }

    let restarts = match sim.node(0x10) {
        Some(node) => node.restarts().await,
        None => 0,
    };
    match restarted_after {
        Some(after) => println!("Lone leader restarted after {}s", after.as_secs()),
        None => println!("No restart within {} steps", sim.steps()),
    }
    Ok(WatchdogOutcome {
        restarted_after,
        restarts,
    })
}

fn sim_tick_secs() -> u64 {
    NodeConfig::default().tick_interval.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topology_scenario_converges() {
        let outcome = run_topology_scenario(3, 2).await.unwrap();
        let expected: BTreeSet<Mac> = Topology::star(3, 2).macs().into_iter().collect();
        assert_eq!(outcome.macs, expected);
        assert_eq!(outcome.connections.len(), 8);
        let info = outcome.remote_info.unwrap();
        assert_eq!(info.mac, 0x32);
        assert_eq!(info.role, NodeRole::Child);
    }

    #[tokio::test]
    async fn test_message_scenario_acks() {
        let outcome = run_message_scenario(0x21, 0x30, "hello").await.unwrap();
        assert!(outcome.acked);
        let received = outcome.received.unwrap();
        assert_eq!(received.mac, 0x21);
        assert_eq!(received.payload, b"hello");
    }

    #[tokio::test]
    async fn test_stats_scenario_completes() {
        let summary = run_stats_scenario(3, 10).await.unwrap();
        assert_eq!(summary.state, JobState::Done);
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.acked, 3);
    }

    #[tokio::test]
    async fn test_watchdog_scenario_restarts() {
        let outcome = run_watchdog_scenario(Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcome.restarted_after, Some(Duration::from_secs(60)));
        assert_eq!(outcome.restarts, 1);
    }
}
