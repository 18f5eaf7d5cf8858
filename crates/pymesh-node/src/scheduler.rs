//! Background tick task
//!
//! Calls [`MeshOrchestrator::tick`] on a fixed interval until told to stop.
//! The stop signal is only checked between ticks, so a tick that has started
//! always runs to completion.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::orchestrator::MeshOrchestrator;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodic driver for one node
pub struct TickScheduler {
    node: MeshOrchestrator,
    interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
    ticks: u64,
}

impl TickScheduler {
    pub fn new(
        node: MeshOrchestrator,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            node,
            interval: interval.max(MIN_INTERVAL),
            shutdown_rx,
            ticks: 0,
        }
    }

    /// Spawn the scheduler as a background task
    pub fn spawn(
        node: MeshOrchestrator,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(node, interval, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs_f32(), "Tick scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(ticks = self.ticks, "Tick scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.ticks += 1;
                    let report = self.node.tick().await;
                    if report.restarted {
                        debug!(tick = self.ticks, "Node restarted by watchdog");
                    }
                }
            }
        }
    }
}
