//! # Pymesh Node
//!
//! Runs the Pymesh protocol layer for one node.
//!
//! [`MeshOrchestrator`] ties together:
//! - the protocol engine (topology, messages, border-router traffic)
//! - statistics probe jobs
//! - a single-leader watchdog that restarts a leader left alone too long
//!
//! A background [`TickScheduler`] calls [`MeshOrchestrator::tick`] every 10
//! seconds; application calls go through the same lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pymesh_node::{MeshOrchestrator, NodeConfig, SendRequest};
//!
//! let node = MeshOrchestrator::new(transport, NodeConfig::default()).await?;
//! node.start().await?;
//!
//! node.send_message(SendRequest::new(0x10, 1, b"hello".to_vec())).await;
//! if node.message_was_ack(0x10, 1).await {
//!     println!("delivered");
//! }
//!
//! node.shutdown().await?;
//! ```

mod config;
mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod watchdog;

pub use config::{
    DEFAULT_SINGLE_LEADER_DWELL, DEFAULT_TICK_INTERVAL, DEFAULT_TX_POWER, NodeConfig,
    WatchdogConfig,
};
pub use error::{NodeError, NodeResult};
pub use orchestrator::{MeshOrchestrator, RestartHook, RunState, SendRequest, TickReport};
pub use scheduler::TickScheduler;
pub use watchdog::SingleLeaderWatchdog;
