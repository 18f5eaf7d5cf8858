//! # Pymesh Protocol
//!
//! Packet dispatch and role duties for the Pymesh application protocol.
//!
//! ## Duties by role
//!
//! - **Leader**: probes routers for their neighbor tables every 30s (at
//!   most 5 per round, none probed within the last 60s), keeps the
//!   aggregate [`LeaderData`](pymesh_core::LeaderData) and answers mesh-wide
//!   queries from it
//! - **Router**: answers probes with its own report and refreshes its copy of
//!   the mesh views from the leader
//! - **Border router**: hands traffic addressed outside the mesh to a
//!   registered callback
//!
//! Every node ACKs each MESSAGE it receives and tracks ACKs for its own.

pub mod config;
pub mod engine;
pub mod error;
pub mod suppression;
pub mod topology_cache;

// Re-exports
pub use config::{DEFAULT_BR_PREFIX, EngineConfig, LeaderConfig, SuppressionConfig};
pub use engine::{
    BorderRouterCallback, BorderRouterDelivery, EngineCounters, MeshProtocolEngine, TickSummary,
};
pub use error::{EngineError, EngineResult};
pub use suppression::SuppressionTable;
pub use topology_cache::{CachedLookup, TopologyCache};
