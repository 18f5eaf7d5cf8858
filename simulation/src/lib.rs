//! # Pymesh simulator
//!
//! Runs many Pymesh nodes in one process over the in-memory mesh from
//! `pymesh-core`. Every node is a full [`pymesh_node::MeshOrchestrator`]; only
//! the radio is simulated.
//!
//! ## Architecture
//!
//! - **Topology** (`topology.rs`): which nodes exist, their roles and links
//! - **Simulation** (`simulation.rs`): discrete-time driver sharing one manual clock
//! - **Scenarios** (`scenarios.rs`): pre-built runs used by the CLI and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use pymesh_sim::{SimMesh, Topology};
//! use pymesh_node::NodeConfig;
//!
//! let mut sim = SimMesh::new(Topology::star(3, 2), NodeConfig::in_memory()).await?;
//! sim.run(5).await;
//!
//! let leader = sim.node(0x10).unwrap();
//! println!("{} nodes known", leader.mesh_macs().await.len());
//! ```

pub mod scenarios;
pub mod simulation;
pub mod topology;

pub use simulation::SimMesh;
pub use topology::{Link, NodeSpec, Topology};
