//! # Pymesh Core
//!
//! Core types, wire formats and errors for the Pymesh application protocol
//! that runs on top of a Thread-like mesh stack.
//!
//! ## Key Traits
//!
//! - [`MeshTransport`]: Everything the protocol layer needs from the radio stack
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`NeighborData`], [`RouterData`], [`LeaderData`]: Topology records
//! - [`Packet`]: A decoded protocol packet and its framing
//! - [`BorderRouterHeader`]: Envelope for traffic crossing a border router
//! - [`MockMesh`]: In-memory mesh for tests and simulation

pub mod addr;
pub mod clock;
pub mod error;
pub mod mock_transport;
pub mod packet;
pub mod topology;
pub mod transport;

// Re-export main types
pub use addr::*;
pub use clock::*;
pub use error::*;
pub use mock_transport::*;
pub use packet::*;
pub use topology::*;
pub use transport::*;
