//! Error types for pymesh-protocol

use pymesh_core::{LookupError, TransportError, WireError};
use pymesh_messaging::MessagingError;
use thiserror::Error;

/// Errors surfaced by the protocol engine
///
/// Inbound problems never reach the caller; they are logged and the
/// offending datagram is dropped. These variants cover operations the
/// application starts itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),

    /// No border router is advertised in the partition
    #[error("no border router available")]
    NoBorderRouter,

    /// Node is not attached to a partition
    #[error("not connected to a mesh partition")]
    NotConnected,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
