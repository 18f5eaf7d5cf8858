//! Error types for pymesh-messaging

use pymesh_core::{Mac, WireError};
use thiserror::Error;

/// Errors that can occur in the messaging layer
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Payload does not fit in a MESSAGE packet
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Destination mac is reserved
    #[error("invalid destination mac: {0:#x}")]
    InvalidDestination(Mac),

    /// ACK bytes could not be decoded
    #[error("malformed ack: {0}")]
    MalformedAck(#[from] WireError),
}

/// Result type for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
