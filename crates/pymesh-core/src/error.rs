//! Error types for the Pymesh protocol layer

use thiserror::Error;

use crate::addr::Mac;

/// Top-level error type for the protocol layer
#[derive(Debug, Error)]
pub enum PymeshError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),
}

/// Errors raised while packing or unpacking wire records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Truncated data: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Length mismatch: header declares {declared} bytes, datagram carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("Invalid role code: {0}")]
    InvalidRole(u8),

    #[error("Too many {what}: {count} exceeds {max}")]
    TooManyEntries {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Errors reported by the mesh transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Address resolution failed: {0}")]
    AddressResolutionFailed(String),

    #[error("Socket not bound")]
    NotBound,

    #[error("Transport suspended")]
    Suspended,

    #[error("Rejected by mesh stack: {0}")]
    Rejected(String),
}

/// Reasons a topology lookup produced no answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("No record for mac {0:#06x}")]
    NotFound(Mac),

    #[error("Record for mac {mac:#06x} is stale ({age_secs}s old)")]
    Stale { mac: Mac, age_secs: u64 },
}

/// Result type alias for protocol operations
pub type PymeshResult<T> = Result<T, PymeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_display() {
        let err = WireError::LengthMismatch {
            declared: 10,
            actual: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("10"));
        assert!(msg.contains("4"));

        let err = WireError::UnknownPacketType(0x7f);
        assert!(format!("{}", err).contains("0x7f"));

        let err = WireError::TooManyEntries {
            what: "neighbors",
            count: 300,
            max: 255,
        };
        assert!(format!("{}", err).contains("neighbors"));
    }

    #[test]
    fn test_lookup_error_display() {
        let err = LookupError::NotFound(0x10);
        assert!(format!("{}", err).contains("0x0010"));

        let err = LookupError::Stale {
            mac: 0x22,
            age_secs: 301,
        };
        assert!(format!("{}", err).contains("301"));
    }

    #[test]
    fn test_error_conversions() {
        let err: PymeshError = WireError::TrailingBytes(3).into();
        assert!(matches!(err, PymeshError::Wire(_)));

        let err: PymeshError = TransportError::NotBound.into();
        assert!(matches!(err, PymeshError::Transport(_)));

        let err: PymeshError = LookupError::NotFound(1).into();
        assert!(format!("{}", err).contains("Lookup error"));
    }
}
