//! Message records tracked by [`Meshaging`](crate::Meshaging)

use std::net::Ipv6Addr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use pymesh_core::{Mac, MessagePacket};
use serde::{Deserialize, Serialize};

/// Delivery state of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Destination address not resolved yet
    IpPending,
    /// Emitted at least once, no ACK yet
    Sent,
    /// Matching MESSAGE_ACK received
    Ack,
}

/// What produced an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageKind {
    /// Application payload
    #[default]
    Application,
    /// Reliability probe from a statistics job
    Probe,
}

/// One outbound message, at most one per destination mac
#[derive(Debug, Clone)]
pub struct Message {
    /// Destination
    pub mac: Mac,
    /// Resolved destination address, filled lazily
    pub ip: Option<Ipv6Addr>,
    pub payload: Vec<u8>,
    pub id: u16,
    pub kind: MessageKind,
    /// Application-supplied creation time
    pub timestamp: DateTime<Utc>,
    pub state: MessageState,
    /// When the packet was last emitted
    pub sent_at: Option<Instant>,
    /// Number of emissions so far
    pub attempts: u8,
}

impl Message {
    pub fn new(
        mac: Mac,
        kind: MessageKind,
        payload: Vec<u8>,
        id: u16,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            mac,
            ip: None,
            payload,
            id,
            kind,
            timestamp,
            state: MessageState::IpPending,
            sent_at: None,
            attempts: 0,
        }
    }

    pub fn is_acked(&self) -> bool {
        self.state == MessageState::Ack
    }

    /// Wire form, stamped with the sending node's mac
    pub fn to_packet(&self, own_mac: Mac) -> MessagePacket {
        MessagePacket {
            mac: own_mac,
            id: self.id,
            payload: self.payload.clone(),
        }
    }
}

/// A message delivered to this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Sender
    pub mac: Mac,
    pub id: u16,
    /// Local receipt time
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    pub fn from_packet(packet: MessagePacket, timestamp: DateTime<Utc>) -> Self {
        Self {
            mac: packet.mac,
            id: packet.id,
            timestamp,
            payload: packet.payload,
        }
    }
}
