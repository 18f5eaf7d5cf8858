//! # Pymesh Messaging
//!
//! Outbound/inbound message tables and ACK bookkeeping.
//!
//! Each node tracks at most one in-flight message per destination and one
//! unread message per sender. Delivery is send-once by default; a
//! [`RetryPolicy`] can be switched on explicitly.
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use pymesh_core::AckPacket;
//! use pymesh_messaging::{MessageKind, Meshaging};
//!
//! let mut messaging = Meshaging::default();
//! messaging.send(5, MessageKind::Application, b"hi".to_vec(), 42, Utc::now());
//! messaging.record_ack(&AckPacket { mac: 5, id: 42 }.to_bytes());
//! assert!(messaging.was_acked(5, 42));
//! ```

pub mod error;
pub mod meshaging;
pub mod message;

// Re-exports
pub use error::{MessagingError, MessagingResult};
pub use meshaging::{MAX_MESSAGE_PAYLOAD, Meshaging, MeshagingConfig, RetryPolicy};
pub use message::{Message, MessageKind, MessageState, ReceivedMessage};
