//! Outbound and inbound message tables
//!
//! [`Meshaging`] keeps one outbound [`Message`] per destination mac and one
//! [`ReceivedMessage`] per sender mac. Both tables are last-write-wins: a new
//! send to a mac replaces whatever was in flight, a new arrival from a mac
//! replaces whatever the application has not read yet.
//!
//! ## Delivery states
//!
//! ```text
//! IpPending -> Sent -> Ack
//! ```
//!
//! The table itself never emits packets. The protocol engine drains
//! [`pending_resolution`](Meshaging::pending_resolution) and
//! [`retry_due`](Meshaging::retry_due), emits, and reports back through
//! [`mark_sent`](Meshaging::mark_sent).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pymesh_core::{AckPacket, MAX_PAYLOAD_SIZE, Mac, MessagePacket, format_mac};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{MessagingError, MessagingResult};
use crate::message::{Message, MessageKind, MessageState, ReceivedMessage};

/// Largest application payload a MESSAGE packet can carry
pub const MAX_MESSAGE_PAYLOAD: usize = MAX_PAYLOAD_SIZE - MessagePacket::HEADER_SIZE;

/// Re-send policy for unacknowledged messages
///
/// Disabled by default: a message is sent once and the application polls
/// [`Meshaging::was_acked`] to decide whether to send again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Time to wait for an ACK before re-sending
    pub timeout: Duration,
    /// Re-sends after the first emission
    pub max_retries: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Retry policy switched on with default timing
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Configuration for [`Meshaging`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeshagingConfig {
    /// Remove a received message when it is taken (default: peek)
    pub consume_received: bool,
    pub retry: RetryPolicy,
}

impl MeshagingConfig {
    pub fn with_consume_received(mut self, consume: bool) -> Self {
        self.consume_received = consume;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

type ReceiveHook = Box<dyn Fn(&ReceivedMessage) + Send + Sync>;
type AckHook = Box<dyn Fn(Mac, u16) + Send + Sync>;

/// Message bookkeeping for one node
pub struct Meshaging {
    config: MeshagingConfig,
    outbound: HashMap<Mac, Message>,
    received: BTreeMap<Mac, ReceivedMessage>,
    on_receive: Option<ReceiveHook>,
    on_ack: Option<AckHook>,
}

impl fmt::Debug for Meshaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meshaging")
            .field("config", &self.config)
            .field("outbound", &self.outbound.len())
            .field("received", &self.received.len())
            .finish()
    }
}

impl Default for Meshaging {
    fn default() -> Self {
        Self::new(MeshagingConfig::default())
    }
}

impl Meshaging {
    pub fn new(config: MeshagingConfig) -> Self {
        Self {
            config,
            outbound: HashMap::new(),
            received: BTreeMap::new(),
            on_receive: None,
            on_ack: None,
        }
    }

    pub fn config(&self) -> &MeshagingConfig {
        &self.config
    }

    /// Observer called for every stored inbound message
    pub fn set_on_receive(&mut self, hook: impl Fn(&ReceivedMessage) + Send + Sync + 'static) {
        self.on_receive = Some(Box::new(hook));
    }

    /// Observer called for every ACK that matches an outbound message
    pub fn set_on_ack(&mut self, hook: impl Fn(Mac, u16) + Send + Sync + 'static) {
        self.on_ack = Some(Box::new(hook));
    }

    /// Queue a message, replacing any previous one for the same mac
    pub fn try_send(
        &mut self,
        mac: Mac,
        kind: MessageKind,
        payload: Vec<u8>,
        id: u16,
        timestamp: DateTime<Utc>,
    ) -> MessagingResult<()> {
        if mac == 0 {
            return Err(MessagingError::InvalidDestination(mac));
        }
        if payload.len() > MAX_MESSAGE_PAYLOAD {
            return Err(MessagingError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_PAYLOAD,
            });
        }

        let message = Message::new(mac, kind, payload, id, timestamp);
        if let Some(previous) = self.outbound.insert(mac, message) {
            if !previous.is_acked() {
                debug!(
                    mac = %format_mac(mac),
                    replaced_id = previous.id,
                    new_id = id,
                    "Replacing unacknowledged message"
                );
            }
        }
        Ok(())
    }

    /// Queue a message; false only when the input is malformed
    pub fn send(
        &mut self,
        mac: Mac,
        kind: MessageKind,
        payload: Vec<u8>,
        id: u16,
        timestamp: DateTime<Utc>,
    ) -> bool {
        match self.try_send(mac, kind, payload, id, timestamp) {
            Ok(()) => true,
            Err(e) => {
                warn!(mac = %format_mac(mac), id, error = %e, "Rejected outbound message");
                false
            }
        }
    }

    /// Outbound message for a destination
    pub fn outbound(&self, mac: Mac) -> Option<&Message> {
        self.outbound.get(&mac)
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Destinations whose address has not been resolved yet
    pub fn pending_resolution(&self) -> Vec<Mac> {
        let mut macs: Vec<Mac> = self
            .outbound
            .values()
            .filter(|m| m.state == MessageState::IpPending)
            .map(|m| m.mac)
            .collect();
        macs.sort_unstable();
        macs
    }

    /// Record that the message for `mac` was emitted to `ip`
    pub fn mark_sent(&mut self, mac: Mac, ip: Ipv6Addr, now: Instant) -> Option<&Message> {
        let message = self.outbound.get_mut(&mac)?;
        if message.is_acked() {
            return Some(message);
        }
        message.ip = Some(ip);
        message.state = MessageState::Sent;
        message.sent_at = Some(now);
        message.attempts = message.attempts.saturating_add(1);
        Some(message)
    }

    /// Destinations whose message should be emitted again under the retry policy
    ///
    /// Always empty when the policy is disabled.
    pub fn retry_due(&self, now: Instant) -> Vec<Mac> {
        let policy = self.config.retry;
        if !policy.enabled {
            return Vec::new();
        }
        let mut macs: Vec<Mac> = self
            .outbound
            .values()
            .filter(|m| m.state == MessageState::Sent)
            .filter(|m| m.attempts <= policy.max_retries)
            .filter(|m| {
                m.sent_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= policy.timeout)
            })
            .map(|m| m.mac)
            .collect();
        macs.sort_unstable();
        macs
    }

    /// Store an inbound message, replacing any unread one from the same sender
    pub fn add_received(&mut self, message: ReceivedMessage) {
        trace!(mac = %format_mac(message.mac), id = message.id, "Stored inbound message");
        if let Some(hook) = &self.on_receive {
            hook(&message);
        }
        self.received.insert(message.mac, message);
    }

    /// Apply a raw ACK body; returns whether it matched an outbound message
    pub fn record_ack(&mut self, raw: &[u8]) -> bool {
        match AckPacket::from_bytes(raw) {
            Ok(ack) => self.apply_ack(ack),
            Err(e) => {
                let e = MessagingError::from(e);
                debug!(error = %e, "Discarding undecodable ACK");
                false
            }
        }
    }

    /// Apply a decoded ACK; returns whether it matched an outbound message
    pub fn apply_ack(&mut self, ack: AckPacket) -> bool {
        match self.outbound.get_mut(&ack.mac) {
            Some(message) if message.id == ack.id => {
                message.state = MessageState::Ack;
                debug!(mac = %format_mac(ack.mac), id = ack.id, "Message acknowledged");
                if let Some(hook) = &self.on_ack {
                    hook(ack.mac, ack.id);
                }
                true
            }
            Some(message) => {
                debug!(
                    mac = %format_mac(ack.mac),
                    id = ack.id,
                    tracked_id = message.id,
                    "ACK for superseded message id"
                );
                false
            }
            None => {
                debug!(mac = %format_mac(ack.mac), id = ack.id, "ACK for unknown mac");
                false
            }
        }
    }

    /// Whether the tracked message for `mac` has this id and was acknowledged
    pub fn was_acked(&self, mac: Mac, id: u16) -> bool {
        self.outbound
            .get(&mac)
            .is_some_and(|m| m.id == id && m.is_acked())
    }

    /// First received message (lowest sender mac)
    ///
    /// Peeks by default, so the same message is returned until the sender
    /// replaces it; with `consume_received` set the entry is removed.
    pub fn take_received(&mut self) -> Option<ReceivedMessage> {
        if self.config.consume_received {
            self.received.pop_first().map(|(_, m)| m)
        } else {
            self.received.values().next().cloned()
        }
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Drop everything (node reset)
    pub fn clear(&mut self) {
        self.outbound.clear();
        self.received.clear();
    }
}
