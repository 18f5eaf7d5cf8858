//! Datagram framing and packet variants
//!
//! ## Wire Format
//!
//! ```text
//! [type:1][length:2 BE][payload:length]
//! ```
//!
//! The declared length must match the rest of the datagram exactly; any
//! mismatch is a parse error and the datagram is dropped.
//!
//! Traffic bound for a border router is prefixed with a 19-byte header:
//!
//! ```text
//! [magic:1 = 0xBB][dest_ipv6: 8 x u16][dest_port:u16][framed packet]
//! ```

use std::net::Ipv6Addr;
use std::time::Instant;

use bytes::{Buf, BufMut};

use crate::addr::Mac;
use crate::error::WireError;
use crate::topology::{Connection, LeaderData, NodeInfo, RouterData, need};

/// Size of the type + length header
pub const HEADER_SIZE: usize = 3;

/// Largest payload a header can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// First byte of border-router traffic
pub const BR_MAGIC: u8 = 0xBB;

/// Magic + 8 address words + port
pub const BR_HEADER_SIZE: usize = 19;

/// Packet type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    /// Application payload
    Message = 0x10,
    /// Acknowledgment of a message
    MessageAck = 0x11,
    /// Leader asks a router for its neighbors
    LeaderAskNeighbors = 0x40,
    /// Router reports its neighbors
    RouterNeighbors = 0x80,
    RouterAskLeaderData = 0x81,
    LeaderData = 0x82,
    RouterAskMacs = 0x83,
    LeaderMacs = 0x84,
    RouterAskConnections = 0x85,
    LeaderConnections = 0x86,
    RouterAskMacDetails = 0x87,
    LeaderMacDetails = 0x88,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::Message),
            0x11 => Ok(Self::MessageAck),
            0x40 => Ok(Self::LeaderAskNeighbors),
            0x80 => Ok(Self::RouterNeighbors),
            0x81 => Ok(Self::RouterAskLeaderData),
            0x82 => Ok(Self::LeaderData),
            0x83 => Ok(Self::RouterAskMacs),
            0x84 => Ok(Self::LeaderMacs),
            0x85 => Ok(Self::RouterAskConnections),
            0x86 => Ok(Self::LeaderConnections),
            0x87 => Ok(Self::RouterAskMacDetails),
            0x88 => Ok(Self::LeaderMacDetails),
            _ => Err(WireError::UnknownPacketType(value)),
        }
    }
}

/// Application message body
///
/// Format: `[mac:u64][id:u16][payload_len:u16][payload]`, mac is the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePacket {
    pub mac: Mac,
    pub id: u16,
    pub payload: Vec<u8>,
}

impl MessagePacket {
    /// Fixed part of the body
    pub const HEADER_SIZE: usize = 12;

    pub fn pack<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        let len = u16::try_from(self.payload.len()).map_err(|_| WireError::PayloadTooLarge {
            size: self.payload.len(),
            max: MAX_PAYLOAD_SIZE,
        })?;
        buf.put_u64(self.mac);
        buf.put_u16(self.id);
        buf.put_u16(len);
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub fn unpack<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        need(buf, Self::HEADER_SIZE)?;
        let mac = buf.get_u64();
        let id = buf.get_u16();
        let len = buf.get_u16() as usize;
        need(buf, len)?;
        let mut payload = vec![0u8; len];
        buf.copy_to_slice(&mut payload);
        Ok(Self { mac, id, payload })
    }
}

/// Acknowledgment body
///
/// Format: `[mac:u64][id:u16]`, mac is the acknowledging node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckPacket {
    pub mac: Mac,
    pub id: u16,
}

impl AckPacket {
    pub const PACKED_SIZE: usize = 10;

    pub fn pack<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.mac);
        buf.put_u16(self.id);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PACKED_SIZE);
        self.pack(&mut buf);
        buf
    }

    pub fn unpack<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        need(buf, Self::PACKED_SIZE)?;
        Ok(Self {
            mac: buf.get_u64(),
            id: buf.get_u16(),
        })
    }

    /// Decode exactly one ack body
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let mut buf = data;
        let ack = Self::unpack(&mut buf)?;
        if !buf.is_empty() {
            return Err(WireError::TrailingBytes(buf.len()));
        }
        Ok(ack)
    }
}

/// Leader answer to a per-mac details query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacDetails {
    pub mac: Mac,
    pub info: Option<NodeInfo>,
}

/// One decoded protocol packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(MessagePacket),
    MessageAck(AckPacket),
    LeaderAskNeighbors,
    RouterNeighbors(RouterData),
    RouterAskLeaderData,
    LeaderData(LeaderData),
    RouterAskMacs,
    LeaderMacs(Vec<Mac>),
    RouterAskConnections,
    LeaderConnections(Vec<Connection>),
    RouterAskMacDetails(Mac),
    LeaderMacDetails(MacDetails),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Message(_) => PacketType::Message,
            Packet::MessageAck(_) => PacketType::MessageAck,
            Packet::LeaderAskNeighbors => PacketType::LeaderAskNeighbors,
            Packet::RouterNeighbors(_) => PacketType::RouterNeighbors,
            Packet::RouterAskLeaderData => PacketType::RouterAskLeaderData,
            Packet::LeaderData(_) => PacketType::LeaderData,
            Packet::RouterAskMacs => PacketType::RouterAskMacs,
            Packet::LeaderMacs(_) => PacketType::LeaderMacs,
            Packet::RouterAskConnections => PacketType::RouterAskConnections,
            Packet::LeaderConnections(_) => PacketType::LeaderConnections,
            Packet::RouterAskMacDetails(_) => PacketType::RouterAskMacDetails,
            Packet::LeaderMacDetails(_) => PacketType::LeaderMacDetails,
        }
    }

    /// Pack the payload (without header)
    fn pack_payload(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        match self {
            Packet::Message(msg) => msg.pack(buf)?,
            Packet::MessageAck(ack) => ack.pack(buf),
            Packet::LeaderAskNeighbors
            | Packet::RouterAskLeaderData
            | Packet::RouterAskMacs
            | Packet::RouterAskConnections => {}
            Packet::RouterNeighbors(router) => router.pack(buf)?,
            Packet::LeaderData(leader) => leader.pack(buf)?,
            Packet::LeaderMacs(macs) => {
                buf.put_u16(count_u16("macs", macs.len())?);
                for mac in macs {
                    buf.put_u64(*mac);
                }
            }
            Packet::LeaderConnections(links) => {
                buf.put_u16(count_u16("connections", links.len())?);
                for link in links {
                    link.pack(buf);
                }
            }
            Packet::RouterAskMacDetails(mac) => buf.put_u64(*mac),
            Packet::LeaderMacDetails(details) => {
                buf.put_u64(details.mac);
                match &details.info {
                    Some(info) => {
                        buf.put_u8(1);
                        info.pack_body(buf)?;
                    }
                    None => buf.put_u8(0),
                }
            }
        }
        Ok(())
    }

    /// Encode into a framed datagram
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut payload = Vec::new();
        self.pack_payload(&mut payload)?;
        frame(self.packet_type() as u8, &payload)
    }

    /// Decode a framed datagram
    ///
    /// `received_at` stamps any router records carried in the packet.
    pub fn decode(data: &[u8], received_at: Instant) -> Result<Self, WireError> {
        let (type_byte, payload) = unframe(data)?;
        let packet_type = PacketType::try_from(type_byte)?;
        let mut buf = payload;

        let packet = match packet_type {
            PacketType::Message => Packet::Message(MessagePacket::unpack(&mut buf)?),
            PacketType::MessageAck => Packet::MessageAck(AckPacket::unpack(&mut buf)?),
            PacketType::LeaderAskNeighbors => Packet::LeaderAskNeighbors,
            PacketType::RouterNeighbors => {
                Packet::RouterNeighbors(RouterData::unpack(&mut buf, received_at)?)
            }
            PacketType::RouterAskLeaderData => Packet::RouterAskLeaderData,
            PacketType::LeaderData => {
                Packet::LeaderData(LeaderData::unpack(&mut buf, received_at)?)
            }
            PacketType::RouterAskMacs => Packet::RouterAskMacs,
            PacketType::LeaderMacs => {
                need(&buf, 2)?;
                let count = buf.get_u16() as usize;
                need(&buf, count * 8)?;
                Packet::LeaderMacs((0..count).map(|_| buf.get_u64()).collect())
            }
            PacketType::RouterAskConnections => Packet::RouterAskConnections,
            PacketType::LeaderConnections => {
                need(&buf, 2)?;
                let count = buf.get_u16() as usize;
                let links = (0..count)
                    .map(|_| Connection::unpack(&mut buf))
                    .collect::<Result<Vec<_>, _>>()?;
                Packet::LeaderConnections(links)
            }
            PacketType::RouterAskMacDetails => {
                need(&buf, 8)?;
                Packet::RouterAskMacDetails(buf.get_u64())
            }
            PacketType::LeaderMacDetails => {
                need(&buf, 9)?;
                let mac = buf.get_u64();
                let info = match buf.get_u8() {
                    0 => None,
                    _ => Some(NodeInfo::unpack_body(mac, &mut buf)?),
                };
                Packet::LeaderMacDetails(MacDetails { mac, info })
            }
        };

        if !buf.is_empty() {
            return Err(WireError::TrailingBytes(buf.len()));
        }
        Ok(packet)
    }
}

fn count_u16(what: &'static str, count: usize) -> Result<u16, WireError> {
    u16::try_from(count).map_err(|_| WireError::TooManyEntries {
        what,
        count,
        max: u16::MAX as usize,
    })
}

/// Prefix a payload with the type + length header
pub fn frame(packet_type: u8, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = u16::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_PAYLOAD_SIZE,
    })?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(packet_type);
    buf.put_u16(len);
    buf.put_slice(payload);
    Ok(buf)
}

/// Split a datagram into its raw type byte and payload
pub fn unframe(data: &[u8]) -> Result<(u8, &[u8]), WireError> {
    if data.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            needed: HEADER_SIZE,
            available: data.len(),
        });
    }
    let declared = u16::from_be_bytes([data[1], data[2]]) as usize;
    let payload = &data[HEADER_SIZE..];
    if payload.len() != declared {
        return Err(WireError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok((data[0], payload))
}

/// Destination carried by border-router traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderRouterHeader {
    pub dest: Ipv6Addr,
    pub port: u16,
}

impl BorderRouterHeader {
    pub fn new(dest: Ipv6Addr, port: u16) -> Self {
        Self { dest, port }
    }

    /// Whether a datagram carries the border-router prefix
    pub fn matches(data: &[u8]) -> bool {
        data.len() >= BR_HEADER_SIZE && data[0] == BR_MAGIC
    }

    /// Prepend the header to an already framed packet
    pub fn wrap(&self, inner: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BR_HEADER_SIZE + inner.len());
        buf.put_u8(BR_MAGIC);
        for word in self.dest.segments() {
            buf.put_u16(word);
        }
        buf.put_u16(self.port);
        buf.put_slice(inner);
        buf
    }

    /// Strip the header, returning it and the remaining packet
    pub fn strip(data: &[u8]) -> Option<(Self, &[u8])> {
        if !Self::matches(data) {
            return None;
        }
        let mut buf = &data[1..BR_HEADER_SIZE];
        let mut words = [0u16; 8];
        for word in words.iter_mut() {
            *word = buf.get_u16();
        }
        let port = buf.get_u16();
        let dest = Ipv6Addr::from(words);
        Some((Self { dest, port }, &data[BR_HEADER_SIZE..]))
    }
}
