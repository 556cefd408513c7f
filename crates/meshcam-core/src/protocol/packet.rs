//! Mesh packet header and framing
//!
//! Every frame on the air starts with the same fixed 13-byte header. Fragmented
//! frames carry a 4-byte fragment sub-header between the header and the chunk.
//!
//! ```text
//! Header:
//! ┌─────────┬────────┬────────────┬────────────┬──────────┬──────────┐
//! │ Ver (1B)│Type(1B)│ From (4B)  │  To (4B)   │ Seq (2B) │Flags (1B)│
//! └─────────┴────────┴────────────┴────────────┴──────────┴──────────┘
//!
//! Flags:
//! ┌──────────────┬──────────────────┬──────────────┬──────────┐
//! │ Priority 7-5 │ Hops travelled 4-2│ Fragment (1) │ Ack (0)  │
//! └──────────────┴──────────────────┴──────────────┴──────────┘
//!
//! Fragment sub-header:
//! ┌────────────┬────────────┬────────────┐
//! │ MsgId (2B) │ Index (1B) │ Count (1B) │
//! └────────────┴────────────┴────────────┘
//! ```

use crate::error::ProtocolError;
use crate::rtp::Priority;
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol version carried in every header
pub const PROTOCOL_VERSION: u8 = 1;

/// Node identifier - 4-byte unique ID
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Broadcast address. Also the "unset" target for task assignment.
    pub const BROADCAST: NodeId = NodeId(0);

    /// Create a NodeId from a u32
    pub const fn from_u32(value: u32) -> Self {
        NodeId(value)
    }

    /// Convert to u32
    pub const fn to_u32(&self) -> u32 {
        self.0
    }

    /// Generate a random, non-broadcast NodeId
    pub fn random() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        loop {
            let candidate = rand::random::<u32>() ^ (seed as u32);
            if candidate != 0 {
                return NodeId(candidate);
            }
        }
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:08x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Capability announcement during an election window
    Discovery = 1,
    /// Periodic liveness + capability refresh
    Heartbeat = 2,
    /// Coordinator's view of peers and roles
    Topology = 3,
    /// Coordinator hands a task to a node
    TaskAssign = 4,
    /// Node reports task progress or outcome
    TaskResult = 5,
    /// Acknowledgment of a single frame
    Ack = 6,
}

impl PacketType {
    /// Create from byte value
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            1 => Ok(PacketType::Discovery),
            2 => Ok(PacketType::Heartbeat),
            3 => Ok(PacketType::Topology),
            4 => Ok(PacketType::TaskAssign),
            5 => Ok(PacketType::TaskResult),
            6 => Ok(PacketType::Ack),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }

    /// Wire code
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// Packet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Empty flags
    pub const NONE: PacketFlags = PacketFlags(0);

    const WANT_ACK_BIT: u8 = 0;
    const FRAGMENT_BIT: u8 = 1;
    const HOPS_SHIFT: u8 = 2; // bits 2-4
    const PRIORITY_SHIFT: u8 = 5; // bits 5-7

    /// Largest hop count the flags can carry
    pub const MAX_HOPS: u8 = 7;

    /// Create new flags
    pub fn new() -> Self {
        PacketFlags(0)
    }

    /// Check if acknowledgment is requested
    pub fn want_ack(&self) -> bool {
        (self.0 & (1 << Self::WANT_ACK_BIT)) != 0
    }

    /// Set want_ack flag
    pub fn set_want_ack(&mut self, value: bool) {
        if value {
            self.0 |= 1 << Self::WANT_ACK_BIT;
        } else {
            self.0 &= !(1 << Self::WANT_ACK_BIT);
        }
    }

    /// Check if a fragment sub-header follows
    pub fn fragment(&self) -> bool {
        (self.0 & (1 << Self::FRAGMENT_BIT)) != 0
    }

    /// Set fragment flag
    pub fn set_fragment(&mut self, value: bool) {
        if value {
            self.0 |= 1 << Self::FRAGMENT_BIT;
        } else {
            self.0 &= !(1 << Self::FRAGMENT_BIT);
        }
    }

    /// Hops this frame has travelled through relays
    pub fn hops(&self) -> u8 {
        (self.0 >> Self::HOPS_SHIFT) & 0x07
    }

    /// Set the hop counter (saturates at 7)
    pub fn set_hops(&mut self, value: u8) {
        let value = value.min(Self::MAX_HOPS);
        self.0 = (self.0 & 0xE3) | (value << Self::HOPS_SHIFT);
    }

    /// Transmission priority of the frame
    pub fn priority(&self) -> Priority {
        Priority::from_level(self.0 >> Self::PRIORITY_SHIFT)
    }

    /// Set the priority bits
    pub fn set_priority(&mut self, priority: Priority) {
        self.0 = (self.0 & 0x1F) | (priority.level() << Self::PRIORITY_SHIFT);
    }

    /// Get the raw byte value
    pub fn as_byte(&self) -> u8 {
        self.0
    }

    /// Create from raw byte
    pub fn from_byte(byte: u8) -> Self {
        PacketFlags(byte)
    }
}

/// Fixed frame header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Protocol version
    pub version: u8,
    /// Packet type
    pub packet_type: PacketType,
    /// Originating node
    pub from: NodeId,
    /// Destination node (BROADCAST for all nodes)
    pub to: NodeId,
    /// Per-sender sequence number
    pub seq: u16,
    /// Packet flags
    pub flags: PacketFlags,
}

impl PacketHeader {
    /// Header size in bytes
    pub const SIZE: usize = 13;

    /// Create a header for the current protocol version
    pub fn new(packet_type: PacketType, from: NodeId, to: NodeId, seq: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            from,
            to,
            seq,
            flags: PacketFlags::new(),
        }
    }

    /// Check if this is a broadcast frame
    pub fn is_broadcast(&self) -> bool {
        self.to.is_broadcast()
    }

    /// Check if this frame is addressed to us or broadcast
    pub fn is_for_node(&self, node_id: NodeId) -> bool {
        self.to.is_broadcast() || self.to == node_id
    }

    /// Serialize header into `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.packet_type.as_byte();
        BigEndian::write_u32(&mut buf[2..6], self.from.to_u32());
        BigEndian::write_u32(&mut buf[6..10], self.to.to_u32());
        BigEndian::write_u16(&mut buf[10..12], self.seq);
        buf[12] = self.flags.as_byte();
        out.extend_from_slice(&buf);
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut bytes);
        bytes
    }

    /// Deserialize header from the start of a frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                available: bytes.len(),
            });
        }
        if bytes[0] != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(bytes[0]));
        }
        Ok(Self {
            version: bytes[0],
            packet_type: PacketType::from_byte(bytes[1])?,
            from: NodeId::from_u32(BigEndian::read_u32(&bytes[2..6])),
            to: NodeId::from_u32(BigEndian::read_u32(&bytes[6..10])),
            seq: BigEndian::read_u16(&bytes[10..12]),
            flags: PacketFlags::from_byte(bytes[12]),
        })
    }

    /// Identifier used for duplicate detection
    pub fn dedup_key(&self) -> (NodeId, u16) {
        (self.from, self.seq)
    }
}

/// Fragment position within a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    /// Sender-local message id shared by all fragments of one transmission
    pub msg_id: u16,
    /// Zero-based fragment index
    pub index: u8,
    /// Total fragment count
    pub count: u8,
}

impl FragmentInfo {
    /// Sub-header size in bytes
    pub const SIZE: usize = 4;

    fn write_to(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; Self::SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.msg_id);
        buf[2] = self.index;
        buf[3] = self.count;
        out.extend_from_slice(&buf);
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                available: bytes.len(),
            });
        }
        let info = Self {
            msg_id: BigEndian::read_u16(&bytes[0..2]),
            index: bytes[2],
            count: bytes[3],
        };
        if info.count == 0 || info.index >= info.count {
            return Err(ProtocolError::InvalidField {
                field: "fragment index",
                value: info.index as u32,
            });
        }
        Ok(info)
    }
}

/// A complete frame: header, optional fragment sub-header and body bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Fixed header
    pub header: PacketHeader,
    /// Present when the fragment flag is set
    pub fragment: Option<FragmentInfo>,
    /// Message body, or one chunk of it
    pub body: Vec<u8>,
}

impl Frame {
    /// Create an unfragmented frame
    pub fn new(header: PacketHeader, body: Vec<u8>) -> Self {
        Self {
            header,
            fragment: None,
            body,
        }
    }

    /// Create one fragment of a larger transmission
    pub fn fragment(mut header: PacketHeader, info: FragmentInfo, chunk: Vec<u8>) -> Self {
        header.flags.set_fragment(true);
        Self {
            header,
            fragment: Some(info),
            body: chunk,
        }
    }

    /// Create an acknowledgment for `acked_seq`
    pub fn ack(from: NodeId, to: NodeId, seq: u16, acked_seq: u16) -> Self {
        let mut header = PacketHeader::new(PacketType::Ack, from, to, seq);
        header.flags.set_priority(Priority::Critical);
        Self::new(header, acked_seq.to_be_bytes().to_vec())
    }

    /// Sequence number acknowledged by an ACK frame
    pub fn acked_seq(&self) -> Option<u16> {
        if self.header.packet_type == PacketType::Ack && self.body.len() == 2 {
            Some(BigEndian::read_u16(&self.body))
        } else {
            None
        }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        PacketHeader::SIZE + self.fragment.map_or(0, |_| FragmentInfo::SIZE) + self.body.len()
    }

    /// Serialize the entire frame to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.header.write_to(&mut bytes);
        if let Some(info) = &self.fragment {
            info.write_to(&mut bytes);
        }
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Deserialize a frame, failing closed on any inconsistency
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = PacketHeader::from_bytes(bytes)?;
        let rest = &bytes[PacketHeader::SIZE..];

        let (fragment, body) = if header.flags.fragment() {
            let info = FragmentInfo::from_bytes(rest)?;
            (Some(info), &rest[FragmentInfo::SIZE..])
        } else {
            (None, rest)
        };

        if header.packet_type == PacketType::Ack && (body.len() != 2 || fragment.is_some()) {
            return Err(ProtocolError::InvalidField {
                field: "ack length",
                value: body.len() as u32,
            });
        }

        Ok(Self {
            header,
            fragment,
            body: body.to_vec(),
        })
    }
}
