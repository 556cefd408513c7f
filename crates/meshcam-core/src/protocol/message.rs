//! Message bodies carried inside frames
//!
//! ```text
//! Capability block (25 bytes):
//! ┌──────────┬────────┬─────────┬───────┬──────────────┬───────┬────────┬──────┬──────────┐
//! │ Node (4B)│Caps(1B)│ Batt(1B)│Pwr(1B)│ Storage (8B) │ W (2B)│ H (2B) │RSSI 2│Uptime(4B)│
//! └──────────┴────────┴─────────┴───────┴──────────────┴───────┴────────┴──────┴──────────┘
//!
//! Announcement (DISCOVERY / HEARTBEAT):
//! ┌──────────────────┬─────────┬────────────┬─────────┬──────────┬────────────────┐
//! │ Capability block │Role (1B)│Score (2B)  │ Hop (1B)│Tasks (1B)│Coordinator (4B)│
//! └──────────────────┴─────────┴────────────┴─────────┴──────────┴────────────────┘
//! ```

use super::packet::{Frame, NodeId, PacketHeader, PacketType};
use crate::capability::{NodeCapabilities, PowerSource, Resolution};
use crate::error::ProtocolError;
use crate::role::{eligibility_score, Role};
use crate::config::EligibilityWeights;
use crate::task::{TaskId, TaskStatus, TaskType};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use tracing::debug;

/// Encoded size of a capability block
pub const CAPABILITY_BLOCK_SIZE: usize = 25;
/// Encoded size of an announcement body
pub const ANNOUNCEMENT_SIZE: usize = CAPABILITY_BLOCK_SIZE + 9;

const BATTERY_UNKNOWN: u8 = 0xFF;
const ROLE_NONE: u8 = 0xFF;

mod cap_bits {
    pub const CAMERA: u8 = 1 << 0;
    pub const RADIO: u8 = 1 << 1;
    pub const AI: u8 = 1 << 2;
    pub const PSRAM: u8 = 1 << 3;
    pub const SD_CARD: u8 = 1 << 4;
    pub const CELLULAR: u8 = 1 << 5;
    pub const SATELLITE: u8 = 1 << 6;
    pub const LOW_POWER: u8 = 1 << 7;
}

/// Capabilities plus the sender's view of the election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub capabilities: NodeCapabilities,
    pub role: Option<Role>,
    /// Eligibility score in tenths of a point
    pub score_tenths: u16,
    /// Sender's distance from the coordinator
    pub hop_count: u8,
    pub active_tasks: u8,
    pub coordinator: Option<NodeId>,
}

impl Announcement {
    /// Quantize a score to the wire representation
    pub fn quantize_score(score: f32) -> u16 {
        (score * 10.0).round().clamp(0.0, u16::MAX as f32) as u16
    }

    /// Advertised score as points
    pub fn score(&self) -> f32 {
        self.score_tenths as f32 / 10.0
    }
}

/// One node in a TOPOLOGY message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    pub node: NodeId,
    pub role: Option<Role>,
    pub active: bool,
    pub hop_count: u8,
}

/// Coordinator's view of the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub coordinator: NodeId,
    pub epoch: u16,
    pub nodes: Vec<TopologyEntry>,
}

impl Topology {
    /// Wrapping comparison: true when `self` supersedes an epoch of `previous`
    pub fn is_newer_than(&self, previous: u16) -> bool {
        let ahead = self.epoch.wrapping_sub(previous);
        ahead != 0 && ahead < 0x8000
    }
}

/// Work handed to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssign {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: u8,
    /// Relative deadline in milliseconds
    pub deadline_ms: Option<u32>,
    pub params: Vec<u8>,
}

/// Progress or outcome reported back to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub data: Vec<u8>,
}

/// Application-level message decoded from a frame body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Discovery(Announcement),
    Heartbeat(Announcement),
    Topology(Topology),
    TaskAssign(TaskAssign),
    TaskResult(TaskResult),
}

impl Message {
    /// Packet type this message travels as
    pub fn packet_type(&self) -> PacketType {
        match self {
            Message::Discovery(_) => PacketType::Discovery,
            Message::Heartbeat(_) => PacketType::Heartbeat,
            Message::Topology(_) => PacketType::Topology,
            Message::TaskAssign(_) => PacketType::TaskAssign,
            Message::TaskResult(_) => PacketType::TaskResult,
        }
    }

    /// Encode the message body
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(ANNOUNCEMENT_SIZE);
        match self {
            Message::Discovery(a) | Message::Heartbeat(a) => write_announcement(&mut out, a)?,
            Message::Topology(t) => write_topology(&mut out, t)?,
            Message::TaskAssign(t) => write_task_assign(&mut out, t)?,
            Message::TaskResult(r) => write_task_result(&mut out, r)?,
        }
        Ok(out)
    }

    /// Decode a body of the given packet type
    pub fn decode(packet_type: PacketType, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(body);
        let message = match packet_type {
            PacketType::Discovery => Message::Discovery(read_announcement(&mut cursor)?),
            PacketType::Heartbeat => Message::Heartbeat(read_announcement(&mut cursor)?),
            PacketType::Topology => Message::Topology(read_topology(&mut cursor)?),
            PacketType::TaskAssign => Message::TaskAssign(read_task_assign(&mut cursor)?),
            PacketType::TaskResult => Message::TaskResult(read_task_result(&mut cursor)?),
            PacketType::Ack => {
                return Err(ProtocolError::InvalidField {
                    field: "message type",
                    value: PacketType::Ack.as_byte() as u32,
                })
            }
        };
        let remaining = body.len() - cursor.position() as usize;
        if remaining > 0 {
            return Err(ProtocolError::TrailingBytes(remaining));
        }
        Ok(message)
    }

    /// Decode the body of a complete frame, cross-checking the header
    pub fn decode_frame(header: &PacketHeader, body: &[u8]) -> Result<Self, ProtocolError> {
        let message = Self::decode(header.packet_type, body)?;
        if let Message::Discovery(a) | Message::Heartbeat(a) = &message {
            if a.capabilities.node_id != header.from {
                return Err(ProtocolError::InvalidField {
                    field: "announced node id",
                    value: a.capabilities.node_id.to_u32(),
                });
            }
        }
        Ok(message)
    }
}

/// Build a standalone broadcast DISCOVERY frame for `caps`
///
/// The frame carries the default eligibility score and no role or
/// coordinator. Nodes in a running mesh send richer announcements through
/// the transport; this form suits bootstrap and tooling.
pub fn create_discovery_message(caps: &NodeCapabilities) -> Result<Vec<u8>, ProtocolError> {
    let announcement = Announcement {
        capabilities: caps.clone(),
        role: None,
        score_tenths: Announcement::quantize_score(eligibility_score(
            caps,
            0,
            &EligibilityWeights::default(),
        )),
        hop_count: 0,
        active_tasks: 0,
        coordinator: None,
    };
    let header = PacketHeader::new(PacketType::Discovery, caps.node_id, NodeId::BROADCAST, 0);
    let body = Message::Discovery(announcement).encode()?;
    Ok(Frame::new(header, body).to_bytes())
}

/// Parse a DISCOVERY frame; anything malformed yields `None`
pub fn parse_discovery_message(bytes: &[u8]) -> Option<NodeCapabilities> {
    let parsed = Frame::from_bytes(bytes).and_then(|frame| {
        if frame.header.packet_type != PacketType::Discovery || frame.fragment.is_some() {
            return Err(ProtocolError::UnknownPacketType(frame.header.packet_type.as_byte()));
        }
        Message::decode_frame(&frame.header, &frame.body)
    });

    match parsed {
        Ok(Message::Discovery(a)) => Some(a.capabilities),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "Dropping malformed discovery");
            None
        }
    }
}

fn write_capabilities(out: &mut Vec<u8>, caps: &NodeCapabilities) -> Result<(), ProtocolError> {
    let mut flags = 0u8;
    for (present, bit) in [
        (caps.has_camera, cap_bits::CAMERA),
        (caps.has_radio, cap_bits::RADIO),
        (caps.has_ai_accelerator, cap_bits::AI),
        (caps.has_psram, cap_bits::PSRAM),
        (caps.has_sd_card, cap_bits::SD_CARD),
        (caps.has_cellular, cap_bits::CELLULAR),
        (caps.has_satellite, cap_bits::SATELLITE),
        (caps.low_power_profile, cap_bits::LOW_POWER),
    ] {
        if present {
            flags |= bit;
        }
    }

    out.write_u32::<BigEndian>(caps.node_id.to_u32())?;
    out.write_u8(flags)?;
    out.write_u8(caps.battery_percent.map_or(BATTERY_UNKNOWN, |b| b.min(100)))?;
    out.write_u8(caps.power_source.as_byte())?;
    out.write_u64::<BigEndian>(caps.storage_free_bytes)?;
    out.write_u16::<BigEndian>(caps.max_resolution.width)?;
    out.write_u16::<BigEndian>(caps.max_resolution.height)?;
    out.write_i16::<BigEndian>(caps.signal_rssi)?;
    out.write_u32::<BigEndian>(caps.uptime_secs)?;
    Ok(())
}

fn read_capabilities(cursor: &mut Cursor<&[u8]>) -> Result<NodeCapabilities, ProtocolError> {
    let node_id = NodeId::from_u32(cursor.read_u32::<BigEndian>()?);
    let flags = cursor.read_u8()?;
    let battery = match cursor.read_u8()? {
        BATTERY_UNKNOWN => None,
        level if level <= 100 => Some(level),
        level => {
            return Err(ProtocolError::InvalidField {
                field: "battery",
                value: level as u32,
            })
        }
    };
    let power = cursor.read_u8()?;
    let power_source = PowerSource::from_byte(power).ok_or(ProtocolError::InvalidField {
        field: "power source",
        value: power as u32,
    })?;

    Ok(NodeCapabilities {
        node_id,
        has_camera: flags & cap_bits::CAMERA != 0,
        has_radio: flags & cap_bits::RADIO != 0,
        has_ai_accelerator: flags & cap_bits::AI != 0,
        has_psram: flags & cap_bits::PSRAM != 0,
        has_sd_card: flags & cap_bits::SD_CARD != 0,
        has_cellular: flags & cap_bits::CELLULAR != 0,
        has_satellite: flags & cap_bits::SATELLITE != 0,
        low_power_profile: flags & cap_bits::LOW_POWER != 0,
        battery_percent: battery,
        power_source,
        storage_free_bytes: cursor.read_u64::<BigEndian>()?,
        max_resolution: Resolution::new(cursor.read_u16::<BigEndian>()?, cursor.read_u16::<BigEndian>()?),
        signal_rssi: cursor.read_i16::<BigEndian>()?,
        uptime_secs: cursor.read_u32::<BigEndian>()?,
    })
}

fn role_byte(role: Option<Role>) -> u8 {
    role.map_or(ROLE_NONE, |r| r.as_byte())
}

fn read_role(cursor: &mut Cursor<&[u8]>) -> Result<Option<Role>, ProtocolError> {
    match cursor.read_u8()? {
        ROLE_NONE => Ok(None),
        code => Role::from_byte(code).map(Some).ok_or(ProtocolError::InvalidField {
            field: "role",
            value: code as u32,
        }),
    }
}

fn write_announcement(out: &mut Vec<u8>, a: &Announcement) -> Result<(), ProtocolError> {
    write_capabilities(out, &a.capabilities)?;
    out.write_u8(role_byte(a.role))?;
    out.write_u16::<BigEndian>(a.score_tenths)?;
    out.write_u8(a.hop_count)?;
    out.write_u8(a.active_tasks)?;
    out.write_u32::<BigEndian>(a.coordinator.map_or(0, |c| c.to_u32()))?;
    Ok(())
}

fn read_announcement(cursor: &mut Cursor<&[u8]>) -> Result<Announcement, ProtocolError> {
    let capabilities = read_capabilities(cursor)?;
    let role = read_role(cursor)?;
    let score_tenths = cursor.read_u16::<BigEndian>()?;
    let hop_count = cursor.read_u8()?;
    let active_tasks = cursor.read_u8()?;
    let coordinator = NodeId::from_u32(cursor.read_u32::<BigEndian>()?);
    Ok(Announcement {
        capabilities,
        role,
        score_tenths,
        hop_count,
        active_tasks,
        coordinator: (!coordinator.is_broadcast()).then_some(coordinator),
    })
}

fn write_topology(out: &mut Vec<u8>, t: &Topology) -> Result<(), ProtocolError> {
    let count = u8::try_from(t.nodes.len()).map_err(|_| ProtocolError::InvalidField {
        field: "topology count",
        value: t.nodes.len() as u32,
    })?;
    out.write_u32::<BigEndian>(t.coordinator.to_u32())?;
    out.write_u16::<BigEndian>(t.epoch)?;
    out.write_u8(count)?;
    for entry in &t.nodes {
        out.write_u32::<BigEndian>(entry.node.to_u32())?;
        out.write_u8(role_byte(entry.role))?;
        out.write_u8(entry.active as u8)?;
        out.write_u8(entry.hop_count)?;
    }
    Ok(())
}

fn read_topology(cursor: &mut Cursor<&[u8]>) -> Result<Topology, ProtocolError> {
    let coordinator = NodeId::from_u32(cursor.read_u32::<BigEndian>()?);
    let epoch = cursor.read_u16::<BigEndian>()?;
    let count = cursor.read_u8()?;
    let mut nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let node = NodeId::from_u32(cursor.read_u32::<BigEndian>()?);
        let role = read_role(cursor)?;
        let active = match cursor.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(ProtocolError::InvalidField {
                    field: "active",
                    value: other as u32,
                })
            }
        };
        nodes.push(TopologyEntry {
            node,
            role,
            active,
            hop_count: cursor.read_u8()?,
        });
    }
    Ok(Topology {
        coordinator,
        epoch,
        nodes,
    })
}

fn write_blob(out: &mut Vec<u8>, field: &'static str, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::InvalidField {
        field,
        value: data.len() as u32,
    })?;
    out.write_u16::<BigEndian>(len)?;
    out.write_all(data)?;
    Ok(())
}

fn read_blob(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, ProtocolError> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    let start = cursor.position() as usize;
    let body = *cursor.get_ref();
    let end = start + len;
    if end > body.len() {
        return Err(ProtocolError::Truncated {
            needed: end,
            available: body.len(),
        });
    }
    cursor.set_position(end as u64);
    Ok(body[start..end].to_vec())
}

fn write_task_assign(out: &mut Vec<u8>, t: &TaskAssign) -> Result<(), ProtocolError> {
    let (code, custom) = t.task_type.to_wire();
    out.write_u32::<BigEndian>(t.task_id.0)?;
    out.write_u8(code)?;
    out.write_u8(custom)?;
    out.write_u8(t.priority)?;
    out.write_u32::<BigEndian>(t.deadline_ms.unwrap_or(0))?;
    write_blob(out, "params length", &t.params)
}

fn read_task_assign(cursor: &mut Cursor<&[u8]>) -> Result<TaskAssign, ProtocolError> {
    let task_id = TaskId(cursor.read_u32::<BigEndian>()?);
    let code = cursor.read_u8()?;
    let custom = cursor.read_u8()?;
    let task_type = TaskType::from_wire(code, custom).ok_or(ProtocolError::InvalidField {
        field: "task type",
        value: code as u32,
    })?;
    let priority = cursor.read_u8()?;
    if !(1..=10).contains(&priority) {
        return Err(ProtocolError::InvalidField {
            field: "priority",
            value: priority as u32,
        });
    }
    let deadline = cursor.read_u32::<BigEndian>()?;
    Ok(TaskAssign {
        task_id,
        task_type,
        priority,
        deadline_ms: (deadline != 0).then_some(deadline),
        params: read_blob(cursor)?,
    })
}

fn write_task_result(out: &mut Vec<u8>, r: &TaskResult) -> Result<(), ProtocolError> {
    out.write_u32::<BigEndian>(r.task_id.0)?;
    out.write_u8(r.status.as_byte())?;
    write_blob(out, "data length", &r.data)
}

fn read_task_result(cursor: &mut Cursor<&[u8]>) -> Result<TaskResult, ProtocolError> {
    let task_id = TaskId(cursor.read_u32::<BigEndian>()?);
    let status_byte = cursor.read_u8()?;
    let status = TaskStatus::from_byte(status_byte).ok_or(ProtocolError::InvalidField {
        field: "task status",
        value: status_byte as u32,
    })?;
    Ok(TaskResult {
        task_id,
        status,
        data: read_blob(cursor)?,
    })
}
