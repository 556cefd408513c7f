//! Transmission records and their public status

use crate::protocol::packet::{Frame, NodeId, PacketType};
use crate::Millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle for a transmission; never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(u32);

impl TxId {
    pub(crate) fn new(value: u32) -> Self {
        TxId(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Scheduling class, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Bypasses the bandwidth limiter
    Critical,
    /// May borrow one extra bucket of tokens
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// 0 (critical) to 4 (background)
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Out-of-range levels map to background
    pub fn from_level(level: u8) -> Self {
        Priority::ALL
            .get(level as usize)
            .copied()
            .unwrap_or(Priority::Background)
    }
}

/// Lifecycle of a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionState {
    Queued,
    Sending,
    AwaitingAck,
    Acked,
    Failed,
    Expired,
}

impl TransmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransmissionState::Acked | TransmissionState::Failed | TransmissionState::Expired
        )
    }
}

/// Why a transmission did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionErrorKind {
    /// No ACK after the last allowed attempt
    RetriesExhausted,
    /// Fragments still unacknowledged when the reassembly window closed
    ReassemblyTimeout,
    /// The radio kept refusing frames
    RadioRejected,
    /// Caller-supplied deadline passed
    DeadlineExpired,
    /// Removed by the caller before it was sent
    Cancelled,
}

impl fmt::Display for TransmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransmissionErrorKind::RetriesExhausted => "retries exhausted",
            TransmissionErrorKind::ReassemblyTimeout => "reassembly timeout",
            TransmissionErrorKind::RadioRejected => "radio rejected",
            TransmissionErrorKind::DeadlineExpired => "deadline expired",
            TransmissionErrorKind::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Snapshot returned by `transmission_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionStatus {
    pub tx_id: TxId,
    pub destination: NodeId,
    pub state: TransmissionState,
    /// Sends of the most-attempted fragment
    pub attempts: u8,
    pub fragments_total: u16,
    pub fragments_acked: u16,
    pub error: Option<TransmissionErrorKind>,
}

impl TransmissionStatus {
    /// Percentage of fragments acknowledged (or sent, for fire-and-forget)
    pub fn progress_percent(&self) -> f32 {
        if self.fragments_total == 0 {
            return 0.0;
        }
        self.fragments_acked as f32 * 100.0 / self.fragments_total as f32
    }
}

/// One frame of a transmission and its retry bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct FrameSlot {
    pub bytes: Vec<u8>,
    pub seq: u16,
    /// Acknowledged, or sent once when no ACK is wanted
    pub done: bool,
    pub attempts: u8,
    pub rejections: u8,
    pub last_sent: Option<Millis>,
    /// Earliest time the next send may happen
    pub ready_at: Millis,
    /// Waiting for an ACK that has not timed out yet
    pub in_flight: bool,
}

impl FrameSlot {
    pub fn new(frame: &Frame) -> Self {
        Self {
            bytes: frame.to_bytes(),
            seq: frame.header.seq,
            done: false,
            attempts: 0,
            rejections: 0,
            last_sent: None,
            ready_at: 0,
            in_flight: false,
        }
    }

    pub fn is_ready(&self, now: Millis) -> bool {
        !self.done && !self.in_flight && now >= self.ready_at
    }
}

/// A queued or in-progress transmission
#[derive(Debug, Clone)]
pub(crate) struct Transmission {
    pub tx_id: TxId,
    pub destination: NodeId,
    pub packet_type: PacketType,
    pub priority: Priority,
    pub require_ack: bool,
    pub state: TransmissionState,
    pub deadline: Option<Millis>,
    pub first_sent_at: Option<Millis>,
    pub slots: Vec<FrameSlot>,
    pub error: Option<TransmissionErrorKind>,
}

impl Transmission {
    pub fn attempts(&self) -> u8 {
        self.slots.iter().map(|s| s.attempts).max().unwrap_or(0)
    }

    pub fn done_count(&self) -> u16 {
        self.slots.iter().filter(|s| s.done).count() as u16
    }

    pub fn all_done(&self) -> bool {
        self.slots.iter().all(|s| s.done)
    }

    pub fn is_fragmented(&self) -> bool {
        self.slots.len() > 1
    }

    pub fn has_ready_frame(&self, now: Millis) -> bool {
        self.slots.iter().any(|s| s.is_ready(now))
    }

    pub fn status(&self) -> TransmissionStatus {
        TransmissionStatus {
            tx_id: self.tx_id,
            destination: self.destination,
            state: self.state,
            attempts: self.attempts(),
            fragments_total: self.slots.len() as u16,
            fragments_acked: self.done_count(),
            error: self.error,
        }
    }
}
