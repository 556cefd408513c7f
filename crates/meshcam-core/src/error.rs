//! Error types for the mesh core.
//!
//! Per-packet problems (malformed frames, duplicates, radio refusals) are
//! handled where they occur: logged, counted and dropped. Only outcomes the
//! application can observe travel up as `MeshError` values.

use crate::protocol::packet::NodeId;
use crate::rtp::TxId;
use crate::task::TaskId;
use thiserror::Error;

/// Codec failures while decoding a frame or message body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame shorter than the fixed header or a declared length
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Unsupported protocol version
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Unknown packet type code
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    /// A field carried a value outside its domain
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u32 },

    /// Body ended in the middle of a field
    #[error("unexpected end of body")]
    UnexpectedEof,

    /// Bytes left over after the body was decoded
    #[error("{0} trailing bytes after body")]
    TrailingBytes(usize),
}

impl From<std::io::Error> for ProtocolError {
    fn from(_: std::io::Error) -> Self {
        // Cursor reads only fail on short input
        ProtocolError::UnexpectedEof
    }
}

/// Mesh error type
#[derive(Error, Debug)]
pub enum MeshError {
    /// Transmission queue is saturated; caller must back off or drop
    #[error("transmission queue full")]
    QueueFull,

    /// Retries exhausted on a require-ack transmission
    #[error("transmission {0} failed")]
    TransmissionFailed(TxId),

    /// Transmission deadline passed before completion
    #[error("transmission {0} expired")]
    TransmissionExpired(TxId),

    /// Payload needs more fragments than the wire format can address
    #[error("payload of {size} bytes exceeds {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame could not be parsed
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] ProtocolError),

    /// No active node can take the task
    #[error("no eligible node for task {0}")]
    NoEligibleNode(TaskId),

    /// Two coordinators observed at once
    #[error("split brain: coordinator {other} outranks {local}")]
    SplitBrainDetected { local: NodeId, other: NodeId },

    /// Operation is only valid on the elected coordinator
    #[error("node is not the coordinator")]
    NotCoordinator,

    /// Task id is not in the ledger
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// Task id already present in the ledger
    #[error("duplicate task {0}")]
    DuplicateTask(TaskId),

    /// Target node is not registered or not active
    #[error("unknown or inactive node {0}")]
    UnknownNode(NodeId),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for mesh operations
pub type MeshResult<T> = std::result::Result<T, MeshError>;
