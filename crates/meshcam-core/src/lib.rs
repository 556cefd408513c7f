//! # Camera Mesh Core
//!
//! Battery and solar powered camera nodes organize themselves into a
//! wireless mesh over a slow, lossy long-range radio, with no central
//! infrastructure:
//!
//! - **Capability detection**: each node describes its hardware and power
//! - **Role assignment**: a discovery window elects one COORDINATOR; every
//!   other node picks a role (NODE, RELAY, STEALTH, ...) from its hardware
//! - **Task distribution**: the coordinator places capture, analyze and
//!   relay tasks on the best-scoring node and balances load
//! - **Failure recovery**: heartbeat silence marks nodes inactive, their
//!   work is reassigned, and a lost coordinator triggers a fresh election
//! - **Reliable transmission**: priority queue, token bucket, fragmentation,
//!   acknowledgment with exponential backoff
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── MeshNode ─────────────────────────────┐
//! │  CapabilityProvider ─► RoleEngine ─► BoardCoordinator (if elected)│
//! │                           │               │                       │
//! │                      PeerTable      TASK_ASSIGN / TOPOLOGY        │
//! │                           │               │                       │
//! │        FloodRelay ◄── ReliableTransport (RTP) ◄── Message codec   │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                │ Radio (send_raw / receive_raw)
//! ```
//!
//! Everything is single-threaded and cooperative: components expose
//! non-blocking `process`/`tick` calls that take the current time in
//! milliseconds ([`Millis`]). Nothing reads a clock or sleeps.
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshcam_core::{MeshConfig, MeshNode, NodeCapabilities, NodeEvent, StaticCapabilities};
//!
//! let mut node = MeshNode::new(MeshConfig::default(), radio, StaticCapabilities::new(caps))?;
//! loop {
//!     for event in node.process(now_ms()) {
//!         if let NodeEvent::TaskAssigned { assign, .. } = event {
//!             let jpeg = capture(&assign.params);
//!             node.report_task_result(assign.task_id, TaskStatus::Complete, &jpeg, now_ms())?;
//!         }
//!     }
//! }
//! ```

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod role;
pub mod rtp;
pub mod simulation;
pub mod task;
pub mod traits;

/// Monotonic milliseconds, supplied by the caller
pub type Millis = u64;

pub use capability::{CapabilityDetector, HardwareProfile, NodeCapabilities, PowerSource, Resolution};
pub use config::{CoordinatorConfig, MeshConfig, RelayConfig, RoleConfig, RtpConfig, RtpPreset};
pub use coordinator::{BoardCoordinator, CoordinatorEvent, TaskFailure};
pub use error::{MeshError, MeshResult, ProtocolError};
pub use node::{MeshNode, NodeEvent};
pub use protocol::{Message, NodeId, PacketType};
pub use role::{assign_role, Role, RoleState};
pub use rtp::{
    BandwidthStats, Priority, ReliableTransport, RtpEvent, TransmissionErrorKind, TransmissionState,
    TransmissionStatus, TxId,
};
pub use simulation::{MeshSimulator, SimConfig};
pub use task::{Task, TaskId, TaskState, TaskStatus, TaskType};
pub use traits::{CapabilityProvider, Radio, StaticCapabilities};
