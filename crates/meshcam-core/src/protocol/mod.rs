//! Wire protocol: frame header, message bodies and duplicate suppression

pub mod dedup;
pub mod message;
pub mod packet;

pub use dedup::{DedupVerdict, DedupWindow};
pub use message::{
    create_discovery_message, parse_discovery_message, Announcement, Message, TaskAssign, TaskResult,
    Topology, TopologyEntry,
};
pub use packet::{FragmentInfo, Frame, NodeId, PacketFlags, PacketHeader, PacketType, PROTOCOL_VERSION};
