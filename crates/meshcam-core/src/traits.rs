//! Seams to the outside world
//!
//! The core never touches hardware directly. It talks to the radio through
//! [`Radio`] and learns about its own hardware through [`CapabilityProvider`],
//! so that the same node logic runs on a device, over UDP, or inside the
//! in-memory simulator.

use crate::capability::NodeCapabilities;
use crate::protocol::packet::NodeId;
use std::fmt::Debug;

/// Non-blocking, best-effort frame transport
///
/// Implementations must never block. Delivery is not guaranteed; the
/// reliable transport above handles acknowledgment and retry.
pub trait Radio: Debug {
    /// Hand a frame to the radio
    ///
    /// `destination` is informational for link-layer addressing; the frame
    /// header carries the authoritative target. Returns `false` when the
    /// radio refused the frame (busy, buffer full).
    fn send_raw(&mut self, destination: NodeId, data: &[u8]) -> bool;

    /// Take the next received frame, if any
    fn receive_raw(&mut self) -> Option<Vec<u8>>;

    /// Signal strength of the most recently received frame, in dBm
    fn last_rssi(&self) -> i16;
}

/// Source of this node's capability descriptor
pub trait CapabilityProvider: Debug {
    /// Current capabilities; must not fail
    fn current_capabilities(&mut self) -> NodeCapabilities;
}

/// Fixed capabilities, settable by the owner
///
/// Used by the simulator and tests where there is no hardware to probe.
#[derive(Debug, Clone)]
pub struct StaticCapabilities {
    caps: NodeCapabilities,
}

impl StaticCapabilities {
    pub fn new(caps: NodeCapabilities) -> Self {
        Self { caps }
    }

    /// Replace the advertised capabilities
    pub fn set(&mut self, caps: NodeCapabilities) {
        self.caps = caps;
    }

    pub fn get(&self) -> &NodeCapabilities {
        &self.caps
    }
}

impl CapabilityProvider for StaticCapabilities {
    fn current_capabilities(&mut self) -> NodeCapabilities {
        self.caps.clone()
    }
}

impl<T: CapabilityProvider + ?Sized> CapabilityProvider for Box<T> {
    fn current_capabilities(&mut self) -> NodeCapabilities {
        (**self).current_capabilities()
    }
}

impl<T: Radio + ?Sized> Radio for Box<T> {
    fn send_raw(&mut self, destination: NodeId, data: &[u8]) -> bool {
        (**self).send_raw(destination, data)
    }

    fn receive_raw(&mut self) -> Option<Vec<u8>> {
        (**self).receive_raw()
    }

    fn last_rssi(&self) -> i16 {
        (**self).last_rssi()
    }
}
