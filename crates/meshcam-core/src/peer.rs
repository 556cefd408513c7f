//! Peer table
//!
//! Every node, coordinator or not, remembers the latest announcement heard
//! from each peer. Capabilities are replaced wholesale by newer data, never
//! merged field by field.

use crate::capability::NodeCapabilities;
use crate::protocol::message::{Announcement, TopologyEntry};
use crate::protocol::packet::NodeId;
use crate::role::Role;
use crate::Millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Received signal strength tracked as an exponential moving average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkQuality {
    /// Smoothed RSSI in dBm
    pub rssi: f32,
    /// Frames heard from this peer
    pub frames_received: u32,
}

impl LinkQuality {
    /// Weight of a new sample
    const ALPHA: f32 = 0.3;

    pub fn new(rssi: i16) -> Self {
        Self {
            rssi: rssi as f32,
            frames_received: 1,
        }
    }

    pub fn update(&mut self, rssi: i16) {
        self.rssi = Self::ALPHA * rssi as f32 + (1.0 - Self::ALPHA) * self.rssi;
        self.frames_received = self.frames_received.saturating_add(1);
    }

    /// 0.0 (-120 dBm) to 1.0 (-40 dBm)
    pub fn quality_score(&self) -> f32 {
        ((self.rssi + 120.0) / 80.0).clamp(0.0, 1.0)
    }
}

/// What we know about one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub node_id: NodeId,
    /// Latest capabilities; `None` when only known from a topology list
    pub capabilities: Option<NodeCapabilities>,
    pub role: Option<Role>,
    pub score_tenths: u16,
    /// Hops between us and the peer
    pub hop_count: u8,
    pub active_tasks: u8,
    /// Coordinator the peer believes in
    pub coordinator: Option<NodeId>,
    pub last_seen: Millis,
    pub link: Option<LinkQuality>,
}

impl Peer {
    fn new(node_id: NodeId, now: Millis) -> Self {
        Self {
            node_id,
            capabilities: None,
            role: None,
            score_tenths: 0,
            hop_count: 1,
            active_tasks: 0,
            coordinator: None,
            last_seen: now,
            link: None,
        }
    }

    pub fn is_stale(&self, now: Millis, timeout_ms: u64) -> bool {
        now.saturating_sub(self.last_seen) > timeout_ms
    }
}

/// Latest-known state of every peer
#[derive(Debug)]
pub struct PeerTable {
    peers: HashMap<NodeId, Peer>,
    max_entries: usize,
}

impl PeerTable {
    pub fn new(max_entries: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn entry(&mut self, node_id: NodeId, now: Millis) -> &mut Peer {
        if !self.peers.contains_key(&node_id) && self.peers.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.peers
            .entry(node_id)
            .or_insert_with(|| Peer::new(node_id, now))
    }

    /// Record an announcement relayed over `hops` hops
    pub fn update_from_announcement(&mut self, announcement: &Announcement, hops: u8, rssi: i16, now: Millis) {
        let node_id = announcement.capabilities.node_id;
        let peer = self.entry(node_id, now);
        peer.capabilities = Some(announcement.capabilities.clone());
        peer.role = announcement.role;
        peer.score_tenths = announcement.score_tenths;
        peer.hop_count = hops;
        peer.active_tasks = announcement.active_tasks;
        peer.coordinator = announcement.coordinator;
        peer.last_seen = now;
        // Signal strength only means something for direct neighbours
        if hops <= 1 {
            match peer.link.as_mut() {
                Some(link) => link.update(rssi),
                None => peer.link = Some(LinkQuality::new(rssi)),
            }
        }
    }

    /// Any frame from `node_id` proves it is alive
    pub fn touch(&mut self, node_id: NodeId, now: Millis) {
        if let Some(peer) = self.peers.get_mut(&node_id) {
            peer.last_seen = now;
        }
    }

    /// Adopt the coordinator's view of roles; liveness is not implied
    pub fn apply_topology(&mut self, entries: &[TopologyEntry], own_id: NodeId, now: Millis) {
        for entry in entries.iter().filter(|e| e.node != own_id) {
            let peer = self.entry(entry.node, now);
            peer.role = entry.role;
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Peer> {
        self.peers.get(node_id)
    }

    /// All peers, in id order
    pub fn all(&self) -> Vec<&Peer> {
        let mut peers: Vec<_> = self.peers.values().collect();
        peers.sort_by_key(|p| p.node_id);
        peers
    }

    /// Peers heard within `timeout_ms`
    pub fn active(&self, now: Millis, timeout_ms: u64) -> Vec<&Peer> {
        self.all()
            .into_iter()
            .filter(|p| !p.is_stale(now, timeout_ms))
            .collect()
    }

    pub fn prune_stale(&mut self, now: Millis, timeout_ms: u64) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, p| !p.is_stale(now, timeout_ms));
        before - self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .peers
            .iter()
            .min_by_key(|(_, p)| p.last_seen)
            .map(|(id, _)| *id)
        {
            self.peers.remove(&oldest);
        }
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(64)
    }
}
