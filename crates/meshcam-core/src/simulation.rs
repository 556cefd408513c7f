//! In-memory mesh simulation
//!
//! Runs a set of [`MeshNode`]s over a shared medium with a virtual clock.
//! It models:
//!
//! - Per-frame loss, drawn from a seeded RNG so runs are reproducible
//! - A link matrix: any pair of nodes may be out of range
//! - Node kill and revive (revive is a reboot with fresh state)
//! - One tick of propagation delay for every frame
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshcam_core::simulation::{MeshSimulator, SimConfig};
//!
//! let mut sim = MeshSimulator::new(SimConfig::default().with_seed(7));
//! let a = sim.add_node(camera_caps)?;
//! let b = sim.add_node(relay_caps)?;
//! sim.run_for(35_000);
//! assert_eq!(sim.coordinators(), vec![a]);
//! ```

use crate::capability::NodeCapabilities;
use crate::config::MeshConfig;
use crate::error::{MeshError, MeshResult};
use crate::node::{MeshNode, NodeEvent};
use crate::protocol::packet::NodeId;
use crate::role::Role;
use crate::traits::{Radio, StaticCapabilities};
use crate::Millis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

/// A node as the simulator runs it
pub type SimNode = MeshNode<SimRadio, StaticCapabilities>;

/// Radio attached to the simulated medium
#[derive(Debug, Default)]
pub struct SimRadio {
    inbox: VecDeque<(Vec<u8>, i16)>,
    outbox: Vec<Vec<u8>>,
    last_rssi: i16,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames waiting to be read by the node
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    fn deliver(&mut self, bytes: Vec<u8>, rssi: i16) {
        self.inbox.push_back((bytes, rssi));
    }

    fn take_outbox(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    fn clear(&mut self) {
        self.inbox.clear();
        self.outbox.clear();
    }
}

impl Radio for SimRadio {
    fn send_raw(&mut self, _destination: NodeId, data: &[u8]) -> bool {
        self.outbox.push(data.to_vec());
        true
    }

    fn receive_raw(&mut self) -> Option<Vec<u8>> {
        let (bytes, rssi) = self.inbox.pop_front()?;
        self.last_rssi = rssi;
        Some(bytes)
    }

    fn last_rssi(&self) -> i16 {
        self.last_rssi
    }
}

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Seed for the loss model and transport sequence numbers
    pub seed: u64,
    /// Probability that any one copy of a frame is lost
    pub loss_rate: f64,
    /// Virtual time per step
    pub tick_ms: u64,
    /// Signal strength of links without an explicit setting
    pub default_rssi: i16,
    /// Node configuration used by `add_node`
    pub mesh: MeshConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            loss_rate: 0.0,
            tick_ms: 100,
            default_rssi: -70,
            mesh: MeshConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_loss_rate(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_tick(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms.max(1);
        self
    }

    pub fn with_mesh_config(mut self, mesh: MeshConfig) -> Self {
        self.mesh = mesh;
        self
    }
}

/// Radio path between two nodes; symmetric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub in_range: bool,
    pub rssi: i16,
    pub loss_rate: f64,
}

/// Medium counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    /// Frames put on the air
    pub frames_sent: u64,
    /// Copies that reached a receiver
    pub copies_delivered: u64,
    /// Copies dropped by the loss model
    pub copies_lost: u64,
    /// Copies not carried because the receiver was out of range
    pub copies_out_of_range: u64,
}

/// Shared broadcast medium
#[derive(Debug)]
pub struct SimMedium {
    default_link: Link,
    links: HashMap<(NodeId, NodeId), Link>,
    rng: StdRng,
    stats: MediumStats,
}

impl SimMedium {
    pub fn new(seed: u64, loss_rate: f64, rssi: i16) -> Self {
        Self {
            default_link: Link {
                in_range: true,
                rssi,
                loss_rate,
            },
            links: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
            stats: MediumStats::default(),
        }
    }

    fn key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn link(&self, a: NodeId, b: NodeId) -> Link {
        self.links
            .get(&Self::key(a, b))
            .copied()
            .unwrap_or(self.default_link)
    }

    pub fn set_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        self.links.insert(Self::key(a, b), link);
    }

    /// Put two nodes in or out of range of each other
    pub fn set_in_range(&mut self, a: NodeId, b: NodeId, in_range: bool) {
        let link = Link {
            in_range,
            ..self.link(a, b)
        };
        self.set_link(a, b, link);
    }

    pub fn set_loss_rate(&mut self, a: NodeId, b: NodeId, loss_rate: f64) {
        let link = Link {
            loss_rate: loss_rate.clamp(0.0, 1.0),
            ..self.link(a, b)
        };
        self.set_link(a, b, link);
    }

    pub fn stats(&self) -> MediumStats {
        self.stats
    }

    /// Whether one copy of a frame from `from` reaches `to`, and at what RSSI
    fn carry(&mut self, from: NodeId, to: NodeId) -> Option<i16> {
        let link = self.link(from, to);
        if !link.in_range {
            self.stats.copies_out_of_range += 1;
            return None;
        }
        if link.loss_rate > 0.0 && self.rng.gen_bool(link.loss_rate.min(1.0)) {
            self.stats.copies_lost += 1;
            return None;
        }
        self.stats.copies_delivered += 1;
        Some(link.rssi)
    }
}

#[derive(Debug)]
struct SimEntry {
    node: SimNode,
    config: MeshConfig,
    alive: bool,
}

/// Multi-node mesh simulator with a virtual clock
#[derive(Debug)]
pub struct MeshSimulator {
    config: SimConfig,
    medium: SimMedium,
    nodes: BTreeMap<NodeId, SimEntry>,
    seq_rng: StdRng,
    now: Millis,
}

impl MeshSimulator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            medium: SimMedium::new(config.seed, config.loss_rate, config.default_rssi),
            seq_rng: StdRng::seed_from_u64(config.seed.wrapping_add(0x5eed)),
            nodes: BTreeMap::new(),
            now: 0,
            config,
        }
    }

    /// Add a node with the simulator's mesh configuration
    pub fn add_node(&mut self, caps: NodeCapabilities) -> MeshResult<NodeId> {
        let config = self.config.mesh.clone();
        self.add_node_with_config(caps, config)
    }

    pub fn add_node_with_config(&mut self, caps: NodeCapabilities, config: MeshConfig) -> MeshResult<NodeId> {
        let config = config.with_node_id(caps.node_id);
        let node_id = caps.node_id;
        if self.nodes.contains_key(&node_id) {
            return Err(MeshError::Config(format!("node {node_id} already simulated")));
        }
        let node = self.boot(caps, config.clone())?;
        info!(node = %node_id, at = self.now, "Simulated node added");
        self.nodes.insert(
            node_id,
            SimEntry {
                node,
                config,
                alive: true,
            },
        );
        Ok(node_id)
    }

    fn boot(&mut self, caps: NodeCapabilities, config: MeshConfig) -> MeshResult<SimNode> {
        let seq = self.seq_rng.gen::<u16>();
        Ok(MeshNode::new(config, SimRadio::new(), StaticCapabilities::new(caps))?.with_initial_seq(seq))
    }

    /// Power a node off; it neither sends nor hears anything
    pub fn kill(&mut self, node_id: NodeId) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(entry) if entry.alive => {
                entry.alive = false;
                entry.node.radio_mut().clear();
                info!(node = %node_id, at = self.now, "Simulated node killed");
                true
            }
            _ => false,
        }
    }

    /// Reboot a killed node with its last capabilities and empty state
    pub fn revive(&mut self, node_id: NodeId) -> MeshResult<bool> {
        let Some(entry) = self.nodes.get_mut(&node_id) else {
            return Err(MeshError::UnknownNode(node_id));
        };
        if entry.alive {
            return Ok(false);
        }
        let caps = entry.node.provider_mut().get().clone();
        let config = entry.config.clone();
        let node = self.boot(caps, config)?;
        if let Some(entry) = self.nodes.get_mut(&node_id) {
            entry.node = node;
            entry.alive = true;
        }
        info!(node = %node_id, at = self.now, "Simulated node revived");
        Ok(true)
    }

    pub fn is_alive(&self, node_id: NodeId) -> bool {
        self.nodes.get(&node_id).is_some_and(|e| e.alive)
    }

    /// Change what a node's capability provider reports
    pub fn set_capabilities(&mut self, node_id: NodeId, caps: NodeCapabilities) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(entry) => {
                entry.node.provider_mut().set(caps);
                true
            }
            None => false,
        }
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn medium(&self) -> &SimMedium {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut SimMedium {
        &mut self.medium
    }

    pub fn node(&self, node_id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&node_id).map(|e| &e.node)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&node_id).map(|e| &mut e.node)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Live nodes that currently hold the coordinator role
    pub fn coordinators(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, e)| e.alive && e.node.is_coordinator())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Current role of every live node
    pub fn roles(&self) -> BTreeMap<NodeId, Option<Role>> {
        self.nodes
            .iter()
            .filter(|(_, e)| e.alive)
            .map(|(id, e)| (*id, e.node.role()))
            .collect()
    }

    /// Run every live node once, then carry their frames over the medium
    pub fn step(&mut self) -> Vec<(NodeId, NodeEvent)> {
        let now = self.now;
        let mut events = Vec::new();
        for (id, entry) in self.nodes.iter_mut().filter(|(_, e)| e.alive) {
            events.extend(entry.node.process(now).into_iter().map(|event| (*id, event)));
        }

        let alive: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, e)| e.alive)
            .map(|(id, _)| *id)
            .collect();
        for sender in &alive {
            let frames = match self.nodes.get_mut(sender) {
                Some(entry) => entry.node.radio_mut().take_outbox(),
                None => continue,
            };
            for frame in frames {
                self.medium.stats.frames_sent += 1;
                for receiver in alive.iter().filter(|r| *r != sender) {
                    let Some(rssi) = self.medium.carry(*sender, *receiver) else {
                        continue;
                    };
                    if let Some(entry) = self.nodes.get_mut(receiver) {
                        entry.node.radio_mut().deliver(frame.clone(), rssi);
                    }
                }
            }
        }

        self.now += self.config.tick_ms;
        events
    }

    /// Step until `duration_ms` of virtual time has passed
    pub fn run_for(&mut self, duration_ms: u64) -> Vec<(NodeId, NodeEvent)> {
        let until = self.now.saturating_add(duration_ms);
        let mut events = Vec::new();
        while self.now < until {
            events.extend(self.step());
        }
        debug!(now = self.now, events = events.len(), "Simulation advanced");
        events
    }

    /// Step until `done` holds or `limit_ms` passes; returns whether it held
    pub fn run_until(&mut self, limit_ms: u64, mut done: impl FnMut(&Self) -> bool) -> bool {
        let until = self.now.saturating_add(limit_ms);
        while self.now < until {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Resolution;

    fn strong(id: u32) -> NodeCapabilities {
        NodeCapabilities::empty(NodeId::from_u32(id))
            .with_camera(Resolution::FULL_HD)
            .with_radio()
            .with_ai_accelerator()
            .with_psram()
            .with_battery(100)
    }

    fn relay(id: u32) -> NodeCapabilities {
        NodeCapabilities::empty(NodeId::from_u32(id)).with_radio().with_battery(60)
    }

    fn weak(id: u32) -> NodeCapabilities {
        NodeCapabilities::empty(NodeId::from_u32(id)).with_radio().with_battery(20)
    }

    #[test]
    fn test_medium_loss_is_seeded() {
        let run = |seed| {
            let mut medium = SimMedium::new(seed, 0.5, -70);
            (0..64)
                .map(|_| medium.carry(NodeId::from_u32(1), NodeId::from_u32(2)).is_some())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
        let delivered = run(9).iter().filter(|d| **d).count();
        assert!(delivered > 0 && delivered < 64);
    }

    #[test]
    fn test_link_matrix_is_symmetric() {
        let mut medium = SimMedium::new(1, 0.0, -70);
        let (a, b) = (NodeId::from_u32(1), NodeId::from_u32(2));
        medium.set_in_range(b, a, false);
        assert!(!medium.link(a, b).in_range);
        assert_eq!(medium.carry(a, b), None);
        assert_eq!(medium.stats().copies_out_of_range, 1);
    }

    #[test]
    fn test_single_coordinator_after_window() {
        let mut sim = MeshSimulator::new(SimConfig::default());
        let a = sim.add_node(strong(1)).unwrap();
        let b = sim.add_node(relay(2)).unwrap();
        let c = sim.add_node(weak(3)).unwrap();

        sim.run_for(31_000);
        assert_eq!(sim.coordinators(), vec![a]);
        let roles = sim.roles();
        assert_eq!(roles[&b], Some(Role::Relay));
        assert_eq!(roles[&c], Some(Role::Stealth));
        assert_eq!(sim.node(c).unwrap().coordinator(), Some(a));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut sim = MeshSimulator::new(SimConfig::default());
        sim.add_node(strong(1)).unwrap();
        assert!(matches!(sim.add_node(strong(1)), Err(MeshError::Config(_))));
    }

    #[test]
    fn test_kill_coordinator_triggers_reelection() {
        let mut sim = MeshSimulator::new(SimConfig::default());
        let a = sim.add_node(strong(1)).unwrap();
        let b = sim.add_node(relay(2)).unwrap();
        sim.add_node(weak(3)).unwrap();
        sim.run_for(31_000);
        assert_eq!(sim.coordinators(), vec![a]);

        assert!(sim.kill(a));
        assert!(!sim.kill(a));
        // 30 s to notice the silence, 30 s discovery window
        let elected = sim.run_until(75_000, |s| s.coordinators() == vec![b]);
        assert!(elected);

        assert_eq!(sim.revive(a).unwrap(), true);
        assert!(sim.is_alive(a));
    }

    #[test]
    fn test_relay_extends_reach() {
        let mut sim = MeshSimulator::new(SimConfig::default());
        let a = sim.add_node(strong(1)).unwrap();
        let r = sim.add_node(relay(2)).unwrap();
        let c = sim.add_node(weak(3)).unwrap();
        sim.medium_mut().set_in_range(a, c, false);

        let converged = sim.run_until(120_000, |s| {
            s.coordinators() == vec![a]
                && s.node(c).and_then(|n| n.coordinator()) == Some(a)
                && s.node(a)
                    .and_then(|n| n.board())
                    .and_then(|b| b.registry().get(&c))
                    .is_some_and(|entry| entry.hop_count == 2)
        });
        assert!(converged);
        assert_eq!(sim.node(r).unwrap().role(), Some(Role::Relay));
    }
}
