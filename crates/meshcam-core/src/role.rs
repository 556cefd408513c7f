//! Role assignment and coordinator election
//!
//! Every node runs the same election. On boot it becomes a candidate,
//! announces itself and listens for a discovery window. When the window
//! closes, the highest-ranked node it heard (score first, then lowest id)
//! becomes coordinator. Everyone else picks a role from its own hardware.
//!
//! ```text
//! UNASSIGNED ──start──► CANDIDATE ──window closes──► COORDINATOR
//!                           │                    └─► NODE / RELAY / STEALTH / ...
//!                           └── outranked coordinator heard ──► role
//! ```
//!
//! Ranking uses the score each node advertises, quantized to tenths, so all
//! nodes order candidates identically.

use crate::capability::{NodeCapabilities, PowerSource, Resolution};
use crate::config::{EligibilityWeights, RoleConfig};
use crate::protocol::message::Announcement;
use crate::protocol::packet::NodeId;
use crate::task::TaskType;
use crate::Millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Free storage a HUB needs beyond its SD card
const HUB_MIN_STORAGE_BYTES: u64 = 1024 * 1024;

/// What a node does in the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Elected board coordinator
    Coordinator,
    /// Plain camera node
    Node,
    /// Camera with on-board inference
    AiProcessor,
    /// Camera with large local storage
    Hub,
    /// Radio-only forwarder
    Relay,
    /// Conserving power; takes no tasks
    Stealth,
    /// Sensor without camera or relay duty
    EdgeSensor,
    /// Reaches the world over cellular or satellite only
    Portable,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Coordinator,
        Role::Node,
        Role::AiProcessor,
        Role::Hub,
        Role::Relay,
        Role::Stealth,
        Role::EdgeSensor,
        Role::Portable,
    ];

    /// Wire code
    pub fn as_byte(&self) -> u8 {
        match self {
            Role::Coordinator => 1,
            Role::Node => 2,
            Role::AiProcessor => 3,
            Role::Hub => 4,
            Role::Relay => 5,
            Role::Stealth => 6,
            Role::EdgeSensor => 7,
            Role::Portable => 8,
        }
    }

    /// Decode from wire code
    pub fn from_byte(byte: u8) -> Option<Self> {
        Role::ALL.into_iter().find(|r| r.as_byte() == byte)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Coordinator => "COORDINATOR",
            Role::Node => "NODE",
            Role::AiProcessor => "AI_PROCESSOR",
            Role::Hub => "HUB",
            Role::Relay => "RELAY",
            Role::Stealth => "STEALTH",
            Role::EdgeSensor => "EDGE_SENSOR",
            Role::Portable => "PORTABLE",
        }
    }

    /// Whether the coordinator may hand this node work
    pub fn accepts_tasks(&self) -> bool {
        !matches!(self, Role::Stealth)
    }

    /// Whether this node floods frames on behalf of others
    pub fn forwards_traffic(&self) -> bool {
        matches!(self, Role::Relay)
    }

    /// Placement bonus for running a task of `task_type`
    pub fn task_affinity(&self, task_type: TaskType) -> f32 {
        match (self, task_type) {
            (Role::AiProcessor, TaskType::Analyze) => 15.0,
            (Role::AiProcessor, TaskType::Capture) => 5.0,
            (Role::Hub, TaskType::Capture) => 10.0,
            (Role::Node, TaskType::Capture) => 5.0,
            (Role::Relay, TaskType::Relay) => 15.0,
            (Role::Portable, TaskType::Relay) => 5.0,
            (Role::EdgeSensor, TaskType::Custom(_)) => 5.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coordinator-eligibility score
///
/// Weighted battery, accelerator, storage and uptime, minus a per-hop
/// penalty. Mains power counts as a full battery.
pub fn eligibility_score(caps: &NodeCapabilities, hop_count: u8, weights: &EligibilityWeights) -> f32 {
    let battery = caps.effective_battery() as f32 * weights.battery_per_percent;
    let ai = if caps.has_ai_accelerator {
        weights.ai_accelerator_bonus
    } else {
        0.0
    };
    let storage = if weights.storage_saturation_bytes == 0 {
        0.0
    } else {
        weights.storage_max_bonus
            * (caps.storage_free_bytes as f32 / weights.storage_saturation_bytes as f32).min(1.0)
    };
    let uptime = if weights.uptime_saturation_secs == 0 {
        0.0
    } else {
        weights.uptime_max_bonus * (caps.uptime_secs as f32 / weights.uptime_saturation_secs as f32).min(1.0)
    };
    battery + ai + storage + uptime - weights.hop_penalty * hop_count as f32
}

/// Role a non-coordinator picks from its own hardware
pub fn assign_role(caps: &NodeCapabilities) -> Role {
    let battery = caps.effective_battery();

    if caps.has_camera {
        if caps.has_ai_accelerator
            && caps.has_psram
            && caps.max_resolution.at_least(Resolution::FULL_HD)
            && battery >= 50
        {
            return Role::AiProcessor;
        }
        if caps.max_resolution.at_least(Resolution::UXGA)
            && caps.has_sd_card
            && caps.storage_free_bytes > HUB_MIN_STORAGE_BYTES
        {
            return Role::Hub;
        }
        return Role::Node;
    }

    if caps.has_radio && (battery >= 50 || caps.power_source == PowerSource::Solar) {
        return Role::Relay;
    }

    if battery < 30 || caps.low_power_profile {
        return Role::Stealth;
    }

    if caps.is_backhaul_only() {
        return Role::Portable;
    }

    Role::EdgeSensor
}

/// Election progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleState {
    Unassigned,
    Candidate { window_ends: Millis },
    Assigned(Role),
}

/// Changes the node must act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEvent {
    /// A discovery window opened; announce ourselves
    ElectionStarted,
    RoleChanged {
        previous: Option<Role>,
        current: Role,
    },
    CoordinatorChanged {
        previous: Option<NodeId>,
        current: Option<NodeId>,
    },
    /// Two coordinators were visible; `demoted` tells whether we stepped down
    SplitBrain { other: NodeId, demoted: bool },
}

#[derive(Debug, Clone, Copy)]
struct Contender {
    score_tenths: u16,
    last_heard: Millis,
    /// Discovery order; earlier wins identical ties
    order: u64,
}

/// Per-node election and role state machine
#[derive(Debug)]
pub struct RoleEngine {
    node_id: NodeId,
    config: RoleConfig,
    caps: NodeCapabilities,
    hop_count: u8,
    state: RoleState,
    coordinator: Option<NodeId>,
    coordinator_heard: Millis,
    window_started: Millis,
    contenders: HashMap<NodeId, Contender>,
    next_order: u64,
}

impl RoleEngine {
    pub fn new(caps: NodeCapabilities, config: RoleConfig) -> Self {
        Self {
            node_id: caps.node_id,
            config,
            caps,
            hop_count: 0,
            state: RoleState::Unassigned,
            coordinator: None,
            coordinator_heard: 0,
            window_started: 0,
            contenders: HashMap::new(),
            next_order: 1,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn state(&self) -> RoleState {
        self.state
    }

    /// Current role, once assigned
    pub fn role(&self) -> Option<Role> {
        match self.state {
            RoleState::Assigned(role) => Some(role),
            _ => None,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.state == RoleState::Assigned(Role::Coordinator)
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.coordinator
    }

    pub fn capabilities(&self) -> &NodeCapabilities {
        &self.caps
    }

    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    pub fn set_hop_count(&mut self, hops: u8) {
        self.hop_count = hops;
    }

    /// Our own score as advertised
    pub fn score_tenths(&self) -> u16 {
        Announcement::quantize_score(eligibility_score(&self.caps, self.hop_count, &self.config.weights))
    }

    /// Announcement describing this node
    pub fn announcement(&self, active_tasks: u8) -> Announcement {
        Announcement {
            capabilities: self.caps.clone(),
            role: self.role(),
            score_tenths: self.score_tenths(),
            hop_count: self.hop_count,
            active_tasks,
            coordinator: self.coordinator,
        }
    }

    /// Open a discovery window
    pub fn start(&mut self, now: Millis) -> Vec<RoleEvent> {
        let mut events = Vec::new();
        let previous_coordinator = self.coordinator.take();
        if previous_coordinator.is_some() {
            events.push(RoleEvent::CoordinatorChanged {
                previous: previous_coordinator,
                current: None,
            });
        }

        self.state = RoleState::Candidate {
            window_ends: now.saturating_add(self.config.discovery_window_ms),
        };
        self.window_started = now;
        self.contenders.clear();
        info!(node = %self.node_id, score = self.score_tenths(), "Election started");
        events.push(RoleEvent::ElectionStarted);
        events
    }

    /// Does `(score_a, id_a, order_a)` outrank `(score_b, id_b, order_b)`
    fn outranks(a: (u16, NodeId, u64), b: (u16, NodeId, u64)) -> bool {
        (std::cmp::Reverse(a.0), a.1, a.2) < (std::cmp::Reverse(b.0), b.1, b.2)
    }

    /// Our rank tuple; we always know ourselves first
    fn own_rank(&self) -> (u16, NodeId, u64) {
        (self.score_tenths(), self.node_id, 0)
    }

    fn rank_of(&self, node: NodeId) -> Option<(u16, NodeId, u64)> {
        self.contenders
            .get(&node)
            .map(|c| (c.score_tenths, node, c.order))
    }

    fn set_role(&mut self, role: Role, events: &mut Vec<RoleEvent>) {
        let previous = self.role();
        self.state = RoleState::Assigned(role);
        if previous != Some(role) {
            info!(node = %self.node_id, ?previous, role = %role, "Role assigned");
            events.push(RoleEvent::RoleChanged { previous, current: role });
        }
    }

    fn set_coordinator(&mut self, coordinator: Option<NodeId>, now: Millis, events: &mut Vec<RoleEvent>) {
        self.coordinator_heard = now;
        if self.coordinator != coordinator {
            let previous = self.coordinator;
            self.coordinator = coordinator;
            info!(node = %self.node_id, ?previous, current = ?coordinator, "Coordinator changed");
            events.push(RoleEvent::CoordinatorChanged {
                previous,
                current: coordinator,
            });
        }
    }

    /// Record an announcement from a peer
    pub fn observe_announcement(&mut self, from: NodeId, announcement: &Announcement, now: Millis) -> Vec<RoleEvent> {
        let mut events = Vec::new();
        if from == self.node_id {
            return events;
        }

        let order = match self.contenders.get(&from) {
            Some(existing) => existing.order,
            None => {
                self.next_order += 1;
                self.next_order
            }
        };
        self.contenders.insert(
            from,
            Contender {
                score_tenths: announcement.score_tenths,
                last_heard: now,
                order,
            },
        );

        if announcement.role != Some(Role::Coordinator) {
            return events;
        }

        let theirs = (announcement.score_tenths, from, order);
        match self.state {
            RoleState::Unassigned => {}
            RoleState::Candidate { .. } => {
                if Self::outranks(theirs, self.own_rank()) {
                    debug!(node = %self.node_id, coordinator = %from, "Adopting outranking coordinator");
                    self.set_role(assign_role(&self.caps), &mut events);
                    self.set_coordinator(Some(from), now, &mut events);
                }
            }
            RoleState::Assigned(Role::Coordinator) => {
                let demote = Self::outranks(theirs, self.own_rank());
                warn!(
                    node = %self.node_id,
                    other = %from,
                    ours = self.score_tenths(),
                    theirs = announcement.score_tenths,
                    demote,
                    "Split brain: second coordinator heard"
                );
                events.push(RoleEvent::SplitBrain { other: from, demoted: demote });
                if demote {
                    self.set_role(assign_role(&self.caps), &mut events);
                    self.set_coordinator(Some(from), now, &mut events);
                }
            }
            RoleState::Assigned(_) => {
                if self.coordinator == Some(from) {
                    self.coordinator_heard = now;
                } else {
                    let better = match self.coordinator.and_then(|c| self.rank_of(c)) {
                        Some(current) => {
                            Self::outranks(theirs, current) || self.coordinator_lost(now)
                        }
                        None => true,
                    };
                    if better {
                        self.set_coordinator(Some(from), now, &mut events);
                    }
                }
            }
        }
        events
    }

    /// Any traffic proving the coordinator is alive (heartbeat, topology)
    pub fn observe_coordinator(&mut self, from: NodeId, now: Millis) {
        if self.coordinator == Some(from) {
            self.coordinator_heard = now;
        }
    }

    fn coordinator_lost(&self, now: Millis) -> bool {
        now.saturating_sub(self.coordinator_heard) > self.config.coordinator_timeout_ms()
    }

    /// Advance timers: close the discovery window or detect coordinator loss
    pub fn tick(&mut self, now: Millis) -> Vec<RoleEvent> {
        let mut events = Vec::new();
        match self.state {
            RoleState::Unassigned => {}
            RoleState::Candidate { window_ends } => {
                if now >= window_ends {
                    self.close_window(now, &mut events);
                }
            }
            RoleState::Assigned(Role::Coordinator) => {}
            RoleState::Assigned(role) => {
                if self.coordinator_lost(now) {
                    warn!(
                        node = %self.node_id,
                        role = %role,
                        coordinator = ?self.coordinator,
                        silent_ms = now.saturating_sub(self.coordinator_heard),
                        "Coordinator lost, starting fresh election"
                    );
                    events.extend(self.start(now));
                }
            }
        }
        events
    }

    fn close_window(&mut self, now: Millis, events: &mut Vec<RoleEvent>) {
        let window_started = self.window_started;
        let winner = self
            .contenders
            .iter()
            .filter(|(_, c)| c.last_heard >= window_started)
            .map(|(id, c)| (c.score_tenths, *id, c.order))
            .fold(self.own_rank(), |best, other| {
                if Self::outranks(other, best) {
                    other
                } else {
                    best
                }
            });

        let heard = self
            .contenders
            .values()
            .filter(|c| c.last_heard >= window_started)
            .count();

        if winner.1 == self.node_id && winner.2 == 0 {
            info!(node = %self.node_id, score = winner.0, peers = heard, "Won election");
            self.set_role(Role::Coordinator, events);
            self.set_coordinator(Some(self.node_id), now, events);
        } else {
            info!(node = %self.node_id, coordinator = %winner.1, peers = heard, "Election decided");
            self.set_role(assign_role(&self.caps), events);
            self.set_coordinator(Some(winner.1), now, events);
        }
    }

    /// Replace the advertised capabilities without re-deriving the role
    pub fn refresh_capabilities(&mut self, caps: NodeCapabilities) {
        self.caps = caps;
    }

    /// Apply freshly probed capabilities
    ///
    /// Non-coordinators re-derive their role. A coordinator that no longer
    /// outranks a recently heard peer steps down into a fresh election.
    pub fn update_capabilities(&mut self, caps: NodeCapabilities, now: Millis) -> Vec<RoleEvent> {
        let mut events = Vec::new();
        self.caps = caps;

        match self.state {
            RoleState::Assigned(Role::Coordinator) => {
                let timeout = self.config.coordinator_timeout_ms();
                let own = self.own_rank();
                let outranked = self.contenders.iter().any(|(id, c)| {
                    now.saturating_sub(c.last_heard) <= timeout
                        && Self::outranks((c.score_tenths, *id, c.order), own)
                });
                if outranked {
                    info!(node = %self.node_id, "Coordinator outranked after capability change, stepping down");
                    events.extend(self.start(now));
                }
            }
            RoleState::Assigned(_) => {
                let role = assign_role(&self.caps);
                self.set_role(role, &mut events);
            }
            RoleState::Unassigned | RoleState::Candidate { .. } => {}
        }
        events
    }

    /// Advertised score of a known peer
    pub fn peer_score(&self, node: NodeId) -> Option<u16> {
        self.contenders.get(&node).map(|c| c.score_tenths)
    }
}
