//! Mesh node run-loop
//!
//! [`MeshNode`] composes everything a camera node needs: the radio, the
//! capability provider, the reliable transport, the role engine, the peer
//! table, the flood relay and, while elected, the board coordinator.
//!
//! ```text
//!            ┌──────────────────────── MeshNode::process(now) ───────────────────────┐
//!            │ 1. poll capabilities ──► re-advertise on significant change           │
//!  Radio ───►│ 2. drain radio ──► relay forward ──► RTP ──► dispatch messages        │
//!            │ 3. role engine tick ──► create / drop BoardCoordinator                │
//!            │ 4. heartbeat                                                          │
//!            │ 5. coordinator tick ──► TASK_ASSIGN / TOPOLOGY                        │
//!  Radio ◄───│ 6. RTP process ──► NodeEvents                                         │
//!            └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here blocks or reads a clock; the caller supplies `now`.

use crate::capability::{needs_readvertise, NodeCapabilities};
use crate::config::MeshConfig;
use crate::coordinator::{BoardCoordinator, CoordinatorAction, CoordinatorEvent};
use crate::error::{MeshError, MeshResult};
use crate::peer::{Peer, PeerTable};
use crate::protocol::message::{Message, TaskAssign, TaskResult};
use crate::protocol::packet::{NodeId, PacketType};
use crate::relay::{hop_count, FloodRelay};
use crate::role::{Role, RoleEngine, RoleEvent, RoleState};
use crate::rtp::{
    BandwidthStats, Delivery, Priority, ReliableTransport, RtpEvent, TransmissionErrorKind, TransmissionStatus,
    TxId,
};
use crate::task::{Task, TaskId, TaskState, TaskStatus};
use crate::traits::{CapabilityProvider, Radio};
use crate::Millis;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Task priority at or above which TASK_ASSIGN travels as HIGH
const URGENT_TASK_PRIORITY: u8 = 8;

/// Coordinator actions handled per flush; the rest wait for the next tick
const MAX_FLUSH_PASSES: usize = 4;

/// What happened during a tick, for the application
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    RoleChanged {
        previous: Option<Role>,
        current: Role,
    },
    CoordinatorChanged {
        previous: Option<NodeId>,
        current: Option<NodeId>,
    },
    SplitBrain {
        other: NodeId,
        demoted: bool,
    },
    /// Work for this node; answer with `report_task_result`
    TaskAssigned {
        coordinator: NodeId,
        assign: TaskAssign,
    },
    TopologyUpdated {
        coordinator: NodeId,
        epoch: u16,
    },
    /// An application transmission finished
    TransmissionComplete {
        tx_id: TxId,
        success: bool,
    },
    TransmissionError {
        tx_id: TxId,
        kind: TransmissionErrorKind,
    },
    Coordinator(CoordinatorEvent),
}

/// A camera mesh node
#[derive(Debug)]
pub struct MeshNode<R: Radio, C: CapabilityProvider> {
    node_id: NodeId,
    config: MeshConfig,
    radio: R,
    provider: C,
    transport: ReliableTransport,
    role: RoleEngine,
    peers: PeerTable,
    relay: FloodRelay,
    coordinator: Option<BoardCoordinator>,
    started: bool,
    last_heartbeat: Millis,
    last_capability_poll: Millis,
    heartbeat_due: bool,
    /// Latest topology accepted: (coordinator, epoch)
    topology: Option<(NodeId, u16)>,
    /// TASK_ASSIGN transmissions awaiting their outcome
    pending_assigns: HashMap<TxId, (TaskId, NodeId)>,
    /// Transmissions whose outcome the application wants to hear about
    app_tx: HashSet<TxId>,
    /// Tasks this node is executing, with the coordinator that assigned them
    local_tasks: BTreeMap<TaskId, NodeId>,
    events: Vec<NodeEvent>,
}

impl<R: Radio, C: CapabilityProvider> MeshNode<R, C> {
    /// Build a node; `config.node_id` overrides the provider's id
    pub fn new(config: MeshConfig, radio: R, mut provider: C) -> MeshResult<Self> {
        config.validate()?;
        let mut caps = provider.current_capabilities();
        let node_id = config.node_id.unwrap_or(caps.node_id);
        if node_id.is_broadcast() {
            return Err(MeshError::Config("node id 0 is reserved for broadcast".into()));
        }
        caps.node_id = node_id;

        Ok(Self {
            node_id,
            transport: ReliableTransport::new(node_id, config.rtp.clone()),
            role: RoleEngine::new(caps, config.role.clone()),
            peers: PeerTable::new(config.max_peers),
            relay: FloodRelay::new(node_id, &config.relay),
            config,
            radio,
            provider,
            coordinator: None,
            started: false,
            last_heartbeat: 0,
            last_capability_poll: 0,
            heartbeat_due: false,
            topology: None,
            pending_assigns: HashMap::new(),
            app_tx: HashSet::new(),
            local_tasks: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    /// Start transport sequence numbers at `seq` instead of a random value
    pub fn with_initial_seq(mut self, seq: u16) -> Self {
        self.transport = ReliableTransport::new(self.node_id, self.config.rtp.clone()).with_initial_seq(seq);
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn role(&self) -> Option<Role> {
        self.role.role()
    }

    pub fn role_state(&self) -> RoleState {
        self.role.state()
    }

    pub fn is_coordinator(&self) -> bool {
        self.role.is_coordinator()
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.role.coordinator()
    }

    pub fn capabilities(&self) -> &NodeCapabilities {
        self.role.capabilities()
    }

    pub fn score_tenths(&self) -> u16 {
        self.role.score_tenths()
    }

    /// Known peers, sorted by id
    pub fn peers(&self) -> Vec<&Peer> {
        self.peers.all()
    }

    /// The board coordinator, while this node holds the role
    pub fn board(&self) -> Option<&BoardCoordinator> {
        self.coordinator.as_ref()
    }

    /// Tasks currently executing here
    pub fn local_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.local_tasks.keys().copied()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn provider_mut(&mut self) -> &mut C {
        &mut self.provider
    }

    pub fn transmission_status(&self, tx_id: TxId) -> Option<TransmissionStatus> {
        self.transport.transmission_status(tx_id)
    }

    pub fn statistics(&mut self, now: Millis) -> BandwidthStats {
        self.transport.statistics(now)
    }

    /// Ledger state of a task (coordinator only)
    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.coordinator.as_ref().and_then(|c| c.task_state(task_id))
    }

    /// Queue an application payload
    pub fn transmit_data(
        &mut self,
        destination: NodeId,
        packet_type: PacketType,
        payload: &[u8],
        priority: Priority,
        require_ack: bool,
    ) -> MeshResult<TxId> {
        let tx_id = self
            .transport
            .transmit_data(destination, packet_type, payload, priority, require_ack)?;
        self.app_tx.insert(tx_id);
        Ok(tx_id)
    }

    /// Place a task on the mesh; only valid on the coordinator
    pub fn assign_task(&mut self, task: Task, target: Option<NodeId>, now: Millis) -> MeshResult<NodeId> {
        let coordinator = self.coordinator.as_mut().ok_or(MeshError::NotCoordinator)?;
        let result = coordinator.assign_task(task, target, now);
        self.flush_coordinator(now);
        result
    }

    /// Report progress or the outcome of a task assigned to this node
    ///
    /// Returns the transmission carrying the result, or `None` when this
    /// node is its own coordinator.
    pub fn report_task_result(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
        data: &[u8],
        now: Millis,
    ) -> MeshResult<Option<TxId>> {
        let owner = *self
            .local_tasks
            .get(&task_id)
            .ok_or(MeshError::UnknownTask(task_id))?;
        if status != TaskStatus::Running {
            self.local_tasks.remove(&task_id);
        }
        let result = TaskResult {
            task_id,
            status,
            data: data.to_vec(),
        };

        if owner == self.node_id {
            if let Some(coordinator) = self.coordinator.as_mut() {
                coordinator.handle_task_result(self.node_id, &result, now);
            }
            self.flush_coordinator(now);
            return Ok(None);
        }

        let priority = match status {
            TaskStatus::Running => Priority::Normal,
            TaskStatus::Complete | TaskStatus::Failed => Priority::High,
        };
        let tx_id = self.send(owner, &Message::TaskResult(result), priority, true)?;
        self.app_tx.insert(tx_id);
        Ok(Some(tx_id))
    }

    /// Run one cooperative tick
    pub fn process(&mut self, now: Millis) -> Vec<NodeEvent> {
        if !self.started {
            self.started = true;
            self.last_capability_poll = now;
            info!(node = %self.node_id, score = self.role.score_tenths(), "Node starting");
            let events = self.role.start(now);
            self.apply_role_events(events, now);
        }

        self.poll_capabilities(now);
        self.drain_radio(now);

        let events = self.role.tick(now);
        self.apply_role_events(events, now);

        self.heartbeat(now);

        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.tick(now);
        }
        self.flush_coordinator(now);

        for event in self.transport.process(now, &mut self.radio) {
            self.apply_rtp_event(event, now);
        }
        self.flush_coordinator(now);

        std::mem::take(&mut self.events)
    }

    fn poll_capabilities(&mut self, now: Millis) {
        if now.saturating_sub(self.last_capability_poll) < self.config.role.capability_poll_interval_ms {
            return;
        }
        self.last_capability_poll = now;

        let mut caps = self.provider.current_capabilities();
        caps.node_id = self.node_id;
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.update_self(caps.clone(), now);
        }
        if !needs_readvertise(self.role.capabilities(), &caps) {
            // Heartbeats carry the latest readings even without a re-advertise
            self.role.refresh_capabilities(caps);
            return;
        }

        info!(
            node = %self.node_id,
            battery = ?caps.battery_percent,
            power = ?caps.power_source,
            "Capabilities changed, re-advertising"
        );
        let events = self.role.update_capabilities(caps, now);
        self.apply_role_events(events, now);
        self.heartbeat_due = true;
    }

    fn drain_radio(&mut self, now: Millis) {
        for _ in 0..self.config.radio_drain_limit {
            let Some(bytes) = self.radio.receive_raw() else {
                break;
            };
            let rssi = self.radio.last_rssi();

            if self.role.role().is_some_and(|r| r.forwards_traffic()) {
                if let Some(forward) = self.relay.consider(&bytes, now) {
                    if !self.transport.forward(forward) {
                        debug!(node = %self.node_id, "Relay queue full, frame not forwarded");
                    }
                }
            }

            if let Some(delivery) = self.transport.handle_frame(&bytes, rssi, now, &mut self.radio) {
                self.dispatch(delivery, now);
            }
        }
    }

    fn dispatch(&mut self, delivery: Delivery, now: Millis) {
        let from = delivery.from;
        let hops = hop_count(delivery.hops);
        let message = match Message::decode(delivery.packet_type, &delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(node = %self.node_id, %from, kind = ?delivery.packet_type, error = %e, "Undecodable message");
                return;
            }
        };

        self.peers.touch(from, now);
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.touch(from, now);
        }
        if self.role.coordinator() == Some(from) && !self.role.is_coordinator() {
            self.role.set_hop_count(hops);
        }

        match message {
            Message::Discovery(announcement) | Message::Heartbeat(announcement) => {
                if announcement.capabilities.node_id != from {
                    debug!(node = %self.node_id, %from, "Announcement for another node ignored");
                    return;
                }
                let is_discovery = delivery.packet_type == PacketType::Discovery;
                self.peers
                    .update_from_announcement(&announcement, hops, delivery.rssi, now);
                let events = self.role.observe_announcement(from, &announcement, now);
                self.apply_role_events(events, now);

                if let Some(coordinator) = self.coordinator.as_mut() {
                    let rssi = (hops <= 1).then_some(delivery.rssi);
                    coordinator.observe_node(
                        announcement.capabilities,
                        announcement.role,
                        hops,
                        rssi,
                        now,
                    );
                    if is_discovery {
                        self.heartbeat_due = true;
                    }
                }
            }
            Message::Topology(topology) => {
                let fresh = match self.topology {
                    Some((source, epoch)) if source == from => topology.is_newer_than(epoch),
                    _ => self.role.coordinator() == Some(from),
                };
                let accept = topology.coordinator == from && fresh;
                if !accept {
                    debug!(node = %self.node_id, epoch = topology.epoch, "Stale topology ignored");
                    return;
                }
                self.role.observe_coordinator(topology.coordinator, now);
                self.peers.apply_topology(&topology.nodes, self.node_id, now);
                self.topology = Some((topology.coordinator, topology.epoch));
                self.events.push(NodeEvent::TopologyUpdated {
                    coordinator: topology.coordinator,
                    epoch: topology.epoch,
                });
            }
            Message::TaskAssign(assign) => {
                self.role.observe_coordinator(from, now);
                self.accept_task(from, assign);
            }
            Message::TaskResult(result) => match self.coordinator.as_mut() {
                Some(coordinator) => coordinator.handle_task_result(from, &result, now),
                None => debug!(node = %self.node_id, %from, task = %result.task_id, "Task result but not coordinator"),
            },
        }
    }

    fn accept_task(&mut self, coordinator: NodeId, assign: TaskAssign) {
        info!(
            node = %self.node_id,
            task = %assign.task_id,
            kind = ?assign.task_type,
            priority = assign.priority,
            %coordinator,
            "Task received"
        );
        self.local_tasks.insert(assign.task_id, coordinator);
        self.events.push(NodeEvent::TaskAssigned { coordinator, assign });
    }

    fn apply_role_events(&mut self, events: Vec<RoleEvent>, now: Millis) {
        for event in events {
            match event {
                RoleEvent::ElectionStarted => {
                    self.announce(PacketType::Discovery, now);
                }
                RoleEvent::RoleChanged { previous, current } => {
                    self.heartbeat_due = true;
                    self.events.push(NodeEvent::RoleChanged { previous, current });
                }
                RoleEvent::CoordinatorChanged { previous, current } => {
                    self.events.push(NodeEvent::CoordinatorChanged { previous, current });
                }
                RoleEvent::SplitBrain { other, demoted } => {
                    self.events.push(NodeEvent::SplitBrain { other, demoted });
                }
            }
        }
        self.sync_coordinator(now);
    }

    /// Create or drop the board coordinator to match the elected role
    fn sync_coordinator(&mut self, now: Millis) {
        match (self.role.is_coordinator(), self.coordinator.is_some()) {
            (true, false) => {
                let epoch = self.topology.map_or(0, |(_, epoch)| epoch);
                let mut board = BoardCoordinator::new(
                    self.role.capabilities().clone(),
                    self.config.coordinator.clone(),
                    epoch,
                    now,
                );
                for peer in self.peers.active(now, self.config.coordinator.node_timeout_ms) {
                    if let Some(caps) = &peer.capabilities {
                        let rssi = peer.link.map(|l| l.rssi.round() as i16);
                        board.observe_node(caps.clone(), peer.role, peer.hop_count, rssi, peer.last_seen);
                    }
                }
                self.role.set_hop_count(0);
                self.coordinator = Some(board);
            }
            (false, true) => {
                if let Some(board) = self.coordinator.take() {
                    warn!(
                        node = %self.node_id,
                        live_tasks = board.ledger().len(),
                        "Stepping down as coordinator"
                    );
                }
                self.pending_assigns.clear();
            }
            _ => {}
        }
    }

    fn heartbeat(&mut self, now: Millis) {
        let interval_passed = now.saturating_sub(self.last_heartbeat) >= self.config.role.heartbeat_interval_ms;
        if !(self.heartbeat_due || interval_passed) {
            return;
        }
        let kind = match self.role.state() {
            RoleState::Assigned(_) => PacketType::Heartbeat,
            RoleState::Candidate { .. } | RoleState::Unassigned => PacketType::Discovery,
        };
        self.announce(kind, now);
    }

    fn announce(&mut self, kind: PacketType, now: Millis) {
        self.heartbeat_due = false;
        self.last_heartbeat = now;
        let active = self.local_tasks.len().min(u8::MAX as usize) as u8;
        let announcement = self.role.announcement(active);
        let message = match kind {
            PacketType::Discovery => Message::Discovery(announcement),
            _ => Message::Heartbeat(announcement),
        };
        if let Err(e) = self.send(NodeId::BROADCAST, &message, Priority::High, false) {
            warn!(node = %self.node_id, error = %e, "Announcement not queued");
        }
    }

    fn send(&mut self, destination: NodeId, message: &Message, priority: Priority, require_ack: bool) -> MeshResult<TxId> {
        let body = message.encode()?;
        self.transport
            .transmit_data(destination, message.packet_type(), &body, priority, require_ack)
    }

    /// Put queued coordinator actions on the air and surface its events
    fn flush_coordinator(&mut self, now: Millis) {
        for _ in 0..MAX_FLUSH_PASSES {
            let Some(coordinator) = self.coordinator.as_mut() else {
                return;
            };
            let actions = coordinator.take_actions();
            let events = coordinator.take_events();
            self.events.extend(events.into_iter().map(NodeEvent::Coordinator));
            if actions.is_empty() {
                return;
            }

            for action in actions {
                match action {
                    CoordinatorAction::AssignTask { node, assign } if node == self.node_id => {
                        self.accept_task(node, assign);
                    }
                    CoordinatorAction::AssignTask { node, assign } => {
                        let task_id = assign.task_id;
                        let priority = if assign.priority >= URGENT_TASK_PRIORITY {
                            Priority::High
                        } else {
                            Priority::Normal
                        };
                        match self.send(node, &Message::TaskAssign(assign), priority, true) {
                            Ok(tx_id) => {
                                self.pending_assigns.insert(tx_id, (task_id, node));
                            }
                            Err(e) => {
                                warn!(task = %task_id, %node, error = %e, "TASK_ASSIGN not queued");
                                if let Some(coordinator) = self.coordinator.as_mut() {
                                    coordinator.assignment_failed(task_id, node, now);
                                }
                            }
                        }
                    }
                    CoordinatorAction::BroadcastTopology(topology) => {
                        self.topology = Some((topology.coordinator, topology.epoch));
                        if let Err(e) = self.send(NodeId::BROADCAST, &Message::Topology(topology), Priority::Normal, false) {
                            warn!(node = %self.node_id, error = %e, "Topology not queued");
                        }
                    }
                }
            }
        }
    }

    fn apply_rtp_event(&mut self, event: RtpEvent, now: Millis) {
        match event {
            RtpEvent::Complete { tx_id, success } => {
                self.pending_assigns.remove(&tx_id);
                if self.app_tx.remove(&tx_id) {
                    self.events.push(NodeEvent::TransmissionComplete { tx_id, success });
                }
            }
            RtpEvent::Error { tx_id, kind } => {
                if let Some((task_id, node)) = self.pending_assigns.remove(&tx_id) {
                    if let Some(coordinator) = self.coordinator.as_mut() {
                        coordinator.assignment_failed(task_id, node, now);
                    }
                }
                if self.app_tx.contains(&tx_id) {
                    self.events.push(NodeEvent::TransmissionError { tx_id, kind });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Resolution;
    use crate::protocol::packet::Frame;
    use crate::traits::StaticCapabilities;
    use std::collections::VecDeque;

    /// Radio with a scripted inbox and a record of everything sent
    #[derive(Debug, Default)]
    struct ScriptedRadio {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl Radio for ScriptedRadio {
        fn send_raw(&mut self, _destination: NodeId, data: &[u8]) -> bool {
            self.sent.push(data.to_vec());
            true
        }

        fn receive_raw(&mut self) -> Option<Vec<u8>> {
            self.inbox.pop_front()
        }

        fn last_rssi(&self) -> i16 {
            -65
        }
    }

    fn node(id: u32, caps: NodeCapabilities) -> MeshNode<ScriptedRadio, StaticCapabilities> {
        let config = MeshConfig::default().with_node_id(NodeId::from_u32(id));
        MeshNode::new(config, ScriptedRadio::default(), StaticCapabilities::new(caps))
            .unwrap()
            .with_initial_seq(1)
    }

    fn sent_types(radio: &ScriptedRadio) -> Vec<PacketType> {
        radio
            .sent
            .iter()
            .filter_map(|b| Frame::from_bytes(b).ok())
            .map(|f| f.header.packet_type)
            .collect()
    }

    #[test]
    fn test_lone_node_becomes_coordinator() {
        let caps = NodeCapabilities::empty(NodeId::from_u32(1)).with_radio().with_battery(80);
        let mut n = node(1, caps);
        n.process(0);
        assert_eq!(sent_types(n.radio()), vec![PacketType::Discovery]);
        assert!(matches!(n.role_state(), RoleState::Candidate { .. }));

        let mut events = Vec::new();
        for now in (100..=30_000).step_by(100) {
            events.extend(n.process(now));
        }
        assert!(n.is_coordinator());
        assert_eq!(n.coordinator(), Some(NodeId::from_u32(1)));
        assert!(n.board().is_some());
        assert!(events.contains(&NodeEvent::RoleChanged {
            previous: None,
            current: Role::Coordinator
        }));
        assert!(sent_types(n.radio()).contains(&PacketType::Heartbeat));
    }

    #[test]
    fn test_heartbeat_carries_fresh_capabilities() {
        let caps = NodeCapabilities::empty(NodeId::from_u32(1)).with_radio().with_battery(80);
        let mut n = node(1, caps.clone());
        for now in (0..=30_000).step_by(100) {
            n.process(now);
        }
        assert!(n.is_coordinator());

        // 15 points is below the re-advertise threshold
        n.provider_mut().set(caps.with_battery(65).with_uptime(3600));
        n.radio_mut().sent.clear();
        for now in (30_100..=60_000).step_by(100) {
            n.process(now);
        }

        let heartbeats: Vec<(Option<u8>, u32)> = n
            .radio()
            .sent
            .iter()
            .filter_map(|b| Frame::from_bytes(b).ok())
            .filter_map(|f| match Message::decode_frame(&f.header, &f.body) {
                Ok(Message::Heartbeat(a)) => Some((a.capabilities.battery_percent, a.capabilities.uptime_secs)),
                _ => None,
            })
            .collect();
        assert!(!heartbeats.is_empty());
        assert_eq!(heartbeats.last(), Some(&(Some(65), 3600)));

        let own = n
            .board()
            .and_then(|b| b.registry().get(&NodeId::from_u32(1)))
            .map(|entry| entry.capabilities.battery_percent);
        assert_eq!(own, Some(Some(65)));
    }

    #[test]
    fn test_assign_requires_coordinator() {
        let caps = NodeCapabilities::empty(NodeId::from_u32(1)).with_radio();
        let mut n = node(1, caps);
        n.process(0);
        let err = n.assign_task(Task::new(TaskId(1), crate::task::TaskType::Capture, 5), None, 0);
        assert!(matches!(err, Err(MeshError::NotCoordinator)));
    }

    #[test]
    fn test_coordinator_runs_own_task() {
        let caps = NodeCapabilities::empty(NodeId::from_u32(1))
            .with_radio()
            .with_camera(Resolution::FULL_HD)
            .with_battery(90);
        let mut n = node(1, caps);
        for now in (0..=30_000).step_by(1_000) {
            n.process(now);
        }
        assert!(n.is_coordinator());

        let target = n
            .assign_task(Task::new(TaskId(4), crate::task::TaskType::Capture, 5), None, 30_000)
            .unwrap();
        assert_eq!(target, n.node_id());
        let events = n.process(30_100);
        assert!(events
            .iter()
            .any(|e| matches!(e, NodeEvent::TaskAssigned { assign, .. } if assign.task_id == TaskId(4))));

        assert_eq!(n.report_task_result(TaskId(4), TaskStatus::Complete, b"jpeg", 31_000).unwrap(), None);
        assert_eq!(n.task_state(TaskId(4)), Some(TaskState::Complete));
        assert!(matches!(
            n.report_task_result(TaskId(4), TaskStatus::Complete, b"", 31_000),
            Err(MeshError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_adopts_announced_coordinator() {
        let weak = NodeCapabilities::empty(NodeId::from_u32(2)).with_radio().with_battery(10);
        let mut n = node(2, weak);
        n.process(0);

        let strong = NodeCapabilities::empty(NodeId::from_u32(1))
            .with_radio()
            .with_battery(100)
            .with_ai_accelerator();
        let announcement = crate::protocol::message::Announcement {
            score_tenths: 900,
            role: Some(Role::Coordinator),
            hop_count: 0,
            active_tasks: 0,
            coordinator: Some(NodeId::from_u32(1)),
            capabilities: strong,
        };
        let header = crate::protocol::packet::PacketHeader::new(
            PacketType::Heartbeat,
            NodeId::from_u32(1),
            NodeId::BROADCAST,
            77,
        );
        let body = Message::Heartbeat(announcement).encode().unwrap();
        n.radio_mut().inbox.push_back(Frame::new(header, body).to_bytes());

        let events = n.process(500);
        assert_eq!(n.coordinator(), Some(NodeId::from_u32(1)));
        assert_eq!(n.role(), Some(Role::Stealth));
        assert!(events.contains(&NodeEvent::CoordinatorChanged {
            previous: None,
            current: Some(NodeId::from_u32(1))
        }));
        assert_eq!(n.peers().len(), 1);
    }
}
