//! Board coordinator
//!
//! Runs on the elected COORDINATOR only. It keeps the node registry and the
//! task ledger, places tasks, and recovers from failure:
//!
//! - **Sweep** (every `sweep_interval_ms`): nodes silent for longer than
//!   `node_timeout_ms` are marked inactive and their tasks reassigned;
//!   overdue tasks are reassigned; completed tasks past their grace period
//!   are purged; a TOPOLOGY update is broadcast.
//! - **Rebalance** (every `rebalance_interval_ms`): low-priority tasks move
//!   off nodes carrying more than `rebalance_threshold` × the average load.
//!
//! The coordinator never touches the radio. Messages it wants sent are
//! queued as [`CoordinatorAction`]s, outcomes as [`CoordinatorEvent`]s; the
//! node run-loop drains both every tick.

pub mod ledger;
pub mod registry;
pub mod selection;

pub use ledger::TaskLedger;
pub use registry::{NetworkNode, NodeRegistry, Observed};
pub use selection::select_best_node;

use crate::capability::NodeCapabilities;
use crate::config::CoordinatorConfig;
use crate::error::{MeshError, MeshResult};
use crate::protocol::message::{TaskAssign, TaskResult, Topology, TopologyEntry};
use crate::protocol::packet::NodeId;
use crate::role::Role;
use crate::task::{Task, TaskId, TaskState, TaskStatus};
use crate::Millis;
use std::mem;
use tracing::{debug, info, warn};

/// Why a task ended FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFailure {
    /// No active node could take it
    NoEligibleNode,
    /// The executing node reported failure and no retries remained
    Reported,
}

/// Notable coordinator outcomes surfaced to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    NodeInactive {
        node: NodeId,
        role: Option<Role>,
        silent_ms: u64,
    },
    TaskReassigned {
        task: TaskId,
        from: NodeId,
        to: NodeId,
    },
    TaskFailed {
        task: TaskId,
        reason: TaskFailure,
    },
    TaskCompleted {
        task: TaskId,
        node: NodeId,
    },
}

/// Messages the coordinator wants on the air
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorAction {
    /// Send TASK_ASSIGN to `node` (possibly the coordinator itself)
    AssignTask { node: NodeId, assign: TaskAssign },
    /// Broadcast the current view of the mesh
    BroadcastTopology(Topology),
}

#[derive(Debug)]
pub struct BoardCoordinator {
    node_id: NodeId,
    config: CoordinatorConfig,
    registry: NodeRegistry,
    ledger: TaskLedger,
    epoch: u16,
    last_sweep: Millis,
    last_rebalance: Millis,
    actions: Vec<CoordinatorAction>,
    events: Vec<CoordinatorEvent>,
}

impl BoardCoordinator {
    /// Take office at `now` with our own capabilities registered
    pub fn new(capabilities: NodeCapabilities, config: CoordinatorConfig, epoch: u16, now: Millis) -> Self {
        let node_id = capabilities.node_id;
        let mut registry = NodeRegistry::new();
        registry.observe(capabilities, Some(Role::Coordinator), 0, None, now);
        info!(node = %node_id, epoch, "Board coordinator active");
        Self {
            node_id,
            ledger: TaskLedger::new(config.task_history),
            config,
            registry,
            epoch,
            last_sweep: now,
            last_rebalance: now,
            actions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.ledger.lookup(&id)
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.ledger.state(&id)
    }

    /// Messages queued since the last call
    pub fn take_actions(&mut self) -> Vec<CoordinatorAction> {
        mem::take(&mut self.actions)
    }

    /// Events raised since the last call
    pub fn take_events(&mut self) -> Vec<CoordinatorEvent> {
        mem::take(&mut self.events)
    }

    /// Refresh our own registry entry
    pub fn update_self(&mut self, capabilities: NodeCapabilities, now: Millis) {
        self.registry
            .observe(capabilities, Some(Role::Coordinator), 0, None, now);
    }

    /// Record an announcement (DISCOVERY or HEARTBEAT) from a peer
    pub fn observe_node(
        &mut self,
        capabilities: NodeCapabilities,
        role: Option<Role>,
        hop_count: u8,
        rssi: Option<i16>,
        now: Millis,
    ) -> Observed {
        if capabilities.node_id == self.node_id {
            return Observed::Updated;
        }
        self.registry.observe(capabilities, role, hop_count, rssi, now)
    }

    /// Any other message from a peer proves it is alive
    pub fn touch(&mut self, node: NodeId, now: Millis) {
        self.registry.touch(node, now);
    }

    fn may_run_tasks(&self, node: &NetworkNode) -> bool {
        node.node_id() != self.node_id || self.config.coordinator_takes_tasks
    }

    fn select(&self, task: &Task, exclude: &[NodeId]) -> Option<NodeId> {
        select_best_node(
            self.registry.active().filter(|n| self.may_run_tasks(n)),
            task.task_type,
            &self.config.selection,
            exclude,
        )
    }

    /// Place a new task, on `target` when given, otherwise on the best node
    ///
    /// When no node qualifies the task is recorded as FAILED, a
    /// `TaskFailed` event is raised and `NoEligibleNode` returned.
    pub fn assign_task(&mut self, mut task: Task, target: Option<NodeId>, now: Millis) -> MeshResult<NodeId> {
        if self.ledger.contains(&task.id) {
            return Err(MeshError::DuplicateTask(task.id));
        }

        let node = match target.filter(|t| !t.is_broadcast()) {
            Some(target) => {
                if !self.registry.is_active(&target) {
                    return Err(MeshError::UnknownNode(target));
                }
                Some(target)
            }
            None => self.select(&task, &[]),
        };

        let Some(node) = node else {
            warn!(task = %task.id, kind = ?task.task_type, "No eligible node for task");
            let id = task.id;
            task.assigned_node = None;
            self.ledger.record_failed(task);
            self.events.push(CoordinatorEvent::TaskFailed {
                task: id,
                reason: TaskFailure::NoEligibleNode,
            });
            return Err(MeshError::NoEligibleNode(id));
        };

        info!(task = %task.id, kind = ?task.task_type, priority = task.priority, %node, "Task assigned");
        task.assign_to(node, now);
        self.registry.add_task(&node, task.id);
        self.actions.push(CoordinatorAction::AssignTask {
            node,
            assign: Self::assign_message(&task),
        });
        self.ledger.insert(task)?;
        Ok(node)
    }

    fn assign_message(task: &Task) -> TaskAssign {
        TaskAssign {
            task_id: task.id,
            task_type: task.task_type,
            priority: task.priority,
            deadline_ms: task
                .deadline_budget_ms
                .map(|ms| ms.min(u32::MAX as u64) as u32),
            params: task.params.clone(),
        }
    }

    /// Move an in-flight task off `from`
    ///
    /// Picks another active node or fails the task when none qualifies.
    fn reassign(&mut self, id: TaskId, from: NodeId, now: Millis) {
        self.registry.remove_task(&from, id);
        let Some(task) = self.ledger.get(&id) else {
            return;
        };
        if !task.state.is_in_flight() {
            return;
        }

        match self.select(task, &[from]) {
            Some(node) => {
                let Some(task) = self.ledger.get_mut(&id) else {
                    return;
                };
                task.assign_to(node, now);
                let assign = Self::assign_message(task);
                self.registry.add_task(&node, id);
                info!(task = %id, %from, to = %node, "Task reassigned");
                self.actions.push(CoordinatorAction::AssignTask { node, assign });
                self.events.push(CoordinatorEvent::TaskReassigned { task: id, from, to: node });
            }
            None => {
                warn!(task = %id, %from, "Task failed: no eligible node for reassignment");
                self.ledger.fail(id);
                self.events.push(CoordinatorEvent::TaskFailed {
                    task: id,
                    reason: TaskFailure::NoEligibleNode,
                });
            }
        }
    }

    /// Apply a TASK_RESULT from `from`
    ///
    /// Results from a node that no longer owns the task are ignored.
    pub fn handle_task_result(&mut self, from: NodeId, result: &TaskResult, now: Millis) {
        let id = result.task_id;
        let Some(task) = self.ledger.get_mut(&id) else {
            debug!(task = %id, %from, "Result for unknown task");
            return;
        };
        if task.assigned_node != Some(from) || task.state.is_terminal() {
            debug!(task = %id, %from, owner = ?task.assigned_node, "Ignoring result from non-owner");
            return;
        }

        match result.status {
            TaskStatus::Running => {
                if task.state == TaskState::Assigned {
                    task.state = TaskState::Running;
                    debug!(task = %id, node = %from, "Task running");
                }
            }
            TaskStatus::Complete => {
                self.ledger.mark_complete(id, now);
                self.registry.remove_task(&from, id);
                info!(task = %id, node = %from, bytes = result.data.len(), "Task complete");
                self.events.push(CoordinatorEvent::TaskCompleted { task: id, node: from });
            }
            TaskStatus::Failed => {
                if task.retries < self.config.task_retries {
                    task.retries += 1;
                    info!(task = %id, node = %from, retry = task.retries, "Task failed, retrying elsewhere");
                    self.reassign(id, from, now);
                } else {
                    warn!(task = %id, node = %from, "Task failed, no retries left");
                    self.registry.remove_task(&from, id);
                    self.ledger.fail(id);
                    self.events.push(CoordinatorEvent::TaskFailed {
                        task: id,
                        reason: TaskFailure::Reported,
                    });
                }
            }
        }
    }

    /// The TASK_ASSIGN for `id` could not be delivered to `node`
    pub fn assignment_failed(&mut self, id: TaskId, node: NodeId, now: Millis) {
        let owned = self
            .ledger
            .get(&id)
            .is_some_and(|t| t.assigned_node == Some(node) && t.state.is_in_flight());
        if owned {
            warn!(task = %id, %node, "TASK_ASSIGN undeliverable, reassigning");
            self.reassign(id, node, now);
        }
    }

    /// Run whatever periodic work is due
    pub fn tick(&mut self, now: Millis) {
        if now.saturating_sub(self.last_sweep) >= self.config.sweep_interval_ms {
            self.last_sweep = now;
            self.sweep(now);
        }
        if now.saturating_sub(self.last_rebalance) >= self.config.rebalance_interval_ms {
            self.last_rebalance = now;
            self.rebalance(now);
        }
    }

    /// Failure detection, deadline enforcement, purge, topology broadcast
    pub fn sweep(&mut self, now: Millis) {
        for inactive in self
            .registry
            .sweep(now, self.config.node_timeout_ms, self.node_id)
        {
            warn!(
                node = %inactive.node,
                role = ?inactive.role,
                silent_ms = inactive.silent_ms,
                tasks = inactive.tasks.len(),
                "Node inactive"
            );
            self.events.push(CoordinatorEvent::NodeInactive {
                node: inactive.node,
                role: inactive.role,
                silent_ms: inactive.silent_ms,
            });
            // The registry entry is already cleared; the ledger is authoritative
            let mut orphans = inactive.tasks;
            for id in self.ledger.assigned_to(inactive.node) {
                if !orphans.contains(&id) {
                    orphans.push(id);
                }
            }
            for id in orphans {
                self.reassign(id, inactive.node, now);
            }
        }

        for id in self.ledger.overdue(now) {
            if let Some(node) = self.ledger.get(&id).and_then(|t| t.assigned_node) {
                warn!(task = %id, %node, "Task deadline passed");
                self.reassign(id, node, now);
            }
        }

        self.ledger.purge(now, self.config.completed_grace_ms);
        self.broadcast_topology();
    }

    /// Queue a TOPOLOGY message with a fresh epoch
    pub fn broadcast_topology(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        let nodes = self
            .registry
            .iter()
            .map(|n| TopologyEntry {
                node: n.node_id(),
                role: n.role,
                active: n.is_active,
                hop_count: n.hop_count,
            })
            .collect();
        debug!(epoch = self.epoch, nodes = self.registry.len(), "Topology broadcast");
        self.actions.push(CoordinatorAction::BroadcastTopology(Topology {
            coordinator: self.node_id,
            epoch: self.epoch,
            nodes,
        }));
    }

    /// Move low-priority tasks off overloaded nodes
    pub fn rebalance(&mut self, now: Millis) {
        let loads: Vec<(NodeId, usize)> = self
            .registry
            .active()
            .filter(|n| n.accepts_tasks() && self.may_run_tasks(n))
            .map(|n| (n.node_id(), n.load()))
            .collect();
        if loads.len() < 2 {
            return;
        }
        let total: usize = loads.iter().map(|(_, load)| load).sum();
        let average = total as f32 / loads.len() as f32;
        if average <= 0.0 {
            return;
        }
        let limit = average * self.config.rebalance_threshold;

        for (node, load) in loads.iter().copied() {
            if load as f32 <= limit {
                continue;
            }
            let movable: Vec<TaskId> = self
                .ledger
                .assigned_to(node)
                .into_iter()
                .filter(|id| {
                    self.ledger
                        .get(id)
                        .is_some_and(|t| t.priority < self.config.rebalance_max_priority)
                })
                .collect();

            let mut current = load;
            for id in movable {
                if current as f32 <= limit {
                    break;
                }
                let Some(task) = self.ledger.get(&id) else { continue };
                let underloaded = self.registry.active().filter(|n| {
                    (n.load() as f32) < average && self.may_run_tasks(n)
                });
                let Some(target) = select_best_node(underloaded, task.task_type, &self.config.selection, &[node])
                else {
                    continue;
                };

                self.registry.remove_task(&node, id);
                let Some(task) = self.ledger.get_mut(&id) else { continue };
                task.assign_to(target, now);
                let assign = Self::assign_message(task);
                self.registry.add_task(&target, id);
                info!(task = %id, from = %node, to = %target, average, "Task rebalanced");
                self.actions.push(CoordinatorAction::AssignTask { node: target, assign });
                self.events.push(CoordinatorEvent::TaskReassigned {
                    task: id,
                    from: node,
                    to: target,
                });
                current -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Resolution;
    use crate::task::TaskType;

    const COORD: NodeId = NodeId::from_u32(0xC0);

    fn coordinator(now: Millis) -> BoardCoordinator {
        let caps = NodeCapabilities::empty(COORD).with_radio().with_battery(100);
        let config = CoordinatorConfig {
            coordinator_takes_tasks: false,
            ..Default::default()
        };
        BoardCoordinator::new(caps, config, 0, now)
    }

    fn camera(id: u32, battery: u8) -> NodeCapabilities {
        NodeCapabilities::empty(NodeId::from_u32(id))
            .with_camera(Resolution::FULL_HD)
            .with_radio()
            .with_battery(battery)
            .with_rssi(-70)
    }

    fn assigned(actions: &[CoordinatorAction]) -> Vec<(NodeId, TaskId)> {
        actions
            .iter()
            .filter_map(|a| match a {
                CoordinatorAction::AssignTask { node, assign } => Some((*node, assign.task_id)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_assign_best_node() {
        let mut c = coordinator(0);
        c.observe_node(camera(1, 40), Some(Role::Node), 1, None, 0);
        c.observe_node(camera(2, 90), Some(Role::Node), 1, None, 0);

        let node = c.assign_task(Task::new(TaskId(1), TaskType::Capture, 5), None, 0).unwrap();
        assert_eq!(node, NodeId::from_u32(2));
        assert_eq!(assigned(&c.take_actions()), vec![(node, TaskId(1))]);
        assert_eq!(c.task_state(TaskId(1)), Some(TaskState::Assigned));
        assert!(c.registry().get(&node).unwrap().active_tasks.contains(&TaskId(1)));

        let dup = c.assign_task(Task::new(TaskId(1), TaskType::Capture, 5), None, 0);
        assert!(matches!(dup, Err(MeshError::DuplicateTask(_))));
    }

    #[test]
    fn test_no_eligible_node_fails_task() {
        let mut c = coordinator(0);
        let err = c.assign_task(Task::new(TaskId(9), TaskType::Analyze, 5), None, 0);
        assert!(matches!(err, Err(MeshError::NoEligibleNode(TaskId(9)))));
        assert_eq!(c.task_state(TaskId(9)), Some(TaskState::Failed));
        assert_eq!(
            c.take_events(),
            vec![CoordinatorEvent::TaskFailed {
                task: TaskId(9),
                reason: TaskFailure::NoEligibleNode
            }]
        );
    }

    #[test]
    fn test_explicit_target_must_be_active() {
        let mut c = coordinator(0);
        c.observe_node(camera(1, 40), Some(Role::Node), 1, None, 0);
        let err = c.assign_task(Task::new(TaskId(1), TaskType::Capture, 5), Some(NodeId::from_u32(7)), 0);
        assert!(matches!(err, Err(MeshError::UnknownNode(_))));
        let node = c
            .assign_task(Task::new(TaskId(1), TaskType::Capture, 5), Some(NodeId::from_u32(1)), 0)
            .unwrap();
        assert_eq!(node, NodeId::from_u32(1));
    }

    #[test]
    fn test_result_lifecycle() {
        let mut c = coordinator(0);
        let node = NodeId::from_u32(1);
        c.observe_node(camera(1, 80), Some(Role::Node), 1, None, 0);
        c.assign_task(Task::new(TaskId(1), TaskType::Capture, 5), None, 0).unwrap();

        let result = |status| TaskResult {
            task_id: TaskId(1),
            status,
            data: vec![],
        };
        // Not the owner
        c.handle_task_result(NodeId::from_u32(2), &result(TaskStatus::Complete), 10);
        assert_eq!(c.task_state(TaskId(1)), Some(TaskState::Assigned));

        c.handle_task_result(node, &result(TaskStatus::Running), 10);
        assert_eq!(c.task_state(TaskId(1)), Some(TaskState::Running));
        c.handle_task_result(node, &result(TaskStatus::Complete), 20);
        assert_eq!(c.task_state(TaskId(1)), Some(TaskState::Complete));
        assert!(c
            .take_events()
            .contains(&CoordinatorEvent::TaskCompleted { task: TaskId(1), node }));
        assert_eq!(c.registry().get(&node).unwrap().load(), 0);

        c.sweep(60_021);
        assert!(c.ledger().is_empty());
        assert_eq!(c.task_state(TaskId(1)), Some(TaskState::Complete));
    }

    #[test]
    fn test_failed_result_retries_then_fails() {
        let mut c = coordinator(0);
        c.observe_node(camera(1, 90), Some(Role::Node), 1, None, 0);
        c.observe_node(camera(2, 80), Some(Role::Node), 1, None, 0);
        let first = c.assign_task(Task::new(TaskId(1), TaskType::Capture, 5), None, 0).unwrap();
        c.take_events();

        let failed = TaskResult {
            task_id: TaskId(1),
            status: TaskStatus::Failed,
            data: vec![],
        };
        c.handle_task_result(first, &failed, 10);
        let second = c.task(TaskId(1)).unwrap().assigned_node.unwrap();
        assert_ne!(first, second);
        assert_eq!(
            c.take_events(),
            vec![CoordinatorEvent::TaskReassigned { task: TaskId(1), from: first, to: second }]
        );

        c.handle_task_result(second, &failed, 20);
        assert_eq!(c.task_state(TaskId(1)), Some(TaskState::Failed));
        assert_eq!(
            c.take_events(),
            vec![CoordinatorEvent::TaskFailed { task: TaskId(1), reason: TaskFailure::Reported }]
        );
    }

    #[test]
    fn test_inactive_node_tasks_reassigned_once() {
        let mut c = coordinator(0);
        let relay = NodeId::from_u32(0xB);
        let relay_caps = NodeCapabilities::empty(relay).with_radio().with_battery(90);
        c.observe_node(relay_caps, Some(Role::Relay), 1, None, 0);
        c.observe_node(
            NodeCapabilities::empty(NodeId::from_u32(0xD)).with_radio().with_battery(30),
            Some(Role::EdgeSensor),
            1,
            None,
            0,
        );
        c.assign_task(Task::new(TaskId(1), TaskType::Relay, 5), Some(relay), 0).unwrap();
        c.assign_task(Task::new(TaskId(2), TaskType::Capture, 5), Some(relay), 0).unwrap();
        c.take_actions();

        // The other node keeps talking
        for now in (10_000..=70_000).step_by(10_000) {
            c.touch(NodeId::from_u32(0xD), now);
            c.tick(now);
        }
        let events = c.take_events();
        let inactive: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, CoordinatorEvent::NodeInactive { .. }))
            .collect();
        assert_eq!(inactive.len(), 1);
        assert!(events.contains(&CoordinatorEvent::TaskReassigned {
            task: TaskId(1),
            from: relay,
            to: NodeId::from_u32(0xD)
        }));
        // Capture needs a camera: nobody left
        assert!(events.contains(&CoordinatorEvent::TaskFailed {
            task: TaskId(2),
            reason: TaskFailure::NoEligibleNode
        }));
        assert!(c
            .take_actions()
            .iter()
            .any(|a| matches!(a, CoordinatorAction::BroadcastTopology(t) if t.nodes.iter().any(|n| n.node == relay && !n.active))));

        c.tick(80_000);
        assert!(!c
            .take_events()
            .iter()
            .any(|e| matches!(e, CoordinatorEvent::NodeInactive { .. })));
    }

    #[test]
    fn test_deadline_reassignment() {
        let mut c = coordinator(0);
        c.observe_node(camera(1, 90), Some(Role::Node), 1, None, 0);
        c.observe_node(camera(2, 80), Some(Role::Node), 1, None, 0);
        let first = c
            .assign_task(Task::new(TaskId(1), TaskType::Capture, 5).with_deadline(5_000), None, 0)
            .unwrap();
        c.touch(NodeId::from_u32(1), 10_000);
        c.touch(NodeId::from_u32(2), 10_000);
        c.tick(10_000);
        let task = c.task(TaskId(1)).unwrap();
        assert_ne!(task.assigned_node, Some(first));
        assert_eq!(task.deadline, Some(15_000));
    }

    #[test]
    fn test_rebalance_moves_low_priority() {
        let mut c = coordinator(0);
        let busy = NodeId::from_u32(1);
        c.observe_node(camera(1, 90), Some(Role::Node), 1, None, 0);
        c.observe_node(camera(2, 90), Some(Role::Node), 1, None, 0);
        c.observe_node(camera(3, 90), Some(Role::Node), 1, None, 0);
        for id in 1..=6 {
            let priority = if id <= 2 { 8 } else { 1 };
            c.assign_task(Task::new(TaskId(id), TaskType::Capture, priority), Some(busy), 0)
                .unwrap();
        }
        c.take_actions();

        // Loads 6/0/0: average 2, limit 3
        c.rebalance(1_000);
        let load = c.registry().get(&busy).unwrap().load();
        assert_eq!(load, 3);
        let moved = assigned(&c.take_actions());
        assert_eq!(moved.len(), 3);
        assert!(moved.iter().all(|(node, task)| *node != busy && task.0 > 2));
    }

    #[test]
    fn test_assignment_failure_reassigns() {
        let mut c = coordinator(0);
        c.observe_node(camera(1, 90), Some(Role::Node), 1, None, 0);
        c.observe_node(camera(2, 80), Some(Role::Node), 1, None, 0);
        let first = c.assign_task(Task::new(TaskId(1), TaskType::Capture, 5), None, 0).unwrap();
        c.assignment_failed(TaskId(1), first, 100);
        assert_ne!(c.task(TaskId(1)).unwrap().assigned_node, Some(first));
        // Stale failure for a node that no longer owns it
        c.take_events();
        c.assignment_failed(TaskId(1), first, 200);
        assert!(c.take_events().is_empty());
    }

    #[test]
    fn test_topology_epoch_increments() {
        let mut c = coordinator(0);
        c.sweep(10_000);
        c.sweep(20_000);
        let epochs: Vec<u16> = c
            .take_actions()
            .into_iter()
            .filter_map(|a| match a {
                CoordinatorAction::BroadcastTopology(t) => Some(t.epoch),
                _ => None,
            })
            .collect();
        assert_eq!(epochs, vec![1, 2]);
    }
}
