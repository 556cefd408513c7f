//! Coordinator node registry
//!
//! One entry per node ever heard, keyed by id. Entries are never deleted:
//! silent nodes are marked inactive by the sweep and reactivated, with an
//! empty task list, when heard again.

use crate::capability::NodeCapabilities;
use crate::protocol::packet::NodeId;
use crate::role::Role;
use crate::task::TaskId;
use crate::Millis;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Registry entry for one mesh node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub capabilities: NodeCapabilities,
    pub role: Option<Role>,
    pub last_seen: Millis,
    pub is_active: bool,
    pub hop_count: u8,
    /// Tasks currently assigned to or running on this node
    pub active_tasks: BTreeSet<TaskId>,
    /// Signal strength used for placement, dBm
    pub rssi: i16,
}

impl NetworkNode {
    pub fn node_id(&self) -> NodeId {
        self.capabilities.node_id
    }

    pub fn load(&self) -> usize {
        self.active_tasks.len()
    }

    /// Whether the node may receive new work at all
    pub fn accepts_tasks(&self) -> bool {
        self.is_active && self.role.map_or(true, |role| role.accepts_tasks())
    }
}

/// What an observation did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    New,
    Updated,
    Reactivated,
}

/// A node the sweep just marked inactive
#[derive(Debug, Clone, PartialEq)]
pub struct Inactive {
    pub node: NodeId,
    pub role: Option<Role>,
    pub silent_ms: u64,
    /// Tasks it held, now orphaned
    pub tasks: Vec<TaskId>,
}

/// All nodes known to the coordinator
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NetworkNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record fresh capabilities from an announcement
    ///
    /// `rssi` is the received signal of a direct neighbour; relayed
    /// announcements fall back to the RSSI the node reports about itself.
    pub fn observe(
        &mut self,
        capabilities: NodeCapabilities,
        role: Option<Role>,
        hop_count: u8,
        rssi: Option<i16>,
        now: Millis,
    ) -> Observed {
        let node_id = capabilities.node_id;
        let rssi = rssi.unwrap_or(capabilities.signal_rssi);
        match self.nodes.get_mut(&node_id) {
            Some(node) => {
                let reactivated = !node.is_active;
                node.capabilities = capabilities;
                node.role = role;
                node.hop_count = hop_count;
                node.rssi = rssi;
                node.last_seen = now;
                node.is_active = true;
                if reactivated {
                    node.active_tasks.clear();
                    info!(node = %node_id, role = ?role, "Node reactivated");
                    Observed::Reactivated
                } else {
                    Observed::Updated
                }
            }
            None => {
                info!(node = %node_id, role = ?role, hops = hop_count, "Node registered");
                self.nodes.insert(
                    node_id,
                    NetworkNode {
                        capabilities,
                        role,
                        last_seen: now,
                        is_active: true,
                        hop_count,
                        active_tasks: BTreeSet::new(),
                        rssi,
                    },
                );
                Observed::New
            }
        }
    }

    /// Any message from a known node refreshes its liveness
    pub fn touch(&mut self, node_id: NodeId, now: Millis) -> Option<Observed> {
        let node = self.nodes.get_mut(&node_id)?;
        node.last_seen = now;
        if node.is_active {
            Some(Observed::Updated)
        } else {
            node.is_active = true;
            node.active_tasks.clear();
            info!(node = %node_id, "Node reactivated");
            Some(Observed::Reactivated)
        }
    }

    /// Mark nodes silent for longer than `timeout_ms` inactive
    ///
    /// Returns each node marked on this call; already-inactive nodes are
    /// not reported again. `keep` is never marked (the coordinator itself).
    pub fn sweep(&mut self, now: Millis, timeout_ms: u64, keep: NodeId) -> Vec<Inactive> {
        let mut marked = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if *id == keep || !node.is_active {
                continue;
            }
            let silent_ms = now.saturating_sub(node.last_seen);
            if silent_ms > timeout_ms {
                node.is_active = false;
                marked.push(Inactive {
                    node: *id,
                    role: node.role,
                    silent_ms,
                    tasks: std::mem::take(&mut node.active_tasks).into_iter().collect(),
                });
            }
        }
        marked
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&NetworkNode> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut NetworkNode> {
        self.nodes.get_mut(node_id)
    }

    pub fn is_active(&self, node_id: &NodeId) -> bool {
        self.nodes.get(node_id).is_some_and(|n| n.is_active)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values().filter(|n| n.is_active)
    }

    /// Attach a task to a node's load
    pub fn add_task(&mut self, node_id: &NodeId, task: TaskId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.active_tasks.insert(task);
        }
    }

    pub fn remove_task(&mut self, node_id: &NodeId, task: TaskId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.active_tasks.remove(&task);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(id: u32) -> NodeCapabilities {
        NodeCapabilities::empty(NodeId::from_u32(id)).with_radio().with_rssi(-80)
    }

    #[test]
    fn test_observe_lifecycle() {
        let mut registry = NodeRegistry::new();
        assert_eq!(registry.observe(caps(1), Some(Role::Relay), 1, Some(-60), 0), Observed::New);
        assert_eq!(registry.observe(caps(1), Some(Role::Relay), 1, None, 10), Observed::Updated);
        let node = registry.get(&NodeId::from_u32(1)).unwrap();
        assert_eq!(node.rssi, -80);
        assert_eq!(node.last_seen, 10);
    }

    #[test]
    fn test_sweep_marks_once() {
        let mut registry = NodeRegistry::new();
        let coordinator = NodeId::from_u32(9);
        let id = NodeId::from_u32(1);
        registry.observe(caps(9), Some(Role::Coordinator), 0, None, 0);
        registry.observe(caps(1), Some(Role::Relay), 1, None, 5_000);
        registry.add_task(&id, TaskId(1));
        registry.add_task(&id, TaskId(2));

        assert!(registry.sweep(65_000, 60_000, coordinator).is_empty());
        let marked = registry.sweep(65_001, 60_000, coordinator);
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].node, id);
        assert_eq!(marked[0].tasks, vec![TaskId(1), TaskId(2)]);
        assert_eq!(marked[0].silent_ms, 60_001);
        assert!(registry.get(&id).unwrap().active_tasks.is_empty());

        assert!(registry.sweep(75_000, 60_000, coordinator).is_empty());
        assert!(registry.is_active(&coordinator));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reactivation() {
        let mut registry = NodeRegistry::new();
        let id = NodeId::from_u32(1);
        registry.observe(caps(1), Some(Role::Node), 1, None, 0);
        registry.sweep(70_000, 60_000, NodeId::BROADCAST);
        assert!(!registry.is_active(&id));
        assert_eq!(registry.touch(id, 71_000), Some(Observed::Reactivated));
        assert!(registry.is_active(&id));
        assert_eq!(registry.touch(NodeId::from_u32(2), 71_000), None);
    }

    #[test]
    fn test_stealth_takes_no_tasks() {
        let mut registry = NodeRegistry::new();
        registry.observe(caps(1), Some(Role::Stealth), 1, None, 0);
        registry.observe(caps(2), None, 1, None, 0);
        assert!(!registry.get(&NodeId::from_u32(1)).unwrap().accepts_tasks());
        assert!(registry.get(&NodeId::from_u32(2)).unwrap().accepts_tasks());
    }
}
