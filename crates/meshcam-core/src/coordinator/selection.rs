//! Task placement scoring
//!
//! ```text
//! score = affinity(task type, capabilities) + role affinity
//!       + 0.2 × battery + 0.1 × (100 + RSSI)
//!       − 10 × active tasks − 5 × hop count
//! ```
//!
//! Highest score wins; ties go to the lowest load, then the lowest id.

use super::registry::NetworkNode;
use crate::capability::{NodeCapabilities, PowerSource};
use crate::config::SelectionWeights;
use crate::protocol::packet::NodeId;
use crate::task::TaskType;
use std::cmp::Ordering;

/// Battery level at which a battery-powered relay counts as sustainable
const RELAY_BATTERY_THRESHOLD: u8 = 50;

/// Hard requirement of each task type
pub fn is_capable(caps: &NodeCapabilities, task_type: TaskType) -> bool {
    match task_type {
        TaskType::Capture => caps.has_camera,
        TaskType::Analyze => caps.has_ai_accelerator,
        TaskType::Relay => caps.has_radio,
        TaskType::Custom(_) => true,
    }
}

/// Capability-driven bonus for running `task_type`
pub fn capability_affinity(caps: &NodeCapabilities, task_type: TaskType, weights: &SelectionWeights) -> f32 {
    let per = weights.affinity_per_capability;
    let flag = |present: bool| if present { per } else { 0.0 };
    match task_type {
        TaskType::Capture => {
            let megapixels = caps.max_resolution.pixels() as f32 / 1_000_000.0;
            let resolution = (megapixels * weights.resolution_per_megapixel).min(weights.resolution_max_bonus);
            let storage = if weights.storage_saturation_bytes == 0 {
                0.0
            } else {
                let fill = caps.storage_free_bytes as f32 / weights.storage_saturation_bytes as f32;
                fill.min(1.0) * weights.storage_max_bonus
            };
            flag(caps.has_camera) + resolution + storage
        }
        TaskType::Relay => {
            let sustainable = matches!(caps.power_source, PowerSource::Solar | PowerSource::Mains)
                || caps.effective_battery() >= RELAY_BATTERY_THRESHOLD;
            flag(caps.has_radio) + flag(sustainable)
        }
        TaskType::Analyze => flag(caps.has_ai_accelerator) + flag(caps.has_psram),
        TaskType::Custom(_) => 0.0,
    }
}

/// Placement score of `node` for a task of `task_type`
pub fn score_node(node: &NetworkNode, task_type: TaskType, weights: &SelectionWeights) -> f32 {
    let caps = &node.capabilities;
    let role_bonus = node.role.map_or(0.0, |role| role.task_affinity(task_type));
    capability_affinity(caps, task_type, weights)
        + role_bonus
        + weights.battery_per_percent * caps.effective_battery() as f32
        + weights.rssi_weight * (100.0 + node.rssi as f32)
        - weights.load_penalty * node.load() as f32
        - weights.hop_penalty * node.hop_count as f32
}

/// Whether `node` may run `task_type` at all
pub fn is_eligible(node: &NetworkNode, task_type: TaskType) -> bool {
    node.accepts_tasks() && is_capable(&node.capabilities, task_type)
}

/// Pick the best node among `candidates`, skipping `exclude`
pub fn select_best_node<'a>(
    candidates: impl IntoIterator<Item = &'a NetworkNode>,
    task_type: TaskType,
    weights: &SelectionWeights,
    exclude: &[NodeId],
) -> Option<NodeId> {
    candidates
        .into_iter()
        .filter(|node| is_eligible(node, task_type) && !exclude.contains(&node.node_id()))
        .map(|node| (score_node(node, task_type, weights), node.load(), node.node_id()))
        .max_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| b.2.cmp(&a.2))
        })
        .map(|(_, _, id)| id)
}
