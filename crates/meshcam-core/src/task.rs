//! Task definitions shared by the coordinator ledger and the wire protocol

use crate::protocol::packet::NodeId;
use crate::Millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-chosen task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Take pictures or video
    Capture,
    /// Forward traffic for other nodes
    Relay,
    /// Run inference on captured frames
    Analyze,
    /// Application-defined work; no capability requirement
    Custom(u8),
}

impl TaskType {
    const CAPTURE: u8 = 1;
    const RELAY: u8 = 2;
    const ANALYZE: u8 = 3;
    const CUSTOM: u8 = 4;

    /// Wire code plus the custom sub-code (0 for built-in types)
    pub fn to_wire(&self) -> (u8, u8) {
        match self {
            TaskType::Capture => (Self::CAPTURE, 0),
            TaskType::Relay => (Self::RELAY, 0),
            TaskType::Analyze => (Self::ANALYZE, 0),
            TaskType::Custom(code) => (Self::CUSTOM, *code),
        }
    }

    /// Decode from wire code and sub-code
    pub fn from_wire(code: u8, custom: u8) -> Option<Self> {
        match code {
            Self::CAPTURE => Some(TaskType::Capture),
            Self::RELAY => Some(TaskType::Relay),
            Self::ANALYZE => Some(TaskType::Analyze),
            Self::CUSTOM => Some(TaskType::Custom(custom)),
            _ => None,
        }
    }
}

/// Ledger state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Assigned,
    Running,
    Complete,
    Failed,
}

impl TaskState {
    /// True once the task can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }

    /// True while a node owns the task
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }
}

/// Progress reported by the executing node in a TASK_RESULT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Wire code
    pub fn as_byte(&self) -> u8 {
        match self {
            TaskStatus::Running => 1,
            TaskStatus::Complete => 2,
            TaskStatus::Failed => 3,
        }
    }

    /// Decode from wire code
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Complete),
            3 => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// A unit of work owned by the coordinator's ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub assigned_node: Option<NodeId>,
    /// Relative deadline budget, re-armed on every (re)assignment
    pub deadline_budget_ms: Option<u64>,
    /// Absolute deadline of the current assignment
    pub deadline: Option<Millis>,
    pub state: TaskState,
    /// Opaque parameters passed to the executing node
    pub params: Vec<u8>,
    /// Times this task has been retried after a FAILED result
    pub retries: u8,
}

impl Task {
    /// Lowest accepted priority
    pub const MIN_PRIORITY: u8 = 1;
    /// Highest accepted priority
    pub const MAX_PRIORITY: u8 = 10;

    /// Create a pending task; priority is clamped to 1..=10
    pub fn new(id: TaskId, task_type: TaskType, priority: u8) -> Self {
        Self {
            id,
            task_type,
            priority: priority.clamp(Self::MIN_PRIORITY, Self::MAX_PRIORITY),
            assigned_node: None,
            deadline_budget_ms: None,
            deadline: None,
            state: TaskState::Pending,
            params: Vec::new(),
            retries: 0,
        }
    }

    /// Complete within `budget_ms` of each assignment
    pub fn with_deadline(mut self, budget_ms: u64) -> Self {
        self.deadline_budget_ms = Some(budget_ms);
        self
    }

    /// Attach opaque parameters
    pub fn with_params(mut self, params: Vec<u8>) -> Self {
        self.params = params;
        self
    }

    /// Hand the task to `node` at `now`, re-arming the deadline
    pub fn assign_to(&mut self, node: NodeId, now: Millis) {
        self.assigned_node = Some(node);
        self.state = TaskState::Assigned;
        self.deadline = self.deadline_budget_ms.map(|budget| now.saturating_add(budget));
    }

    /// Check whether the current assignment has overrun its deadline
    pub fn is_overdue(&self, now: Millis) -> bool {
        self.state.is_in_flight() && self.deadline.is_some_and(|deadline| now > deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_wire_codes() {
        assert_eq!(TaskType::Capture.to_wire(), (1, 0));
        assert_eq!(TaskType::from_wire(4, 9), Some(TaskType::Custom(9)));
        assert_eq!(TaskType::from_wire(0, 0), None);
    }

    #[test]
    fn test_priority_clamped() {
        assert_eq!(Task::new(TaskId(1), TaskType::Capture, 0).priority, 1);
        assert_eq!(Task::new(TaskId(1), TaskType::Capture, 42).priority, 10);
    }

    #[test]
    fn test_deadline_rearmed_on_assignment() {
        let mut task = Task::new(TaskId(3), TaskType::Analyze, 5).with_deadline(1_000);
        assert!(!task.is_overdue(10_000));

        task.assign_to(NodeId::from_u32(7), 500);
        assert_eq!(task.deadline, Some(1_500));
        assert!(!task.is_overdue(1_500));
        assert!(task.is_overdue(1_501));

        task.assign_to(NodeId::from_u32(8), 2_000);
        assert_eq!(task.assigned_node, Some(NodeId::from_u32(8)));
        assert!(!task.is_overdue(2_900));
    }

    #[test]
    fn test_state_classes() {
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Running.is_in_flight());
        assert!(!TaskState::Pending.is_in_flight());
        assert_eq!(TaskStatus::from_byte(TaskStatus::Failed.as_byte()), Some(TaskStatus::Failed));
    }
}
