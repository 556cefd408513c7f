//! Task ledger
//!
//! Live tasks are keyed by id. Finished tasks leave the ledger (completed
//! ones after a grace period, failed ones immediately) and their final
//! state moves into a bounded history so callers can still query it.

use crate::error::{MeshError, MeshResult};
use crate::protocol::packet::NodeId;
use crate::task::{Task, TaskId, TaskState};
use crate::Millis;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

#[derive(Debug)]
pub struct TaskLedger {
    tasks: BTreeMap<TaskId, Task>,
    /// When each live COMPLETE task finished
    completed_at: BTreeMap<TaskId, Millis>,
    history: VecDeque<Task>,
    history_limit: usize,
}

impl TaskLedger {
    pub fn new(history_limit: usize) -> Self {
        Self {
            tasks: BTreeMap::new(),
            completed_at: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// Add a new task; ids must be unique among live tasks
    pub fn insert(&mut self, task: Task) -> MeshResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(MeshError::DuplicateTask(task.id));
        }
        self.tasks.insert(task.id, task);
        Ok(())
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Live task, or the final record of a finished one
    pub fn lookup(&self, id: &TaskId) -> Option<&Task> {
        self.tasks
            .get(id)
            .or_else(|| self.history.iter().rev().find(|t| t.id == *id))
    }

    pub fn state(&self, id: &TaskId) -> Option<TaskState> {
        self.lookup(id).map(|t| t.state)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// In-flight tasks held by `node`
    pub fn assigned_to(&self, node: NodeId) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.state.is_in_flight() && t.assigned_node == Some(node))
            .map(|t| t.id)
            .collect()
    }

    /// In-flight tasks past their deadline
    pub fn overdue(&self, now: Millis) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.is_overdue(now))
            .map(|t| t.id)
            .collect()
    }

    pub fn mark_complete(&mut self, id: TaskId, now: Millis) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if !task.state.is_terminal() => {
                task.state = TaskState::Complete;
                self.completed_at.insert(id, now);
                true
            }
            _ => false,
        }
    }

    /// Mark FAILED and move to history
    pub fn fail(&mut self, id: TaskId) -> Option<Task> {
        let mut task = self.tasks.remove(&id)?;
        self.completed_at.remove(&id);
        task.state = TaskState::Failed;
        self.remember(task.clone());
        Some(task)
    }

    /// Record a task that failed before it ever entered the ledger
    pub fn record_failed(&mut self, mut task: Task) {
        task.state = TaskState::Failed;
        self.remember(task);
    }

    /// Drop COMPLETE tasks finished more than `grace_ms` ago
    pub fn purge(&mut self, now: Millis, grace_ms: u64) -> usize {
        let expired: Vec<TaskId> = self
            .completed_at
            .iter()
            .filter(|(_, at)| now.saturating_sub(**at) > grace_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.completed_at.remove(id);
            if let Some(task) = self.tasks.remove(id) {
                self.remember(task);
            }
        }
        if !expired.is_empty() {
            debug!(purged = expired.len(), live = self.tasks.len(), "Purged completed tasks");
        }
        expired.len()
    }

    fn remember(&mut self, task: Task) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
