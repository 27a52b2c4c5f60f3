//! In-memory task registry with FIFO scheduling.
//!
//! The registry is process-local: empty when a controller starts and never
//! persisted. Insertion order defines scheduling order.

use std::collections::HashMap;
use std::path::PathBuf;

use uuid::Uuid;

use crate::core::types::{Task, TaskStatus};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `Pending` task and return its fresh id.
    pub fn add_task(&mut self, prompt: impl Into<PathBuf>) -> String {
        let mut id = generate_id();
        while self.index.contains_key(&id) {
            id = generate_id();
        }
        self.index.insert(id.clone(), self.tasks.len());
        self.tasks.push(Task {
            id: id.clone(),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
        });
        id
    }

    /// Earliest-inserted task still `Pending`.
    pub fn next_task(&self) -> Option<Task> {
        self.tasks
            .iter()
            .find(|task| task.status == TaskStatus::Pending)
            .cloned()
    }

    /// Move a task to `status`.
    ///
    /// Unknown ids and non-forward transitions are ignored; the return value
    /// reports whether the update was applied.
    pub fn update_status(&mut self, id: &str, status: TaskStatus) -> bool {
        let Some(&pos) = self.index.get(id) else {
            return false;
        };
        let task = &mut self.tasks[pos];
        if !task.status.can_transition_to(status) {
            return false;
        }
        task.status = status;
        true
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.index.get(id).map(|&pos| self.tasks[pos].clone())
    }

    /// Snapshot of all tasks in insertion order.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.clone()
    }
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
