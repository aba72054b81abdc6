//! Per-task debug tracing.
//!
//! Debugging is enabled per task by an administrator. While enabled, the
//! availability filter and the task loader explain their decisions for
//! that task at info level.

use std::collections::HashMap;
use std::sync::RwLock;

use chatrun_core::{Task, TaskId};
use tracing::info;

use crate::state::{read_lock, write_lock};

/// A task being debugged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggingTask {
    pub task_id: TaskId,
    pub name: String,
    /// Also report messages that are only interesting when tracing every
    /// message the user types.
    pub verbose: bool,
}

/// Registry of tasks being debugged, keyed by task ID.
#[derive(Default)]
pub struct DebugRegistry {
    tasks: RwLock<HashMap<TaskId, DebuggingTask>>,
}

impl DebugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start debugging `task`.
    pub fn enable(&self, task: &Task, verbose: bool) {
        write_lock(&self.tasks).insert(
            task.task_id.clone(),
            DebuggingTask {
                task_id: task.task_id.clone(),
                name: task.name.clone(),
                verbose,
            },
        );
    }

    /// Stop debugging the task; returns false if it wasn't being debugged.
    pub fn disable(&self, id: &TaskId) -> bool {
        write_lock(&self.tasks).remove(id).is_some()
    }

    pub fn is_debugging(&self, id: &TaskId) -> bool {
        read_lock(&self.tasks).contains_key(id)
    }

    /// Tasks currently being debugged, sorted by name.
    pub fn list(&self) -> Vec<DebuggingTask> {
        let mut all: Vec<_> = read_lock(&self.tasks).values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Drop entries for tasks that no longer exist.
    pub fn retain(&self, mut keep: impl FnMut(&TaskId) -> bool) {
        write_lock(&self.tasks).retain(|id, _| keep(id));
    }

    /// Emit `msg` for `task` if it's being debugged. Messages flagged
    /// `verbose_only` are only emitted for verbose debugging.
    ///
    /// Returns true when the message was emitted.
    pub fn debug_task(&self, task: &Task, msg: &str, verbose_only: bool) -> bool {
        let name = {
            let tasks = read_lock(&self.tasks);
            match tasks.get(&task.task_id) {
                Some(dt) if !verbose_only || dt.verbose => dt.name.clone(),
                _ => return false,
            }
        };
        info!(task = %name, "DEBUG {}: {}", name, msg);
        true
    }
}
