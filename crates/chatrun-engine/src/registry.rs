//! Task registry and built-in plugin registrations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatrun_core::{Task, TaskConfig, TaskId, TaskRetVal};
use serde::de::DeserializeOwned;

use crate::robot::Robot;

/// One generation of configured tasks.
///
/// Built off-line by the loader and swapped in whole; never mutated.
#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Vec<Arc<Task>>,
    by_id: HashMap<TaskId, usize>,
    by_name: HashMap<String, usize>,
}

impl TaskList {
    pub fn new(tasks: Vec<Task>) -> Self {
        let mut list = Self::default();
        for task in tasks {
            if list.by_name.contains_key(&task.name) {
                continue;
            }
            let idx = list.tasks.len();
            list.by_id.insert(task.task_id.clone(), idx);
            list.by_name.insert(task.name.clone(), idx);
            list.tasks.push(Arc::new(task));
        }
        list
    }

    pub fn get_task_by_name(&self, name: &str) -> Option<&Arc<Task>> {
        self.by_name.get(name).map(|&i| &self.tasks[i])
    }

    pub fn get_task_by_id(&self, id: &TaskId) -> Option<&Arc<Task>> {
        self.by_id.get(id).map(|&i| &self.tasks[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Code behind a built-in plugin.
#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// Run `command` with `args`. The robot is scoped to the current run.
    async fn handle(&self, robot: &Robot, command: &str, args: &[String]) -> TaskRetVal;
}

type ConfigParser = dyn Fn(serde_json::Value) -> Result<TaskConfig, serde_json::Error> + Send + Sync;

/// A built-in plugin as registered at startup.
pub struct RegisteredPlugin {
    /// Default configuration YAML, the first configuration layer.
    pub default_config: String,
    pub handler: Arc<dyn PluginHandler>,
    config_parser: Option<Box<ConfigParser>>,
}

impl RegisteredPlugin {
    pub fn new(default_config: impl Into<String>, handler: Arc<dyn PluginHandler>) -> Self {
        Self {
            default_config: default_config.into(),
            handler,
            config_parser: None,
        }
    }

    /// Deserialize the plugin's `Config:` stanza into `T`.
    pub fn with_config<T>(mut self) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.config_parser = Some(Box::new(|value| {
            let parsed: T = serde_json::from_value(value)?;
            Ok(TaskConfig(Arc::new(parsed)))
        }));
        self
    }

    pub fn has_config_type(&self) -> bool {
        self.config_parser.is_some()
    }

    /// Parse `value` with the registered config type, if any.
    pub fn parse_config(
        &self,
        value: serde_json::Value,
    ) -> Option<Result<TaskConfig, serde_json::Error>> {
        self.config_parser.as_ref().map(|parse| parse(value))
    }
}
