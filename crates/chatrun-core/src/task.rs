//! Task definitions: the shared base record plus plugin/job specifics.

use crate::{InputMatcher, TaskId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Where a task's code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSource {
    /// Statically registered with the engine.
    Builtin,
    /// An external script/executable.
    External { path: String },
}

/// Help text for a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginHelp {
    pub keywords: Vec<String>,
    pub helptext: Vec<String>,
}

/// Plugin-only configuration.
#[derive(Debug, Clone, Default)]
pub struct PluginSpec {
    pub help: Vec<PluginHelp>,
    pub command_matchers: Vec<InputMatcher>,
    pub message_matchers: Vec<InputMatcher>,
    pub reply_matchers: Vec<InputMatcher>,
    pub authorized_commands: Vec<String>,
    pub authorize_all_commands: bool,
    pub elevated_commands: Vec<String>,
    pub elevate_immediate_commands: Vec<String>,
    pub admin_commands: Vec<String>,
    pub catch_all: bool,
}

impl PluginSpec {
    /// Returns true if `command` is declared by a command or message matcher.
    pub fn declares_command(&self, command: &str) -> bool {
        self.command_matchers
            .iter()
            .chain(self.message_matchers.iter())
            .any(|m| m.command == command)
    }
}

/// Job-only configuration.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Channel where job status is posted.
    pub channel: String,
    /// User notified when the job fails.
    pub notify: String,
    pub triggers: Vec<InputMatcher>,
    pub required_parameters: Vec<String>,
    pub verbose: bool,
}

/// Type-specific part of a task.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Plugin(PluginSpec),
    Job(JobSpec),
}

/// A built-in plugin's `Config:` stanza after deserialization into the type
/// the plugin registered.
#[derive(Clone)]
pub struct TaskConfig(pub Arc<dyn Any + Send + Sync>);

impl TaskConfig {
    /// Downcast to the registered config type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskConfig(..)")
    }
}

/// A configured job or plugin.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub task_id: TaskId,
    pub source: TaskSource,
    pub description: String,
    pub namespace: String,

    /// Set when the task failed to load; `reason` says why.
    pub disabled: bool,
    pub reason: String,

    // Visibility
    pub channels: Vec<String>,
    pub all_channels: bool,
    pub allow_direct: bool,
    pub direct_only: bool,
    pub require_admin: bool,
    /// Glob patterns of allowed users; empty means everyone.
    pub users: Vec<String>,

    // Security
    pub authorizer: String,
    pub auth_require: String,
    pub elevator: String,

    /// Number of history logs to keep; `None` uses the robot default.
    pub max_histories: Option<usize>,

    /// Raw `Config:` stanza.
    pub config: Option<serde_json::Value>,
    /// `Config:` deserialized for built-in plugins that registered a type.
    pub typed_config: Option<TaskConfig>,

    pub kind: TaskKind,
}

impl Task {
    fn new(name: &str, source: TaskSource, kind: TaskKind) -> Self {
        Self {
            name: name.to_string(),
            task_id: TaskId::for_name(name),
            source,
            description: String::new(),
            namespace: String::new(),
            disabled: false,
            reason: String::new(),
            channels: Vec::new(),
            all_channels: false,
            allow_direct: false,
            direct_only: false,
            require_admin: false,
            users: Vec::new(),
            authorizer: String::new(),
            auth_require: String::new(),
            elevator: String::new(),
            max_histories: None,
            config: None,
            typed_config: None,
            kind,
        }
    }

    /// Create an unconfigured plugin.
    pub fn plugin(name: &str, source: TaskSource) -> Self {
        Self::new(name, source, TaskKind::Plugin(PluginSpec::default()))
    }

    /// Create an unconfigured job.
    pub fn job(name: &str, source: TaskSource) -> Self {
        Self::new(name, source, TaskKind::Job(JobSpec::default()))
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self.kind, TaskKind::Plugin(_))
    }

    pub fn as_plugin(&self) -> Option<&PluginSpec> {
        match &self.kind {
            TaskKind::Plugin(p) => Some(p),
            TaskKind::Job(_) => None,
        }
    }

    pub fn as_plugin_mut(&mut self) -> Option<&mut PluginSpec> {
        match &mut self.kind {
            TaskKind::Plugin(p) => Some(p),
            TaskKind::Job(_) => None,
        }
    }

    pub fn as_job(&self) -> Option<&JobSpec> {
        match &self.kind {
            TaskKind::Job(j) => Some(j),
            TaskKind::Plugin(_) => None,
        }
    }

    pub fn as_job_mut(&mut self) -> Option<&mut JobSpec> {
        match &mut self.kind {
            TaskKind::Job(j) => Some(j),
            TaskKind::Plugin(_) => None,
        }
    }

    /// "plugin" or "job", for log messages.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TaskKind::Plugin(_) => "plugin",
            TaskKind::Job(_) => "job",
        }
    }

    /// Mark the task disabled with a reason.
    pub fn disable(&mut self, reason: impl Into<String>) {
        self.disabled = true;
        self.reason = reason.into();
    }

    /// Namespace for parameters and exclusive tags; defaults to the name.
    pub fn effective_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            &self.name
        } else {
            &self.namespace
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_declares_command() {
        let mut t = Task::plugin("deployer", TaskSource::Builtin);
        let p = t.as_plugin_mut().unwrap();
        p.command_matchers.push(InputMatcher::command("deploy", "deploy"));
        p.message_matchers.push(InputMatcher::command("wave", "hi"));
        let p = t.as_plugin().unwrap();
        assert!(p.declares_command("deploy"));
        assert!(p.declares_command("wave"));
        assert!(!p.declares_command("rollback"));
    }

    #[test]
    fn test_task_kind_accessors() {
        let job = Task::job("backup", TaskSource::External { path: "jobs/backup.sh".into() });
        assert!(!job.is_plugin());
        assert!(job.as_plugin().is_none());
        assert_eq!(job.kind_name(), "job");
        assert_eq!(job.effective_namespace(), "backup");
    }

    #[test]
    fn test_typed_config_downcast() {
        #[derive(Debug, PartialEq)]
        struct Conf {
            token: String,
        }
        let cfg = TaskConfig(Arc::new(Conf { token: "x".into() }));
        assert_eq!(cfg.get::<Conf>().unwrap().token, "x");
        assert!(cfg.get::<String>().is_none());
    }
}
