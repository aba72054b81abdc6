//! Shared test fixtures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatrun_core::{IncomingMessage, MessageFormat, RetVal, Task, TaskRetVal, TaskSource};

use crate::config::Config;
use crate::connector::Connector;
use crate::context::RunContext;
use crate::registry::{PluginHandler, RegisteredPlugin, TaskList};
use crate::robot::Robot;
use crate::state::{BotState, Paths};

/// A message the recording connector was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub user: String,
    pub channel: String,
    pub msg: String,
}

/// Connector that remembers what it sent.
#[derive(Default)]
pub struct RecordingConnector {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingConnector {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.msg).collect()
    }

    fn record(&self, user: &str, channel: &str, msg: &str) -> RetVal {
        self.sent.lock().unwrap().push(Sent {
            user: user.to_string(),
            channel: channel.to_string(),
            msg: msg.to_string(),
        });
        RetVal::Ok
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn send_channel_message(&self, channel: &str, msg: &str, _: MessageFormat) -> RetVal {
        self.record("", channel, msg)
    }

    async fn send_user_channel_message(
        &self,
        user: &str,
        channel: &str,
        msg: &str,
        _: MessageFormat,
    ) -> RetVal {
        self.record(user, channel, msg)
    }

    async fn send_user_message(&self, user: &str, msg: &str, _: MessageFormat) -> RetVal {
        self.record(user, "", msg)
    }
}

/// State without a running connector.
pub fn bare_state(config: Config) -> (Arc<BotState>, Arc<RecordingConnector>) {
    (
        BotState::new(config, Paths::default()),
        Arc::new(RecordingConnector::default()),
    )
}

/// State with `paths` and a recording connector.
pub fn test_state_at(config: Config, paths: Paths) -> (Arc<BotState>, Arc<RecordingConnector>) {
    let state = BotState::new(config, paths);
    let conn = Arc::new(RecordingConnector::default());
    state.set_connector(conn.clone());
    (state, conn)
}

pub fn test_state(config: Config) -> (Arc<BotState>, Arc<RecordingConnector>) {
    test_state_at(config, Paths::default())
}

pub fn robot_for(state: &Arc<BotState>, user: &str, channel: &str) -> Robot {
    RunContext::from_message(state, &IncomingMessage::channel(user, channel, "")).make_robot()
}

pub fn direct_robot_for(state: &Arc<BotState>, user: &str) -> Robot {
    RunContext::from_message(state, &IncomingMessage::direct(user, "")).make_robot()
}

/// A built-in plugin visible everywhere.
pub fn plugin_task(name: &str) -> Task {
    let mut t = Task::plugin(name, TaskSource::Builtin);
    t.all_channels = true;
    t.allow_direct = true;
    t
}

pub fn install_tasks(state: &BotState, tasks: Vec<Task>) {
    state.replace_tasks(TaskList::new(tasks));
}

struct Noop;

#[async_trait]
impl PluginHandler for Noop {
    async fn handle(&self, _: &Robot, _: &str, _: &[String]) -> TaskRetVal {
        TaskRetVal::Normal
    }
}

pub fn noop_handler() -> Arc<dyn PluginHandler> {
    Arc::new(Noop)
}

pub fn noop_plugin() -> RegisteredPlugin {
    RegisteredPlugin::new("", noop_handler())
}

/// Handler returning a fixed value and recording its calls.
pub struct Scripted {
    ret: TaskRetVal,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl Scripted {
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(String, Vec<String>)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PluginHandler for Scripted {
    async fn handle(&self, _: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec()));
        self.ret
    }
}

/// Register a scripted built-in plugin under `name`.
pub fn scripted(state: &BotState, name: &str, ret: TaskRetVal) -> Arc<Scripted> {
    let handler = Arc::new(Scripted {
        ret,
        calls: Mutex::new(Vec::new()),
    });
    state
        .register_plugin(name, RegisteredPlugin::new("", handler.clone()))
        .unwrap();
    handler
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> PluginHandler for FnHandler<F>
where
    F: Fn(&Robot, &str, &[String]) -> TaskRetVal + Send + Sync,
{
    async fn handle(&self, robot: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        (self.0)(robot, command, args)
    }
}

/// Register a built-in plugin running `f`.
pub fn plugin_fn<F>(state: &BotState, name: &str, f: F)
where
    F: Fn(&Robot, &str, &[String]) -> TaskRetVal + Send + Sync + 'static,
{
    state
        .register_plugin(name, RegisteredPlugin::new("", Arc::new(FnHandler(f))))
        .unwrap();
}

/// Ordered record of calls across handlers.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
