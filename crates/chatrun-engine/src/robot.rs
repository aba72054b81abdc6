//! The `Robot` facade handed to task code.
//!
//! A `Robot` is a cheap, cloneable view of one run: who asked, where, and
//! the configuration snapshot the run started with. It is the only way
//! tasks reach the engine.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrun_core::{
    roster::bracket, AuditRecord, CallerId, Event, IncomingMessage, LogLevel, MessageFormat,
    Protocol, RetVal, RunId, Task, TaskRetVal, UserChanMaps,
};
use rand::seq::SliceRandom;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::connector::Connector;
use crate::context::{RunContext, RunShared};
use crate::elevate;
use crate::pipeline::{start_pipeline, PipelineType, TaskSpec};
use crate::registry::TaskList;
use crate::replies::stock_reply;
use crate::state::{lock, BotState};

/// Default time to wait for a reply to a prompt.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(45);

/// Facade on a run for task code.
#[derive(Clone)]
pub struct Robot {
    pub user: String,
    pub protocol_user: String,
    pub channel: String,
    pub protocol_channel: String,
    pub protocol: Protocol,
    pub format: MessageFormat,
    pub(crate) incoming: Option<Arc<IncomingMessage>>,
    pub(crate) id: Option<RunId>,
    pub(crate) eid: Option<CallerId>,
    pub(crate) automatic_task: bool,
    pub(crate) direct_msg: bool,
    pub(crate) current_task: Option<Arc<Task>>,
    pub(crate) ns_extension: String,
    pub(crate) cfg: Arc<Config>,
    pub(crate) tasks: Arc<TaskList>,
    pub(crate) maps: Arc<UserChanMaps>,
    pub(crate) state: Arc<BotState>,
    pub(crate) shared: Arc<Mutex<RunShared>>,
    pub(crate) cancel: CancellationToken,
}

impl Robot {
    pub fn run_id(&self) -> Option<RunId> {
        self.id
    }

    pub fn caller_id(&self) -> Option<&CallerId> {
        self.eid.as_ref()
    }

    /// The message that started the run, if any.
    pub fn incoming(&self) -> Option<&IncomingMessage> {
        self.incoming.as_deref()
    }

    pub fn current_task(&self) -> Option<&Arc<Task>> {
        self.current_task.as_ref()
    }

    pub fn is_direct(&self) -> bool {
        self.direct_msg
    }

    /// Task registry snapshot for this run.
    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn with_task(&self, task: Arc<Task>) -> Robot {
        let mut r = self.clone();
        r.current_task = Some(task);
        r
    }

    /// A copy that talks to the user directly.
    pub fn direct(&self) -> Robot {
        let mut r = self.clone();
        r.channel.clear();
        r.protocol_channel.clear();
        r.direct_msg = true;
        r
    }

    /// A copy that sends with `format`.
    pub fn message_format(&self, format: MessageFormat) -> Robot {
        let mut r = self.clone();
        r.format = format;
        r
    }

    pub(crate) fn audit(&self, event: Event, task: &str, message: impl Into<String>) {
        self.state.events.emit(AuditRecord::new(
            event,
            task,
            &self.user,
            &self.channel,
            message,
        ));
    }

    fn connector(&self) -> Option<Arc<dyn Connector>> {
        let connector = self.state.connector();
        if connector.is_none() {
            warn!(run_id = ?self.id, "No connector active, dropping message");
        }
        connector
    }

    pub async fn send_channel_message(&self, channel: &str, msg: &str) -> RetVal {
        if channel.is_empty() {
            return RetVal::ChannelNotFound;
        }
        match self.connector() {
            Some(c) => c.send_channel_message(channel, msg, self.format).await,
            None => RetVal::FailedMessageSend,
        }
    }

    pub async fn send_user_message(&self, user: &str, msg: &str) -> RetVal {
        if user.is_empty() {
            return RetVal::UserNotFound;
        }
        match self.connector() {
            Some(c) => c.send_user_message(user, msg, self.format).await,
            None => RetVal::FailedMessageSend,
        }
    }

    pub async fn send_user_channel_message(&self, user: &str, channel: &str, msg: &str) -> RetVal {
        if user.is_empty() {
            return RetVal::UserNotFound;
        }
        if channel.is_empty() {
            return RetVal::ChannelNotFound;
        }
        match self.connector() {
            Some(c) => {
                c.send_user_channel_message(user, channel, msg, self.format)
                    .await
            }
            None => RetVal::FailedMessageSend,
        }
    }

    /// Send to wherever the request came from.
    pub async fn say(&self, msg: &str) -> RetVal {
        if self.direct_msg || self.channel.is_empty() {
            self.send_user_message(&self.user, msg).await
        } else {
            self.send_channel_message(&self.channel, msg).await
        }
    }

    /// Like `say`, but addressed to the user in channels.
    pub async fn reply(&self, msg: &str) -> RetVal {
        if self.direct_msg || self.channel.is_empty() {
            self.send_user_message(&self.user, msg).await
        } else {
            self.send_user_channel_message(&self.user, &self.channel, msg)
                .await
        }
    }

    /// Whether the requester is a robot administrator. Automatic tasks
    /// always are.
    pub fn check_admin(&self) -> bool {
        let task = self
            .current_task
            .as_ref()
            .map(|t| t.name.as_str())
            .unwrap_or_default();
        if self.automatic_task {
            return true;
        }
        if self.cfg.is_admin(&self.user) {
            self.audit(Event::AdminCheckPassed, task, "");
            true
        } else {
            self.audit(Event::AdminCheckFailed, task, "");
            false
        }
    }

    /// Set a parameter in the run environment, for later tasks in the
    /// pipeline. Names must be identifiers.
    pub fn set_parameter(&self, name: &str, value: &str) -> bool {
        if !is_identifier(name) {
            return false;
        }
        lock(&self.shared)
            .environment
            .insert(name.to_string(), value.to_string());
        true
    }

    pub fn get_parameter(&self, name: &str) -> Option<String> {
        lock(&self.shared).environment.get(name).cloned()
    }

    pub fn environment(&self) -> HashMap<String, String> {
        lock(&self.shared).environment.clone()
    }

    pub fn working_directory(&self) -> PathBuf {
        lock(&self.shared).working_directory.clone()
    }

    /// Change the working directory for later tasks. `.` resets to the
    /// base directory; absolute paths are used as-is; `./sub` is relative
    /// to the current directory and anything else to the base directory.
    /// The directory must exist.
    pub fn set_working_directory(&self, path: &str) -> bool {
        let mut shared = lock(&self.shared);
        if path == "." {
            shared.working_directory = shared.base_directory.clone();
            return true;
        }
        let candidate = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else if let Some(sub) = path.strip_prefix("./") {
            shared.working_directory.join(sub)
        } else {
            shared.base_directory.join(path)
        };
        let resolved = if candidate.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            candidate.clone()
        };
        if resolved.is_dir() {
            shared.working_directory = candidate;
            true
        } else {
            debug!(path = %resolved.display(), "Working directory doesn't exist");
            false
        }
    }

    /// Ask the elevator to confirm the user's identity for the current task.
    pub async fn elevate(&self, immediate: bool) -> bool {
        match self.current_task.clone() {
            Some(task) => elevate::elevate(self, &task, immediate).await == TaskRetVal::Success,
            None => false,
        }
    }

    pub fn get_bot_attribute(&self, attr: &str) -> Result<String, RetVal> {
        let info = &self.cfg.bot_info;
        let value = match attr.to_ascii_lowercase().as_str() {
            "name" => info.user_name.clone(),
            "fullname" | "realname" => info.full_name.clone(),
            "alias" => self.cfg.alias.clone(),
            "email" => info.email.clone(),
            "contact" | "admin" | "admincontact" => self.cfg.admin_contact.clone(),
            "protocol" => self.protocol.to_string(),
            _ => return Err(RetVal::AttributeNotFound),
        };
        Ok(value)
    }

    /// Roster first, then the connector.
    pub fn get_user_attribute(&self, user: &str, attr: &str) -> Result<String, RetVal> {
        let rostered = self.maps.user(user);
        if let Some(u) = rostered {
            let value = match attr.to_ascii_lowercase().as_str() {
                "name" | "username" => u.user_name.clone(),
                "id" | "internalid" => bracket(&u.user_id),
                "email" => u.email.clone(),
                "fullname" | "realname" => u.full_name.clone(),
                "firstname" | "givenname" => u.first_name.clone(),
                "lastname" | "surname" => u.last_name.clone(),
                "phone" => u.phone.clone(),
                _ => String::new(),
            };
            if !value.is_empty() && value != "<>" {
                return Ok(value);
            }
        }
        if let Some(value) = self
            .state
            .connector()
            .and_then(|c| c.user_attribute(user, attr))
        {
            return Ok(value);
        }
        if rostered.is_some() {
            Err(RetVal::AttributeNotFound)
        } else {
            Err(RetVal::UserNotFound)
        }
    }

    pub fn get_sender_attribute(&self, attr: &str) -> Result<String, RetVal> {
        self.get_user_attribute(&self.user, attr)
    }

    /// The current plugin's `Config:` in its registered type.
    pub fn task_config<T: Any + Send + Sync>(&self) -> Result<Arc<T>, RetVal> {
        self.current_task
            .as_ref()
            .and_then(|t| t.typed_config.as_ref())
            .and_then(|c| c.get::<T>())
            .ok_or(RetVal::NoConfigFound)
    }

    /// Log a message from task code; also written to the run's history.
    pub fn log(&self, level: LogLevel, msg: &str) {
        let task = self
            .current_task
            .as_ref()
            .map(|t| t.name.as_str())
            .unwrap_or_default();
        match level {
            LogLevel::Trace => trace!(task = %task, "{}", msg),
            LogLevel::Debug => debug!(task = %task, "{}", msg),
            LogLevel::Info => info!(task = %task, "{}", msg),
            LogLevel::Audit => info!(target: "audit", task = %task, "{}", msg),
            LogLevel::Warn => warn!(task = %task, "{}", msg),
            LogLevel::Error => error!(task = %task, "{}", msg),
        }
        lock(&self.shared).log_line(&format!("LOG {}: {}", level.as_str(), msg));
    }

    /// Sleep, returning early if the run is aborted.
    pub async fn pause(&self, seconds: f64) {
        let delay = Duration::from_secs_f64(seconds.max(0.0));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    pub fn random_string(&self, choices: &[String]) -> String {
        choices
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    fn resolve(&self, name: &str, args: &[String]) -> Result<TaskSpec, RetVal> {
        let task = self
            .tasks
            .get_task_by_name(name)
            .cloned()
            .ok_or(RetVal::TaskNotFound)?;
        if task.is_plugin() {
            // plugins take their command as the first argument
            let (command, rest) = args.split_first().ok_or(RetVal::MissingArguments)?;
            Ok(TaskSpec::new(task, command, rest.to_vec()))
        } else {
            Ok(TaskSpec::new(task, "run", args.to_vec()))
        }
    }

    /// Queue a task after the current one.
    pub fn add_task(&self, name: &str, args: &[String]) -> RetVal {
        match self.resolve(name, args) {
            Ok(spec) => {
                lock(&self.shared).next_tasks.push_back(spec);
                RetVal::Ok
            }
            Err(r) => r,
        }
    }

    /// Queue a job to run as a child pipeline after the current task.
    pub fn add_job(&self, name: &str, args: &[String]) -> RetVal {
        match self.resolve(name, args) {
            Ok(spec) if spec.task.is_plugin() => RetVal::InvalidParameter,
            Ok(spec) => {
                lock(&self.shared).next_tasks.push_back(spec);
                RetVal::Ok
            }
            Err(r) => r,
        }
    }

    /// Add a task that runs when the pipeline ends, whatever the outcome.
    pub fn final_task(&self, name: &str, args: &[String]) -> RetVal {
        match self.resolve(name, args) {
            Ok(spec) => {
                lock(&self.shared).final_tasks.push(spec);
                RetVal::Ok
            }
            Err(r) => r,
        }
    }

    /// Add a task that runs only if the pipeline fails.
    pub fn fail_task(&self, name: &str, args: &[String]) -> RetVal {
        match self.resolve(name, args) {
            Ok(spec) => {
                lock(&self.shared).fail_tasks.push(spec);
                RetVal::Ok
            }
            Err(r) => r,
        }
    }

    /// Start a job in its own, independent pipeline.
    pub fn spawn_job(&self, name: &str, args: &[String]) -> RetVal {
        let spec = match self.resolve(name, args) {
            Ok(spec) if spec.task.is_plugin() => return RetVal::InvalidParameter,
            Ok(spec) => spec,
            Err(r) => return r,
        };
        let mut ctx = RunContext::from_robot(self);
        ctx.automatic_task = true;
        tokio::spawn(start_pipeline(ctx, None, spec, PipelineType::Spawned));
        RetVal::Ok
    }

    /// Ask for exclusive execution under `tag` (namespaced by the task).
    /// The pipeline acquires it before running its next task; with `queue`
    /// it waits, otherwise it aborts if another run holds the tag.
    pub fn exclusive(&self, tag: &str, queue: bool) -> bool {
        let Some(task) = self.current_task.as_ref() else {
            return false;
        };
        let mut ns = format!("{}{}", task.effective_namespace(), self.ns_extension);
        if !tag.is_empty() {
            ns.push(':');
            ns.push_str(tag);
        }
        let mut shared = lock(&self.shared);
        if shared.exclusive {
            return shared.exclusive_tag.as_deref() == Some(ns.as_str());
        }
        shared.exclusive_tag = Some(ns);
        shared.queue_task = queue;
        true
    }

    fn reply_regex(&self, regex_id: &str) -> Option<Regex> {
        let own = self
            .current_task
            .as_ref()
            .and_then(|t| t.as_plugin())
            .and_then(|p| {
                p.reply_matchers
                    .iter()
                    .find(|m| m.label == regex_id || (m.label.is_empty() && m.command == regex_id))
            })
            .and_then(|m| m.compiled().cloned());
        own.or_else(|| {
            stock_reply(regex_id).and_then(|re| Regex::new(&format!(r"^\s*{}\s*$", re)).ok())
        })
    }

    /// Wait for the user's next message in this channel, which must match
    /// the reply matcher `regex_id`.
    pub async fn wait_for_reply(&self, regex_id: &str, timeout: Duration) -> Result<String, RetVal> {
        let matcher = self.reply_regex(regex_id).ok_or(RetVal::MatcherNotFound)?;
        let rx = self
            .state
            .replies
            .register(&self.user, &self.channel, matcher)
            .ok_or(RetVal::Interrupted)?;
        tokio::select! {
            reply = rx => match reply {
                Ok((text, RetVal::Ok)) => Ok(text),
                Ok((_, ret)) => Err(ret),
                Err(_) => Err(RetVal::Interrupted),
            },
            _ = tokio::time::sleep(timeout) => {
                self.state.replies.cancel(&self.user, &self.channel);
                Err(RetVal::TimeoutExpired)
            }
            _ = self.cancel.cancelled() => {
                self.state.replies.cancel(&self.user, &self.channel);
                Err(RetVal::Interrupted)
            }
        }
    }

    /// `say` the prompt, then `wait_for_reply` with the default timeout.
    pub async fn prompt_for_reply(&self, regex_id: &str, prompt: &str) -> Result<String, RetVal> {
        let sent = self.say(prompt).await;
        if sent != RetVal::Ok {
            return Err(sent);
        }
        self.wait_for_reply(regex_id, DEFAULT_REPLY_TIMEOUT).await
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
