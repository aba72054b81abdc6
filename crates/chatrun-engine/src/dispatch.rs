//! Incoming message dispatch.
//!
//! A message goes to a waiting `wait_for_reply` first. Otherwise commands
//! addressed to the robot are matched against the command matchers of
//! available plugins, falling back to catch-all plugins; other messages go
//! to message matchers. Job triggers see every message.

use std::sync::Arc;

use chatrun_core::{AuditRecord, Event, IncomingMessage, Task, TaskRetVal};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::RunContext;
use crate::pipeline::{start_pipeline, PipelineType, TaskSpec};
use crate::robot::Robot;
use crate::state::BotState;

pub const MULTIPLE_MATCHES: &str =
    "Your message matched more than one plugin, so I'm not doing anything; try being more specific";
pub const ADMIN_ONLY: &str = "Sorry, that command is only available to bot administrators";

/// What happened to a message.
#[derive(Debug)]
pub enum Dispatch {
    /// From an ignored user, or a bot talking to us directly.
    Ignored,
    /// Delivered to a pending `wait_for_reply`.
    Reply,
    /// Pipelines were started.
    Started(Vec<JoinHandle<TaskRetVal>>),
    /// Nothing ran.
    NoAction,
}

/// Text of a command addressed to the robot, if `text` is one.
///
/// In channels a command starts with the alias, `name,`/`name:` or
/// `@name`. Every direct message is a command; a leading address is
/// stripped there too.
pub fn detect_command(text: &str, cfg: &Config, direct: bool) -> Option<String> {
    let t = text.trim();
    if !cfg.alias.is_empty() {
        if let Some(rest) = t.strip_prefix(cfg.alias.as_str()) {
            return Some(rest.trim().to_string());
        }
    }
    let name = &cfg.bot_info.user_name;
    if !name.is_empty() {
        let (at, bare) = (format!("@{}", name), name.as_str());
        for (prefix, needs_punct) in [(at.as_str(), false), (bare, true)] {
            let Some(head) = t.get(..prefix.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(prefix) {
                continue;
            }
            let rest = &t[prefix.len()..];
            let addressed = if needs_punct {
                rest.starts_with([',', ':'])
            } else {
                rest.is_empty() || rest.starts_with([',', ':']) || rest.starts_with(char::is_whitespace)
            };
            if addressed {
                let rest = rest.trim_start_matches([',', ':']).trim();
                return Some(rest.to_string());
            }
        }
    }
    direct.then(|| t.to_string())
}

struct Match {
    task: Arc<Task>,
    command: String,
    args: Vec<String>,
}

/// Plugins whose command or message matchers match `text`.
fn match_plugins(robot: &Robot, text: &str, commands: bool) -> Vec<Match> {
    let mut matches = Vec::new();
    for task in robot.tasks.iter().filter(|t| t.is_plugin()) {
        let Some(plugin) = task.as_plugin() else {
            continue;
        };
        let matchers = if commands {
            &plugin.command_matchers
        } else {
            &plugin.message_matchers
        };
        let hits: Vec<_> = matchers
            .iter()
            .filter_map(|m| m.captures(text).map(|args| (m.command.clone(), args)))
            .collect();
        if hits.is_empty() || !robot.plugin_available(task, false, !commands) {
            continue;
        }
        for (command, args) in hits {
            robot.state.debug.debug_task(
                task,
                &format!("matched command '{}' with args {:?}", command, args),
                !commands,
            );
            matches.push(Match {
                task: task.clone(),
                command,
                args,
            });
        }
    }
    matches
}

/// Start a pipeline on the registry snapshot the message was matched against.
fn spawn(ctx: &RunContext, spec: TaskSpec, ptype: PipelineType) -> JoinHandle<TaskRetVal> {
    tokio::spawn(start_pipeline(ctx.clone_for_pipeline(), None, spec, ptype))
}

/// Handle one incoming message.
pub async fn handle_message(state: &Arc<BotState>, msg: IncomingMessage) -> Dispatch {
    let ctx = RunContext::from_message(state, &msg);
    let robot = ctx.make_robot();
    let cfg = robot.cfg.clone();

    if cfg.ignore_users.iter().any(|u| *u == msg.user) {
        state.events.emit(AuditRecord::new(
            Event::IgnoredUser,
            "",
            &msg.user,
            &msg.channel,
            "Ignoring message from user on the ignore list",
        ));
        return Dispatch::Ignored;
    }
    if ctx.bot_user && msg.direct {
        state.events.emit(AuditRecord::new(
            Event::BotDirectMessage,
            "",
            &msg.user,
            &msg.channel,
            "Ignoring direct message from a bot user",
        ));
        return Dispatch::Ignored;
    }

    if state.replies.deliver(&msg.user, &msg.channel, &msg.text) {
        debug!(user = %msg.user, channel = %msg.channel, "Delivered reply to waiting task");
        return Dispatch::Reply;
    }

    let mut started = Vec::new();

    // bot users only trigger jobs
    if !ctx.bot_user {
        match detect_command(&msg.text, &cfg, msg.direct) {
            Some(command) => dispatch_command(&ctx, &robot, &command, &mut started).await,
            None => dispatch_ambient(&ctx, &robot, &msg, &mut started).await,
        }
    }

    for task in robot.tasks.iter().filter(|t| !t.is_plugin() && !t.disabled) {
        let Some(job) = task.as_job() else {
            continue;
        };
        for trigger in &job.triggers {
            if !trigger.user.is_empty() && trigger.user != msg.user {
                continue;
            }
            if !trigger.channel.is_empty() && trigger.channel != msg.channel {
                continue;
            }
            if let Some(args) = trigger.captures(&msg.text) {
                info!(job = %task.name, user = %msg.user, channel = %msg.channel, "Job triggered");
                let spec = TaskSpec::new(task.clone(), "run", args);
                started.push(spawn(&ctx, spec, PipelineType::Triggered));
                break;
            }
        }
    }

    if started.is_empty() {
        Dispatch::NoAction
    } else {
        Dispatch::Started(started)
    }
}

async fn dispatch_command(
    ctx: &RunContext,
    robot: &Robot,
    command: &str,
    started: &mut Vec<JoinHandle<TaskRetVal>>,
) {
    let mut matches = match_plugins(robot, command, true);
    if matches.len() > 1 {
        let names: Vec<&str> = matches.iter().map(|m| m.task.name.as_str()).collect();
        robot.audit(
            Event::MultipleMatchesNoAction,
            "",
            format!("Command '{}' matched multiple plugins: {}", command, names.join(", ")),
        );
        robot.say(MULTIPLE_MATCHES).await;
        return;
    }

    if let Some(m) = matches.pop() {
        let robot = robot.with_task(m.task.clone());
        let admin_only = m
            .task
            .as_plugin()
            .is_some_and(|p| p.admin_commands.iter().any(|c| *c == m.command));
        if admin_only && !robot.check_admin() {
            robot.say(ADMIN_ONLY).await;
            return;
        }
        let spec = TaskSpec::new(m.task, &m.command, m.args);
        started.push(spawn(ctx, spec, PipelineType::Command));
        return;
    }

    let catch_alls: Vec<Arc<Task>> = robot
        .tasks
        .iter()
        .filter(|t| t.as_plugin().is_some_and(|p| p.catch_all))
        .filter(|t| robot.plugin_available(t, false, false))
        .cloned()
        .collect();
    if catch_alls.is_empty() {
        debug!(command = %command, "No plugin matched command");
        return;
    }
    robot.audit(
        Event::CatchAllsRan,
        "",
        format!("Unmatched command '{}', running {} catch-all plugin(s)", command, catch_alls.len()),
    );
    for task in catch_alls {
        let spec = TaskSpec::new(task, "catchall", vec![command.to_string()]);
        started.push(spawn(ctx, spec, PipelineType::CatchAll));
    }
}

async fn dispatch_ambient(
    ctx: &RunContext,
    robot: &Robot,
    msg: &IncomingMessage,
    started: &mut Vec<JoinHandle<TaskRetVal>>,
) {
    let mut matches = match_plugins(robot, &msg.text, false);
    if matches.len() > 1 {
        let names: Vec<&str> = matches.iter().map(|m| m.task.name.as_str()).collect();
        robot.audit(
            Event::MultipleMatchesNoAction,
            "",
            format!("Message matched multiple plugins: {}", names.join(", ")),
        );
        return;
    }
    if let Some(m) = matches.pop() {
        let spec = TaskSpec::new(m.task, &m.command, m.args);
        started.push(spawn(ctx, spec, PipelineType::Ambient));
    }
}
