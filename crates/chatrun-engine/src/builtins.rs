//! Built-in administration and help plugins.

use std::sync::Arc;

use async_trait::async_trait;
use chatrun_core::TaskRetVal;
use tracing::{error, info};

use crate::error::EngineError;
use crate::registry::{PluginHandler, RegisteredPlugin};
use crate::robot::Robot;
use crate::state::BotState;

pub const ADMIN_PLUGIN: &str = "builtin-admin";
pub const HELP_PLUGIN: &str = "builtin-help";

/// Help output longer than this goes to the user directly.
const MAX_CHANNEL_HELP_LINES: usize = 14;

const ADMIN_CONFIG: &str = r#"
AllChannels: true
AllowDirect: true
Help:
- Keywords: [ "reload" ]
  Helptext: [ "(bot), reload - reload configuration and tasks" ]
- Keywords: [ "ps", "abort" ]
  Helptext:
  - "(bot), ps - list running pipelines"
  - "(bot), abort <id> - abort a running pipeline"
- Keywords: [ "debug" ]
  Helptext:
  - "(bot), debug task <name> (verbose) - log debugging output for a task"
  - "(bot), stop debugging (<name>) - stop debugging one or all tasks"
- Keywords: [ "history", "log" ]
  Helptext:
  - "(bot), history <task> - list the retained run logs for a task"
  - "(bot), view log <task> <index> - show a run log"
  - "(bot), view log <ref> - show the run log with a reference"
CommandMatchers:
- Command: reload
  Regex: 'reload'
- Command: ps
  Regex: 'ps'
- Command: abort
  Regex: 'abort (\d+)'
- Command: debug
  Regex: 'debug (?:task )?([\w-]+)( verbose)?'
- Command: stopdebug
  Regex: 'stop debugging(?: ([\w-]+))?'
- Command: history
  Regex: 'history ([\w-]+)'
- Command: viewlog
  Regex: 'view log ([\w-]+)(?: (\d+))?'
AdminCommands:
- reload
- ps
- abort
- debug
- stopdebug
- history
- viewlog
"#;

const HELP_CONFIG: &str = r#"
AllChannels: true
AllowDirect: true
Help:
- Keywords: [ "help" ]
  Helptext:
  - "(bot), help - list help for everything available here"
  - "(bot), help <keyword> - list help for a keyword"
CommandMatchers:
- Command: help
  Regex: '(?i:help)(?: ([\w-]+))?'
"#;

/// Register the built-in plugins.
pub fn register_builtins(state: &BotState) -> Result<(), EngineError> {
    state.register_plugin(ADMIN_PLUGIN, RegisteredPlugin::new(ADMIN_CONFIG, Arc::new(Admin)))?;
    state.register_plugin(HELP_PLUGIN, RegisteredPlugin::new(HELP_CONFIG, Arc::new(Help)))?;
    Ok(())
}

struct Admin;

impl Admin {
    async fn reload(&self, r: &Robot) -> TaskRetVal {
        match r.state.reload().await {
            Ok(tasks) => {
                let disabled = tasks.iter().filter(|t| t.disabled).count();
                info!(user = %r.user, tasks = tasks.len(), "Configuration reloaded");
                let mut msg = format!("Configuration reloaded, {} tasks loaded", tasks.len());
                if disabled > 0 {
                    msg.push_str(&format!(" ({} disabled, check the log)", disabled));
                }
                r.reply(&msg).await;
                TaskRetVal::Normal
            }
            Err(e) => {
                error!(error = %e, "Reload failed");
                r.reply(&format!("Reload failed: {}", e)).await;
                TaskRetVal::Fail
            }
        }
    }

    async fn ps(&self, r: &Robot) -> TaskRetVal {
        let runs = r.state.runs.list();
        let mut lines = Vec::with_capacity(runs.len() + 1);
        for run in &runs {
            let mut line = format!(
                "{}: {} for {} in {}, started {}",
                run.id,
                run.pipe_name,
                run.user,
                if run.channel.is_empty() { "(direct)" } else { run.channel.as_str() },
                run.started_at.format("%H:%M:%S"),
            );
            if let Some(parent) = r.state.runs.parent_of(run.id) {
                line.push_str(&format!(" (child of {})", parent));
            }
            lines.push(line);
        }
        r.reply(&format!("{} active pipeline(s)\n{}", runs.len(), lines.join("\n"))
            .trim_end())
            .await;
        TaskRetVal::Normal
    }

    async fn abort(&self, r: &Robot, id: &str) -> TaskRetVal {
        let Ok(id) = id.parse::<u64>() else {
            r.reply(&format!("Invalid run id: {}", id)).await;
            return TaskRetVal::Fail;
        };
        if r.run_id().map(|own| own.get()) == Some(id) {
            r.reply("I can't abort myself").await;
            return TaskRetVal::Fail;
        }
        if r.state.abort_run(id) {
            r.reply(&format!("Aborted run {}", id)).await;
            TaskRetVal::Normal
        } else {
            r.reply(&format!("No active run with id {}", id)).await;
            TaskRetVal::Fail
        }
    }

    async fn debug(&self, r: &Robot, name: &str, verbose: bool) -> TaskRetVal {
        let Some(task) = r.tasks.get_task_by_name(name) else {
            r.reply(&format!("Task '{}' not found", name)).await;
            return TaskRetVal::Fail;
        };
        r.state.debug.enable(task, verbose);
        let mut msg = format!("Debugging enabled for '{}'", task.name);
        if verbose {
            msg.push_str(" (verbose)");
        }
        if task.disabled {
            msg.push_str(&format!("; the task is disabled: {}", task.reason));
        }
        r.reply(&msg).await;
        TaskRetVal::Normal
    }

    async fn stop_debugging(&self, r: &Robot, name: &str) -> TaskRetVal {
        let debugging = r.state.debug.list();
        let stopped: Vec<_> = debugging
            .into_iter()
            .filter(|d| name.is_empty() || d.name == name)
            .filter(|d| r.state.debug.disable(&d.task_id))
            .map(|d| d.name)
            .collect();
        if stopped.is_empty() {
            r.reply("Nothing was being debugged").await;
        } else {
            r.reply(&format!("Stopped debugging: {}", stopped.join(", "))).await;
        }
        TaskRetVal::Normal
    }

    async fn history(&self, r: &Robot, tag: &str) -> TaskRetVal {
        let logs = r.state.history.list(tag);
        if logs.is_empty() {
            r.reply(&format!("No history found for '{}'", tag)).await;
            return TaskRetVal::Normal;
        }
        let lines: Vec<String> = logs
            .iter()
            .map(|l| format!("#{} ({}) ref {}", l.log_index, l.create_time, l.reference))
            .collect();
        r.reply(&format!("History for '{}':\n{}", tag, lines.join("\n")))
            .await;
        TaskRetVal::Normal
    }

    async fn view_log(&self, r: &Robot, what: &str, index: &str) -> TaskRetVal {
        let target = if index.is_empty() {
            r.state.history.lookup(what).map(|l| (l.tag, l.index))
        } else {
            index.parse::<usize>().ok().map(|i| (what.to_string(), i))
        };
        let Some((tag, index)) = target else {
            r.reply(&format!("No log found for '{}'", what)).await;
            return TaskRetVal::Fail;
        };
        match r.state.history.read_log(&tag, index) {
            Ok(text) => {
                r.direct()
                    .say(&format!("Log for {} #{}:\n{}", tag, index, text))
                    .await;
                TaskRetVal::Normal
            }
            Err(e) => {
                r.reply(&format!("Unable to read log: {}", e)).await;
                TaskRetVal::Fail
            }
        }
    }
}

fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map(|s| s.trim()).unwrap_or_default()
}

#[async_trait]
impl PluginHandler for Admin {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        match command {
            "init" => TaskRetVal::Normal,
            "reload" => self.reload(r).await,
            "ps" => self.ps(r).await,
            "abort" => self.abort(r, arg(args, 0)).await,
            "debug" => self.debug(r, arg(args, 0), !arg(args, 1).is_empty()).await,
            "stopdebug" => self.stop_debugging(r, arg(args, 0)).await,
            "history" => self.history(r, arg(args, 0)).await,
            "viewlog" => self.view_log(r, arg(args, 0), arg(args, 1)).await,
            _ => TaskRetVal::Fail,
        }
    }
}

struct Help;

impl Help {
    /// Help lines from every plugin the user could run, optionally
    /// limited to `keyword`.
    fn collect(r: &Robot, keyword: &str) -> Vec<String> {
        let alias = if r.cfg.alias.is_empty() {
            r.cfg.bot_info.user_name.clone()
        } else {
            r.cfg.alias.clone()
        };
        let mut lines = Vec::new();
        for task in r.tasks.iter() {
            let Some(plugin) = task.as_plugin() else {
                continue;
            };
            if !r.plugin_available(task, true, false) {
                continue;
            }
            for help in &plugin.help {
                if !keyword.is_empty() && !help.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
                    continue;
                }
                for text in &help.helptext {
                    lines.push(text.replace("(bot), ", &alias).replace("(bot)", &alias));
                }
            }
        }
        lines.dedup();
        lines
    }
}

#[async_trait]
impl PluginHandler for Help {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        if command != "help" {
            return TaskRetVal::Normal;
        }
        let keyword = arg(args, 0);
        let lines = Self::collect(r, keyword);
        if lines.is_empty() {
            if keyword.is_empty() {
                r.reply("Sorry, there's no help available here").await;
            } else {
                r.reply(&format!("Sorry, I didn't find any help for '{}'", keyword))
                    .await;
            }
            return TaskRetVal::Normal;
        }
        let text = lines.join("\n");
        if lines.len() > MAX_CHANNEL_HELP_LINES && !r.is_direct() {
            r.reply("(the help output was pretty long, so I sent you a private message)")
                .await;
            r.direct().say(&text).await;
        } else {
            r.say(&text).await;
        }
        TaskRetVal::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{handle_message, Dispatch};
    use crate::testutil::{bare_state, RecordingConnector};
    use chatrun_core::IncomingMessage;

    async fn loaded(cfg: Config) -> (Arc<BotState>, Arc<RecordingConnector>) {
        let (state, conn) = bare_state(cfg);
        register_builtins(&state).unwrap();
        state.load_tasks().await;
        state.set_connector(conn.clone());
        (state, conn)
    }

    fn admin_cfg() -> Config {
        let mut cfg = Config::default();
        cfg.admin_users.push("root".into());
        cfg
    }

    async fn run(state: &Arc<BotState>, user: &str, text: &str) -> Vec<TaskRetVal> {
        match handle_message(state, IncomingMessage::channel(user, "ops", text)).await {
            Dispatch::Started(handles) => {
                let mut rets = Vec::new();
                for h in handles {
                    rets.push(h.await.unwrap());
                }
                rets
            }
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_builtins_load_enabled() {
        let (state, _) = loaded(Config::default()).await;
        for name in [ADMIN_PLUGIN, HELP_PLUGIN] {
            let task = state.tasks().get_task_by_name(name).cloned().unwrap();
            assert!(!task.disabled, "{}: {}", name, task.reason);
        }
    }

    #[tokio::test]
    async fn test_help_lists_and_filters() {
        let (state, conn) = loaded(Config::default()).await;
        assert_eq!(run(&state, "alice", ";help").await, vec![TaskRetVal::Normal]);
        let out = conn.messages().join("\n");
        assert!(out.contains(";help <keyword>"));
        assert!(out.contains(";ps - list running pipelines"));

        run(&state, "alice", ";help debug").await;
        let last = conn.messages().pop().unwrap();
        assert!(last.contains("debug task <name>"));
        assert!(!last.contains("ps - list"));

        run(&state, "alice", ";help nonsense").await;
        assert_eq!(
            conn.messages().pop().unwrap(),
            "Sorry, I didn't find any help for 'nonsense'"
        );
    }

    #[tokio::test]
    async fn test_admin_commands_need_admin() {
        let (state, conn) = loaded(admin_cfg()).await;
        assert!(run(&state, "alice", ";ps").await.is_empty());
        assert_eq!(
            conn.messages(),
            vec![crate::dispatch::ADMIN_ONLY.to_string()]
        );

        run(&state, "root", ";ps").await;
        let out = conn.messages().pop().unwrap();
        assert!(out.starts_with("1 active pipeline(s)"));
        assert!(out.contains("builtin-admin for root in ops"));
    }

    #[tokio::test]
    async fn test_debug_and_stop_debugging() {
        let (state, conn) = loaded(admin_cfg()).await;
        run(&state, "root", ";debug task builtin-help verbose").await;
        assert_eq!(
            conn.messages().pop().unwrap(),
            "Debugging enabled for 'builtin-help' (verbose)"
        );
        let debugging = state.debug.list();
        assert_eq!(debugging.len(), 1);
        assert!(debugging[0].verbose);

        run(&state, "root", ";debug task nosuch").await;
        assert_eq!(conn.messages().pop().unwrap(), "Task 'nosuch' not found");

        run(&state, "root", ";stop debugging").await;
        assert_eq!(conn.messages().pop().unwrap(), "Stopped debugging: builtin-help");
        assert!(state.debug.list().is_empty());
    }

    #[tokio::test]
    async fn test_abort_unknown_run_and_history() {
        let (state, conn) = loaded(admin_cfg()).await;
        assert_eq!(run(&state, "root", ";abort 999").await, vec![TaskRetVal::Fail]);
        assert_eq!(conn.messages().pop().unwrap(), "No active run with id 999");

        run(&state, "alice", ";help").await;
        run(&state, "root", ";history builtin-help").await;
        let out = conn.messages().pop().unwrap();
        assert!(out.starts_with("History for 'builtin-help':\n#"), "{}", out);

        let index = state.history.list(HELP_PLUGIN)[0].log_index;
        run(&state, "root", &format!(";view log builtin-help {}", index)).await;
        let sent = conn.sent().pop().unwrap();
        assert_eq!(sent.user, "root");
        assert!(sent.msg.starts_with(&format!("Log for builtin-help #{}", index)));
    }

    #[tokio::test]
    async fn test_reload_reports_tasks() {
        let (state, conn) = loaded(admin_cfg()).await;
        let before = state.tasks();
        run(&state, "root", ";reload").await;
        let out = conn.messages().pop().unwrap();
        assert!(out.starts_with("Configuration reloaded, 2 tasks loaded"), "{}", out);
        assert!(!Arc::ptr_eq(&before, &state.tasks()));
    }
}
