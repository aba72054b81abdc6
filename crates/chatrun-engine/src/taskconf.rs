//! Task configuration loading.
//!
//! Each task's configuration is its default configuration overlaid by
//! `conf/{plugins,jobs}/<name>.yaml` from the installation directory and
//! then the configuration directory. Keys are checked against a static
//! field table. A task with a bad configuration is disabled with a reason;
//! it never stops the rest of the load.

use std::collections::HashSet;
use std::sync::Arc;

use chatrun_core::{InputMatcher, PluginHelp, Task, TaskKind, TaskSource};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{load_layered, parse_yaml_map, Config, ConfigMap, ScriptType};
use crate::context::RunContext;
use crate::pipeline::{start_pipeline, PipelineType, TaskSpec};
use crate::registry::TaskList;
use crate::state::BotState;

/// Reserved for the robot itself.
const RESERVED_NAME: &str = "bot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Str,
    Int,
    Bool,
    StrList,
    Help,
    Matchers,
    Opaque,
}

/// Which task types accept a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Any,
    Plugin,
    Job,
}

const FIELDS: &[(&str, FieldKind, Scope)] = &[
    ("Description", FieldKind::Str, Scope::Any),
    ("Elevator", FieldKind::Str, Scope::Any),
    ("Authorizer", FieldKind::Str, Scope::Any),
    ("AuthRequire", FieldKind::Str, Scope::Any),
    ("NameSpace", FieldKind::Str, Scope::Any),
    ("Channel", FieldKind::Str, Scope::Job),
    ("Notify", FieldKind::Str, Scope::Job),
    ("MaxHistories", FieldKind::Int, Scope::Any),
    ("Disabled", FieldKind::Bool, Scope::Any),
    ("AllowDirect", FieldKind::Bool, Scope::Any),
    ("DirectOnly", FieldKind::Bool, Scope::Any),
    ("DenyDirect", FieldKind::Bool, Scope::Any),
    ("AllChannels", FieldKind::Bool, Scope::Any),
    ("RequireAdmin", FieldKind::Bool, Scope::Any),
    ("AuthorizeAllCommands", FieldKind::Bool, Scope::Plugin),
    ("CatchAll", FieldKind::Bool, Scope::Plugin),
    ("Verbose", FieldKind::Bool, Scope::Job),
    ("Channels", FieldKind::StrList, Scope::Any),
    ("ElevatedCommands", FieldKind::StrList, Scope::Plugin),
    ("ElevateImmediateCommands", FieldKind::StrList, Scope::Plugin),
    ("Users", FieldKind::StrList, Scope::Any),
    ("AuthorizedCommands", FieldKind::StrList, Scope::Plugin),
    ("AdminCommands", FieldKind::StrList, Scope::Plugin),
    ("RequiredParameters", FieldKind::StrList, Scope::Job),
    ("Help", FieldKind::Help, Scope::Plugin),
    ("CommandMatchers", FieldKind::Matchers, Scope::Plugin),
    ("ReplyMatchers", FieldKind::Matchers, Scope::Plugin),
    ("MessageMatchers", FieldKind::Matchers, Scope::Plugin),
    ("Triggers", FieldKind::Matchers, Scope::Job),
    ("Config", FieldKind::Opaque, Scope::Any),
];

/// A typed configuration value.
enum Field {
    Str(String),
    Int(usize),
    Bool(bool),
    StrList(Vec<String>),
    Help(Vec<PluginHelp>),
    Matchers(Vec<InputMatcher>),
    Opaque(Value),
}

impl FieldKind {
    fn parse(self, value: &Value) -> Result<Field, serde_json::Error> {
        fn de<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
            serde_json::from_value(value.clone())
        }
        Ok(match self {
            Self::Str => Field::Str(de(value)?),
            Self::Int => Field::Int(de(value)?),
            Self::Bool => Field::Bool(de(value)?),
            Self::StrList => Field::StrList(de(value)?),
            Self::Help => Field::Help(de(value)?),
            Self::Matchers => Field::Matchers(de(value)?),
            Self::Opaque => Field::Opaque(value.clone()),
        })
    }
}

/// Check a task name; returns why it can't be used.
pub fn validate_task_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(format!(
            "task name '{}' doesn't match '^[a-zA-Z][\\w-]*$'",
            name
        ));
    }
    if name == RESERVED_NAME {
        return Err(format!("illegal task name: {}", name));
    }
    Ok(())
}

/// Apply a merged configuration map to `task`. Returns the reason to
/// disable the task on any error.
pub(crate) fn apply_config(task: &mut Task, map: &ConfigMap, defaults: &Config) -> Result<(), String> {
    let kind = task.kind_name();
    if let Some(v) = map.get("Disabled") {
        let disabled: bool = serde_json::from_value(v.clone()).map_err(|e| {
            format!("problem unmarshalling value for 'Disabled' in {} '{}': {}", kind, task.name, e)
        })?;
        if disabled {
            return Err(format!("{} '{}' is disabled by configuration", kind, task.name));
        }
    }

    let mut explicit_allow_direct = false;
    let mut explicit_all_channels = false;
    let mut deny_direct = false;

    for (key, value) in map {
        let Some(&(_, field_kind, scope)) = FIELDS.iter().find(|(k, _, _)| k == key) else {
            return Err(format!("invalid configuration key for {} '{}': {}", kind, task.name, key));
        };
        let mismatch = match scope {
            Scope::Any => false,
            Scope::Plugin => !task.is_plugin(),
            Scope::Job => task.is_plugin(),
        };
        if mismatch {
            return Err(format!(
                "configuration key mismatch for {} '{}': {} doesn't apply to a {}",
                kind, task.name, key, kind
            ));
        }
        let field = field_kind.parse(value).map_err(|e| {
            format!("error unmarshalling value '{}' for {} '{}': {}", key, kind, task.name, e)
        })?;

        match (key.as_str(), field) {
            ("Description", Field::Str(s)) => task.description = s,
            ("Elevator", Field::Str(s)) => task.elevator = s,
            ("Authorizer", Field::Str(s)) => task.authorizer = s,
            ("AuthRequire", Field::Str(s)) => task.auth_require = s,
            ("NameSpace", Field::Str(s)) => task.namespace = s,
            ("MaxHistories", Field::Int(n)) => task.max_histories = Some(n),
            ("Disabled", Field::Bool(_)) => {}
            ("AllowDirect", Field::Bool(b)) => {
                task.allow_direct = b;
                explicit_allow_direct = true;
            }
            ("DirectOnly", Field::Bool(b)) => task.direct_only = b,
            ("DenyDirect", Field::Bool(b)) => deny_direct = b,
            ("AllChannels", Field::Bool(b)) => {
                task.all_channels = b;
                explicit_all_channels = true;
            }
            ("RequireAdmin", Field::Bool(b)) => task.require_admin = b,
            ("Channels", Field::StrList(l)) => task.channels = l,
            ("Users", Field::StrList(l)) => task.users = l,
            ("Config", Field::Opaque(v)) => task.config = Some(v),
            (key, field) => match &mut task.kind {
                TaskKind::Plugin(p) => match (key, field) {
                    ("AuthorizeAllCommands", Field::Bool(b)) => p.authorize_all_commands = b,
                    ("CatchAll", Field::Bool(b)) => p.catch_all = b,
                    ("ElevatedCommands", Field::StrList(l)) => p.elevated_commands = l,
                    ("ElevateImmediateCommands", Field::StrList(l)) => {
                        p.elevate_immediate_commands = l
                    }
                    ("AuthorizedCommands", Field::StrList(l)) => p.authorized_commands = l,
                    ("AdminCommands", Field::StrList(l)) => p.admin_commands = l,
                    ("Help", Field::Help(h)) => p.help = h,
                    ("CommandMatchers", Field::Matchers(m)) => p.command_matchers = m,
                    ("ReplyMatchers", Field::Matchers(m)) => p.reply_matchers = m,
                    ("MessageMatchers", Field::Matchers(m)) => p.message_matchers = m,
                    (key, _) => warn!(task = %task.name, key = %key, "Unhandled plugin configuration key"),
                },
                TaskKind::Job(j) => match (key, field) {
                    ("Channel", Field::Str(s)) => j.channel = s,
                    ("Notify", Field::Str(s)) => j.notify = s,
                    ("Verbose", Field::Bool(b)) => j.verbose = b,
                    ("RequiredParameters", Field::StrList(l)) => j.required_parameters = l,
                    ("Triggers", Field::Matchers(m)) => j.triggers = m,
                    (key, _) => warn!(task = %task.name, key = %key, "Unhandled job configuration key"),
                },
            },
        }
    }

    if deny_direct {
        task.allow_direct = false;
        explicit_allow_direct = true;
    }
    if task.direct_only {
        if explicit_allow_direct {
            if !task.allow_direct {
                return Err(format!(
                    "task '{}' has conflicting values for AllowDirect (false) and DirectOnly (true)",
                    task.name
                ));
            }
        } else {
            debug!(task = %task.name, "DirectOnly specified without AllowDirect; setting AllowDirect = true");
            task.allow_direct = true;
            explicit_allow_direct = true;
        }
    }
    if !explicit_allow_direct {
        task.allow_direct = defaults.default_allow_direct;
    }

    if task.channels.is_empty() {
        if !defaults.default_channels.is_empty() {
            if !task.all_channels {
                task.channels = defaults.default_channels.clone();
            }
        } else if !explicit_all_channels {
            task.all_channels = true;
        }
    }
    if task.channels.is_empty() && !(task.allow_direct || task.all_channels) {
        return Err(format!(
            "task '{}' not visible in any channels or by direct message",
            task.name
        ));
    }

    compile_matchers(task)?;
    check_security_lists(task)
}

fn compile_matchers(task: &mut Task) -> Result<(), String> {
    let name = task.name.clone();
    let compile = |kind: &str, matchers: &mut [InputMatcher], anchored: bool| {
        matchers.iter_mut().try_for_each(|m| {
            m.compile(anchored)
                .map_err(|e| format!("couldn't compile {} regular expression for '{}': {}", kind, name, e))
        })
    };
    match &mut task.kind {
        TaskKind::Plugin(p) => {
            compile("command", &mut p.command_matchers, true)?;
            compile("reply", &mut p.reply_matchers, true)?;
            compile("message", &mut p.message_matchers, false)?;
        }
        TaskKind::Job(j) => compile("trigger", &mut j.triggers, true)?,
    }
    Ok(())
}

/// Security lists must name commands the plugin actually has.
fn check_security_lists(task: &Task) -> Result<(), String> {
    let Some(plugin) = task.as_plugin() else {
        return Ok(());
    };
    let lists = [
        ("elevated", &plugin.elevated_commands),
        ("elevate immediate", &plugin.elevate_immediate_commands),
        ("authorized", &plugin.authorized_commands),
        ("admin", &plugin.admin_commands),
    ];
    for (list, commands) in lists {
        if let Some(cmd) = commands.iter().find(|c| !plugin.declares_command(c)) {
            return Err(format!(
                "{} command '{}' of '{}' didn't match a command from CommandMatchers or MessageMatchers",
                list, cmd, task.name
            ));
        }
    }
    Ok(())
}

impl BotState {
    /// Disable `task`, logging the reason to the log and its debug output.
    fn disable_task(&self, task: &mut Task, reason: String) {
        error!(task = %task.name, reason = %reason, "Disabling task");
        self.debug.debug_task(task, &reason, false);
        task.disable(reason);
    }

    /// Registered plugins plus configured external scripts, before
    /// configuration. Bad names and duplicates are skipped.
    fn candidate_tasks(&self, cfg: &Config) -> Vec<Task> {
        let mut tasks: Vec<Task> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        for (name, _) in self.registered_plugins() {
            if let Err(reason) = validate_task_name(&name) {
                error!(task = %name, reason = %reason, "Skipping built-in plugin");
                continue;
            }
            names.insert(name.clone());
            tasks.push(Task::plugin(&name, TaskSource::Builtin));
        }

        for (index, script) in cfg.external_scripts.iter().enumerate() {
            if let Err(reason) = validate_task_name(&script.name) {
                error!(index = index + 1, reason = %reason, "Skipping external script");
                continue;
            }
            if !names.insert(script.name.clone()) {
                let msg = format!(
                    "external script #{} '{}' duplicates the name of another task, skipping",
                    index + 1,
                    script.name
                );
                error!("{}", msg);
                if let Some(dup) = tasks.iter().find(|t| t.name == script.name) {
                    self.debug.debug_task(dup, &msg, false);
                }
                continue;
            }
            let source = TaskSource::External {
                path: script.path.clone(),
            };
            let mut task = match script.script_type {
                ScriptType::Plugin => Task::plugin(&script.name, source),
                ScriptType::Job => Task::job(&script.name, source),
            };
            if script.path.is_empty() {
                let reason = format!("task '{}' has zero-length path", script.name);
                self.disable_task(&mut task, reason);
            }
            tasks.push(task);
        }
        tasks
    }

    /// First configuration layer for `task`.
    async fn default_layer(&self, task: &Task) -> Result<ConfigMap, String> {
        let origin = format!("default configuration for '{}'", task.name);
        match &task.source {
            TaskSource::Builtin => {
                let yaml = self
                    .plugin(&task.name)
                    .map(|p| p.default_config.clone())
                    .unwrap_or_default();
                parse_yaml_map(&yaml, &origin).map_err(|e| e.to_string())
            }
            TaskSource::External { path } if task.is_plugin() => {
                let yaml = self
                    .external()
                    .default_config(path)
                    .await
                    .map_err(|e| format!("error getting default configuration: {}", e))?;
                if yaml.trim().is_empty() {
                    self.debug.debug_task(
                        task,
                        "Unable to obtain default config from plugin, command 'configure' returned no content",
                        false,
                    );
                }
                parse_yaml_map(&yaml, &origin).map_err(|e| e.to_string())
            }
            TaskSource::External { .. } => Ok(ConfigMap::new()),
        }
    }

    /// Deserialize a built-in plugin's `Config:` into its registered type.
    fn apply_typed_config(&self, task: &mut Task) -> Result<(), String> {
        if task.source != TaskSource::Builtin || !task.is_plugin() {
            return Ok(());
        }
        let Some(registered) = self.plugin(&task.name) else {
            return Ok(());
        };
        match (task.config.clone(), registered.has_config_type()) {
            (Some(value), true) => match registered.parse_config(value) {
                Some(Ok(parsed)) => {
                    task.typed_config = Some(parsed);
                    Ok(())
                }
                Some(Err(e)) => Err(format!("error unmarshalling plugin config: {}", e)),
                None => Ok(()),
            },
            (Some(_), false) => Err(format!(
                "custom configuration provided for plugin '{}', but no config type was registered",
                task.name
            )),
            (None, true) => {
                let msg = format!("plugin '{}' has custom config, but none is configured", task.name);
                warn!(task = %task.name, "{}", msg);
                self.debug.debug_task(task, &msg, false);
                Ok(())
            }
            (None, false) => Ok(()),
        }
    }

    async fn configure_task(&self, task: &mut Task, cfg: &Config) -> Result<(), String> {
        let base = self.default_layer(task).await?;
        let dir = if task.is_plugin() { "plugins" } else { "jobs" };
        let relative = format!("{}/{}.yaml", dir, task.name);
        let map = load_layered(&relative, &self.paths.install, &self.paths.config, base)
            .map_err(|e| format!("problem loading configuration file(s): {}", e))?;
        apply_config(task, &map, cfg)?;
        self.apply_typed_config(task)
    }

    /// Load and validate every task, then swap the new registry in.
    /// Plugins are initialized if a connector is already running.
    pub async fn load_tasks(self: &Arc<Self>) -> Arc<TaskList> {
        let cfg = self.config();
        let mut tasks = self.candidate_tasks(&cfg);

        for task in tasks.iter_mut().filter(|t| !t.disabled) {
            debug!(task = %task.name, kind = task.kind_name(), "Loading task configuration");
            if let Err(reason) = self.configure_task(task, &cfg).await {
                self.disable_task(task, reason);
                continue;
            }
            let msg = if task.channels.is_empty() {
                format!(
                    "Task '{}' has no channel restrictions configured; all channels: {}",
                    task.name, task.all_channels
                )
            } else {
                format!(
                    "Task '{}' will be available in channels {:?}",
                    task.name, task.channels
                )
            };
            info!("{}", msg);
            self.debug.debug_task(task, &msg, false);
        }

        let list = self.replace_tasks(TaskList::new(tasks));
        self.debug.retain(|id| list.get_task_by_id(id).is_some());
        info!(
            tasks = list.len(),
            disabled = list.iter().filter(|t| t.disabled).count(),
            "Loaded task configuration"
        );

        if self.connector().is_some() {
            self.init_plugins(&list);
        }
        list
    }

    fn init_plugins(self: &Arc<Self>, list: &TaskList) {
        for task in list.iter().filter(|t| t.is_plugin() && !t.disabled) {
            let spec = TaskSpec::new(task.clone(), "init", Vec::new());
            let ctx = RunContext::new(self);
            tokio::spawn(start_pipeline(ctx, None, spec, PipelineType::Init));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisteredPlugin;
    use crate::state::Paths;
    use crate::testutil::{bare_state, noop_handler, scripted, test_state, test_state_at};
    use chatrun_core::TaskRetVal;
    use serde::Deserialize;

    fn yaml(s: &str) -> ConfigMap {
        parse_yaml_map(s, "test").unwrap()
    }

    fn plugin(name: &str) -> Task {
        Task::plugin(name, TaskSource::Builtin)
    }

    fn job(name: &str) -> Task {
        Task::job(name, TaskSource::Builtin)
    }

    const DEPLOYER: &str = r#"
CommandMatchers:
  - Command: deploy
    Regex: 'deploy (\w+)'
  - Command: status
    Regex: 'status'
"#;

    #[test]
    fn test_unknown_authorized_command_disables() {
        let mut task = plugin("deployer");
        let map = yaml(
            r#"
CommandMatchers:
  - Command: status
    Regex: 'status'
AuthorizedCommands: [deploy]
"#,
        );
        let reason = apply_config(&mut task, &map, &Config::default()).unwrap_err();
        assert!(reason.contains("deploy"), "{}", reason);

        let mut ok = plugin("deployer");
        let mut map = yaml(DEPLOYER);
        map.insert("AuthorizedCommands".into(), serde_json::json!(["deploy"]));
        apply_config(&mut ok, &map, &Config::default()).unwrap();
        assert!(ok.as_plugin().unwrap().command_matchers[0].is_match("deploy   prod"));
    }

    #[test]
    fn test_unknown_key_type_error_and_mismatch() {
        let cfg = Config::default();
        let err = apply_config(&mut plugin("p"), &yaml("Colour: blue"), &cfg).unwrap_err();
        assert!(err.contains("Colour"));

        let err = apply_config(&mut plugin("p"), &yaml("AllowDirect: [1, 2]"), &cfg).unwrap_err();
        assert!(err.contains("AllowDirect"));

        let err = apply_config(&mut job("j"), &yaml("CatchAll: true"), &cfg).unwrap_err();
        assert!(err.contains("mismatch"));
        let err = apply_config(&mut plugin("p"), &yaml("Notify: bob"), &cfg).unwrap_err();
        assert!(err.contains("mismatch"));

        let err = apply_config(&mut job("j"), &yaml("Disabled: true"), &cfg).unwrap_err();
        assert!(err.contains("disabled by configuration"));
    }

    #[test]
    fn test_direct_message_rules() {
        let mut cfg = Config::default();
        cfg.default_allow_direct = false;

        let mut t = plugin("p");
        apply_config(&mut t, &yaml("DirectOnly: true"), &cfg).unwrap();
        assert!(t.allow_direct);

        let err = apply_config(&mut plugin("p"), &yaml("DirectOnly: true\nAllowDirect: false"), &cfg)
            .unwrap_err();
        assert!(err.contains("conflicting"));
        let err = apply_config(&mut plugin("p"), &yaml("DirectOnly: true\nDenyDirect: true"), &cfg)
            .unwrap_err();
        assert!(err.contains("conflicting"));

        let mut t = plugin("p");
        apply_config(&mut t, &ConfigMap::new(), &cfg).unwrap();
        assert!(!t.allow_direct);
        cfg.default_allow_direct = true;
        let mut t = plugin("p");
        apply_config(&mut t, &yaml("DenyDirect: true"), &cfg).unwrap();
        assert!(!t.allow_direct);
    }

    #[test]
    fn test_channel_defaults() {
        let mut cfg = Config::default();
        let mut t = plugin("p");
        apply_config(&mut t, &ConfigMap::new(), &cfg).unwrap();
        assert!(t.all_channels);

        cfg.default_channels = vec!["ops".into()];
        let mut t = plugin("p");
        apply_config(&mut t, &ConfigMap::new(), &cfg).unwrap();
        assert_eq!(t.channels, vec!["ops"]);
        assert!(!t.all_channels);

        let mut t = plugin("p");
        apply_config(&mut t, &yaml("AllChannels: true"), &cfg).unwrap();
        assert!(t.channels.is_empty());
        assert!(t.all_channels);

        cfg.default_channels.clear();
        cfg.default_allow_direct = false;
        let err = apply_config(&mut plugin("p"), &yaml("AllChannels: false"), &cfg).unwrap_err();
        assert!(err.contains("not visible"));
    }

    #[test]
    fn test_bad_regex_disables() {
        let err = apply_config(
            &mut plugin("p"),
            &yaml("MessageMatchers:\n  - Command: x\n    Regex: '(unclosed'"),
            &Config::default(),
        )
        .unwrap_err();
        assert!(err.contains("message regular expression"));
    }

    #[test]
    fn test_task_names() {
        assert!(validate_task_name("deploy-prod_2").is_ok());
        assert!(validate_task_name("2fa").is_err());
        assert!(validate_task_name("has space").is_err());
        assert!(validate_task_name("d\u{e9}ploy").is_err());
        assert!(validate_task_name("bot").is_err());
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct WeatherConfig {
        api_key: String,
    }

    #[tokio::test]
    async fn test_typed_config_and_layers() {
        let dir = std::env::temp_dir().join(format!("chatrun-tc-{}", uuid::Uuid::new_v4()));
        let install = dir.join("install");
        let site = dir.join("site");
        std::fs::create_dir_all(install.join("conf/plugins")).unwrap();
        std::fs::create_dir_all(site.join("conf/plugins")).unwrap();
        std::fs::write(
            install.join("conf/plugins/weather.yaml"),
            "Config:\n  ApiKey: install\nChannels: [weather]\n",
        )
        .unwrap();
        std::fs::write(site.join("conf/plugins/weather.yaml"), "Config:\n  ApiKey: site\n").unwrap();
        std::fs::write(site.join("conf/plugins/broken.yaml"), "Config:\n  Nope: 1\n").unwrap();
        std::fs::write(site.join("conf/plugins/untyped.yaml"), "Config:\n  Anything: 1\n").unwrap();

        let (state, _) = test_state_at(
            Config::default(),
            Paths {
                install: install.clone(),
                config: site.clone(),
            },
        );
        state
            .register_plugin(
                "weather",
                RegisteredPlugin::new("Description: Weather\nChannels: [general]", noop_handler())
                    .with_config::<WeatherConfig>(),
            )
            .unwrap();
        state
            .register_plugin(
                "broken",
                RegisteredPlugin::new("", noop_handler()).with_config::<WeatherConfig>(),
            )
            .unwrap();
        state
            .register_plugin("untyped", RegisteredPlugin::new("", noop_handler()))
            .unwrap();

        let list = state.load_tasks().await;
        let weather = list.get_task_by_name("weather").unwrap();
        assert!(!weather.disabled, "{}", weather.reason);
        assert_eq!(weather.description, "Weather");
        assert_eq!(weather.channels, vec!["weather"]);
        let conf = weather.typed_config.as_ref().unwrap().get::<WeatherConfig>().unwrap();
        assert_eq!(conf.api_key, "site");

        assert!(list.get_task_by_name("broken").unwrap().disabled);
        let untyped = list.get_task_by_name("untyped").unwrap();
        assert!(untyped.disabled);
        assert!(untyped.reason.contains("no config type"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_external_scripts_validated() {
        let mut cfg = Config::default();
        cfg.external_scripts = serde_yaml::from_str(
            r#"
- Name: echo
  Path: plugins/echo.sh
- Name: bot
  Path: plugins/bot.sh
- Name: 9lives
  Path: plugins/cat.sh
- Name: nightly
  Path: ''
  Type: Job
"#,
        )
        .unwrap();
        let (state, _) = bare_state(cfg);
        state
            .register_plugin("echo", RegisteredPlugin::new("", noop_handler()))
            .unwrap();

        let list = state.load_tasks().await;
        let names: Vec<&str> = list.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "nightly"]);
        assert_eq!(list.get_task_by_name("echo").unwrap().source, TaskSource::Builtin);
        let nightly = list.get_task_by_name("nightly").unwrap();
        assert!(!nightly.is_plugin());
        assert!(nightly.disabled);
        assert!(nightly.reason.contains("zero-length"));
    }

    #[tokio::test]
    async fn test_reload_prunes_debug_and_inits_plugins() {
        let (state, _) = test_state(Config::default());
        let init = scripted(&state, "greeter", TaskRetVal::Normal);
        let list = state.load_tasks().await;
        let greeter = list.get_task_by_name("greeter").unwrap().clone();
        state.debug.enable(&greeter, false);
        state.debug.enable(&job("gone"), false);

        // connector is running, so plugins get `init`
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while init.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(init.last_call().unwrap().0, "init");

        state.load_tasks().await;
        assert!(state.debug.is_debugging(&greeter.task_id));
        assert!(!state.debug.is_debugging(&job("gone").task_id));
    }

    #[tokio::test]
    async fn test_no_init_without_connector() {
        let (state, _) = bare_state(Config::default());
        let init = scripted(&state, "greeter", TaskRetVal::Normal);
        state.load_tasks().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(init.calls(), 0);
    }
}
