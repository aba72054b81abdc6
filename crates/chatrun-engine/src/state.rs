//! Shared robot state.
//!
//! Everything that outlives a single run lives here and is passed around
//! as `Arc<BotState>`. Locks are std locks held only for short critical
//! sections; nothing holds one across an `.await`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chatrun_core::UserChanMaps;
use tracing::{info, warn};

use crate::brain::{Brain, MemoryBrain};
use crate::config::Config;
use crate::connector::Connector;
use crate::context::{ActiveRuns, RunHandle};
use crate::debug::DebugRegistry;
use crate::error::EngineError;
use crate::events::EventLog;
use crate::exclusive::ExclusiveLocks;
use crate::external::{ExternalRunner, ProcessRunner};
use crate::history::{History, HistoryProviders};
use crate::registry::{RegisteredPlugin, TaskList};
use crate::replies::ReplyWaiters;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// Installation and site configuration directories.
#[derive(Debug, Clone)]
pub struct Paths {
    pub install: PathBuf,
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            install: PathBuf::from("."),
            config: PathBuf::from("."),
        }
    }
}

/// Shared robot state.
pub struct BotState {
    pub paths: Paths,

    /// Current configuration; runs keep the snapshot they started with.
    config: RwLock<Arc<Config>>,

    /// Current task generation.
    tasks: RwLock<Arc<TaskList>>,

    /// Roster lookups built from the current configuration.
    maps: RwLock<Arc<UserChanMaps>>,

    /// Active pipeline runs.
    pub runs: ActiveRuns,

    /// Tasks being debugged.
    pub debug: DebugRegistry,

    /// Audit events.
    pub events: EventLog,

    /// Exclusive execution tags.
    pub exclusive: ExclusiveLocks,

    /// Run history.
    pub history: History,

    /// Outstanding `wait_for_reply` calls.
    pub replies: ReplyWaiters,

    /// Built-in plugins, by name.
    plugins: RwLock<BTreeMap<String, Arc<RegisteredPlugin>>>,

    /// Runner for external scripts.
    external: Arc<dyn ExternalRunner>,

    /// Chat connector, once one is running.
    connector: RwLock<Option<Arc<dyn Connector>>>,
}

impl BotState {
    /// Create state with the process runner and the built-in history
    /// providers.
    pub fn new(config: Config, paths: Paths) -> Arc<Self> {
        let runner = Arc::new(ProcessRunner::new(paths.install.clone(), paths.config.clone()));
        Self::with_parts(
            config,
            paths,
            runner,
            &HistoryProviders::with_builtins(),
            Arc::new(MemoryBrain::new()),
        )
    }

    /// Create state from explicit collaborators.
    pub fn with_parts(
        config: Config,
        paths: Paths,
        external: Arc<dyn ExternalRunner>,
        providers: &HistoryProviders,
        brain: Arc<dyn Brain>,
    ) -> Arc<Self> {
        let provider = match providers.build(&config.history_provider, &config) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(
                    provider = %config.history_provider,
                    error = %e,
                    "History provider unavailable, run logs will be kept in memory only"
                );
                None
            }
        };
        let maps = UserChanMaps::from_rosters(&config.user_roster, &config.channel_roster);
        Arc::new(Self {
            paths,
            config: RwLock::new(Arc::new(config)),
            tasks: RwLock::new(Arc::new(TaskList::default())),
            maps: RwLock::new(Arc::new(maps)),
            runs: ActiveRuns::new(),
            debug: DebugRegistry::new(),
            events: EventLog::new(),
            exclusive: ExclusiveLocks::new(),
            history: History::new(brain, provider),
            replies: ReplyWaiters::new(),
            plugins: RwLock::new(BTreeMap::new()),
            external,
            connector: RwLock::new(None),
        })
    }

    pub fn config(&self) -> Arc<Config> {
        read_lock(&self.config).clone()
    }

    pub fn tasks(&self) -> Arc<TaskList> {
        read_lock(&self.tasks).clone()
    }

    pub fn maps(&self) -> Arc<UserChanMaps> {
        read_lock(&self.maps).clone()
    }

    /// Install a new configuration and rebuild the roster maps.
    pub fn set_config(&self, config: Config) {
        let maps = UserChanMaps::from_rosters(&config.user_roster, &config.channel_roster);
        *write_lock(&self.config) = Arc::new(config);
        *write_lock(&self.maps) = Arc::new(maps);
    }

    pub(crate) fn replace_tasks(&self, tasks: TaskList) -> Arc<TaskList> {
        let tasks = Arc::new(tasks);
        *write_lock(&self.tasks) = tasks.clone();
        tasks
    }

    /// Register a built-in plugin. Names must be unique.
    pub fn register_plugin(&self, name: &str, plugin: RegisteredPlugin) -> Result<(), EngineError> {
        let mut plugins = write_lock(&self.plugins);
        if plugins.contains_key(name) {
            return Err(EngineError::DuplicatePlugin(name.to_string()));
        }
        plugins.insert(name.to_string(), Arc::new(plugin));
        Ok(())
    }

    pub(crate) fn plugin(&self, name: &str) -> Option<Arc<RegisteredPlugin>> {
        read_lock(&self.plugins).get(name).cloned()
    }

    pub(crate) fn registered_plugins(&self) -> Vec<(String, Arc<RegisteredPlugin>)> {
        read_lock(&self.plugins)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn external(&self) -> Arc<dyn ExternalRunner> {
        self.external.clone()
    }

    pub fn set_connector(&self, connector: Arc<dyn Connector>) {
        *write_lock(&self.connector) = Some(connector);
    }

    pub fn connector(&self) -> Option<Arc<dyn Connector>> {
        read_lock(&self.connector).clone()
    }

    /// Look up an active run by ID; 0 and finished runs give `None`.
    pub fn get_bot_context_int(&self, id: u64) -> Option<Arc<RunHandle>> {
        self.runs.get(id)
    }

    /// Look up an active run by correlation token.
    pub fn get_bot_context_eid(&self, eid: &str) -> Option<Arc<RunHandle>> {
        self.runs.get_by_eid(eid)
    }

    /// Cancel an active run. Returns false if no such run.
    pub fn abort_run(&self, id: u64) -> bool {
        match self.runs.get(id) {
            Some(run) => {
                info!(run_id = %run.id, pipeline = %run.pipe_name, "Aborting run");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Reload configuration from disk and reload tasks.
    pub async fn reload(self: &Arc<Self>) -> Result<Arc<TaskList>, EngineError> {
        let config = Config::load(&self.paths.install, &self.paths.config)?;
        self.set_config(config);
        Ok(self.load_tasks().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{noop_plugin, test_state};

    #[test]
    fn test_duplicate_plugin_rejected() {
        let (state, _) = test_state(Config::default());
        state.register_plugin("echo", noop_plugin()).unwrap();
        assert!(matches!(
            state.register_plugin("echo", noop_plugin()),
            Err(EngineError::DuplicatePlugin(name)) if name == "echo"
        ));
    }

    #[test]
    fn test_set_config_rebuilds_maps() {
        let (state, _) = test_state(Config::default());
        assert!(state.maps().user("alice").is_none());

        let mut cfg = Config::default();
        cfg.user_roster.push(chatrun_core::UserInfo {
            user_name: "alice".into(),
            user_id: "U1".into(),
            ..Default::default()
        });
        state.set_config(cfg);
        assert_eq!(state.maps().user("alice").unwrap().user_id, "U1");
    }

    #[test]
    fn test_lookup_of_zero_and_unknown() {
        let (state, _) = test_state(Config::default());
        assert!(state.get_bot_context_int(0).is_none());
        assert!(state.get_bot_context_int(17).is_none());
        assert!(!state.abort_run(17));
    }
}
