//! Run history.
//!
//! Each pipeline run gets a history log. The per-tag list of logs and a
//! reverse index from correlation token to `(tag, index)` are kept in the
//! brain; the log contents are written by the configured provider.

mod file;
mod memory;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chatrun_core::CallerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::brain::{Brain, BrainError};
use crate::config::Config;
use crate::state::{read_lock, write_lock};

pub use file::FileHistory;
pub use memory::{MemoryHistory, MemoryLogger};

/// Brain key prefix for per-tag history lists.
pub const HIST_PREFIX: &str = "bot:histories:";

/// Brain key for the correlation token reverse index.
pub const HIST_LOOKUP: &str = "bot:histories-lookup";

const RECORD_ATTEMPTS: usize = 3;

/// Errors from the history subsystem.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("brain error: {0}")]
    Brain(#[from] BrainError),

    #[error("malformed history record: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("history I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Attempted registration of duplicate history provider name: {0}")]
    DuplicateProvider(String),

    #[error("no history provider registered as '{0}'")]
    UnknownProvider(String),

    #[error("history provider misconfigured: {0}")]
    Misconfigured(String),

    #[error("history lookup update rejected: {0}")]
    LookupRejected(#[source] BrainError),

    #[error("no log for {tag} #{index}")]
    LogNotFound { tag: String, index: usize },
}

/// One entry in a tag's history list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryLog {
    pub log_index: usize,
    /// Correlation token of the run.
    #[serde(rename = "Ref")]
    pub reference: String,
    pub create_time: String,
}

/// Reverse index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryLookup {
    pub tag: String,
    pub index: usize,
}

/// All history for one tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipeHistory {
    pub next_index: usize,
    pub histories: Vec<HistoryLog>,
}

/// Receives the lines of one run's log.
pub trait HistoryLogger: Send {
    fn log(&mut self, line: &str);

    /// Mark the start of a new section, e.g. a task in the pipeline.
    fn section(&mut self, name: &str, info: &str) {
        self.log(&format!("*** {} - {}", name, info));
    }

    fn close(&mut self);
}

/// Stores run logs.
pub trait HistoryProvider: Send + Sync {
    /// Start a log; the provider may drop logs at or below `index - keep`.
    fn new_log(
        &self,
        tag: &str,
        index: usize,
        keep: usize,
    ) -> Result<Box<dyn HistoryLogger>, HistoryError>;

    /// URL for viewing a log, if the provider publishes them.
    fn log_url(&self, tag: &str, index: usize) -> Option<String>;

    fn read_log(&self, tag: &str, index: usize) -> Result<String, HistoryError>;
}

/// Builds a provider from the robot configuration.
pub type ProviderFactory =
    Box<dyn Fn(&Config) -> Result<Arc<dyn HistoryProvider>, HistoryError> + Send + Sync>;

/// Named history provider constructors.
pub struct HistoryProviders {
    factories: HashMap<String, ProviderFactory>,
}

impl HistoryProviders {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Providers shipped with the engine: `memory` and `file`.
    pub fn with_builtins() -> Self {
        let mut providers = Self::new();
        providers.factories.insert(
            "memory".to_string(),
            Box::new(|_: &Config| Ok(Arc::new(MemoryHistory::new()) as Arc<dyn HistoryProvider>)),
        );
        providers.factories.insert(
            "file".to_string(),
            Box::new(|cfg: &Config| {
                Ok(Arc::new(FileHistory::from_config(&cfg.history_config)?)
                    as Arc<dyn HistoryProvider>)
            }),
        );
        providers
    }

    /// Register a provider; names must be unique.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) -> Result<(), HistoryError> {
        if self.factories.contains_key(name) {
            return Err(HistoryError::DuplicateProvider(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn build(&self, name: &str, cfg: &Config) -> Result<Arc<dyn HistoryProvider>, HistoryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| HistoryError::UnknownProvider(name.to_string()))?;
        factory(cfg)
    }
}

impl Default for HistoryProviders {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// A started run log.
pub struct StartedLog {
    pub logger: Box<dyn HistoryLogger>,
    pub index: usize,
    pub url: Option<String>,
    /// False when the log fell back to memory and can't be looked up later.
    pub persistent: bool,
}

/// History bookkeeping over a brain plus the active provider.
pub struct History {
    brain: Arc<dyn Brain>,
    provider: RwLock<Option<Arc<dyn HistoryProvider>>>,
}

impl History {
    pub fn new(brain: Arc<dyn Brain>, provider: Option<Arc<dyn HistoryProvider>>) -> Self {
        Self {
            brain,
            provider: RwLock::new(provider),
        }
    }

    pub fn set_provider(&self, provider: Option<Arc<dyn HistoryProvider>>) {
        *write_lock(&self.provider) = provider;
    }

    pub fn provider(&self) -> Option<Arc<dyn HistoryProvider>> {
        read_lock(&self.provider).clone()
    }

    /// Start a log for a run of `tag`, keeping at most `keep` logs.
    ///
    /// Always returns a logger; on any failure the log is kept in memory
    /// under `fallback_index` and is not recorded in the reverse index.
    pub fn new_logger(
        &self,
        tag: &str,
        eid: &CallerId,
        fallback_index: usize,
        keep: usize,
    ) -> StartedLog {
        let provider = match self.provider() {
            Some(p) if keep > 0 => p,
            _ => return Self::fallback(tag, fallback_index),
        };
        let started = self.record(tag, eid, keep).and_then(|index| {
            let logger = provider.new_log(tag, index, keep)?;
            Ok(StartedLog {
                logger,
                index,
                url: provider.log_url(tag, index),
                persistent: true,
            })
        });
        match started {
            Ok(log) => log,
            Err(e) => {
                warn!(tag = %tag, error = %e, "Unable to start history, logging to memory");
                Self::fallback(tag, fallback_index)
            }
        }
    }

    fn fallback(tag: &str, index: usize) -> StartedLog {
        StartedLog {
            logger: Box::new(MemoryLogger::new(tag, index)),
            index,
            url: None,
            persistent: false,
        }
    }

    /// Append a history entry for `eid`, evicting beyond `keep`.
    fn record(&self, tag: &str, eid: &CallerId, keep: usize) -> Result<usize, HistoryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_record(tag, eid, keep) {
                Err(HistoryError::Brain(BrainError::StaleToken(key))) if attempt < RECORD_ATTEMPTS => {
                    debug!(key = %key, attempt, "History record raced, retrying");
                }
                other => return other,
            }
        }
    }

    fn try_record(&self, tag: &str, eid: &CallerId, keep: usize) -> Result<usize, HistoryError> {
        let key = format!("{}{}", HIST_PREFIX, tag);
        let hist_co = self.brain.checkout(&key)?;
        let mut hist: PipeHistory = match &hist_co.data {
            Some(d) => match serde_json::from_slice(d) {
                Ok(h) => h,
                Err(e) => {
                    self.brain.checkin(&key, &hist_co.token);
                    return Err(e.into());
                }
            },
            None => PipeHistory::default(),
        };

        let index = hist.next_index;
        hist.next_index += 1;
        hist.histories.push(HistoryLog {
            log_index: index,
            reference: eid.to_string(),
            create_time: chrono::Local::now().format("%a %b %e %H:%M:%S %Z %Y").to_string(),
        });
        let excess = hist.histories.len().saturating_sub(keep);
        let evicted: Vec<HistoryLog> = hist.histories.drain(..excess).collect();

        let lookup_co = match self.brain.checkout(HIST_LOOKUP) {
            Ok(co) => co,
            Err(e) => {
                self.brain.checkin(&key, &hist_co.token);
                return Err(e.into());
            }
        };
        let mut lookup: HashMap<String, HistoryLookup> = match &lookup_co.data {
            Some(d) => serde_json::from_slice(d).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding malformed history lookup table");
                HashMap::new()
            }),
            None => HashMap::new(),
        };
        for old in &evicted {
            let stale = lookup
                .get(&old.reference)
                .is_some_and(|l| l.tag == tag && l.index == old.log_index);
            if stale {
                lookup.remove(&old.reference);
            }
        }
        lookup.insert(
            eid.to_string(),
            HistoryLookup {
                tag: tag.to_string(),
                index,
            },
        );

        let hist_data = match serde_json::to_vec(&hist) {
            Ok(d) => d,
            Err(e) => {
                self.brain.checkin(&key, &hist_co.token);
                self.brain.checkin(HIST_LOOKUP, &lookup_co.token);
                return Err(e.into());
            }
        };
        let lookup_data = match serde_json::to_vec(&lookup) {
            Ok(d) => d,
            Err(e) => {
                self.brain.checkin(&key, &hist_co.token);
                self.brain.checkin(HIST_LOOKUP, &lookup_co.token);
                return Err(e.into());
            }
        };
        if let Err(e) = self.brain.update(&key, &hist_co.token, hist_data) {
            self.brain.checkin(HIST_LOOKUP, &lookup_co.token);
            return Err(e.into());
        }
        // The tag list is saved; a rejected lookup must not lead to a retry
        if let Err(e) = self.brain.update(HIST_LOOKUP, &lookup_co.token, lookup_data) {
            self.unrecord(&key, index, eid);
            return Err(HistoryError::LookupRejected(e));
        }
        Ok(index)
    }

    /// Drop the entry for `eid` at `index` from a saved tag list.
    fn unrecord(&self, key: &str, index: usize, eid: &CallerId) {
        let result = self.brain.checkout(key).and_then(|co| {
            let mut hist: PipeHistory = match co.data.as_deref().map(serde_json::from_slice::<PipeHistory>) {
                Some(Ok(h)) => h,
                _ => {
                    self.brain.checkin(key, &co.token);
                    return Ok(());
                }
            };
            hist.histories
                .retain(|l| !(l.log_index == index && l.reference == eid.as_str()));
            match serde_json::to_vec(&hist) {
                Ok(data) => self.brain.update(key, &co.token, data),
                Err(_) => {
                    self.brain.checkin(key, &co.token);
                    Ok(())
                }
            }
        });
        if let Err(e) = result {
            warn!(key = %key, index, error = %e, "Unable to remove history entry");
        }
    }

    /// Resolve a correlation token to its log.
    pub fn lookup(&self, reference: &str) -> Option<HistoryLookup> {
        let data = self.brain.read(HIST_LOOKUP).ok()??;
        let mut lookup: HashMap<String, HistoryLookup> = serde_json::from_slice(&data).ok()?;
        lookup.remove(reference)
    }

    /// Logs currently retained for `tag`, oldest first.
    pub fn list(&self, tag: &str) -> Vec<HistoryLog> {
        let key = format!("{}{}", HIST_PREFIX, tag);
        match self.brain.read(&key) {
            Ok(Some(data)) => serde_json::from_slice::<PipeHistory>(&data)
                .map(|h| h.histories)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn read_log(&self, tag: &str, index: usize) -> Result<String, HistoryError> {
        match self.provider() {
            Some(p) => p.read_log(tag, index),
            None => Err(HistoryError::LogNotFound {
                tag: tag.to_string(),
                index,
            }),
        }
    }
}
