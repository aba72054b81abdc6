//! In-memory history.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{HistoryError, HistoryLogger, HistoryProvider};
use crate::state::lock;

type LogStore = Arc<Mutex<HashMap<String, BTreeMap<usize, Vec<String>>>>>;

/// Provider keeping logs for the life of the process.
#[derive(Default)]
pub struct MemoryHistory {
    logs: LogStore,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryProvider for MemoryHistory {
    fn new_log(
        &self,
        tag: &str,
        index: usize,
        keep: usize,
    ) -> Result<Box<dyn HistoryLogger>, HistoryError> {
        {
            let mut logs = lock(&self.logs);
            let runs = logs.entry(tag.to_string()).or_default();
            runs.insert(index, Vec::new());
            // keep the newest `keep` logs
            let first_kept = (index + 1).saturating_sub(keep);
            runs.retain(|i, _| *i >= first_kept);
        }
        Ok(Box::new(StoreLogger {
            logs: self.logs.clone(),
            tag: tag.to_string(),
            index,
        }))
    }

    fn log_url(&self, _tag: &str, _index: usize) -> Option<String> {
        None
    }

    fn read_log(&self, tag: &str, index: usize) -> Result<String, HistoryError> {
        lock(&self.logs)
            .get(tag)
            .and_then(|runs| runs.get(&index))
            .map(|lines| lines.join("\n"))
            .ok_or_else(|| HistoryError::LogNotFound {
                tag: tag.to_string(),
                index,
            })
    }
}

struct StoreLogger {
    logs: LogStore,
    tag: String,
    index: usize,
}

impl HistoryLogger for StoreLogger {
    fn log(&mut self, line: &str) {
        if let Some(lines) = lock(&self.logs)
            .get_mut(&self.tag)
            .and_then(|runs| runs.get_mut(&self.index))
        {
            lines.push(line.to_string());
        }
    }

    fn close(&mut self) {}
}

/// Fallback logger used when history can't be recorded.
pub struct MemoryLogger {
    tag: String,
    index: usize,
    lines: Vec<String>,
}

impl MemoryLogger {
    pub fn new(tag: &str, index: usize) -> Self {
        Self {
            tag: tag.to_string(),
            index,
            lines: Vec::new(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl HistoryLogger for MemoryLogger {
    fn log(&mut self, line: &str) {
        debug!(tag = %self.tag, index = self.index, "{}", line);
        self.lines.push(line.to_string());
    }

    fn close(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prunes_old_logs() {
        let provider = MemoryHistory::new();
        for i in 0..4 {
            let mut log = provider.new_log("job", i, 2).unwrap();
            log.log(&format!("run {}", i));
        }
        assert!(provider.read_log("job", 1).is_err());
        assert_eq!(provider.read_log("job", 2).unwrap(), "run 2");
        assert_eq!(provider.read_log("job", 3).unwrap(), "run 3");
    }

    #[test]
    fn test_memory_logger_sections() {
        let mut logger = MemoryLogger::new("job", 3);
        logger.section("task", "deploy");
        assert_eq!(logger.lines(), &["*** task - deploy".to_string()]);
    }
}
