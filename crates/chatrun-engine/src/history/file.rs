//! File-backed history: `<dir>/<tag>/run-<index>.log`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{HistoryError, HistoryLogger, HistoryProvider};
use crate::config::HistoryConfig;

/// Provider writing one file per run.
pub struct FileHistory {
    directory: PathBuf,
    url_prefix: Option<String>,
}

impl FileHistory {
    pub fn new(directory: impl Into<PathBuf>, url_prefix: Option<String>) -> Self {
        Self {
            directory: directory.into(),
            url_prefix,
        }
    }

    pub fn from_config(cfg: &HistoryConfig) -> Result<Self, HistoryError> {
        if cfg.directory.is_empty() {
            return Err(HistoryError::Misconfigured(
                "file history requires HistoryConfig.Directory".to_string(),
            ));
        }
        let prefix = (!cfg.url_prefix.is_empty()).then(|| cfg.url_prefix.clone());
        Ok(Self::new(&cfg.directory, prefix))
    }

    fn tag_dir(&self, tag: &str) -> PathBuf {
        self.directory.join(sanitize(tag))
    }

    fn log_path(&self, tag: &str, index: usize) -> PathBuf {
        self.tag_dir(tag).join(format!("run-{}.log", index))
    }
}

/// Tags can contain `:`; keep file names portable.
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn io_err(path: &Path, source: std::io::Error) -> HistoryError {
    HistoryError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl HistoryProvider for FileHistory {
    fn new_log(
        &self,
        tag: &str,
        index: usize,
        keep: usize,
    ) -> Result<Box<dyn HistoryLogger>, HistoryError> {
        let dir = self.tag_dir(tag);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        if let Some(evicted) = index.checked_sub(keep) {
            let path = self.log_path(tag, evicted);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old history"),
            }
        }

        let path = self.log_path(tag, index);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        Ok(Box::new(FileLogger {
            path,
            file: Some(file),
        }))
    }

    fn log_url(&self, tag: &str, index: usize) -> Option<String> {
        self.url_prefix.as_ref().map(|prefix| {
            format!(
                "{}/{}/run-{}.log",
                prefix.trim_end_matches('/'),
                sanitize(tag),
                index
            )
        })
    }

    fn read_log(&self, tag: &str, index: usize) -> Result<String, HistoryError> {
        let path = self.log_path(tag, index);
        fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HistoryError::LogNotFound {
                    tag: tag.to_string(),
                    index,
                }
            } else {
                io_err(&path, e)
            }
        })
    }
}

struct FileLogger {
    path: PathBuf,
    file: Option<File>,
}

impl HistoryLogger for FileLogger {
    fn log(&mut self, line: &str) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!(path = %self.path.display(), error = %e, "Failed writing history");
                self.file = None;
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            file.flush().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_history_write_read_prune() {
        let dir = std::env::temp_dir().join(format!("chatrun-hist-{}", uuid::Uuid::new_v4()));
        let provider = FileHistory::new(&dir, Some("https://logs.example.com/".into()));

        for i in 0..3 {
            let mut log = provider.new_log("job:backup", i, 2).unwrap();
            log.log(&format!("line {}", i));
            log.close();
        }

        assert!(matches!(
            provider.read_log("job:backup", 0),
            Err(HistoryError::LogNotFound { .. })
        ));
        assert_eq!(provider.read_log("job:backup", 2).unwrap(), "line 2\n");
        assert_eq!(
            provider.log_url("job:backup", 2).unwrap(),
            "https://logs.example.com/job_backup/run-2.log"
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_config_requires_directory() {
        assert!(FileHistory::from_config(&HistoryConfig::default()).is_err());
    }
}
