//! Engine errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::history::HistoryError;

/// Errors raised while starting or configuring the engine.
///
/// Task outcomes are never errors; they are reported as `TaskRetVal`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Attempted registration of duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    #[error("Failed to get default configuration from '{path}': {reason}")]
    ExternalConfig { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
