//! Core domain errors.

use thiserror::Error;

/// Core domain errors for ChatRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task name doesn't match the identifier pattern.
    #[error("Invalid task name: {0}")]
    InvalidTaskName(String),

    /// A matcher regular expression failed to compile.
    #[error("couldn't compile regular expression '{regex}': {source}")]
    InvalidRegex {
        regex: String,
        #[source]
        source: regex::Error,
    },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
