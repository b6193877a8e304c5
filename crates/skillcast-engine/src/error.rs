//! Error types for engine operations

use skillcast_types::CorpusUnavailable;
use thiserror::Error;

/// Engine errors
///
/// Per-document problems never show up here; they are reported as
/// diagnostics next to the results.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A corpus root is missing or cannot be listed
    #[error(transparent)]
    CorpusUnavailable(#[from] CorpusUnavailable),

    /// File-system work did not finish in time
    #[error("{operation} timed out after {timeout_ms}ms")]
    TimedOut {
        /// What was running (`registry build`, `registry refresh`, `content load`)
        operation: &'static str,
        /// Configured bound in milliseconds
        timeout_ms: u64,
    },

    /// No registered skill has this id
    #[error("Skill '{0}' not found")]
    UnknownSkill(String),

    /// The body of a registered skill could not be read
    #[error("Failed to load content of skill '{id}': {reason}")]
    Content {
        /// Skill id
        id: String,
        /// Failure reason
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// The corpus watcher could not be started
    #[error("Corpus watcher error: {0}")]
    Watch(String),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_corpus_unavailable_is_transparent() {
        let error: EngineError = CorpusUnavailable {
            path: PathBuf::from("/missing"),
            reason: "not a directory".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "corpus root \"/missing\" unavailable: not a directory"
        );
    }

    #[test]
    fn test_timeout_message() {
        let error = EngineError::TimedOut {
            operation: "registry refresh",
            timeout_ms: 250,
        };
        assert_eq!(error.to_string(), "registry refresh timed out after 250ms");
    }
}
