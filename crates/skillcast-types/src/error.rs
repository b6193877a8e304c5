//! Error taxonomy and diagnostics
//!
//! Per-document problems are recoverable and collected as [`Diagnostic`]s
//! next to the successful results. Only [`CorpusUnavailable`] stops an
//! engine from starting.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::SkillId;

/// A skill document whose frontmatter cannot be used
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum MetadataError {
    /// The file does not start with a `---` delimited YAML block
    #[error("no YAML frontmatter block found")]
    MissingFrontmatter,

    /// The frontmatter is not valid YAML (or has the wrong shape)
    #[error("malformed YAML frontmatter: {0}")]
    MalformedYaml(String),

    /// A required field is absent or blank
    #[error("required field '{0}' is missing or empty")]
    MissingField(&'static str),

    /// The document could not be read
    #[error("unreadable skill document: {0}")]
    Unreadable(String),
}

/// Two documents resolved to the same skill id
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("duplicate skill id '{id}': keeping {kept:?}, rejecting {rejected:?}")]
pub struct DuplicateSkillError {
    pub id: SkillId,
    /// Source of the first registered document
    pub kept: PathBuf,
    /// Source of the excluded document
    pub rejected: PathBuf,
}

/// A single skill that cannot fit the budget on its own
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("skill '{id}' needs {size} but the budget is {budget}")]
pub struct OversizeSkill {
    pub id: SkillId,
    pub size: usize,
    pub budget: usize,
}

/// A candidate removed in favour of a narrower skill
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressedSkill {
    pub id: SkillId,
    pub score: f64,
    pub suppressed_by: SkillId,
    /// The dominant signal both skills matched on
    pub shared_signal: String,
}

/// A corpus root is missing or cannot be listed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("corpus root {path:?} unavailable: {reason}")]
pub struct CorpusUnavailable {
    pub path: PathBuf,
    pub reason: String,
}

/// Expected cancellation: a newer context snapshot replaced this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[error("evaluation cycle {epoch} superseded by a newer context")]
pub struct EvaluationSuperseded {
    pub epoch: u64,
}

/// Recoverable problem reported alongside results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    Metadata { path: PathBuf, error: MetadataError },
    Duplicate(DuplicateSkillError),
    Oversize(OversizeSkill),
    Suppressed(SuppressedSkill),
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Metadata { path, error } => write!(f, "{}: {}", path.display(), error),
            Diagnostic::Duplicate(e) => write!(f, "{}", e),
            Diagnostic::Oversize(e) => write!(f, "{}", e),
            Diagnostic::Suppressed(s) => write!(
                f,
                "skill '{}' suppressed by '{}' (shared signal '{}')",
                s.id, s.suppressed_by, s.shared_signal
            ),
        }
    }
}
