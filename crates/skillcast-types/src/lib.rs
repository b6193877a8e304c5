//! Skillcast Types - Core types shared by the skillcast crates
//!
//! This module defines the value types that flow between the registry,
//! the selection pipeline and the host: skill ids, context signals, the
//! published activation set and the diffs emitted when it changes.

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

pub use error::{
    CorpusUnavailable, Diagnostic, DuplicateSkillError, EvaluationSuperseded, MetadataError,
    OversizeSkill, SuppressedSkill,
};

// ============================================================================
// Skill Identity
// ============================================================================

/// Stable identifier of a skill, derived from its directory or file name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillId(String);

impl SkillId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SkillId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SkillId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for SkillId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SkillId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Context Signals
// ============================================================================

/// Where a piece of context evidence came from.
///
/// Variants are ordered from strongest to weakest provenance; the order is
/// only used to break ties between equally weighted evidence for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Dependency declared in a manifest (package.json, Cargo.toml, ...)
    DependencyManifest,
    /// A file with this extension exists in the project
    FileExtension,
    /// Mentioned in conversation text
    ExplicitMention,
}

impl EvidenceKind {
    pub fn label(self) -> &'static str {
        match self {
            EvidenceKind::DependencyManifest => "dependency-manifest",
            EvidenceKind::FileExtension => "file-extension",
            EvidenceKind::ExplicitMention => "explicit-mention",
        }
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One weighted, normalized token describing the current project or conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSignal {
    pub token: String,
    pub weight: f64,
    pub source: EvidenceKind,
}

impl ContextSignal {
    pub fn new(token: impl Into<String>, weight: f64, source: EvidenceKind) -> Self {
        Self {
            token: token.into(),
            weight,
            source,
        }
    }
}

// ============================================================================
// Activation Set
// ============================================================================

/// A skill currently in the activation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationEntry {
    pub skill_id: SkillId,
    pub score: f64,
    pub size: usize,
    pub activated_at: DateTime<Utc>,
}

/// The externally visible working set of skills.
///
/// Entries are kept in rank order. A set is never mutated after it has been
/// published; every change produces a new set with a higher `generation`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivationSet {
    /// Publication counter, starts at 0 for the initial empty set
    pub generation: u64,
    /// Generation of the registry snapshot the set was computed from
    pub registry_generation: u64,
    /// Fingerprint of the context snapshot the set was computed from
    pub context_fingerprint: Option<String>,
    pub entries: Vec<ActivationEntry>,
}

impl ActivationSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ActivationEntry> {
        self.entries.iter().find(|e| e.skill_id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Skill ids in rank order
    pub fn ids(&self) -> Vec<&SkillId> {
        self.entries.iter().map(|e| &e.skill_id).collect()
    }

    /// Sum of `size` over all members
    pub fn total_size(&self) -> usize {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// One line of an activation diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub skill_id: SkillId,
    pub score: f64,
}

/// Membership changes between two activation sets
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivationDiff {
    pub activated: Vec<DiffEntry>,
    pub deactivated: Vec<DiffEntry>,
    pub unchanged: Vec<DiffEntry>,
}

impl ActivationDiff {
    /// True when nothing was activated or deactivated
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty()
    }
}

impl fmt::Display for ActivationDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} -{} ={}",
            self.activated.len(),
            self.deactivated.len(),
            self.unchanged.len()
        )
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle of the evaluation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Evaluating,
    Reconciling,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Evaluating => "evaluating",
            SessionState::Reconciling => "reconciling",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, size: usize) -> ActivationEntry {
        ActivationEntry {
            skill_id: SkillId::from(id),
            score: 1.0,
            size,
            activated_at: Utc::now(),
        }
    }

    #[test]
    fn test_activation_set_lookup_and_size() {
        let set = ActivationSet {
            entries: vec![entry("react", 500), entry("rust", 300)],
            ..ActivationSet::empty()
        };
        assert_eq!(set.total_size(), 800);
        assert!(set.contains("rust"));
        assert!(!set.contains("django-python"));
        assert_eq!(set.ids(), vec![&SkillId::from("react"), &SkillId::from("rust")]);
    }

    #[test]
    fn test_diff_is_empty_ignores_unchanged() {
        let diff = ActivationDiff {
            unchanged: vec![DiffEntry {
                skill_id: SkillId::from("react"),
                score: 1.0,
            }],
            ..ActivationDiff::default()
        };
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "+0 -0 =1");
    }

    #[test]
    fn test_evidence_kind_strength_order() {
        assert!(EvidenceKind::DependencyManifest < EvidenceKind::FileExtension);
        assert!(EvidenceKind::FileExtension < EvidenceKind::ExplicitMention);
        assert_eq!(EvidenceKind::FileExtension.to_string(), "file-extension");
    }
}
