//! Context signal extraction
//!
//! Turns project evidence and conversation text into one weighted,
//! normalized signal per token. Tokens go through the same normalization
//! as skill keywords, so matching downstream is a plain lookup.

use sha2::{Digest, Sha256};
use skillcast_registry::keywords::{normalize_token, tokenize};
use skillcast_types::{ContextSignal, EvidenceKind};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{SignalWeights, SignalsConfig};

/// Evidence gathered from the project on disk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    /// Tokens with the kind of evidence they came from
    pub evidence: Vec<(String, EvidenceKind)>,
}

impl ProjectState {
    /// Empty project state
    pub fn new() -> Self {
        Self::default()
    }

    /// A package named in a dependency manifest (`Cargo.toml`, `package.json`, ...)
    pub fn with_dependency(self, name: impl Into<String>) -> Self {
        self.with_evidence(name, EvidenceKind::DependencyManifest)
    }

    /// A source file extension seen in the tree, with or without the dot
    pub fn with_file_extension(self, extension: impl Into<String>) -> Self {
        self.with_evidence(extension, EvidenceKind::FileExtension)
    }

    /// Add a token with an explicit evidence kind
    pub fn with_evidence(mut self, token: impl Into<String>, kind: EvidenceKind) -> Self {
        self.evidence.push((token.into(), kind));
        self
    }
}

/// Recent conversation text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    /// Free-text mentions from the conversation
    pub mentions: Vec<String>,
}

impl ConversationState {
    /// Empty conversation state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a free-text mention
    pub fn with_mention(mut self, text: impl Into<String>) -> Self {
        self.mentions.push(text.into());
        self
    }
}

/// Immutable set of signals for one evaluation cycle, keyed by token
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    signals: BTreeMap<String, ContextSignal>,
    fingerprint: String,
}

impl ContextSnapshot {
    /// Build a snapshot from ready-made signals.
    ///
    /// Tokens are normalized; signals with a non-positive weight or a token
    /// that normalizes away are dropped. A repeated token keeps the strongest
    /// signal.
    pub fn from_signals(signals: impl IntoIterator<Item = ContextSignal>) -> Self {
        let mut merged = BTreeMap::new();
        for signal in signals {
            if !signal.weight.is_finite() || signal.weight <= 0.0 {
                debug!("Dropping signal '{}' with weight {}", signal.token, signal.weight);
                continue;
            }
            let Some(token) = normalize_token(&signal.token) else {
                continue;
            };
            merge(&mut merged, ContextSignal::new(token, signal.weight, signal.source));
        }
        Self::seal(merged)
    }

    fn seal(signals: BTreeMap<String, ContextSignal>) -> Self {
        let mut hasher = Sha256::new();
        for signal in signals.values() {
            hasher.update(signal.token.as_bytes());
            hasher.update([0]);
            hasher.update(signal.weight.to_bits().to_be_bytes());
            hasher.update(signal.source.label().as_bytes());
            hasher.update([b'\n']);
        }
        let fingerprint = format!("{:x}", hasher.finalize());
        Self {
            signals,
            fingerprint,
        }
    }

    /// Signal for `token`, if present
    pub fn get(&self, token: &str) -> Option<&ContextSignal> {
        self.signals.get(token)
    }

    /// Signals in token order
    pub fn signals(&self) -> impl Iterator<Item = &ContextSignal> {
        self.signals.values()
    }

    /// Number of signals
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// True when there are no signals
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// SHA-256 over the sorted signals; equal snapshots have equal fingerprints
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::seal(BTreeMap::new())
    }
}

/// Keep the stronger of two signals for the same token
fn merge(signals: &mut BTreeMap<String, ContextSignal>, signal: ContextSignal) {
    match signals.entry(signal.token.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(signal);
        }
        Entry::Occupied(mut slot) => {
            let current = slot.get();
            let stronger = signal.weight > current.weight
                || (signal.weight == current.weight && signal.source < current.source);
            if stronger {
                slot.insert(signal);
            }
        }
    }
}

/// Derives [`ContextSnapshot`]s from project and conversation state
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    weights: SignalWeights,
    /// Normalized token → normalized expansions
    aliases: BTreeMap<String, Vec<String>>,
}

impl SignalExtractor {
    /// Extractor using the configured weights and aliases
    pub fn new(config: &SignalsConfig) -> Self {
        let mut aliases: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, to) in &config.aliases {
            let Some(from) = normalize_token(from) else {
                continue;
            };
            let expansions = aliases.entry(from).or_default();
            for token in to.iter().flat_map(|t| tokenize(t)) {
                if !expansions.contains(&token) {
                    expansions.push(token);
                }
            }
        }
        Self {
            weights: config.weights,
            aliases,
        }
    }

    /// Configured weight tiers
    pub fn weights(&self) -> &SignalWeights {
        &self.weights
    }

    /// Extract the signals for one cycle
    pub fn extract(
        &self,
        project: &ProjectState,
        conversation: &ConversationState,
    ) -> ContextSnapshot {
        let mut signals = BTreeMap::new();

        for (raw, kind) in &project.evidence {
            let raw = match kind {
                EvidenceKind::FileExtension => raw.trim_start_matches('.'),
                _ => raw.as_str(),
            };
            for token in tokenize(raw) {
                self.emit(&mut signals, token, *kind);
            }
        }

        for text in &conversation.mentions {
            for token in tokenize(text) {
                self.emit(&mut signals, token, EvidenceKind::ExplicitMention);
            }
        }

        let snapshot = ContextSnapshot::seal(signals);
        debug!(
            "Extracted {} context signals (fingerprint {})",
            snapshot.len(),
            &snapshot.fingerprint()[..12]
        );
        snapshot
    }

    fn emit(&self, signals: &mut BTreeMap<String, ContextSignal>, token: String, kind: EvidenceKind) {
        let weight = self.weights.weight(kind);
        if let Some(expansions) = self.aliases.get(&token) {
            for alias in expansions {
                merge(signals, ContextSignal::new(alias.clone(), weight, kind));
            }
        }
        merge(signals, ContextSignal::new(token, weight, kind));
    }
}
