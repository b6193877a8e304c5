//! Relevance scoring
//!
//! score = Σ weight(matched signals) / (1 + ln(keyword_count))
//!
//! The length normalization keeps skills with long keyword lists from
//! winning on breadth alone.

use skillcast_registry::{RegistrySnapshot, Skill};
use skillcast_types::{ContextSignal, SkillId};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::signals::ContextSnapshot;

/// A skill that matched at least one signal
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The matched skill
    pub skill: Arc<Skill>,
    /// Length-normalized relevance
    pub score: f64,
    /// Matched signals in token order
    pub matched: Vec<ContextSignal>,
}

impl ScoredCandidate {
    /// Skill id
    pub fn id(&self) -> &SkillId {
        self.skill.id()
    }

    /// Size estimate of the skill body
    pub fn size(&self) -> usize {
        self.skill.size_estimate()
    }

    /// Tokens of the matched signals
    pub fn matched_tokens(&self) -> BTreeSet<&str> {
        self.matched.iter().map(|s| s.token.as_str()).collect()
    }

    /// Highest-weight matched signal; ties go to the smaller token
    pub fn dominant_signal(&self) -> Option<&ContextSignal> {
        // `matched` is in token order, so keeping the first maximum breaks ties
        self.matched.iter().fold(None, |best: Option<&ContextSignal>, s| match best {
            Some(b) if b.weight >= s.weight => Some(b),
            _ => Some(s),
        })
    }
}

/// `1 + ln(keyword_count)`, with an empty keyword set treated as one keyword
pub fn normalization_factor(keyword_count: usize) -> f64 {
    1.0 + (keyword_count.max(1) as f64).ln()
}

/// Score a single skill; `None` when no signal matches
pub fn score_skill(skill: &Arc<Skill>, context: &ContextSnapshot) -> Option<ScoredCandidate> {
    let matched: Vec<ContextSignal> = skill
        .keywords()
        .iter()
        .filter_map(|keyword| context.get(keyword).cloned())
        .collect();
    if matched.is_empty() {
        return None;
    }

    let total: f64 = matched.iter().map(|s| s.weight).sum();
    Some(ScoredCandidate {
        skill: Arc::clone(skill),
        score: total / normalization_factor(skill.keyword_count()),
        matched,
    })
}

/// Score every registered skill against `context`, best first
pub fn score(registry: &RegistrySnapshot, context: &ContextSnapshot) -> Vec<ScoredCandidate> {
    if context.is_empty() {
        return Vec::new();
    }
    let mut candidates: Vec<ScoredCandidate> = registry
        .skills()
        .filter_map(|skill| score_skill(skill, context))
        .collect();
    candidates.sort_by(rank_order);
    candidates
}

/// Ranking used by every later stage: higher score, then more matched
/// signals, then the smaller id
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.matched.len().cmp(&a.matched.len()))
        .then_with(|| a.id().cmp(b.id()))
}
