//! Conflict resolution between overlapping skills
//!
//! Overlap is declared, never inferred: a `[[supersedes]]` entry says a
//! narrower skill replaces broader ones. The relation is closed transitively
//! when the resolver is built.

use skillcast_types::{SkillId, SuppressedSkill};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::SupersedesRule;
use crate::error::{EngineError, Result};
use crate::scorer::{rank_order, ScoredCandidate};

/// Candidates left after suppression, plus what was removed and why
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Surviving candidates in rank order
    pub retained: Vec<ScoredCandidate>,
    /// Skills dropped, with the skill that superseded them
    pub suppressed: Vec<SuppressedSkill>,
}

/// Applies the supersedes relation to a ranked candidate list
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    /// Broader skill → every skill that supersedes it, directly or transitively
    superseded_by: BTreeMap<SkillId, BTreeSet<SkillId>>,
}

impl ConflictResolver {
    /// Resolver without any relation; keeps every candidate
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the transitive closure of `rules`.
    ///
    /// Self-references and cycles are configuration errors.
    pub fn new(rules: &[SupersedesRule]) -> Result<Self> {
        let mut direct: BTreeMap<SkillId, BTreeSet<SkillId>> = BTreeMap::new();
        for rule in rules {
            let narrower = SkillId::new(rule.narrower.trim());
            for broader in &rule.broader {
                let broader = SkillId::new(broader.trim());
                if broader == narrower {
                    return Err(EngineError::Config(format!(
                        "skill '{}' cannot supersede itself",
                        narrower
                    )));
                }
                direct.entry(narrower.clone()).or_default().insert(broader);
            }
        }

        let mut superseded_by: BTreeMap<SkillId, BTreeSet<SkillId>> = BTreeMap::new();
        for narrower in direct.keys() {
            for broader in reachable(&direct, narrower) {
                if &broader == narrower {
                    return Err(EngineError::Config(format!(
                        "supersedes relation has a cycle through '{}'",
                        narrower
                    )));
                }
                superseded_by
                    .entry(broader)
                    .or_default()
                    .insert(narrower.clone());
            }
        }

        Ok(Self { superseded_by })
    }

    /// True when no supersedes rule is configured
    pub fn is_empty(&self) -> bool {
        self.superseded_by.is_empty()
    }

    /// True when `narrower` supersedes `broader` (directly or transitively)
    pub fn supersedes(&self, narrower: &str, broader: &str) -> bool {
        self.superseded_by
            .get(broader)
            .is_some_and(|set| set.contains(narrower))
    }

    /// Remove broader candidates covered by a narrower candidate.
    ///
    /// Every candidate is judged against the full input list, so the result
    /// does not depend on which suppressions happen first.
    pub fn resolve(&self, mut candidates: Vec<ScoredCandidate>) -> Resolution {
        candidates.sort_by(rank_order);
        if self.superseded_by.is_empty() {
            return Resolution {
                retained: candidates,
                suppressed: Vec::new(),
            };
        }

        let mut verdicts = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let verdict = self.superseded_by.get(candidate.id()).and_then(|narrower_ids| {
                // Candidates are ranked, so the first match is the strongest narrower skill
                candidates
                    .iter()
                    .filter(|other| narrower_ids.contains(other.id()))
                    .find_map(|narrower| covers(narrower, candidate))
                    .map(|(by, signal)| SuppressedSkill {
                        id: candidate.id().clone(),
                        score: candidate.score,
                        suppressed_by: by,
                        shared_signal: signal,
                    })
            });
            verdicts.push(verdict);
        }

        let mut resolution = Resolution::default();
        for (candidate, verdict) in candidates.into_iter().zip(verdicts) {
            match verdict {
                Some(suppressed) => {
                    debug!(
                        "Suppressing '{}' in favour of '{}' (signal '{}')",
                        suppressed.id, suppressed.suppressed_by, suppressed.shared_signal
                    );
                    resolution.suppressed.push(suppressed);
                }
                None => resolution.retained.push(candidate),
            }
        }
        resolution
    }
}

/// Does `narrower` cover everything `broader` matched, including its dominant signal?
fn covers(narrower: &ScoredCandidate, broader: &ScoredCandidate) -> Option<(SkillId, String)> {
    let dominant = broader.dominant_signal()?;
    let narrower_tokens = narrower.matched_tokens();
    let shares_dominant = narrower_tokens.contains(dominant.token.as_str());
    let is_subset = broader
        .matched
        .iter()
        .all(|s| narrower_tokens.contains(s.token.as_str()));
    (shares_dominant && is_subset).then(|| (narrower.id().clone(), dominant.token.clone()))
}

/// Every id reachable from `start` over the direct relation (may include `start` on a cycle)
fn reachable(direct: &BTreeMap<SkillId, BTreeSet<SkillId>>, start: &SkillId) -> BTreeSet<SkillId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&SkillId> = direct.get(start).into_iter().flatten().collect();
    while let Some(id) = stack.pop() {
        if seen.insert(id.clone()) {
            stack.extend(direct.get(id).into_iter().flatten());
        }
    }
    seen
}
