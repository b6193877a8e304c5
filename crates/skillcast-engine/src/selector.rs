//! Budgeted selection
//!
//! Picks the subset of ranked candidates with the highest total score whose
//! total size fits the budget (0/1 knapsack). Small inputs are solved exactly
//! with dynamic programming; past `exact_cell_limit` table cells the selector
//! falls back to greedy-by-density with a best-single-item guard, which is
//! never worse than half the optimum.

use serde::Serialize;
use skillcast_types::{OversizeSkill, SkillId};
use tracing::debug;

use crate::config::SelectionConfig;
use crate::scorer::{rank_order, ScoredCandidate};

/// Relative score differences below this are ties
const SCORE_EPSILON: f64 = 1e-9;

/// How a selection was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Dynamic programming over (scaled) sizes; optimal
    Exact,
    /// Greedy by score per unit of size, or the best single item
    Greedy,
}

/// Output of one selection pass
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen candidates in rank order
    pub chosen: Vec<ScoredCandidate>,
    /// Candidates that could never fit on their own
    pub oversize: Vec<OversizeSkill>,
    /// How the chosen set was computed
    pub strategy: SelectionStrategy,
    /// Budget the selection respects
    pub budget: usize,
}

impl Selection {
    /// Selection with nothing chosen
    pub fn empty(budget: usize) -> Self {
        Self {
            chosen: Vec::new(),
            oversize: Vec::new(),
            strategy: SelectionStrategy::Exact,
            budget,
        }
    }

    /// Sum of chosen sizes
    pub fn total_size(&self) -> usize {
        self.chosen.iter().map(ScoredCandidate::size).sum()
    }

    /// Sum of chosen scores
    pub fn total_score(&self) -> f64 {
        self.chosen.iter().map(|c| c.score).sum()
    }

    /// Chosen ids in rank order
    pub fn ids(&self) -> Vec<&SkillId> {
        self.chosen.iter().map(ScoredCandidate::id).collect()
    }
}

/// Budget-constrained subset selection
#[derive(Debug, Clone, Copy)]
pub struct BudgetedSelector {
    min_score: f64,
    exact_cell_limit: usize,
    size_granularity: usize,
}

impl Default for BudgetedSelector {
    fn default() -> Self {
        Self::new(&SelectionConfig::default())
    }
}

impl BudgetedSelector {
    /// Selector tuned by `config`
    pub fn new(config: &SelectionConfig) -> Self {
        Self {
            min_score: config.min_score,
            exact_cell_limit: config.exact_cell_limit,
            size_granularity: config.size_granularity.max(1),
        }
    }

    /// Choose candidates whose total size never exceeds `budget`
    pub fn select(&self, candidates: &[ScoredCandidate], budget: usize) -> Selection {
        let mut ranked: Vec<&ScoredCandidate> = candidates
            .iter()
            .filter(|c| c.score > 0.0 && c.score >= self.min_score)
            .collect();
        ranked.sort_by(|a, b| rank_order(a, b));

        let mut oversize = Vec::new();
        let mut fitting = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            if candidate.size() > budget {
                debug!(
                    "Skill '{}' ({}) exceeds the budget of {}",
                    candidate.id(),
                    candidate.size(),
                    budget
                );
                oversize.push(OversizeSkill {
                    id: candidate.id().clone(),
                    size: candidate.size(),
                    budget,
                });
            } else {
                fitting.push(candidate);
            }
        }

        if fitting.is_empty() {
            return Selection {
                oversize,
                ..Selection::empty(budget)
            };
        }

        let weights: Vec<usize> = fitting
            .iter()
            .map(|c| c.size().div_ceil(self.size_granularity))
            .collect();
        // The table never needs to be wider than everything taken at once
        let capacity = (budget / self.size_granularity)
            .min(weights.iter().fold(0usize, |sum, w| sum.saturating_add(*w)));
        let cells = fitting.len().saturating_mul(capacity.saturating_add(1));
        let (picked, strategy) = if cells <= self.exact_cell_limit {
            (solve_exact(&fitting, &weights, capacity), SelectionStrategy::Exact)
        } else {
            (solve_greedy(&fitting, budget), SelectionStrategy::Greedy)
        };

        let selection = Selection {
            chosen: picked.into_iter().map(|i| fitting[i].clone()).collect(),
            oversize,
            strategy,
            budget,
        };
        debug!(
            "Selected {} of {} candidates ({:?}, size {}/{})",
            selection.chosen.len(),
            fitting.len(),
            strategy,
            selection.total_size(),
            budget
        );
        debug_assert!(selection.total_size() <= budget);
        selection
    }
}

/// Whether `candidate` beats `current` by more than rounding noise
fn improves(candidate: f64, current: f64) -> bool {
    candidate > current + SCORE_EPSILON * current.abs()
}

/// 0/1 knapsack over `weights` (sizes rounded up to the granularity); returns
/// indices in rank order.
///
/// An item is only taken when it strictly improves the best score, so on
/// ties the earlier-ranked items win.
fn solve_exact(items: &[&ScoredCandidate], weights: &[usize], capacity: usize) -> Vec<usize> {
    let width = capacity + 1;
    let mut best = vec![0.0_f64; width];
    let mut take = vec![false; items.len() * width];

    for (i, item) in items.iter().enumerate() {
        let w = weights[i];
        if w > capacity {
            continue;
        }
        for c in (w..=capacity).rev() {
            let with_item = best[c - w] + item.score;
            if improves(with_item, best[c]) {
                best[c] = with_item;
                take[i * width + c] = true;
            }
        }
    }

    let mut picked = Vec::new();
    let mut c = capacity;
    for i in (0..items.len()).rev() {
        if take[i * width + c] {
            picked.push(i);
            c -= weights[i];
        }
    }
    picked.reverse();
    picked
}

/// Greedy by score density, guarded by the single best item
fn solve_greedy(items: &[&ScoredCandidate], budget: usize) -> Vec<usize> {
    let density = |c: &ScoredCandidate| match c.size() {
        0 => f64::INFINITY,
        size => c.score / size as f64,
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        density(items[b])
            .total_cmp(&density(items[a]))
            .then(a.cmp(&b))
    });

    let mut used = 0usize;
    let mut total = 0.0;
    let mut picked = Vec::new();
    for i in order {
        let size = items[i].size();
        if size <= budget - used {
            used += size;
            total += items[i].score;
            picked.push(i);
        }
    }

    // Items are ranked, so the first one has the highest single score
    if let Some(first) = items.first() {
        if improves(first.score, total) {
            return vec![0];
        }
    }
    picked.sort_unstable();
    picked
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use skillcast_registry::Skill;
    use skillcast_types::{ContextSignal, EvidenceKind};
    use std::sync::Arc;

    fn candidate(id: &str, score: f64, size: usize) -> ScoredCandidate {
        ScoredCandidate {
            skill: Arc::new(Skill::new(id, id, id, [id], size)),
            score,
            matched: vec![ContextSignal::new(id, score, EvidenceKind::ExplicitMention)],
        }
    }

    fn ids(selection: &Selection) -> Vec<&str> {
        selection.chosen.iter().map(|c| c.id().as_str()).collect()
    }

    fn greedy_only() -> BudgetedSelector {
        BudgetedSelector::new(&SelectionConfig {
            exact_cell_limit: 0,
            ..SelectionConfig::default()
        })
    }

    #[test]
    fn test_exact_prefers_best_total_score() {
        let selection = BudgetedSelector::default().select(
            &[
                candidate("nextjs-react-typescript", 2.38, 700),
                candidate("react", 1.43, 500),
            ],
            900,
        );
        assert_eq!(selection.strategy, SelectionStrategy::Exact);
        assert_eq!(ids(&selection), vec!["nextjs-react-typescript"]);
        assert_eq!(selection.total_size(), 700);
    }

    #[test]
    fn test_exact_beats_greedy_shape() {
        // Densest item first would take "alpha" and leave no room for the pair
        let candidates = [
            candidate("alpha", 6.0, 51),
            candidate("beta", 5.0, 50),
            candidate("gamma", 5.0, 50),
        ];
        let selection = BudgetedSelector::default().select(&candidates, 100);
        assert_eq!(ids(&selection), vec!["beta", "gamma"]);
        assert_eq!(selection.total_size(), 100);
    }

    #[test]
    fn test_equal_candidates_pick_smaller_id() {
        for _ in 0..10 {
            let selection = BudgetedSelector::default().select(
                &[candidate("zeta", 1.0, 100), candidate("alpha", 1.0, 100)],
                150,
            );
            assert_eq!(ids(&selection), vec!["alpha"]);
        }
    }

    #[test]
    fn test_oversize_reported() {
        let selection = BudgetedSelector::default().select(
            &[candidate("huge", 9.0, 5000), candidate("small", 1.0, 10)],
            100,
        );
        assert_eq!(ids(&selection), vec!["small"]);
        assert_eq!(selection.oversize.len(), 1);
        assert_eq!(selection.oversize[0].id.as_str(), "huge");
        assert_eq!(selection.oversize[0].size, 5000);
        assert_eq!(selection.oversize[0].budget, 100);
    }

    #[test]
    fn test_min_score_filters() {
        let selector = BudgetedSelector::new(&SelectionConfig {
            min_score: 0.5,
            ..SelectionConfig::default()
        });
        let selection = selector.select(&[candidate("weak", 0.4, 1), candidate("strong", 0.6, 1)], 10);
        assert_eq!(ids(&selection), vec!["strong"]);
    }

    #[test]
    fn test_greedy_falls_back_to_best_single() {
        let selection = greedy_only().select(
            &[candidate("big", 10.0, 100), candidate("tiny", 1.0, 1)],
            100,
        );
        assert_eq!(selection.strategy, SelectionStrategy::Greedy);
        assert_eq!(ids(&selection), vec!["big"]);
    }

    #[test]
    fn test_greedy_output_in_rank_order() {
        let selection = greedy_only().select(
            &[
                candidate("dense", 1.0, 1),
                candidate("top", 5.0, 40),
                candidate("mid", 2.0, 30),
            ],
            100,
        );
        assert_eq!(ids(&selection), vec!["top", "mid", "dense"]);
    }

    #[test]
    fn test_granularity_never_exceeds_budget() {
        let selector = BudgetedSelector::new(&SelectionConfig {
            size_granularity: 100,
            ..SelectionConfig::default()
        });
        let candidates = [
            candidate("a-one", 3.0, 450),
            candidate("b-two", 2.0, 450),
            candidate("c-three", 1.0, 120),
        ];
        let selection = selector.select(&candidates, 1000);
        assert!(selection.total_size() <= 1000);
        assert_eq!(ids(&selection), vec!["a-one", "b-two"]);
    }

    #[test]
    fn test_budget_respected_by_both_strategies() {
        let candidates: Vec<ScoredCandidate> = (0..40)
            .map(|i| candidate(&format!("skill-{i:02}"), 1.0 + (i % 7) as f64, 37 + (i * 13) % 101))
            .collect();
        for budget in [1, 50, 333, 1000, 5000] {
            let exact = BudgetedSelector::default().select(&candidates, budget);
            let greedy = greedy_only().select(&candidates, budget);
            assert!(exact.total_size() <= budget);
            assert!(greedy.total_size() <= budget);
            assert!(exact.total_score() + 1e-9 >= greedy.total_score());
            assert!(greedy.total_score() * 2.0 + 1e-9 >= exact.total_score());
        }
    }

    #[test]
    fn test_empty_input() {
        let selection = BudgetedSelector::default().select(&[], 100);
        assert!(selection.chosen.is_empty());
        assert_eq!(selection.total_size(), 0);
    }

    #[test]
    fn test_huge_budget_without_candidates() {
        let selection = BudgetedSelector::default().select(&[], usize::MAX);
        assert!(selection.chosen.is_empty());
        assert_eq!(selection.budget, usize::MAX);

        let selection = BudgetedSelector::default().select(&[], 2_000_000_000);
        assert!(selection.chosen.is_empty());
    }

    #[test]
    fn test_huge_budget_stays_exact_for_small_inputs() {
        let candidates = [candidate("react", 2.0, 500), candidate("rust", 1.0, 300)];
        let selection = BudgetedSelector::default().select(&candidates, usize::MAX);
        assert_eq!(selection.strategy, SelectionStrategy::Exact);
        assert_eq!(ids(&selection), vec!["react", "rust"]);

        let oversize_only = BudgetedSelector::default().select(&[candidate("huge", 1.0, 50)], 10);
        assert!(oversize_only.chosen.is_empty());
        assert_eq!(oversize_only.oversize.len(), 1);
    }

    #[test]
    fn test_tiny_positive_score_is_selected() {
        for selector in [BudgetedSelector::default(), greedy_only()] {
            let selection = selector.select(&[candidate("faint", 1e-12, 10)], 100);
            assert_eq!(ids(&selection), vec!["faint"]);
        }
    }
}
