//! Scoring, conflict resolution and selection as one pure evaluation

use skillcast_registry::RegistrySnapshot;
use skillcast_types::{Diagnostic, EvaluationSuperseded, SuppressedSkill};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::resolver::ConflictResolver;
use crate::scorer;
use crate::selector::{BudgetedSelector, Selection};
use crate::session::CycleTicket;
use crate::signals::ContextSnapshot;

/// Result of evaluating one context against one registry snapshot
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Number of skills that matched at least one signal
    pub scored: usize,
    /// Skills dropped by the supersedes relation
    pub suppressed: Vec<SuppressedSkill>,
    /// Budgeted selection over the retained skills
    pub selection: Selection,
}

impl Evaluation {
    /// Suppressions and oversize skills of this evaluation
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.suppressed
            .iter()
            .cloned()
            .map(Diagnostic::Suppressed)
            .chain(self.selection.oversize.iter().cloned().map(Diagnostic::Oversize))
            .collect()
    }
}

/// The pure part of an evaluation cycle
#[derive(Debug, Clone)]
pub struct Pipeline {
    resolver: ConflictResolver,
    selector: BudgetedSelector,
    budget: usize,
}

impl Pipeline {
    /// Build the stages from configuration
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self::with_parts(
            ConflictResolver::new(&config.supersedes)?,
            BudgetedSelector::new(&config.selection),
            config.selection.budget,
        ))
    }

    /// Assemble a pipeline from ready-made stages
    pub fn with_parts(resolver: ConflictResolver, selector: BudgetedSelector, budget: usize) -> Self {
        Self {
            resolver,
            selector,
            budget,
        }
    }

    /// Size budget of every selection
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Supersedes relation in use
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Run every stage without interruption
    pub fn evaluate(&self, registry: &RegistrySnapshot, context: &ContextSnapshot) -> Evaluation {
        let candidates = scorer::score(registry, context);
        let scored = candidates.len();
        let resolution = self.resolver.resolve(candidates);
        let selection = self.selector.select(&resolution.retained, self.budget);
        Evaluation {
            scored,
            suppressed: resolution.suppressed,
            selection,
        }
    }

    /// Run every stage, yielding and checking `ticket` at each stage boundary
    pub async fn evaluate_cycle(
        &self,
        registry: &RegistrySnapshot,
        context: &ContextSnapshot,
        ticket: &CycleTicket,
    ) -> std::result::Result<Evaluation, EvaluationSuperseded> {
        ticket.checkpoint()?;
        let candidates = scorer::score(registry, context);
        let scored = candidates.len();

        tokio::task::yield_now().await;
        ticket.checkpoint()?;
        let resolution = self.resolver.resolve(candidates);

        tokio::task::yield_now().await;
        ticket.checkpoint()?;
        let selection = self.selector.select(&resolution.retained, self.budget);

        tokio::task::yield_now().await;
        ticket.checkpoint()?;
        Ok(Evaluation {
            scored,
            suppressed: resolution.suppressed,
            selection,
        })
    }
}
