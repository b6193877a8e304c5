//! Skillcast Engine
//!
//! Decides which skills, out of a corpus of hundreds, go into an agent's
//! bounded context window for the current project and conversation.
//!
//! ## Features
//!
//! - Weighted context signals from dependency manifests, file extensions
//!   and conversation text
//! - Length-normalized relevance scoring with a total ranking order
//! - Explicit supersedes relation between overlapping skills
//! - Exact 0/1 knapsack selection under a size budget, greedy fallback for
//!   large inputs
//! - Activation diffs published over a watch channel; newer contexts
//!   cancel in-flight evaluations
//! - Layered configuration and incremental registry refresh
//!
//! ## Architecture
//!
//! Registry snapshot + context snapshot → scorer → resolver → selector →
//! session manager. Every stage before the session manager is pure.

#![deny(unsafe_code, dead_code, unused_imports, unused_variables, missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod scorer;
pub mod selector;
pub mod session;
pub mod signals;

pub use config::{EngineConfig, SelectionConfig, SignalWeights, SupersedesRule};
pub use engine::{CycleOutcome, CycleReport, RefreshOutcome, SkillEngine, WatchHandle};
pub use error::EngineError;
pub use pipeline::{Evaluation, Pipeline};
pub use resolver::{ConflictResolver, Resolution};
pub use scorer::{rank_order, score, ScoredCandidate};
pub use selector::{BudgetedSelector, Selection, SelectionStrategy};
pub use session::{CycleTicket, Provenance, SessionManager};
pub use signals::{ContextSnapshot, ConversationState, ProjectState, SignalExtractor};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ContextSnapshot, ConversationState, CycleOutcome, EngineConfig, EngineError,
        ProjectState, SkillEngine,
    };
}
