//! Skillcast Skill Registry
//!
//! Scans a corpus of guideline documents and keeps an immutable, id-indexed
//! view of their metadata.
//!
//! ## Features
//!
//! - Metadata-only discovery: only frontmatter, keywords and a size estimate
//!   stay in memory, bodies are loaded on demand
//! - `<skill-id>/SKILL.md` folders and flat `<skill-id>.md` files
//! - Multiple corpus roots, earlier roots win on duplicate ids
//! - Per-document errors are collected as diagnostics, never fatal
//! - Incremental, copy-on-write refresh driven by changed paths
//! - Debounced corpus watching
//!
//! ## Architecture
//!
//! Build: scan every root, parse each document, derive the id index.
//! Refresh: re-read only changed documents (hash-checked), re-derive the
//! index, publish a new snapshot with a delta and a bumped generation.

#![deny(unsafe_code, dead_code, unused_imports, unused_variables, missing_docs)]

pub mod keywords;
pub mod registry;
pub mod skill;
pub mod snapshot;
pub mod watcher;

pub use registry::{build, RegistryOptions, SkillRegistry};
pub use skill::{ContentError, ContentRef, SizeUnit, Skill, SkillMetadata};
pub use snapshot::{RegistryDelta, RegistrySnapshot};
pub use watcher::CorpusWatcher;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{RegistrySnapshot, Skill, SkillRegistry};
}
