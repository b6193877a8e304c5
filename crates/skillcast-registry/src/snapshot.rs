//! Immutable registry snapshots
//!
//! A snapshot keeps the table of every source document seen (valid or not)
//! and the id index derived from it. Refreshing never mutates a snapshot;
//! it clones the source table, patches the changed rows and derives a new
//! index, so readers of the previous snapshot are unaffected.

use skillcast_types::{Diagnostic, DuplicateSkillError, MetadataError, SkillId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::skill::Skill;

/// Position of a source document: root index, then path relative to that root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SourceKey {
    pub(crate) root: usize,
    pub(crate) relative: PathBuf,
}

/// One row of the source table
#[derive(Debug, Clone)]
pub(crate) struct SourceEntry {
    pub(crate) id: SkillId,
    pub(crate) path: PathBuf,
    /// Hash of the raw document, when it could be read
    pub(crate) hash: Option<String>,
    pub(crate) outcome: Result<Arc<Skill>, MetadataError>,
}

/// Skill ids that changed between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryDelta {
    /// Ids that are new in this generation
    pub added: Vec<SkillId>,
    /// Ids whose document changed
    pub updated: Vec<SkillId>,
    /// Ids no longer registered
    pub removed: Vec<SkillId>,
}

impl RegistryDelta {
    fn between(
        previous: Option<&BTreeMap<SkillId, Arc<Skill>>>,
        next: &BTreeMap<SkillId, Arc<Skill>>,
    ) -> Self {
        let empty = BTreeMap::new();
        let previous = previous.unwrap_or(&empty);
        let mut delta = Self::default();

        for (id, skill) in next {
            match previous.get(id) {
                None => delta.added.push(id.clone()),
                Some(old) if !Arc::ptr_eq(old, skill) && old.as_ref() != skill.as_ref() => {
                    delta.updated.push(id.clone())
                }
                Some(_) => {}
            }
        }
        delta.removed = previous
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        delta
    }

    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Number of ids touched
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Immutable view of the corpus at one point in time
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    pub(crate) sources: BTreeMap<SourceKey, SourceEntry>,
    skills: BTreeMap<SkillId, Arc<Skill>>,
    diagnostics: Vec<Diagnostic>,
    delta: RegistryDelta,
}

impl RegistrySnapshot {
    /// Snapshot over skills registered in memory, in the given order.
    ///
    /// Later skills reusing an id are rejected like on-disk duplicates.
    pub fn from_skills(skills: impl IntoIterator<Item = Skill>) -> Self {
        let sources = skills
            .into_iter()
            .enumerate()
            .map(|(index, skill)| {
                let key = SourceKey {
                    root: 0,
                    relative: PathBuf::from(format!("{index:08}")),
                };
                let entry = SourceEntry {
                    id: skill.id().clone(),
                    path: PathBuf::from(format!("<embedded>/{}", skill.id())),
                    hash: Some(skill.content_hash().to_string()),
                    outcome: Ok(Arc::new(skill)),
                };
                (key, entry)
            })
            .collect();
        Self::assemble(sources, None)
    }

    /// Derive the id index from a source table
    pub(crate) fn assemble(
        sources: BTreeMap<SourceKey, SourceEntry>,
        previous: Option<&RegistrySnapshot>,
    ) -> Self {
        let mut skills: BTreeMap<SkillId, Arc<Skill>> = BTreeMap::new();
        let mut owners: BTreeMap<SkillId, PathBuf> = BTreeMap::new();
        let mut diagnostics = Vec::new();

        // Source keys iterate in root order, then path order: first registered wins
        for entry in sources.values() {
            match &entry.outcome {
                Err(error) => diagnostics.push(Diagnostic::Metadata {
                    path: entry.path.clone(),
                    error: error.clone(),
                }),
                Ok(skill) => match owners.get(&entry.id) {
                    Some(kept) => diagnostics.push(Diagnostic::Duplicate(DuplicateSkillError {
                        id: entry.id.clone(),
                        kept: kept.clone(),
                        rejected: entry.path.clone(),
                    })),
                    None => {
                        owners.insert(entry.id.clone(), entry.path.clone());
                        skills.insert(entry.id.clone(), Arc::clone(skill));
                    }
                },
            }
        }

        let known: BTreeSet<String> = previous
            .map(|p| p.diagnostics.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        for diagnostic in &diagnostics {
            let line = diagnostic.to_string();
            if !known.contains(&line) {
                warn!("Excluded skill document: {}", line);
            }
        }

        let delta = RegistryDelta::between(previous.map(|p| &p.skills), &skills);
        let generation = match previous {
            None => 1,
            Some(p) if delta.is_empty() && p.diagnostics == diagnostics => p.generation,
            Some(p) => p.generation + 1,
        };

        Self {
            generation,
            sources,
            skills,
            diagnostics,
            delta,
        }
    }

    /// Monotonic counter, bumped whenever the set of skills or diagnostics changes
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look up a skill by id
    pub fn get(&self, id: &str) -> Option<&Arc<Skill>> {
        self.skills.get(id)
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    /// Registered skills in id order
    pub fn skills(&self) -> impl Iterator<Item = &Arc<Skill>> {
        self.skills.values()
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = &SkillId> {
        self.skills.keys()
    }

    /// Number of registered skills
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// True when no skill is registered
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Per-document problems found while building this snapshot
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Changes relative to the snapshot this one was derived from
    pub fn delta(&self) -> &RegistryDelta {
        &self.delta
    }

    /// Number of source documents seen, including excluded ones
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Generate a sorted skills list, one summary line per skill
    pub fn summary(&self) -> String {
        self.skills
            .values()
            .map(|s| s.to_summary())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
