//! Skills registry: corpus scanning and incremental refresh
//!
//! A corpus root holds `<skill-id>/SKILL.md` folders and/or flat
//! `<skill-id>.md` files. Several roots can be configured; earlier roots win
//! when two documents share an id.

use skillcast_types::{CorpusUnavailable, MetadataError, SkillId};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::skill::{content_hash, SizeUnit, Skill};
use crate::snapshot::{RegistrySnapshot, SourceEntry, SourceKey};

const SKILL_FILE: &str = "SKILL.md";

/// Scan options shared by build and refresh
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// How document sizes are measured
    pub size_unit: SizeUnit,
}

/// How a changed path maps onto the source table
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    /// A whole root changed; rescan it
    Root(usize),
    /// A single document (which may no longer exist)
    Source(SourceKey),
    Outside,
}

/// Skills registry managing one or more corpus roots
#[derive(Debug, Clone)]
pub struct SkillRegistry {
    /// Skills directories to scan, in precedence order
    directories: Vec<PathBuf>,
    options: RegistryOptions,
}

/// Build a snapshot of a single corpus root with default options
pub fn build(corpus_root: impl Into<PathBuf>) -> Result<RegistrySnapshot, CorpusUnavailable> {
    SkillRegistry::new(RegistryOptions::default())
        .add_directory(corpus_root)
        .build()
}

impl SkillRegistry {
    /// Create a registry without any directories
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            directories: Vec::new(),
            options,
        }
    }

    /// Add a skills directory to scan
    pub fn add_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    /// Corpus roots in precedence order
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Scan every configured directory and build a fresh snapshot.
    ///
    /// A missing or unreadable root is fatal; broken documents are not.
    pub fn build(&self) -> Result<RegistrySnapshot, CorpusUnavailable> {
        info!(
            "Starting skills scan in {} directories",
            self.directories.len()
        );

        let mut sources = BTreeMap::new();
        for (root, dir) in self.directories.iter().enumerate() {
            self.scan_root(root, dir, &mut sources)?;
        }

        let snapshot = RegistrySnapshot::assemble(sources, None);
        info!(
            "Registered {} skills from {} documents ({} excluded)",
            snapshot.len(),
            snapshot.source_count(),
            snapshot.diagnostics().len()
        );
        Ok(snapshot)
    }

    /// Re-read only `changed` paths and derive a new snapshot from `previous`.
    ///
    /// The result is identical to what [`SkillRegistry::build`] would return
    /// for the same file-system state, as long as every modified document is
    /// covered by `changed`.
    pub fn refresh(
        &self,
        previous: &RegistrySnapshot,
        changed: &[PathBuf],
    ) -> Result<RegistrySnapshot, CorpusUnavailable> {
        let mut roots = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for path in changed {
            match self.classify(path) {
                Change::Root(root) => {
                    roots.insert(root);
                }
                Change::Source(key) => {
                    keys.insert(key);
                }
                Change::Outside => debug!("Ignoring change outside corpus: {:?}", path),
            }
        }

        let mut sources = previous.sources.clone();

        for &root in &roots {
            debug!("Rescanning root {:?}", self.directories[root]);
            sources.retain(|key, _| key.root != root);
            self.scan_root(root, &self.directories[root], &mut sources)?;
        }

        let mut checked_roots = BTreeSet::new();
        for key in keys.into_iter().filter(|k| !roots.contains(&k.root)) {
            let dir = &self.directories[key.root];
            if checked_roots.insert(key.root) {
                check_root(dir)?;
            }

            let path = dir.join(&key.relative);
            if !path.is_file() {
                if sources.remove(&key).is_some() {
                    debug!("Skill document removed: {:?}", path);
                }
                continue;
            }

            let content = fs::read_to_string(&path);
            if let (Ok(text), Some(existing)) = (&content, sources.get(&key)) {
                if existing.hash.as_deref() == Some(content_hash(text).as_str()) {
                    debug!("Skill document unchanged: {:?}", path);
                    continue;
                }
            }

            let entry = self.parse_source(&key, path, content);
            sources.insert(key, entry);
        }

        let snapshot = RegistrySnapshot::assemble(sources, Some(previous));
        let delta = snapshot.delta();
        info!(
            "Registry refreshed: generation {}, +{} ~{} -{}",
            snapshot.generation(),
            delta.added.len(),
            delta.updated.len(),
            delta.removed.len()
        );
        Ok(snapshot)
    }

    /// Scan a single root, adding every candidate document to `sources`
    fn scan_root(
        &self,
        root: usize,
        dir: &Path,
        sources: &mut BTreeMap<SourceKey, SourceEntry>,
    ) -> Result<(), CorpusUnavailable> {
        check_root(dir)?;

        let entries = fs::read_dir(dir).map_err(|e| unavailable(dir, &e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(dir, &e))?;
            paths.push(entry.path());
        }
        paths.sort();

        for path in paths {
            let Some(relative) = candidate_document(&path) else {
                continue;
            };
            let key = SourceKey { root, relative };
            let document = dir.join(&key.relative);
            let content = fs::read_to_string(&document);
            let entry = self.parse_source(&key, document, content);
            sources.insert(key, entry);
        }

        Ok(())
    }

    fn parse_source(
        &self,
        key: &SourceKey,
        path: PathBuf,
        content: io::Result<String>,
    ) -> SourceEntry {
        let id = skill_id(&key.relative);
        match content {
            Ok(text) => {
                let hash = content_hash(&text);
                let outcome = Skill::from_document(id.clone(), &path, &text, self.options.size_unit)
                    .map(Arc::new);
                if outcome.is_ok() {
                    debug!("Discovered skill: {} at {:?}", id, path);
                }
                SourceEntry {
                    id,
                    path,
                    hash: Some(hash),
                    outcome,
                }
            }
            Err(e) => SourceEntry {
                id,
                path,
                hash: None,
                outcome: Err(MetadataError::Unreadable(e.to_string())),
            },
        }
    }

    /// Map a changed path onto a root rescan or a single source row
    fn classify(&self, path: &Path) -> Change {
        for (root, dir) in self.directories.iter().enumerate() {
            let Some(relative) = relative_to(dir, path) else {
                continue;
            };

            let mut components = relative.components();
            let Some(first) = components.next() else {
                return Change::Root(root);
            };
            let first = PathBuf::from(first.as_os_str());

            let relative = if components.next().is_none() && is_flat_document(&first) {
                first
            } else {
                first.join(SKILL_FILE)
            };
            if is_hidden(&relative) {
                return Change::Outside;
            }
            return Change::Source(SourceKey { root, relative });
        }
        Change::Outside
    }
}

fn unavailable(dir: &Path, error: &io::Error) -> CorpusUnavailable {
    CorpusUnavailable {
        path: dir.to_path_buf(),
        reason: error.to_string(),
    }
}

fn check_root(dir: &Path) -> Result<(), CorpusUnavailable> {
    let metadata = fs::metadata(dir).map_err(|e| unavailable(dir, &e))?;
    if !metadata.is_dir() {
        return Err(CorpusUnavailable {
            path: dir.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(())
}

/// Path of `path` below `dir`, also trying the canonical form of `dir`
fn relative_to(dir: &Path, path: &Path) -> Option<PathBuf> {
    if let Ok(relative) = path.strip_prefix(dir) {
        return Some(relative.to_path_buf());
    }
    let canonical = fs::canonicalize(dir).ok()?;
    path.strip_prefix(&canonical).ok().map(Path::to_path_buf)
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// `<id>.md` directly in a root; README files are not skills
fn is_flat_document(name: &Path) -> bool {
    let is_markdown = name.extension().is_some_and(|ext| ext == "md");
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    is_markdown && stem != "readme" && stem != "skill"
}

/// Relative document path for a root entry, if it is a skill candidate
fn candidate_document(path: &Path) -> Option<PathBuf> {
    let name = PathBuf::from(path.file_name()?);
    if is_hidden(&name) {
        return None;
    }
    if path.is_dir() {
        return path
            .join(SKILL_FILE)
            .is_file()
            .then(|| name.join(SKILL_FILE));
    }
    (path.is_file() && is_flat_document(&name)).then_some(name)
}

/// Skill id: directory name for `<id>/SKILL.md`, file stem for `<id>.md`
fn skill_id(relative: &Path) -> SkillId {
    let is_skill_file = relative.file_name().is_some_and(|n| n == SKILL_FILE);
    let name = if is_skill_file {
        relative.parent().and_then(Path::file_name)
    } else {
        relative.file_stem()
    };
    SkillId::new(name.map(|n| n.to_string_lossy().into_owned()).unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use skillcast_types::Diagnostic;
    use tempfile::TempDir;

    fn write_skill(root: &Path, id: &str, description: &str, body: &str) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SKILL_FILE);
        fs::write(
            &path,
            format!("---\nname: {id}\ndescription: {description}\n---\n{body}"),
        )
        .unwrap();
        path
    }

    fn ids(snapshot: &RegistrySnapshot) -> Vec<String> {
        snapshot.ids().map(ToString::to_string).collect()
    }

    #[test]
    fn test_registry_new() {
        let registry = SkillRegistry::new(RegistryOptions::default());
        assert!(registry.directories().is_empty());
        let snapshot = registry.build().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = build(dir.path().join("missing")).unwrap_err();
        assert!(err.path.ends_with("missing"));
    }

    #[test]
    fn test_build_scans_folders_and_flat_files() {
        let dir = TempDir::new().unwrap();
        write_skill(dir.path(), "react", "React with hooks", "body");
        write_skill(dir.path(), "django-python", "Django and Python", "body");
        fs::write(
            dir.path().join("go.md"),
            "---\nname: go\ndescription: Go services\n---\nbody",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "# Corpus").unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();

        let snapshot = build(dir.path()).unwrap();
        assert_eq!(ids(&snapshot), vec!["django-python", "go", "react"]);
        assert!(snapshot.diagnostics().is_empty());
    }

    #[test]
    fn test_invalid_documents_are_excluded_not_fatal() {
        let dir = TempDir::new().unwrap();
        write_skill(dir.path(), "react", "React with hooks", "body");
        let broken = dir.path().join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(SKILL_FILE), "---\nname: broken\n---\nbody").unwrap();

        let snapshot = build(dir.path()).unwrap();
        assert_eq!(ids(&snapshot), vec!["react"]);
        assert_eq!(
            snapshot.diagnostics(),
            &[Diagnostic::Metadata {
                path: broken.join(SKILL_FILE),
                error: MetadataError::MissingField("description"),
            }]
        );
    }

    #[test]
    fn test_duplicate_ids_first_root_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let kept = write_skill(first.path(), "react", "Project react", "a");
        let rejected = write_skill(second.path(), "react", "Personal react", "b");

        let snapshot = SkillRegistry::new(RegistryOptions::default())
            .add_directory(first.path())
            .add_directory(second.path())
            .build()
            .unwrap();

        assert_eq!(snapshot.get("react").unwrap().description(), "Project react");
        match &snapshot.diagnostics()[0] {
            Diagnostic::Duplicate(d) => {
                assert_eq!(d.kept, kept);
                assert_eq!(d.rejected, rejected);
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn test_refresh_matches_full_rebuild() {
        let dir = TempDir::new().unwrap();
        let react = write_skill(dir.path(), "react", "React with hooks", "body");
        write_skill(dir.path(), "vue", "Vue composition API", "body");
        let registry = SkillRegistry::new(RegistryOptions::default()).add_directory(dir.path());
        let first = registry.build().unwrap();

        write_skill(dir.path(), "react", "React with hooks and JSX", "longer body");
        fs::remove_dir_all(dir.path().join("vue")).unwrap();
        let svelte = write_skill(dir.path(), "svelte", "Svelte stores", "body");

        let changed = vec![react, dir.path().join("vue"), svelte];
        let refreshed = registry.refresh(&first, &changed).unwrap();
        let rebuilt = registry.build().unwrap();

        assert_eq!(ids(&refreshed), ids(&rebuilt));
        assert_eq!(
            refreshed.get("react").unwrap().as_ref(),
            rebuilt.get("react").unwrap().as_ref()
        );
        assert_eq!(refreshed.delta().added, vec![SkillId::from("svelte")]);
        assert_eq!(refreshed.delta().updated, vec![SkillId::from("react")]);
        assert_eq!(refreshed.delta().removed, vec![SkillId::from("vue")]);
        assert_eq!(refreshed.generation(), first.generation() + 1);
    }

    #[test]
    fn test_refresh_unchanged_document_keeps_skill() {
        let dir = TempDir::new().unwrap();
        let react = write_skill(dir.path(), "react", "React with hooks", "body");
        let registry = SkillRegistry::new(RegistryOptions::default()).add_directory(dir.path());
        let first = registry.build().unwrap();

        let refreshed = registry.refresh(&first, &[react]).unwrap();
        assert!(refreshed.delta().is_empty());
        assert_eq!(refreshed.generation(), first.generation());
        assert!(Arc::ptr_eq(
            first.get("react").unwrap(),
            refreshed.get("react").unwrap()
        ));
    }

    #[test]
    fn test_refresh_promotes_shadowed_duplicate() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_skill(first.path(), "react", "Project react", "a");
        write_skill(second.path(), "react", "Personal react", "b");
        let registry = SkillRegistry::new(RegistryOptions::default())
            .add_directory(first.path())
            .add_directory(second.path());
        let before = registry.build().unwrap();

        fs::remove_dir_all(first.path().join("react")).unwrap();
        let after = registry
            .refresh(&before, &[first.path().join("react")])
            .unwrap();

        assert_eq!(after.get("react").unwrap().description(), "Personal react");
        assert!(after.diagnostics().is_empty());
        assert_eq!(after.delta().updated, vec![SkillId::from("react")]);
    }

    #[test]
    fn test_refresh_root_rescan_and_outside_paths() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let registry = SkillRegistry::new(RegistryOptions::default()).add_directory(dir.path());
        let first = registry.build().unwrap();

        write_skill(dir.path(), "rust", "Rust ownership", "body");
        write_skill(other.path(), "python", "Python typing", "body");
        let refreshed = registry
            .refresh(&first, &[dir.path().to_path_buf(), other.path().join("python")])
            .unwrap();

        assert_eq!(ids(&refreshed), vec!["rust"]);
    }

    #[test]
    fn test_refresh_fails_when_root_disappears() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("corpus");
        let react = write_skill(&root, "react", "React", "body");
        let registry = SkillRegistry::new(RegistryOptions::default()).add_directory(&root);
        let first = registry.build().unwrap();

        fs::remove_dir_all(&root).unwrap();
        assert!(registry.refresh(&first, &[react]).is_err());
    }

    #[test]
    fn test_skill_id_from_relative_path() {
        assert_eq!(skill_id(Path::new("react/SKILL.md")).as_str(), "react");
        assert_eq!(skill_id(Path::new("go.md")).as_str(), "go");
    }

    #[test]
    fn test_tokens_size_unit() {
        let dir = TempDir::new().unwrap();
        write_skill(dir.path(), "react", "React", "12345678");
        let snapshot = SkillRegistry::new(RegistryOptions {
            size_unit: SizeUnit::Tokens,
        })
        .add_directory(dir.path())
        .build()
        .unwrap();
        assert_eq!(snapshot.get("react").unwrap().size_estimate(), 2);
    }
}
