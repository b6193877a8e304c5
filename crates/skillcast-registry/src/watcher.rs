//! Corpus watching
//!
//! Turns file-system events below the corpus roots into debounced batches
//! of changed paths, ready to be handed to [`SkillRegistry::refresh`].
//!
//! [`SkillRegistry::refresh`]: crate::SkillRegistry::refresh

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind, Debouncer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Debounced watcher over one or more corpus roots
pub struct CorpusWatcher {
    /// Kept alive for as long as events are wanted
    _debouncer: Debouncer<RecommendedWatcher>,
    batches: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    watched_dirs: Vec<PathBuf>,
}

impl CorpusWatcher {
    /// Start watching `roots` recursively
    pub fn new(roots: &[PathBuf], debounce: Duration) -> Result<Self, notify::Error> {
        let (batch_tx, batches) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let paths: BTreeSet<PathBuf> = events
                        .into_iter()
                        .filter(|e| e.kind == DebouncedEventKind::Any)
                        .map(|e| e.path)
                        .filter(|p| is_relevant(p))
                        .collect();
                    if paths.is_empty() {
                        return;
                    }
                    if let Err(e) = batch_tx.send(paths.into_iter().collect()) {
                        error!("Failed to forward corpus changes: {}", e);
                    }
                }
                Err(e) => error!("Corpus watcher error: {}", e),
            },
        )?;

        let mut watched_dirs = Vec::new();
        for root in roots {
            debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
            info!("Watching skills directory: {:?}", root);
            watched_dirs.push(root.clone());
        }

        Ok(Self {
            _debouncer: debouncer,
            batches,
            watched_dirs,
        })
    }

    /// Wait for the next batch of changed paths
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        let batch = self.batches.recv().await;
        if let Some(paths) = &batch {
            debug!("Corpus change batch with {} paths", paths.len());
        }
        batch
    }

    /// Take a pending batch without waiting
    pub fn try_next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.batches.try_recv().ok()
    }

    /// Roots being watched
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched_dirs
    }
}

/// Skip editor swap files and hidden entries
fn is_relevant(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    !(name.starts_with('.') || name.ends_with('~') || name.ends_with(".swp") || name.ends_with(".tmp"))
}
