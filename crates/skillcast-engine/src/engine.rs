//! Skill engine façade
//!
//! Owns the registry snapshot, the evaluation pipeline and the activation
//! session. Context updates run one evaluation cycle each; file-system work
//! (build, refresh, content loads) runs on the blocking pool under the
//! configured timeout.

use serde::Serialize;
use skillcast_registry::{
    CorpusWatcher, RegistryDelta, RegistryOptions, RegistrySnapshot, SkillRegistry,
};
use skillcast_types::{
    ActivationDiff, ActivationSet, Diagnostic, OversizeSkill, SessionState, SuppressedSkill,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pipeline::{Evaluation, Pipeline};
use crate::selector::SelectionStrategy;
use crate::session::{CycleTicket, Provenance, SessionManager};
use crate::signals::{ContextSnapshot, ConversationState, ProjectState, SignalExtractor};

/// What one evaluation cycle published
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Epoch of the cycle
    pub epoch: u64,
    /// Membership changes against the previous set
    pub diff: ActivationDiff,
    /// Skills dropped by the supersedes relation
    pub suppressed: Vec<SuppressedSkill>,
    /// Skills larger than the whole budget
    pub oversize: Vec<OversizeSkill>,
    /// How the selection was computed
    pub strategy: SelectionStrategy,
    /// Registry generation evaluated
    pub registry_generation: u64,
    /// Fingerprint of the evaluated context
    pub context_fingerprint: String,
    /// Total size of the published set
    pub total_size: usize,
    /// Budget the set was selected under
    pub budget: usize,
}

/// Result of a context update
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The cycle ran to completion and its selection was published
    Applied(CycleReport),
    /// A newer context replaced this cycle; nothing was published
    Superseded {
        /// Epoch of the superseded cycle
        epoch: u64,
    },
    /// Same context and registry as the published set; nothing ran
    Unchanged,
}

impl CycleOutcome {
    /// The cycle published its selection
    pub fn is_applied(&self) -> bool {
        matches!(self, CycleOutcome::Applied(_))
    }

    /// A newer cycle replaced this one
    pub fn is_superseded(&self) -> bool {
        matches!(self, CycleOutcome::Superseded { .. })
    }

    /// Report of an applied cycle
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Applied(report) => Some(report),
            _ => None,
        }
    }
}

/// Result of a registry refresh
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Registry generation in service after the refresh
    pub generation: u64,
    /// Skills added, updated and removed
    pub delta: RegistryDelta,
    /// Re-evaluation of the last context, when the registry changed and a
    /// context was known
    pub cycle: Option<CycleOutcome>,
}

/// Background task feeding corpus changes into [`SkillEngine::refresh`]
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Ask the watcher task to stop
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait for the task to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Corpus watcher task failed: {}", e);
        }
    }
}

/// Inputs of a cycle, fixed when its ticket was issued
struct PendingCycle {
    ticket: CycleTicket,
    registry: Arc<RegistrySnapshot>,
    context: Arc<ContextSnapshot>,
    provenance: Provenance,
}

enum CycleStart {
    Run(PendingCycle),
    Unchanged,
}

/// Skill selection engine for one host session
#[derive(Debug)]
pub struct SkillEngine {
    config: EngineConfig,
    registry: SkillRegistry,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes refreshes
    refresh_lock: tokio::sync::Mutex<()>,
    extractor: SignalExtractor,
    pipeline: Pipeline,
    session: SessionManager,
    last_context: Mutex<Option<Arc<ContextSnapshot>>>,
    /// Suppressions and oversize skills of the last applied cycle
    cycle_diagnostics: Mutex<Vec<Diagnostic>>,
}

impl SkillEngine {
    /// Validate `config` and build the registry.
    ///
    /// A missing corpus root is fatal here.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = Pipeline::new(&config)?;
        let extractor = SignalExtractor::new(&config.signals);

        let registry = config.corpus.resolved_roots().into_iter().fold(
            SkillRegistry::new(RegistryOptions {
                size_unit: config.corpus.size_unit,
            }),
            |registry, root| registry.add_directory(root),
        );

        let builder = registry.clone();
        let snapshot = run_blocking("registry build", config.corpus.refresh_timeout(), move || {
            builder.build()
        })
        .await??;

        info!(
            "Skill engine started: {} skills (generation {}), budget {}",
            snapshot.len(),
            snapshot.generation(),
            pipeline.budget()
        );

        Ok(Self {
            config,
            registry,
            snapshot: RwLock::new(Arc::new(snapshot)),
            refresh_lock: tokio::sync::Mutex::new(()),
            extractor,
            pipeline,
            session: SessionManager::new(),
            last_context: Mutex::new(None),
            cycle_diagnostics: Mutex::new(Vec::new()),
        })
    }

    /// Start the engine and, when `corpus.watch` is set, its corpus watcher
    pub async fn launch(config: EngineConfig) -> Result<(Arc<Self>, Option<WatchHandle>)> {
        let watch = config.corpus.watch;
        let engine = Arc::new(Self::start(config).await?);
        let handle = if watch {
            Some(engine.spawn_watcher()?)
        } else {
            None
        };
        Ok((engine, handle))
    }

    /// Validated configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current registry snapshot
    pub fn registry(&self) -> Arc<RegistrySnapshot> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*snapshot)
    }

    /// Extract signals and run an evaluation cycle
    pub async fn update_context(
        &self,
        project: &ProjectState,
        conversation: &ConversationState,
    ) -> CycleOutcome {
        let context = self.extractor.extract(project, conversation);
        self.apply_context(context).await
    }

    /// Run an evaluation cycle for ready-made signals
    pub async fn apply_context(&self, context: ContextSnapshot) -> CycleOutcome {
        let start = {
            let mut last_context = lock(&self.last_context);
            let context = Arc::new(context);
            *last_context = Some(Arc::clone(&context));
            self.start_cycle(context)
        };
        self.run_cycle(start).await
    }

    /// Context of the most recent update, if any
    pub fn last_context(&self) -> Option<Arc<ContextSnapshot>> {
        lock(&self.last_context).clone()
    }

    /// Pin the inputs of a new cycle. Caller holds the `last_context` lock.
    ///
    /// Refresh publishes its snapshot before starting a cycle, so the
    /// latest epoch always evaluates the newest context and registry.
    fn start_cycle(&self, context: Arc<ContextSnapshot>) -> CycleStart {
        let registry = self.registry();
        let provenance = Provenance {
            registry_generation: registry.generation(),
            context_fingerprint: Some(context.fingerprint().to_string()),
        };
        if self.session.is_current(&provenance) {
            debug!("Context and registry unchanged, skipping evaluation");
            return CycleStart::Unchanged;
        }

        CycleStart::Run(PendingCycle {
            ticket: self.session.begin_cycle(),
            registry,
            context,
            provenance,
        })
    }

    async fn run_cycle(&self, start: CycleStart) -> CycleOutcome {
        let PendingCycle {
            ticket,
            registry,
            context,
            provenance,
        } = match start {
            CycleStart::Run(pending) => pending,
            CycleStart::Unchanged => return CycleOutcome::Unchanged,
        };

        let evaluation = match self.pipeline.evaluate_cycle(&registry, &context, &ticket).await {
            Ok(evaluation) => evaluation,
            Err(superseded) => {
                debug!("{}", superseded);
                return CycleOutcome::Superseded {
                    epoch: superseded.epoch,
                };
            }
        };

        match self
            .session
            .reconcile_cycle(&ticket, &evaluation.selection, provenance)
        {
            Ok(diff) => {
                *lock(&self.cycle_diagnostics) = evaluation.diagnostics();
                CycleOutcome::Applied(self.report(ticket.epoch(), diff, evaluation, &registry, &context))
            }
            Err(superseded) => {
                debug!("{}", superseded);
                CycleOutcome::Superseded {
                    epoch: superseded.epoch,
                }
            }
        }
    }

    fn report(
        &self,
        epoch: u64,
        diff: ActivationDiff,
        evaluation: Evaluation,
        registry: &RegistrySnapshot,
        context: &ContextSnapshot,
    ) -> CycleReport {
        CycleReport {
            epoch,
            diff,
            total_size: evaluation.selection.total_size(),
            budget: evaluation.selection.budget,
            strategy: evaluation.selection.strategy,
            oversize: evaluation.selection.oversize,
            suppressed: evaluation.suppressed,
            registry_generation: registry.generation(),
            context_fingerprint: context.fingerprint().to_string(),
        }
    }

    /// Evaluate `context` against `registry` without publishing anything
    pub fn evaluate(&self, registry: &RegistrySnapshot, context: &ContextSnapshot) -> Evaluation {
        self.pipeline.evaluate(registry, context)
    }

    /// Re-read `changed` paths and publish the new registry snapshot.
    ///
    /// When the registry changed, the last known context is evaluated again.
    pub async fn refresh(&self, changed: Vec<PathBuf>) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;
        let previous = self.registry();

        let registry = self.registry.clone();
        let base = Arc::clone(&previous);
        let next = run_blocking("registry refresh", self.config.corpus.refresh_timeout(), move || {
            registry.refresh(&base, &changed)
        })
        .await??;

        let generation = next.generation();
        let delta = next.delta().clone();
        if generation == previous.generation() {
            debug!("Registry refresh found no changes");
            return Ok(RefreshOutcome {
                generation,
                delta,
                cycle: None,
            });
        }

        debug!(
            "Publishing registry generation {} ({} skills changed)",
            generation,
            delta.len()
        );
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

        let start = {
            let last_context = lock(&self.last_context);
            last_context
                .as_ref()
                .map(|context| self.start_cycle(Arc::clone(context)))
        };
        let cycle = match start {
            Some(start) => Some(self.run_cycle(start).await),
            None => None,
        };
        Ok(RefreshOutcome {
            generation,
            delta,
            cycle,
        })
    }

    /// Load the full body of an active or registered skill.
    ///
    /// A document edited since the last refresh fails with
    /// [`EngineError::Content`] until the refresh has measured it again.
    pub async fn load_content(&self, id: &str) -> Result<String> {
        let skill = self
            .registry()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSkill(id.to_string()))?;

        run_blocking("content load", self.config.corpus.refresh_timeout(), move || {
            skill.load_body()
        })
        .await?
        .map_err(|e| EngineError::Content {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Last published activation set
    pub fn activation_set(&self) -> Arc<ActivationSet> {
        self.session.current()
    }

    /// Receiver notified on every activation set publication
    pub fn subscribe(&self) -> watch::Receiver<Arc<ActivationSet>> {
        self.session.subscribe()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The activation session
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Registry diagnostics followed by those of the last applied cycle
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = self.registry().diagnostics().to_vec();
        diagnostics.extend(lock(&self.cycle_diagnostics).iter().cloned());
        diagnostics
    }

    /// Watch the corpus roots and refresh on every debounced batch of changes
    pub fn spawn_watcher(self: &Arc<Self>) -> Result<WatchHandle> {
        let mut watcher = CorpusWatcher::new(self.registry.directories(), self.config.corpus.debounce())
            .map_err(|e| EngineError::Watch(e.to_string()))?;

        let engine = Arc::clone(self);
        let token = CancellationToken::new();
        let stop = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    batch = watcher.next_batch() => match batch {
                        Some(paths) => {
                            if let Err(e) = engine.refresh(paths).await {
                                warn!("Corpus refresh failed: {}", e);
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("Corpus watcher stopped");
        });

        Ok(WatchHandle { token, task })
    }
}

/// Run `work` on the blocking pool, bounded by `timeout`
async fn run_blocking<T, F>(operation: &'static str, timeout: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(EngineError::Task(e.to_string())),
        Err(_) => Err(EngineError::TimedOut {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let value = run_blocking("test", Duration::from_secs(5), || 42).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_blocking_times_out() {
        let result = run_blocking("slow work", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
        })
        .await;
        assert!(matches!(
            result,
            Err(EngineError::TimedOut { operation: "slow work", timeout_ms: 10 })
        ));
    }

    #[tokio::test]
    async fn test_start_fails_without_corpus() {
        let mut config = EngineConfig::default();
        config.corpus.roots = vec!["/nonexistent/skillcast/corpus".to_string()];
        let result = SkillEngine::start(config).await;
        assert!(matches!(result, Err(EngineError::CorpusUnavailable(_))));
    }

    #[test]
    fn test_cycle_outcome_helpers() {
        assert!(CycleOutcome::Superseded { epoch: 3 }.is_superseded());
        assert!(!CycleOutcome::Unchanged.is_applied());
        assert!(CycleOutcome::Unchanged.report().is_none());
    }
}
