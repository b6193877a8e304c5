//! Activation session management
//!
//! Owns the published [`ActivationSet`] and the `Idle → Evaluating →
//! Reconciling → Idle` lifecycle. Evaluation cycles are numbered; starting
//! a cycle cancels the one in flight, and only the latest cycle may publish.

use chrono::Utc;
use skillcast_types::{
    ActivationDiff, ActivationEntry, ActivationSet, DiffEntry, EvaluationSuperseded, SessionState,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::selector::Selection;

/// Where a published set came from; equal provenance means an equal set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    /// Registry generation the set was computed from
    pub registry_generation: u64,
    /// Fingerprint of the context, if any
    pub context_fingerprint: Option<String>,
}

/// State shared between the manager and its tickets
#[derive(Debug)]
struct Cycles {
    latest: AtomicU64,
    /// Epoch and cancellation token of the newest cycle
    inflight: Mutex<Option<(u64, CancellationToken)>>,
    state: watch::Sender<SessionState>,
}

impl Cycles {
    fn is_latest(&self, epoch: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == epoch
    }
}

/// Handle of one evaluation cycle
///
/// Dropping a ticket that never reconciled returns the session to idle,
/// unless a newer cycle has started meanwhile.
#[derive(Debug)]
pub struct CycleTicket {
    epoch: u64,
    token: CancellationToken,
    cycles: Arc<Cycles>,
    finished: AtomicBool,
}

impl CycleTicket {
    /// Epoch of this cycle
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Cancelled as soon as a newer cycle begins
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once a newer cycle has begun
    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled() || !self.cycles.is_latest(self.epoch)
    }

    /// Stage boundary check
    pub fn checkpoint(&self) -> Result<(), EvaluationSuperseded> {
        if self.is_superseded() {
            Err(EvaluationSuperseded { epoch: self.epoch })
        } else {
            Ok(())
        }
    }
}

impl Drop for CycleTicket {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        let mut inflight = lock(&self.cycles.inflight);
        if inflight.as_ref().is_some_and(|(epoch, _)| *epoch == self.epoch) {
            *inflight = None;
            self.cycles.state.send_replace(SessionState::Idle);
        }
    }
}

/// Single writer of the activation set
#[derive(Debug)]
pub struct SessionManager {
    cycles: Arc<Cycles>,
    /// Serializes diff + publish
    writer: Mutex<()>,
    published: watch::Sender<Arc<ActivationSet>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Idle session with an empty activation set
    pub fn new() -> Self {
        Self {
            cycles: Arc::new(Cycles {
                latest: AtomicU64::new(0),
                inflight: Mutex::new(None),
                state: watch::Sender::new(SessionState::Idle),
            }),
            writer: Mutex::new(()),
            published: watch::Sender::new(Arc::new(ActivationSet::empty())),
        }
    }

    /// Start a new evaluation cycle, cancelling the one in flight
    pub fn begin_cycle(&self) -> CycleTicket {
        let token = CancellationToken::new();
        let epoch = {
            let mut inflight = lock(&self.cycles.inflight);
            let epoch = self.cycles.latest.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((previous, previous_token)) = inflight.replace((epoch, token.clone())) {
                previous_token.cancel();
                debug!("Cycle {} superseded by cycle {}", previous, epoch);
            }
            epoch
        };
        self.cycles.state.send_replace(SessionState::Evaluating);

        CycleTicket {
            epoch,
            token,
            cycles: Arc::clone(&self.cycles),
            finished: AtomicBool::new(false),
        }
    }

    /// Publish `selection` if `ticket` is still the latest cycle
    pub fn reconcile_cycle(
        &self,
        ticket: &CycleTicket,
        selection: &Selection,
        provenance: Provenance,
    ) -> Result<ActivationDiff, EvaluationSuperseded> {
        let _writer = lock(&self.writer);
        ticket.checkpoint()?;

        self.cycles.state.send_replace(SessionState::Reconciling);
        let diff = self.apply(selection, provenance);
        ticket.finished.store(true, Ordering::SeqCst);

        let mut inflight = lock(&self.cycles.inflight);
        if inflight.as_ref().is_some_and(|(epoch, _)| *epoch == ticket.epoch) {
            *inflight = None;
            self.cycles.state.send_replace(SessionState::Idle);
        }
        Ok(diff)
    }

    /// Diff `selection` against the published set and publish the result.
    ///
    /// Reconciling the same selection twice yields an empty diff the second
    /// time.
    pub fn reconcile(&self, selection: &Selection) -> ActivationDiff {
        let _writer = lock(&self.writer);
        let provenance = {
            let current = self.published.borrow();
            Provenance {
                registry_generation: current.registry_generation,
                context_fingerprint: current.context_fingerprint.clone(),
            }
        };
        self.apply(selection, provenance)
    }

    /// Caller holds the writer lock
    fn apply(&self, selection: &Selection, provenance: Provenance) -> ActivationDiff {
        let current = self.current();
        let now = Utc::now();
        let previous: HashMap<&str, &ActivationEntry> = current
            .entries
            .iter()
            .map(|e| (e.skill_id.as_str(), e))
            .collect();

        let mut diff = ActivationDiff::default();
        let mut entries = Vec::with_capacity(selection.chosen.len());
        for candidate in &selection.chosen {
            let line = DiffEntry {
                skill_id: candidate.id().clone(),
                score: candidate.score,
            };
            let activated_at = match previous.get(candidate.id().as_str()) {
                Some(entry) => {
                    diff.unchanged.push(line);
                    entry.activated_at
                }
                None => {
                    diff.activated.push(line);
                    now
                }
            };
            entries.push(ActivationEntry {
                skill_id: candidate.id().clone(),
                score: candidate.score,
                size: candidate.size(),
                activated_at,
            });
        }

        let retained: BTreeSet<&str> = entries.iter().map(|e| e.skill_id.as_str()).collect();
        diff.deactivated = current
            .entries
            .iter()
            .filter(|e| !retained.contains(e.skill_id.as_str()))
            .map(|e| DiffEntry {
                skill_id: e.skill_id.clone(),
                score: e.score,
            })
            .collect();

        let unchanged_set = entries == current.entries
            && provenance.registry_generation == current.registry_generation
            && provenance.context_fingerprint == current.context_fingerprint;
        if !unchanged_set {
            let next = ActivationSet {
                generation: current.generation + 1,
                registry_generation: provenance.registry_generation,
                context_fingerprint: provenance.context_fingerprint,
                entries,
            };
            debug_assert!(next.total_size() <= selection.budget);
            self.published.send_replace(Arc::new(next));
        }

        if diff.is_empty() {
            debug!("Activation set reconciled without membership changes ({})", diff);
        } else {
            info!("Activation set reconciled: {}", diff);
        }
        diff
    }

    /// Last published activation set
    pub fn current(&self) -> Arc<ActivationSet> {
        self.published.borrow().clone()
    }

    /// Receiver notified on every publication
    pub fn subscribe(&self) -> watch::Receiver<Arc<ActivationSet>> {
        self.published.subscribe()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.cycles.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.cycles.state.subscribe()
    }

    /// Idle, and the published set already reflects `provenance`
    pub fn is_current(&self, provenance: &Provenance) -> bool {
        if self.state() != SessionState::Idle {
            return false;
        }
        let current = self.published.borrow();
        current.generation > 0
            && current.registry_generation == provenance.registry_generation
            && current.context_fingerprint == provenance.context_fingerprint
    }
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
