//! Releasable resource tracking.
//!
//! The [`ResourceManager`] owns the handles attached to each node locator of
//! each run until it releases them. A handle is released exactly once, by
//! whichever comes first:
//!
//! - a scheduled (debounced) revocation firing,
//! - an explicit revoke of its locator, subtree or run,
//! - a fresh `attach` superseding it,
//! - the last clone of the manager being dropped.
//!
//! Handles are moved out of the table before `release` is called, so every
//! other path finds nothing left to release.
//!
//! Scheduled revocations are single-shot timers on the tokio runtime, one slot
//! per locator. Arming a new one cancels the previous one, and so does new
//! data arriving for the locator. A timer that fires after its slot was
//! cleared or re-armed checks its generation and does nothing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use fuschia_workflow::{NodeLocator, RunId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::handle::BoxedHandle;

/// Debounce applied by [`ResourceManager::schedule_revoke`] unless configured otherwise.
pub const DEFAULT_REVOKE_DELAY: Duration = Duration::from_millis(400);

#[derive(Debug)]
struct PendingRevocation {
  generation: u64,
  cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RunResources {
  handles: HashMap<NodeLocator, Vec<BoxedHandle>>,
  pending: HashMap<NodeLocator, PendingRevocation>,
}

impl RunResources {
  fn cancel_pending(&mut self, locator: &NodeLocator) {
    if let Some(pending) = self.pending.remove(locator) {
      pending.cancel.cancel();
    }
  }

  /// Cancel the locator's timer and take its handles.
  fn take(&mut self, locator: &NodeLocator) -> Vec<BoxedHandle> {
    self.cancel_pending(locator);
    self.handles.remove(locator).unwrap_or_default()
  }

  fn is_empty(&self) -> bool {
    self.handles.is_empty() && self.pending.is_empty()
  }

  /// Cancel every timer and take every handle.
  fn drain(self) -> Vec<BoxedHandle> {
    for pending in self.pending.values() {
      pending.cancel.cancel();
    }
    self.handles.into_values().flatten().collect()
  }
}

#[derive(Debug, Default)]
struct ResourceState {
  scopes: HashMap<RunId, RunResources>,
  /// Runs whose scope was revoked. New handles for them are released on arrival.
  sealed: HashSet<RunId>,
  next_generation: u64,
}

impl ResourceState {
  fn accepts(&self, run_id: &RunId) -> bool {
    !run_id.is_empty() && !self.sealed.contains(run_id)
  }

  /// Forget a run's scope once it holds neither handles nor timers.
  fn prune(&mut self, run_id: &RunId) {
    if self.scopes.get(run_id).is_some_and(RunResources::is_empty) {
      self.scopes.remove(run_id);
    }
  }
}

impl Drop for ResourceState {
  fn drop(&mut self) {
    for (run_id, scope) in std::mem::take(&mut self.scopes) {
      let released = release_handles(&run_id, scope.drain());
      if released > 0 {
        debug!(run_id = %run_id, released, "resources released on drop");
      }
    }
  }
}

fn lock(state: &Mutex<ResourceState>) -> MutexGuard<'_, ResourceState> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release_handles(run_id: &RunId, handles: Vec<BoxedHandle>) -> usize {
  let count = handles.len();
  for handle in handles {
    debug!(run_id = %run_id, handle_id = handle.id(), "resource_released");
    handle.release();
  }
  count
}

/// Per-run mapping from node locator to the resource handles it owns.
///
/// Cheap to clone; clones share the same table. Handles are always released
/// after the internal lock is dropped.
#[derive(Debug, Clone)]
pub struct ResourceManager {
  state: Arc<Mutex<ResourceState>>,
  revoke_delay: Duration,
  diagnostics: Diagnostics,
}

impl Default for ResourceManager {
  fn default() -> Self {
    Self::new(DEFAULT_REVOKE_DELAY)
  }
}

impl ResourceManager {
  /// Create a manager whose scheduled revocations wait `revoke_delay`.
  pub fn new(revoke_delay: Duration) -> Self {
    Self::with_diagnostics(revoke_delay, Diagnostics::default())
  }

  pub fn with_diagnostics(revoke_delay: Duration, diagnostics: Diagnostics) -> Self {
    Self {
      state: Arc::default(),
      revoke_delay,
      diagnostics,
    }
  }

  pub fn revoke_delay(&self) -> Duration {
    self.revoke_delay
  }

  fn lock(&self) -> MutexGuard<'_, ResourceState> {
    lock(&self.state)
  }

  fn scope_missing(&self, operation: &'static str, run_id: &RunId) {
    self.diagnostics.emit(Diagnostic::ScopeMissing {
      operation,
      run_id: run_id.clone(),
    });
  }

  /// Attach `handles` to a locator, replacing its current set.
  ///
  /// Handles previously attached there are released immediately, and any
  /// pending revocation for the locator is cancelled. If the run has no active
  /// scope the incoming handles are released on the spot.
  pub fn attach(&self, run_id: &RunId, locator: NodeLocator, handles: Vec<BoxedHandle>) {
    let mut state = self.lock();
    if !state.accepts(run_id) {
      drop(state);
      self.scope_missing("attach", run_id);
      release_handles(run_id, handles);
      return;
    }

    let scope = state.scopes.entry(run_id.clone()).or_default();
    scope.cancel_pending(&locator);
    let previous = if handles.is_empty() {
      scope.handles.remove(&locator)
    } else {
      scope.handles.insert(locator.clone(), handles)
    };
    state.prune(run_id);
    drop(state);

    if let Some(previous) = previous {
      let released = release_handles(run_id, previous);
      debug!(run_id = %run_id, locator = %locator, released, "superseded previews released");
    }
  }

  /// Schedule revocation of a locator's handles after the configured delay.
  pub fn schedule_revoke(&self, run_id: &RunId, locator: NodeLocator) {
    self.schedule_revoke_after(run_id, locator, self.revoke_delay);
  }

  /// Schedule revocation of a locator's handles after `delay`.
  ///
  /// Cancels any revocation already pending for the locator. When the timer
  /// fires it releases whatever handles the locator holds at that moment. A
  /// locator without handles has nothing to revoke, so no timer is armed.
  /// Outside a tokio runtime there is nothing to drive the timer, so the
  /// handles are released immediately.
  pub fn schedule_revoke_after(&self, run_id: &RunId, locator: NodeLocator, delay: Duration) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      warn!(run_id = %run_id, locator = %locator, "no async runtime for deferred revocation, revoking now");
      self.revoke_now(run_id, &locator);
      return;
    };

    let mut state = self.lock();
    if !state.accepts(run_id) {
      drop(state);
      self.scope_missing("schedule_revoke", run_id);
      return;
    }

    let Some(scope) = state.scopes.get_mut(run_id) else {
      return;
    };
    scope.cancel_pending(&locator);
    if !scope.handles.contains_key(&locator) {
      state.prune(run_id);
      return;
    }

    state.next_generation += 1;
    let generation = state.next_generation;
    let cancel = CancellationToken::new();

    let Some(scope) = state.scopes.get_mut(run_id) else {
      return;
    };
    scope.pending.insert(
      locator.clone(),
      PendingRevocation {
        generation,
        cancel: cancel.clone(),
      },
    );
    drop(state);

    let table = Arc::downgrade(&self.state);
    let diagnostics = self.diagnostics.clone();
    let run_id = run_id.clone();
    runtime.spawn(async move {
      tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
          fire_revocation(&table, &diagnostics, &run_id, &locator, generation);
        }
      }
    });
  }

  /// Cancel any pending revocation and release the locator's handles now.
  ///
  /// Returns the number of handles released.
  pub fn revoke_now(&self, run_id: &RunId, locator: &NodeLocator) -> usize {
    if run_id.is_empty() {
      self.scope_missing("revoke_now", run_id);
      return 0;
    }
    let mut state = self.lock();
    let handles = state
      .scopes
      .get_mut(run_id)
      .map(|scope| scope.take(locator))
      .unwrap_or_default();
    state.prune(run_id);
    drop(state);
    release_handles(run_id, handles)
  }

  /// Release a container's handles and those of its direct children.
  ///
  /// Only the listed locators are touched; nested containers' own children
  /// are left alone.
  pub fn revoke_subtree(
    &self,
    run_id: &RunId,
    container: &NodeLocator,
    children: &[NodeLocator],
  ) -> usize {
    if run_id.is_empty() {
      self.scope_missing("revoke_subtree", run_id);
      return 0;
    }
    let mut state = self.lock();
    let Some(scope) = state.scopes.get_mut(run_id) else {
      return 0;
    };
    let handles: Vec<BoxedHandle> = std::iter::once(container)
      .chain(children)
      .flat_map(|locator| scope.take(locator))
      .collect();
    state.prune(run_id);
    drop(state);
    release_handles(run_id, handles)
  }

  /// Release every handle of a run, cancel its timers and close its scope.
  ///
  /// Later attaches for the run release their handles immediately. Idempotent.
  pub fn revoke_run(&self, run_id: &RunId) -> usize {
    let mut state = self.lock();
    if !run_id.is_empty() {
      state.sealed.insert(run_id.clone());
    }
    let scope = state.scopes.remove(run_id);
    drop(state);

    let Some(scope) = scope else {
      return 0;
    };
    let released = release_handles(run_id, scope.drain());
    info!(run_id = %run_id, released, "run_resources_revoked");
    released
  }

  /// Release every handle of a run and cancel its timers, keeping the scope open.
  pub fn reset_run(&self, run_id: &RunId) -> usize {
    let scope = self.lock().scopes.remove(run_id);
    scope.map_or(0, |scope| release_handles(run_id, scope.drain()))
  }

  /// [`revoke_run`](Self::revoke_run) for every run. Used for global teardown.
  pub fn revoke_all(&self) -> usize {
    let run_ids: Vec<RunId> = self.lock().scopes.keys().cloned().collect();
    run_ids.iter().map(|run_id| self.revoke_run(run_id)).sum()
  }

  /// Ids of the handles a locator currently holds.
  pub fn handle_ids(&self, run_id: &RunId, locator: &NodeLocator) -> Option<Vec<String>> {
    let state = self.lock();
    let handles = state.scopes.get(run_id)?.handles.get(locator)?;
    Some(handles.iter().map(|handle| handle.id().to_string()).collect())
  }

  /// Whether a revocation is armed for a locator.
  pub fn is_pending(&self, run_id: &RunId, locator: &NodeLocator) -> bool {
    self
      .lock()
      .scopes
      .get(run_id)
      .is_some_and(|scope| scope.pending.contains_key(locator))
  }

  /// Number of unreleased handles held for a run.
  pub fn live_count(&self, run_id: &RunId) -> usize {
    self
      .lock()
      .scopes
      .get(run_id)
      .map_or(0, |scope| scope.handles.values().map(Vec::len).sum())
  }

  pub fn is_sealed(&self, run_id: &RunId) -> bool {
    self.lock().sealed.contains(run_id)
  }

  /// Runs that currently hold handles or pending revocations.
  pub fn run_ids(&self) -> Vec<RunId> {
    self.lock().scopes.keys().cloned().collect()
  }

  /// Locators of a run that currently hold handles.
  pub fn locators(&self, run_id: &RunId) -> Vec<NodeLocator> {
    self
      .lock()
      .scopes
      .get(run_id)
      .map(|scope| scope.handles.keys().cloned().collect())
      .unwrap_or_default()
  }
}

/// Timer callback. Acts only if the slot still holds this timer's generation.
fn fire_revocation(
  table: &Weak<Mutex<ResourceState>>,
  diagnostics: &Diagnostics,
  run_id: &RunId,
  locator: &NodeLocator,
  generation: u64,
) {
  // Manager dropped; dropping the table released its handles.
  let Some(table) = table.upgrade() else {
    return;
  };

  let mut state = lock(&table);
  let handles = state.scopes.get_mut(run_id).and_then(|scope| {
    let current = scope
      .pending
      .get(locator)
      .is_some_and(|pending| pending.generation == generation);
    if !current {
      return None;
    }
    scope.pending.remove(locator);
    Some(scope.handles.remove(locator).unwrap_or_default())
  });
  state.prune(run_id);
  drop(state);

  match handles {
    Some(handles) => {
      let released = release_handles(run_id, handles);
      debug!(run_id = %run_id, locator = %locator, released, "scheduled_revocation_fired");
    }
    None => diagnostics.emit(Diagnostic::StaleTimer {
      run_id: run_id.clone(),
      locator: locator.clone(),
    }),
  }
}
