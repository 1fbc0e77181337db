//! Run status and node progress tracking.
//!
//! The [`ExecutionRegistry`] records each run's status and the progress of
//! its nodes. Status changes are published to [`TransitionObserver`]s after
//! the registry's own state has been committed, so an observer reacting to a
//! terminal transition sees every write that preceded it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fuschia_workflow::{NodeLocator, RunId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Completed,
  Error,
  Cancelled,
  Interrupted,
}

impl RunStatus {
  /// Whether no further progress is expected.
  pub fn is_terminal(self) -> bool {
    !matches!(self, RunStatus::Running)
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      RunStatus::Running => "running",
      RunStatus::Completed => "completed",
      RunStatus::Error => "error",
      RunStatus::Cancelled => "cancelled",
      RunStatus::Interrupted => "interrupted",
    };
    f.write_str(name)
  }
}

/// Execution state of a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  #[default]
  Idle,
  Running,
  Finished,
}

/// Progress of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
  pub state: NodeState,
  pub value: f64,
  pub max: f64,
}

impl ProgressState {
  pub fn running(value: f64, max: f64) -> Self {
    Self {
      state: NodeState::Running,
      value,
      max,
    }
  }

  pub fn finished(max: f64) -> Self {
    Self {
      state: NodeState::Finished,
      value: max,
      max,
    }
  }

  /// `value / max`, or `None` while `max` is not positive.
  pub fn fraction(&self) -> Option<f64> {
    (self.max > 0.0).then(|| self.value / self.max)
  }
}

/// A status change of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTransition {
  pub run_id: RunId,
  /// `None` when the run was first seen with this transition.
  pub from: Option<RunStatus>,
  pub to: RunStatus,
}

impl RunTransition {
  pub fn is_terminal(&self) -> bool {
    self.to.is_terminal()
  }
}

/// Receives run status transitions.
pub trait TransitionObserver: Send + Sync {
  fn on_transition(&self, transition: &RunTransition);
}

/// View of one node's execution, derived from its progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeExecutionView {
  /// The node is running and some run is active.
  pub executing: bool,
  pub progress: Option<f64>,
  pub progress_percentage: Option<u32>,
  pub execution_state: NodeState,
}

impl NodeExecutionView {
  fn new(progress: Option<ProgressState>, idle: bool) -> Self {
    let fraction = progress.and_then(|p| p.fraction());
    Self {
      executing: !idle && progress.is_some_and(|p| p.state == NodeState::Running),
      progress: fraction,
      progress_percentage: fraction.map(|f| (f * 100.0).round() as u32),
      execution_state: progress.map_or(NodeState::Idle, |p| p.state),
    }
  }
}

#[derive(Debug)]
struct RunExecution {
  status: RunStatus,
  progress: HashMap<NodeLocator, ProgressState>,
}

/// Per-run status and progress.
///
/// A run that reaches a terminal status is final: later status updates for
/// it are ignored, so each run publishes at most one terminal transition.
#[derive(Default)]
pub struct ExecutionRegistry {
  runs: RwLock<HashMap<RunId, RunExecution>>,
  observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
}

impl ExecutionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn read_runs(&self) -> RwLockReadGuard<'_, HashMap<RunId, RunExecution>> {
    self.runs.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write_runs(&self) -> RwLockWriteGuard<'_, HashMap<RunId, RunExecution>> {
    self.runs.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register an observer for every subsequent transition.
  pub fn subscribe(&self, observer: Arc<dyn TransitionObserver>) {
    self
      .observers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(observer);
  }

  /// Record a status for a run. Returns whether a transition was published.
  ///
  /// Setting the current status again, or any status on a run that already
  /// finished, changes nothing.
  pub fn set_status(&self, run_id: &RunId, status: RunStatus) -> bool {
    if run_id.is_empty() {
      warn!(status = %status, "status update without run id, skipping");
      return false;
    }

    let transition = {
      let mut runs = self.write_runs();
      let from = runs.get(run_id).map(|run| run.status);
      match from {
        Some(current) if current.is_terminal() => {
          debug!(run_id = %run_id, current = %current, status = %status, "run already finished, ignoring status");
          return false;
        }
        Some(current) if current == status => return false,
        _ => {}
      }

      let run = runs.entry(run_id.clone()).or_insert_with(|| RunExecution {
        status,
        progress: HashMap::new(),
      });
      run.status = status;
      if status.is_terminal() {
        run.progress.clear();
      }

      RunTransition {
        run_id: run_id.clone(),
        from,
        to: status,
      }
    };

    info!(run_id = %run_id, from = ?transition.from, to = %status, "run_status_changed");
    self.publish(&transition);
    true
  }

  fn publish(&self, transition: &RunTransition) {
    let observers = self
      .observers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    for observer in observers {
      observer.on_transition(transition);
    }
  }

  /// Record a node's progress. Only applies while the run is running.
  pub fn update_progress(&self, run_id: &RunId, locator: NodeLocator, progress: ProgressState) -> bool {
    let mut runs = self.write_runs();
    match runs.get_mut(run_id) {
      Some(run) if run.status == RunStatus::Running => {
        run.progress.insert(locator, progress);
        true
      }
      _ => {
        debug!(run_id = %run_id, locator = %locator, "progress for inactive run dropped");
        false
      }
    }
  }

  pub fn status(&self, run_id: &RunId) -> Option<RunStatus> {
    self.read_runs().get(run_id).map(|run| run.status)
  }

  pub fn progress(&self, run_id: &RunId, locator: &NodeLocator) -> Option<ProgressState> {
    self.read_runs().get(run_id)?.progress.get(locator).copied()
  }

  pub fn progress_states(&self, run_id: &RunId) -> HashMap<NodeLocator, ProgressState> {
    self
      .read_runs()
      .get(run_id)
      .map(|run| run.progress.clone())
      .unwrap_or_default()
  }

  /// True when no run is running.
  pub fn is_idle(&self) -> bool {
    !self
      .read_runs()
      .values()
      .any(|run| run.status == RunStatus::Running)
  }

  pub fn active_runs(&self) -> Vec<RunId> {
    self
      .read_runs()
      .iter()
      .filter(|(_, run)| run.status == RunStatus::Running)
      .map(|(run_id, _)| run_id.clone())
      .collect()
  }

  /// Execution view of one node. Without a run id there is no execution state.
  pub fn node_view(&self, run_id: Option<&RunId>, locator: &NodeLocator) -> NodeExecutionView {
    let progress = run_id.and_then(|run_id| self.progress(run_id, locator));
    NodeExecutionView::new(progress, self.is_idle())
  }
}

impl fmt::Debug for ExecutionRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionRegistry")
      .field("runs", &*self.read_runs())
      .finish_non_exhaustive()
  }
}
