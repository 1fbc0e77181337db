//! Run cleanup on terminal transitions.

use std::sync::Arc;

use fuschia_artifact::{OutputCache, ResourceManager};
use fuschia_workflow::RunId;
use tracing::info;

use crate::execution::{ExecutionRegistry, RunTransition, TransitionObserver};

/// Drops a run's cached outputs and releases its resources once the run
/// reaches a terminal status.
///
/// Cleanup is idempotent and also seals the run: outputs or previews that
/// arrive for it afterwards are discarded instead of recreating its scope.
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
  outputs: OutputCache,
  resources: ResourceManager,
}

impl LifecycleCoordinator {
  pub fn new(outputs: OutputCache, resources: ResourceManager) -> Self {
    Self { outputs, resources }
  }

  /// Create a coordinator and subscribe it to `registry`'s transitions.
  pub fn subscribe(registry: &ExecutionRegistry, outputs: OutputCache, resources: ResourceManager) -> Arc<Self> {
    let coordinator = Arc::new(Self::new(outputs, resources));
    registry.subscribe(coordinator.clone());
    coordinator
  }

  /// Remove every output and release every resource of `run_id`.
  pub fn cleanup(&self, run_id: &RunId) {
    let had_outputs = self.outputs.remove_run(run_id);
    let released = self.resources.revoke_run(run_id);
    info!(run_id = %run_id, had_outputs, released, "run_cleaned_up");
  }
}

impl TransitionObserver for LifecycleCoordinator {
  fn on_transition(&self, transition: &RunTransition) {
    if transition.is_terminal() {
      self.cleanup(&transition.run_id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::execution::RunStatus;
  use fuschia_artifact::{CallbackHandle, OutputRecord, ResultFolder};
  use fuschia_workflow::NodeLocator;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn counted(id: &str, count: &Arc<AtomicUsize>) -> fuschia_artifact::BoxedHandle {
    let count = count.clone();
    CallbackHandle::boxed(id, move || {
      count.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn test_terminal_transition_cleans_up_run() {
    let registry = ExecutionRegistry::new();
    let outputs = OutputCache::new();
    let resources = ResourceManager::new(Duration::from_millis(400));
    LifecycleCoordinator::subscribe(&registry, outputs.clone(), resources.clone());

    let p1 = RunId::new("p1");
    let p2 = RunId::new("p2");
    let locator = NodeLocator::new("5");
    let released = Arc::new(AtomicUsize::new(0));

    registry.set_status(&p1, RunStatus::Running);
    registry.set_status(&p2, RunStatus::Running);
    outputs.set(&p1, locator.clone(), OutputRecord::from_filenames(&["a.png"], ResultFolder::Output, false));
    outputs.set(&p2, locator.clone(), OutputRecord::from_filenames(&["b.png"], ResultFolder::Output, false));
    resources.attach(&p1, locator.clone(), vec![counted("h1", &released)]);
    resources.attach(&p2, locator.clone(), vec![counted("h2", &released)]);

    registry.set_status(&p1, RunStatus::Error);

    assert_eq!(outputs.get(&p1, &locator), None);
    assert_eq!(resources.live_count(&p1), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(outputs.get(&p2, &locator).is_some());
    assert_eq!(resources.live_count(&p2), 1);
  }

  #[test]
  fn test_repeated_terminal_transition_releases_once() {
    let outputs = OutputCache::new();
    let resources = ResourceManager::new(Duration::from_millis(400));
    let coordinator = LifecycleCoordinator::new(outputs.clone(), resources.clone());

    let p1 = RunId::new("p1");
    let locator = NodeLocator::new("5");
    let released = Arc::new(AtomicUsize::new(0));
    outputs.set(&p1, locator.clone(), OutputRecord::from_filenames(&["a.png"], ResultFolder::Output, false));
    resources.attach(&p1, locator.clone(), vec![counted("h1", &released), counted("h2", &released)]);

    let transition = RunTransition {
      run_id: p1.clone(),
      from: Some(RunStatus::Running),
      to: RunStatus::Completed,
    };
    coordinator.on_transition(&transition);
    coordinator.on_transition(&transition);

    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(outputs.get(&p1, &locator), None);
    assert_eq!(resources.live_count(&p1), 0);
    assert!(outputs.is_sealed(&p1));
    assert!(resources.is_sealed(&p1));
  }

  #[test]
  fn test_running_transition_keeps_run() {
    let outputs = OutputCache::new();
    let coordinator = LifecycleCoordinator::new(outputs.clone(), ResourceManager::default());
    let p1 = RunId::new("p1");
    outputs.set(&p1, NodeLocator::new("5"), OutputRecord::from_filenames(&["a.png"], ResultFolder::Output, false));

    coordinator.on_transition(&RunTransition {
      run_id: p1.clone(),
      from: None,
      to: RunStatus::Running,
    });

    assert!(outputs.get(&p1, &NodeLocator::new("5")).is_some());
    assert!(!outputs.is_sealed(&p1));
  }
}
