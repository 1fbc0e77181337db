//! The artifact engine.
//!
//! Wires locator resolution, the execution registry, the output cache and the
//! resource manager together, and applies [`ExecutionEvent`]s to them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use fuschia_artifact::{
  BoxedHandle, Diagnostic, Diagnostics, OutputCache, OutputRecord, ResourceHandle, ResourceManager,
};
use fuschia_config::CacheConfig;
use fuschia_workflow::{ExecutionId, GraphScope, LocatorResolver, NodeLocator, RunId, Topology};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::execution::{ExecutionRegistry, NodeExecutionView, ProgressState, RunStatus};
use crate::lifecycle::LifecycleCoordinator;

/// What a node should display: live previews win over stored output images.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
  /// Ids of the preview handles currently attached to the node.
  Previews(Vec<String>),
  /// The `images` entries of the node's cached output.
  Outputs(Vec<Value>),
}

/// Point-in-time view of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
  pub run_id: RunId,
  pub status: Option<RunStatus>,
  pub outputs: BTreeMap<NodeLocator, OutputRecord>,
  pub previews: BTreeMap<NodeLocator, Vec<String>>,
  pub progress: BTreeMap<NodeLocator, ProgressState>,
}

/// Run-scoped artifact bookkeeping for one workflow topology.
pub struct ArtifactEngine<T: Topology> {
  resolver: RwLock<LocatorResolver<T>>,
  registry: ExecutionRegistry,
  outputs: OutputCache,
  resources: ResourceManager,
  coordinator: Arc<LifecycleCoordinator>,
  diagnostics: Diagnostics,
}

impl<T: Topology> ArtifactEngine<T> {
  pub fn new(config: &CacheConfig, topology: T) -> Self {
    Self::with_diagnostics(config, topology, Diagnostics::default())
  }

  pub fn with_diagnostics(config: &CacheConfig, topology: T, diagnostics: Diagnostics) -> Self {
    let outputs = OutputCache::with_diagnostics(diagnostics.clone());
    let resources = ResourceManager::with_diagnostics(config.revoke_delay(), diagnostics.clone());
    let registry = ExecutionRegistry::new();
    let coordinator = LifecycleCoordinator::subscribe(&registry, outputs.clone(), resources.clone());

    Self {
      resolver: RwLock::new(LocatorResolver::new(topology)),
      registry,
      outputs,
      resources,
      coordinator,
      diagnostics,
    }
  }

  fn resolver(&self) -> RwLockReadGuard<'_, LocatorResolver<T>> {
    self.resolver.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn registry(&self) -> &ExecutionRegistry {
    &self.registry
  }

  pub fn outputs(&self) -> &OutputCache {
    &self.outputs
  }

  pub fn resources(&self) -> &ResourceManager {
    &self.resources
  }

  /// Swap the topology snapshot used for resolution.
  ///
  /// Cached entries keyed by locators that no longer exist stay until their
  /// run is cleaned up; new events for removed nodes stop resolving.
  pub fn set_topology(&self, topology: T) {
    *self.resolver.write().unwrap_or_else(PoisonError::into_inner) = LocatorResolver::new(topology);
    info!("topology_updated");
  }

  pub fn resolve_node(&self, scope: &GraphScope, node_id: &str) -> Option<NodeLocator> {
    self.resolver().resolve_node(scope, node_id)
  }

  fn resolve(&self, run_id: &RunId, execution_id: &ExecutionId) -> Option<NodeLocator> {
    let locator = self.resolver().resolve_execution_id(execution_id);
    if locator.is_none() {
      self.diagnostics.emit(Diagnostic::UnresolvedLocator {
        run_id: run_id.clone(),
        id: execution_id.to_string(),
      });
    }
    locator
  }

  /// Apply one execution event.
  pub fn handle(&self, event: ExecutionEvent) {
    trace!(run_id = %event.run_id(), kind = event.kind(), "handling execution event");
    match event {
      ExecutionEvent::Output {
        run_id,
        execution_id,
        output,
        merge,
      } => {
        let Some(locator) = self.resolve(&run_id, &execution_id) else {
          return;
        };
        if merge {
          self.outputs.merge_append(&run_id, locator, output);
        } else {
          self.outputs.set(&run_id, locator, output);
        }
      }
      ExecutionEvent::Preview {
        run_id,
        execution_id,
        handles,
      } => match self.resolve(&run_id, &execution_id) {
        Some(locator) => self.resources.attach(&run_id, locator, handles),
        None => release_unowned(&run_id, handles),
      },
      ExecutionEvent::Executed { run_id, execution_id } => {
        if let Some(locator) = self.resolve(&run_id, &execution_id) {
          self.resources.schedule_revoke(&run_id, locator);
        }
      }
      ExecutionEvent::Progress {
        run_id,
        execution_id,
        progress,
      } => {
        if let Some(locator) = self.resolve(&run_id, &execution_id) {
          self.registry.update_progress(&run_id, locator, progress);
        }
      }
      ExecutionEvent::Status { run_id, status } => {
        self.registry.set_status(&run_id, status);
      }
    }
  }

  /// Drop a node's cached output and release its previews.
  ///
  /// Returns whether the node had an output.
  pub fn remove_node_outputs(&self, run_id: &RunId, scope: &GraphScope, node_id: &str) -> bool {
    let Some(locator) = self.resolve_node(scope, node_id) else {
      self.diagnostics.emit(Diagnostic::UnresolvedLocator {
        run_id: run_id.clone(),
        id: NodeLocator::for_node(scope, node_id).to_string(),
      });
      return false;
    };
    let had_output = self.outputs.remove(run_id, &locator);
    self.resources.revoke_now(run_id, &locator);
    had_output
  }

  /// Release the previews of a container node and its direct children.
  ///
  /// A locator that is not a container only has its own previews released.
  pub fn revoke_subgraph_previews(&self, run_id: &RunId, container: &NodeLocator) -> usize {
    let subtree = self.resolver().subtree(container);
    match subtree {
      Some(subtree) => self.resources.revoke_subtree(run_id, &subtree.container, &subtree.children),
      None => self.resources.revoke_now(run_id, container),
    }
  }

  /// Clear a run's outputs and previews while it keeps running.
  pub fn reset_run(&self, run_id: &RunId) -> usize {
    self.outputs.reset_run(run_id);
    let released = self.resources.reset_run(run_id);
    debug!(run_id = %run_id, released, "run_reset");
    released
  }

  /// Clean up a run without waiting for a terminal status.
  pub fn cleanup_run(&self, run_id: &RunId) {
    self.coordinator.cleanup(run_id);
  }

  /// Release every resource of every run and clear all outputs.
  ///
  /// Every run known to either store is sealed in both, so nothing written
  /// afterwards is kept.
  pub fn teardown(&self) -> usize {
    let output_runs = self.outputs.run_ids();
    let resource_runs = self.resources.run_ids();

    let released = self.resources.revoke_all();
    self.outputs.clear_all();
    for run_id in &output_runs {
      self.resources.revoke_run(run_id);
    }
    for run_id in &resource_runs {
      self.outputs.remove_run(run_id);
    }

    info!(released, "artifact_engine_teardown");
    released
  }

  pub fn image_sources(&self, run_id: &RunId, locator: &NodeLocator) -> Option<ImageSource> {
    match self.resources.handle_ids(run_id, locator) {
      Some(ids) if !ids.is_empty() => return Some(ImageSource::Previews(ids)),
      _ => {}
    }
    let record = self.outputs.get(run_id, locator)?;
    match record.images() {
      Some(images) if !images.is_empty() => Some(ImageSource::Outputs(images.clone())),
      _ => None,
    }
  }

  pub fn node_view(&self, run_id: Option<&RunId>, locator: &NodeLocator) -> NodeExecutionView {
    self.registry.node_view(run_id, locator)
  }

  pub fn snapshot(&self, run_id: &RunId) -> RunSnapshot {
    let previews = self
      .resources
      .locators(run_id)
      .into_iter()
      .filter_map(|locator| {
        let ids = self.resources.handle_ids(run_id, &locator)?;
        Some((locator, ids))
      })
      .collect();

    RunSnapshot {
      run_id: run_id.clone(),
      status: self.registry.status(run_id),
      outputs: self.outputs.run_outputs(run_id).into_iter().collect(),
      previews,
      progress: self.registry.progress_states(run_id).into_iter().collect(),
    }
  }
}

impl<T: Topology> ExecutionNotifier for ArtifactEngine<T> {
  fn notify(&self, event: ExecutionEvent) {
    self.handle(event);
  }
}

impl<T: Topology> fmt::Debug for ArtifactEngine<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ArtifactEngine")
      .field("registry", &self.registry)
      .field("outputs", &self.outputs)
      .field("resources", &self.resources)
      .finish_non_exhaustive()
  }
}

fn release_unowned(run_id: &RunId, handles: Vec<BoxedHandle>) {
  if handles.is_empty() {
    return;
  }
  debug!(run_id = %run_id, count = handles.len(), "releasing previews for unresolved node");
  for handle in handles {
    handle.release();
  }
}
