//! Run-scoped output cache.
//!
//! Holds the latest [`OutputRecord`] for each node locator of each run. A run's
//! scope is created by its first write and destroyed by [`OutputCache::remove_run`],
//! after which writes for that run are dropped rather than resurrecting it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fuschia_workflow::{NodeLocator, RunId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::diagnostics::{Diagnostic, Diagnostics};

/// Field holding a record's image list.
const IMAGES_FIELD: &str = "images";
const ANIMATED_FIELD: &str = "animated";

/// Folder an output file was written to by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFolder {
  Input,
  Output,
  Temp,
}

/// Structured description of a node's artifacts.
///
/// Schema-open: any JSON object. Array-valued fields (image lists and the
/// like) accumulate under [`merge_from`](OutputRecord::merge_from); everything
/// else is last-write-wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRecord(Map<String, Value>);

impl OutputRecord {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wrap a JSON value. Only objects are records.
  pub fn from_value(value: Value) -> Option<Self> {
    match value {
      Value::Object(map) => Some(Self(map)),
      _ => None,
    }
  }

  /// Build an image output from file paths.
  ///
  /// `"sub/dir/a.png"` becomes `{filename: "a.png", subfolder: "sub/dir", type}`.
  /// A file is flagged animated only when `animated` is set and it is a
  /// `.webp` or `.png`.
  pub fn from_filenames<S: AsRef<str>>(filenames: &[S], folder: ResultFolder, animated: bool) -> Self {
    let images = filenames
      .iter()
      .map(|path| {
        let path = path.as_ref();
        let (subfolder, filename) = path.rsplit_once('/').unwrap_or(("", path));
        json!({
          "filename": filename,
          "subfolder": subfolder,
          "type": folder,
        })
      })
      .collect();

    let flags = filenames
      .iter()
      .map(|path| {
        let path = path.as_ref();
        Value::Bool(animated && (path.ends_with(".webp") || path.ends_with(".png")))
      })
      .collect();

    let mut record = Self::new();
    record.insert(IMAGES_FIELD, Value::Array(images));
    record.insert(ANIMATED_FIELD, Value::Array(flags));
    record
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
    self.0.insert(field.into(), value)
  }

  pub fn fields(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  pub fn images(&self) -> Option<&Vec<Value>> {
    self.0.get(IMAGES_FIELD).and_then(Value::as_array)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }

  /// Merge `incoming` into this record.
  ///
  /// Arrays present on both sides are concatenated, existing items first.
  /// Any other field is overwritten; fields only in `incoming` are added.
  pub fn merge_from(&mut self, incoming: OutputRecord) {
    for (field, value) in incoming.0 {
      match self.0.get_mut(&field) {
        Some(Value::Array(existing)) if value.is_array() => {
          if let Value::Array(new) = value {
            existing.extend(new);
          }
        }
        _ => {
          self.0.insert(field, value);
        }
      }
    }
  }
}

#[derive(Debug, Default)]
struct OutputState {
  scopes: HashMap<RunId, HashMap<NodeLocator, OutputRecord>>,
  /// Runs whose scope was cleaned up. Writes for them are dropped.
  sealed: HashSet<RunId>,
}

impl OutputState {
  fn accepts(&self, run_id: &RunId) -> bool {
    !run_id.is_empty() && !self.sealed.contains(run_id)
  }
}

/// Per-run mapping from node locator to output record.
///
/// Cheap to clone; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct OutputCache {
  state: Arc<RwLock<OutputState>>,
  diagnostics: Diagnostics,
}

impl OutputCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
    Self {
      state: Arc::default(),
      diagnostics,
    }
  }

  fn read(&self) -> RwLockReadGuard<'_, OutputState> {
    self.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, OutputState> {
    self.state.write().unwrap_or_else(PoisonError::into_inner)
  }

  fn scope_missing(&self, operation: &'static str, run_id: &RunId) {
    self.diagnostics.emit(Diagnostic::ScopeMissing {
      operation,
      run_id: run_id.clone(),
    });
  }

  /// Run `f` against the run's scope, creating it on first write.
  fn with_scope<R>(
    &self,
    operation: &'static str,
    run_id: &RunId,
    f: impl FnOnce(&mut HashMap<NodeLocator, OutputRecord>) -> R,
  ) -> Option<R> {
    let mut state = self.write();
    if !state.accepts(run_id) {
      drop(state);
      self.scope_missing(operation, run_id);
      return None;
    }
    let scope = state.scopes.entry(run_id.clone()).or_default();
    Some(f(scope))
  }

  /// Store `record`, replacing any existing record for the locator.
  pub fn set(&self, run_id: &RunId, locator: NodeLocator, record: OutputRecord) {
    self.with_scope("set", run_id, |scope| {
      scope.insert(locator, record);
    });
  }

  /// Merge `record` into the existing record, or store it if there is none.
  pub fn merge_append(&self, run_id: &RunId, locator: NodeLocator, record: OutputRecord) {
    self.with_scope("merge_append", run_id, |scope| match scope.get_mut(&locator) {
      Some(existing) => existing.merge_from(record),
      None => {
        scope.insert(locator, record);
      }
    });
  }

  /// Delete the record for a locator. Returns whether one existed.
  pub fn remove(&self, run_id: &RunId, locator: &NodeLocator) -> bool {
    if run_id.is_empty() {
      self.scope_missing("remove", run_id);
      return false;
    }
    self
      .write()
      .scopes
      .get_mut(run_id)
      .and_then(|scope| scope.remove(locator))
      .is_some()
  }

  /// Replace the run's whole mapping, e.g. to rehydrate after a reconnect.
  pub fn restore(&self, run_id: &RunId, records: HashMap<NodeLocator, OutputRecord>) {
    self.with_scope("restore", run_id, |scope| {
      *scope = records;
    });
  }

  pub fn get(&self, run_id: &RunId, locator: &NodeLocator) -> Option<OutputRecord> {
    if run_id.is_empty() {
      self.scope_missing("get", run_id);
      return None;
    }
    self.read().scopes.get(run_id)?.get(locator).cloned()
  }

  /// Replace the `images` field of an existing record. No-op when the locator
  /// has no record. Returns whether a record was updated.
  pub fn update_images(&self, run_id: &RunId, locator: &NodeLocator, images: Vec<Value>) -> bool {
    if run_id.is_empty() {
      self.scope_missing("update_images", run_id);
      return false;
    }
    let mut state = self.write();
    match state.scopes.get_mut(run_id).and_then(|scope| scope.get_mut(locator)) {
      Some(record) => {
        record.insert(IMAGES_FIELD, Value::Array(images));
        true
      }
      None => false,
    }
  }

  /// Snapshot of every record of a run.
  pub fn run_outputs(&self, run_id: &RunId) -> HashMap<NodeLocator, OutputRecord> {
    self.read().scopes.get(run_id).cloned().unwrap_or_default()
  }

  /// Clear a run's records but keep accepting writes for it.
  pub fn reset_run(&self, run_id: &RunId) -> bool {
    self.write().scopes.remove(run_id).is_some()
  }

  /// Drop a run's scope for good. Later writes for the run are no-ops.
  ///
  /// Idempotent; returns whether a scope was removed.
  pub fn remove_run(&self, run_id: &RunId) -> bool {
    let mut state = self.write();
    if !run_id.is_empty() {
      state.sealed.insert(run_id.clone());
    }
    state.scopes.remove(run_id).is_some()
  }

  /// Drop every run's scope for good, as [`remove_run`](Self::remove_run) does per run.
  pub fn clear_all(&self) {
    let mut state = self.write();
    let cleared: Vec<RunId> = state.scopes.drain().map(|(run_id, _)| run_id).collect();
    state.sealed.extend(cleared);
  }

  pub fn is_sealed(&self, run_id: &RunId) -> bool {
    self.read().sealed.contains(run_id)
  }

  pub fn run_ids(&self) -> Vec<RunId> {
    self.read().scopes.keys().cloned().collect()
  }
}
