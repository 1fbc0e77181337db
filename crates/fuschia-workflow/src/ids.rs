use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between segments of execution ids and locators.
pub const LOCATOR_SEPARATOR: char = ':';

/// Opaque identifier for one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// An empty run id never owns a cache scope.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for RunId {
  fn from(id: &str) -> Self {
    Self::new(id)
  }
}

impl From<String> for RunId {
  fn from(id: String) -> Self {
    Self(id)
  }
}

/// Hierarchical node id as delivered by the execution backend.
///
/// Every segment but the last is a container node id; the last is the node
/// that produced the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn segments(&self) -> impl Iterator<Item = &str> {
    self.0.split(LOCATOR_SEPARATOR)
  }

  /// The trailing segment.
  pub fn leaf(&self) -> &str {
    self
      .0
      .rsplit_once(LOCATOR_SEPARATOR)
      .map_or(self.0.as_str(), |(_, leaf)| leaf)
  }
}

impl fmt::Display for ExecutionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ExecutionId {
  fn from(id: &str) -> Self {
    Self::new(id)
  }
}

/// The graph a node lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphScope {
  Root,
  Subgraph(String),
}

impl fmt::Display for GraphScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphScope::Root => f.write_str("root graph"),
      GraphScope::Subgraph(id) => write!(f, "subgraph '{}'", id),
    }
  }
}

/// Flat, run-scoped key for one node instance.
///
/// Root nodes are keyed by their id; subgraph nodes by `<subgraph-id>:<node-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeLocator(String);

impl NodeLocator {
  /// Build the locator of `node_id` inside `scope`.
  pub fn for_node(scope: &GraphScope, node_id: &str) -> Self {
    match scope {
      GraphScope::Root => Self(node_id.to_string()),
      GraphScope::Subgraph(subgraph) => {
        Self(format!("{}{}{}", subgraph, LOCATOR_SEPARATOR, node_id))
      }
    }
  }

  /// Wrap an already-canonical locator string.
  pub fn new(locator: impl Into<String>) -> Self {
    Self(locator.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The node id within its graph.
  pub fn node_id(&self) -> &str {
    self
      .0
      .rsplit_once(LOCATOR_SEPARATOR)
      .map_or(self.0.as_str(), |(_, node_id)| node_id)
  }

  /// The graph the node lives in.
  pub fn scope(&self) -> GraphScope {
    match self.0.rsplit_once(LOCATOR_SEPARATOR) {
      Some((subgraph, _)) => GraphScope::Subgraph(subgraph.to_string()),
      None => GraphScope::Root,
    }
  }
}

impl fmt::Display for NodeLocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for NodeLocator {
  fn from(locator: &str) -> Self {
    Self::new(locator)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_locator_for_root_node() {
    let locator = NodeLocator::for_node(&GraphScope::Root, "5");
    assert_eq!(locator.as_str(), "5");
    assert_eq!(locator.node_id(), "5");
    assert_eq!(locator.scope(), GraphScope::Root);
  }

  #[test]
  fn test_locator_for_subgraph_node() {
    let locator = NodeLocator::for_node(&GraphScope::Subgraph("sg-a".to_string()), "12");
    assert_eq!(locator.as_str(), "sg-a:12");
    assert_eq!(locator.node_id(), "12");
    assert_eq!(locator.scope(), GraphScope::Subgraph("sg-a".to_string()));
  }

  #[test]
  fn test_execution_id_segments() {
    let id = ExecutionId::new("9:3:7");
    assert_eq!(id.segments().collect::<Vec<_>>(), vec!["9", "3", "7"]);
    assert_eq!(id.leaf(), "7");

    let flat = ExecutionId::new("7");
    assert_eq!(flat.leaf(), "7");
    assert_eq!(flat.segments().count(), 1);
  }

  #[test]
  fn test_ids_serialize_as_strings() {
    let run = RunId::new("p1");
    assert_eq!(serde_json::to_value(&run).unwrap(), serde_json::json!("p1"));

    let locator: NodeLocator = serde_json::from_str("\"sg-a:4\"").unwrap();
    assert_eq!(locator.node_id(), "4");
  }

  #[test]
  fn test_empty_run_id() {
    assert!(RunId::new("").is_empty());
    assert!(!RunId::from("p1").is_empty());
  }
}
