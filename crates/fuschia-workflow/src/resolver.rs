//! Locator resolution.
//!
//! Turns raw node ids (plus the graph they were seen in) and hierarchical
//! execution ids into [`NodeLocator`]s. Resolution never allocates state; a
//! `None` result means the id no longer maps onto the current topology (stale
//! node, removed subgraph) and the event carrying it should be dropped.

use crate::ids::{ExecutionId, GraphScope, NodeLocator};
use crate::topology::Topology;

/// A container node and the locators of its direct children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtree {
  pub container: NodeLocator,
  /// Direct children only. Nested containers appear here, their own children do not.
  pub children: Vec<NodeLocator>,
}

/// Resolves node identities against a topology snapshot.
#[derive(Debug, Clone)]
pub struct LocatorResolver<T: Topology> {
  topology: T,
}

impl<T: Topology> LocatorResolver<T> {
  pub fn new(topology: T) -> Self {
    Self { topology }
  }

  /// Resolve a raw node id seen in `scope`.
  pub fn resolve_node(&self, scope: &GraphScope, node_id: &str) -> Option<NodeLocator> {
    if !self.topology.contains(scope, node_id) {
      return None;
    }
    Some(NodeLocator::for_node(scope, node_id))
  }

  /// Resolve a hierarchical execution id.
  ///
  /// Walks the container path from the root graph; every segment but the last
  /// must be a container in the graph reached so far.
  pub fn resolve_execution_id(&self, id: &ExecutionId) -> Option<NodeLocator> {
    let mut path: Vec<&str> = id.segments().collect();
    path.pop();

    let mut scope = GraphScope::Root;
    for container in path {
      let subgraph = self.topology.subgraph_of(&scope, container)?;
      scope = GraphScope::Subgraph(subgraph.to_string());
    }

    self.resolve_node(&scope, id.leaf())
  }

  /// The direct children of a container node.
  ///
  /// Returns `None` if `container` is not a container in the current topology.
  pub fn subtree(&self, container: &NodeLocator) -> Option<Subtree> {
    let scope = container.scope();
    let subgraph = self.topology.subgraph_of(&scope, container.node_id())?;
    let child_scope = GraphScope::Subgraph(subgraph.to_string());

    let children = self
      .topology
      .subgraph_nodes(subgraph)?
      .iter()
      .map(|node_id| NodeLocator::for_node(&child_scope, node_id))
      .collect();

    Some(Subtree {
      container: container.clone(),
      children,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::topology::GraphTopology;
  use fuschia_config::{NodeDef, SubgraphDef, TopologyDef};

  /// root: 5, 9 -> sg-a
  /// sg-a: 1, 3 -> sg-b
  /// sg-b: 7
  fn resolver() -> LocatorResolver<GraphTopology> {
    let def = TopologyDef {
      nodes: vec![NodeDef::leaf("5"), NodeDef::container("9", "sg-a")],
      subgraphs: vec![
        SubgraphDef {
          id: "sg-a".to_string(),
          nodes: vec![NodeDef::leaf("1"), NodeDef::container("3", "sg-b")],
        },
        SubgraphDef {
          id: "sg-b".to_string(),
          nodes: vec![NodeDef::leaf("7")],
        },
      ],
    };
    LocatorResolver::new(GraphTopology::new(&def).unwrap())
  }

  #[test]
  fn test_resolve_root_execution_id() {
    let locator = resolver().resolve_execution_id(&ExecutionId::new("5"));
    assert_eq!(locator, Some(NodeLocator::new("5")));
  }

  #[test]
  fn test_resolve_nested_execution_id() {
    let resolver = resolver();
    assert_eq!(
      resolver.resolve_execution_id(&ExecutionId::new("9:1")),
      Some(NodeLocator::new("sg-a:1"))
    );
    assert_eq!(
      resolver.resolve_execution_id(&ExecutionId::new("9:3:7")),
      Some(NodeLocator::new("sg-b:7"))
    );
  }

  #[test]
  fn test_stale_ids_unresolved() {
    let resolver = resolver();
    // node no longer exists
    assert_eq!(resolver.resolve_execution_id(&ExecutionId::new("42")), None);
    // 5 is not a container
    assert_eq!(resolver.resolve_execution_id(&ExecutionId::new("5:1")), None);
    // 7 lives in sg-b, not sg-a
    assert_eq!(resolver.resolve_execution_id(&ExecutionId::new("9:7")), None);
    assert_eq!(resolver.resolve_execution_id(&ExecutionId::new("")), None);
  }

  #[test]
  fn test_resolve_node_in_scope() {
    let resolver = resolver();
    let sg_a = GraphScope::Subgraph("sg-a".to_string());

    assert_eq!(
      resolver.resolve_node(&sg_a, "1"),
      Some(NodeLocator::new("sg-a:1"))
    );
    assert_eq!(resolver.resolve_node(&GraphScope::Root, "1"), None);
  }

  #[test]
  fn test_subtree_is_one_level_deep() {
    let subtree = resolver().subtree(&NodeLocator::new("9")).unwrap();

    assert_eq!(subtree.container, NodeLocator::new("9"));
    assert_eq!(
      subtree.children,
      vec![NodeLocator::new("sg-a:1"), NodeLocator::new("sg-a:3")]
    );
    assert!(!subtree.children.contains(&NodeLocator::new("sg-b:7")));
  }

  #[test]
  fn test_subtree_of_nested_container() {
    let subtree = resolver().subtree(&NodeLocator::new("sg-a:3")).unwrap();
    assert_eq!(subtree.children, vec![NodeLocator::new("sg-b:7")]);
  }

  #[test]
  fn test_subtree_of_leaf_is_none() {
    assert_eq!(resolver().subtree(&NodeLocator::new("5")), None);
  }
}
