use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fuschia_config::{NodeDef, TopologyDef};

use crate::error::TopologyError;
use crate::ids::{GraphScope, LOCATOR_SEPARATOR};

/// Read-only view of the current graph structure.
///
/// Implementations answer structural questions only; turning them into
/// locators is the job of `LocatorResolver`.
pub trait Topology: Send + Sync {
  /// Whether `node_id` exists in `scope`.
  fn contains(&self, scope: &GraphScope, node_id: &str) -> bool;

  /// The subgraph a container node points at. `None` for leaf or unknown nodes.
  fn subgraph_of(&self, scope: &GraphScope, node_id: &str) -> Option<&str>;

  /// Node ids of a subgraph definition, in definition order.
  fn subgraph_nodes(&self, subgraph_id: &str) -> Option<&[String]>;
}

impl<T: Topology + ?Sized> Topology for Arc<T> {
  fn contains(&self, scope: &GraphScope, node_id: &str) -> bool {
    (**self).contains(scope, node_id)
  }

  fn subgraph_of(&self, scope: &GraphScope, node_id: &str) -> Option<&str> {
    (**self).subgraph_of(scope, node_id)
  }

  fn subgraph_nodes(&self, subgraph_id: &str) -> Option<&[String]> {
    (**self).subgraph_nodes(subgraph_id)
  }
}

/// Nodes of one graph (root or subgraph definition).
#[derive(Debug, Clone, Default)]
struct GraphNodes {
  /// Node ids in definition order.
  order: Vec<String>,
  index: HashSet<String>,
  /// Container node id -> subgraph id.
  containers: HashMap<String, String>,
}

impl GraphNodes {
  fn build(scope: &GraphScope, nodes: &[NodeDef]) -> Result<Self, TopologyError> {
    let mut graph = GraphNodes::default();

    for node in nodes {
      validate_id(&node.id)?;
      if !graph.index.insert(node.id.clone()) {
        return Err(TopologyError::DuplicateNode {
          scope: scope.to_string(),
          node_id: node.id.clone(),
        });
      }
      graph.order.push(node.id.clone());

      if let Some(subgraph) = &node.subgraph {
        graph.containers.insert(node.id.clone(), subgraph.clone());
      }
    }

    Ok(graph)
  }
}

/// Validated topology snapshot built from a [`TopologyDef`].
#[derive(Debug, Clone, Default)]
pub struct GraphTopology {
  root: GraphNodes,
  subgraphs: HashMap<String, GraphNodes>,
}

impl GraphTopology {
  /// Build and validate a topology.
  ///
  /// Fails on ids that are empty or contain the locator separator, duplicate
  /// node ids within one graph, duplicate subgraph ids, and container nodes
  /// pointing at a subgraph that is not defined.
  pub fn new(def: &TopologyDef) -> Result<Self, TopologyError> {
    let root = GraphNodes::build(&GraphScope::Root, &def.nodes)?;

    let mut subgraphs = HashMap::with_capacity(def.subgraphs.len());
    for subgraph in &def.subgraphs {
      validate_id(&subgraph.id)?;
      let scope = GraphScope::Subgraph(subgraph.id.clone());
      let nodes = GraphNodes::build(&scope, &subgraph.nodes)?;
      if subgraphs.insert(subgraph.id.clone(), nodes).is_some() {
        return Err(TopologyError::DuplicateSubgraph(subgraph.id.clone()));
      }
    }

    let topology = Self { root, subgraphs };
    topology.check_container_targets()?;
    Ok(topology)
  }

  /// A topology with no nodes. Every lookup is unresolved.
  pub fn empty() -> Self {
    Self::default()
  }

  fn graph(&self, scope: &GraphScope) -> Option<&GraphNodes> {
    match scope {
      GraphScope::Root => Some(&self.root),
      GraphScope::Subgraph(id) => self.subgraphs.get(id),
    }
  }

  fn check_container_targets(&self) -> Result<(), TopologyError> {
    let graphs = std::iter::once(&self.root).chain(self.subgraphs.values());
    for graph in graphs {
      for (node_id, subgraph) in &graph.containers {
        if !self.subgraphs.contains_key(subgraph) {
          return Err(TopologyError::UnknownSubgraph {
            node_id: node_id.clone(),
            subgraph: subgraph.clone(),
          });
        }
      }
    }
    Ok(())
  }
}

impl Topology for GraphTopology {
  fn contains(&self, scope: &GraphScope, node_id: &str) -> bool {
    self
      .graph(scope)
      .is_some_and(|graph| graph.index.contains(node_id))
  }

  fn subgraph_of(&self, scope: &GraphScope, node_id: &str) -> Option<&str> {
    self
      .graph(scope)?
      .containers
      .get(node_id)
      .map(String::as_str)
  }

  fn subgraph_nodes(&self, subgraph_id: &str) -> Option<&[String]> {
    self
      .subgraphs
      .get(subgraph_id)
      .map(|graph| graph.order.as_slice())
  }
}

fn validate_id(id: &str) -> Result<(), TopologyError> {
  if id.is_empty() || id.contains(LOCATOR_SEPARATOR) {
    return Err(TopologyError::InvalidId { id: id.to_string() });
  }
  Ok(())
}
