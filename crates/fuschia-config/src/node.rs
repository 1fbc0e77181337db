use serde::{Deserialize, Serialize};

/// A node in a graph snapshot.
///
/// A node with `subgraph` set is a container: executing it runs the nodes of
/// the referenced subgraph definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subgraph: Option<String>,
}

impl NodeDef {
  pub fn leaf(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      subgraph: None,
    }
  }

  pub fn container(id: impl Into<String>, subgraph: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      subgraph: Some(subgraph.into()),
    }
  }
}
