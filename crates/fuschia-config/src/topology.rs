//! Serializable graph topology.
//!
//! # Example
//!
//! ```json
//! {
//!   "nodes": [
//!     { "id": "5" },
//!     { "id": "9", "subgraph": "sg-a" }
//!   ],
//!   "subgraphs": [
//!     { "id": "sg-a", "nodes": [{ "id": "1" }, { "id": "2" }] }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::node::NodeDef;

/// A subgraph definition referenced by container nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphDef {
  pub id: String,
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
}

/// Snapshot of the current graph: root nodes plus every subgraph definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyDef {
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub subgraphs: Vec<SubgraphDef>,
}

impl TopologyDef {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&content)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_nested_topology() {
    let json = r#"{
      "nodes": [{ "id": "5" }, { "id": "9", "subgraph": "sg-a" }],
      "subgraphs": [{ "id": "sg-a", "nodes": [{ "id": "1" }] }]
    }"#;

    let def = TopologyDef::from_json_str(json).unwrap();
    assert_eq!(def.nodes, vec![NodeDef::leaf("5"), NodeDef::container("9", "sg-a")]);
    assert_eq!(def.subgraphs.len(), 1);
    assert_eq!(def.subgraphs[0].nodes, vec![NodeDef::leaf("1")]);
  }

  #[test]
  fn test_leaf_serializes_without_subgraph() {
    let json = serde_json::to_value(NodeDef::leaf("3")).unwrap();
    assert_eq!(json, serde_json::json!({ "id": "3" }));
  }
}
