use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
  #[error("invalid id '{id}': ids must be non-empty and must not contain ':'")]
  InvalidId { id: String },

  #[error("duplicate subgraph definition: {0}")]
  DuplicateSubgraph(String),

  #[error("duplicate node '{node_id}' in {scope}")]
  DuplicateNode { scope: String, node_id: String },

  #[error("container node '{node_id}' references unknown subgraph '{subgraph}'")]
  UnknownSubgraph { node_id: String, subgraph: String },
}
