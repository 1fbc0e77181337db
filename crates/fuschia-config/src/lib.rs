//! Fuschia Config
//!
//! This crate contains the serializable configuration types for Fuschia.
//!
//! - [`CacheConfig`] holds the runtime knobs of the artifact cache (revocation
//!   debounce, log filter).
//! - [`TopologyDef`] is a snapshot of the editor's graph: root nodes, container
//!   nodes and the subgraph definitions they point at. It is resolved into a
//!   validated topology by `fuschia-workflow`.
//!
//! Configuration can be loaded from JSON files (via the CLI with
//! `--config=config.json` and `--topology=topology.json`).

mod cache;
mod error;
mod node;
mod topology;

pub use cache::{CacheConfig, DEFAULT_LOG_FILTER, DEFAULT_REVOKE_DELAY_MS};
pub use error::ConfigError;
pub use node::NodeDef;
pub use topology::{SubgraphDef, TopologyDef};
