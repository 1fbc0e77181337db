//! Fuschia Workflow
//!
//! This crate turns the identifiers an execution backend reports into stable
//! keys that run-scoped caches can use.
//!
//! - [`RunId`] identifies one execution of a workflow.
//! - [`ExecutionId`] is the hierarchical id the backend sends with each event
//!   (`"9:3:7"` is node `7` inside container `3` inside container `9`).
//! - [`NodeLocator`] is the flat key for a node instance: `"7"` for a root
//!   node, `"<subgraph-id>:7"` for a node inside a subgraph.
//!
//! Resolution is a pure function of a [`Topology`] snapshot. [`GraphTopology`]
//! is the validated form of a `fuschia_config::TopologyDef`.

mod error;
mod ids;
mod resolver;
mod topology;

pub use error::TopologyError;
pub use ids::{ExecutionId, GraphScope, LOCATOR_SEPARATOR, NodeLocator, RunId};
pub use resolver::{LocatorResolver, Subtree};
pub use topology::{GraphTopology, Topology};
