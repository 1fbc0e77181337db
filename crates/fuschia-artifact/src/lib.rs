//! Fuschia Artifact
//!
//! This crate tracks the transient artifacts produced while a workflow runs:
//!
//! - [`OutputCache`] holds one [`OutputRecord`] per node locator per run, with
//!   replace and merge-append writes.
//! - [`ResourceManager`] owns the releasable resources (preview blobs) attached
//!   to node locators and releases them immediately, after a debounce, per run,
//!   or per container subtree.
//! - [`BlobStore`] is an in-process materializer that turns bytes into
//!   [`BlobHandle`]s for the resource manager to own.
//!
//! Every store is keyed by [`RunId`](fuschia_workflow::RunId) so runs never
//! observe each other. Operations never fail: a missing or already cleaned-up
//! run scope turns the operation into a no-op and reports a [`Diagnostic`].

mod blob;
mod diagnostics;
mod handle;
mod output;
mod resource;

pub use blob::{Blob, BlobHandle, BlobStore};
pub use diagnostics::{ChannelSink, Diagnostic, DiagnosticSink, Diagnostics, NoopSink};
pub use handle::{BoxedHandle, CallbackHandle, ResourceHandle};
pub use output::{OutputCache, OutputRecord, ResultFolder};
pub use resource::{DEFAULT_REVOKE_DELAY, ResourceManager};
