//! Diagnostics for degraded cache operations.
//!
//! Nothing in the artifact cache returns an error to its caller. Operations
//! that cannot apply (no run scope, unresolvable node, timer that lost its
//! target) become no-ops and emit a [`Diagnostic`] instead. Every diagnostic
//! is logged; a [`DiagnosticSink`] can additionally collect them.

use std::sync::Arc;

use fuschia_workflow::{NodeLocator, RunId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A cache operation that degraded to a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
  /// The operation named a run with no active scope: an empty run id, or a run
  /// whose scope was already cleaned up.
  ScopeMissing {
    operation: &'static str,
    run_id: RunId,
  },

  /// An event carried a node id that does not map onto the current topology.
  UnresolvedLocator { run_id: RunId, id: String },

  /// A scheduled revocation fired after its entry had already been cleared or
  /// superseded.
  StaleTimer { run_id: RunId, locator: NodeLocator },
}

impl Diagnostic {
  fn log(&self) {
    match self {
      Diagnostic::ScopeMissing { operation, run_id } => {
        warn!(operation = *operation, run_id = %run_id, "no active run scope, skipping");
      }
      Diagnostic::UnresolvedLocator { run_id, id } => {
        debug!(run_id = %run_id, id = %id, "unresolved node id, dropping event");
      }
      Diagnostic::StaleTimer { run_id, locator } => {
        debug!(run_id = %run_id, locator = %locator, "stale revocation timer");
      }
    }
  }
}

/// Receives diagnostics from the cache.
pub trait DiagnosticSink: Send + Sync {
  fn report(&self, diagnostic: Diagnostic);
}

/// Discards diagnostics. They are still logged.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
  fn report(&self, _diagnostic: Diagnostic) {}
}

/// Forwards diagnostics to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
  sender: mpsc::UnboundedSender<Diagnostic>,
}

impl ChannelSink {
  pub fn new(sender: mpsc::UnboundedSender<Diagnostic>) -> Self {
    Self { sender }
  }
}

impl DiagnosticSink for ChannelSink {
  fn report(&self, diagnostic: Diagnostic) {
    // Receiver may have been dropped
    let _ = self.sender.send(diagnostic);
  }
}

/// Shared handle to a sink. Logs every diagnostic before forwarding it.
#[derive(Clone)]
pub struct Diagnostics {
  sink: Arc<dyn DiagnosticSink>,
}

impl Diagnostics {
  pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
    Self { sink }
  }

  pub fn emit(&self, diagnostic: Diagnostic) {
    diagnostic.log();
    self.sink.report(diagnostic);
  }
}

impl Default for Diagnostics {
  fn default() -> Self {
    Self::new(Arc::new(NoopSink))
  }
}

impl std::fmt::Debug for Diagnostics {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Diagnostics").finish_non_exhaustive()
  }
}
