//! Execution events and notifiers.
//!
//! The execution source reports what a run produced through these events.
//! Consumers implement [`ExecutionNotifier`] and decide what to do with them.

use fuschia_artifact::{BoxedHandle, OutputRecord, ResourceHandle};
use fuschia_workflow::{ExecutionId, RunId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::execution::{ProgressState, RunStatus};

/// Events emitted while a run executes.
#[derive(Debug)]
pub enum ExecutionEvent {
  /// A node produced output. With `merge` set, array fields are appended to
  /// the cached record instead of replacing it.
  Output {
    run_id: RunId,
    execution_id: ExecutionId,
    output: OutputRecord,
    merge: bool,
  },

  /// A node produced preview resources. The handles are owned by whoever
  /// receives the event.
  Preview {
    run_id: RunId,
    execution_id: ExecutionId,
    handles: Vec<BoxedHandle>,
  },

  /// A node finished executing. Its previews become stale.
  Executed {
    run_id: RunId,
    execution_id: ExecutionId,
  },

  /// A node reported progress.
  Progress {
    run_id: RunId,
    execution_id: ExecutionId,
    progress: ProgressState,
  },

  /// A run changed status.
  Status { run_id: RunId, status: RunStatus },
}

impl ExecutionEvent {
  pub fn run_id(&self) -> &RunId {
    match self {
      ExecutionEvent::Output { run_id, .. }
      | ExecutionEvent::Preview { run_id, .. }
      | ExecutionEvent::Executed { run_id, .. }
      | ExecutionEvent::Progress { run_id, .. }
      | ExecutionEvent::Status { run_id, .. } => run_id,
    }
  }

  /// Drop an event that will never be applied, releasing any handles it owns.
  pub fn discard(self) {
    if let ExecutionEvent::Preview { run_id, handles, .. } = self {
      debug!(run_id = %run_id, count = handles.len(), "releasing previews of undelivered event");
      for handle in handles {
        handle.release();
      }
    }
  }

  /// Short name for logging.
  pub fn kind(&self) -> &'static str {
    match self {
      ExecutionEvent::Output { .. } => "output",
      ExecutionEvent::Preview { .. } => "preview",
      ExecutionEvent::Executed { .. } => "executed",
      ExecutionEvent::Progress { .. } => "progress",
      ExecutionEvent::Status { .. } => "status",
    }
  }
}

/// Trait for receiving execution events.
///
/// The caller hands over each event, including ownership of any preview
/// handles it carries.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // NOTE: Unbounded so the execution source never waits on cache bookkeeping.
  // Preview events can arrive once per sampling step; if that outgrows memory,
  // switch to a bounded channel and let the source apply backpressure.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Handles only free their resource on release, not on drop.
    if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
      event.discard();
    }
  }
}
