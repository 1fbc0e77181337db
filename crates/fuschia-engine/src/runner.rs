//! Event runner with channel-based delivery.
//!
//! The `EventRunner` owns an mpsc channel of [`ExecutionEvent`]s and applies
//! them to an [`ArtifactEngine`] in arrival order.

use std::sync::Arc;

use fuschia_workflow::Topology;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::ArtifactEngine;
use crate::error::EngineError;
use crate::events::{ChannelNotifier, ExecutionEvent};

/// Applies execution events to an engine from a single task.
///
/// # Usage
///
/// ```ignore
/// let runner = EventRunner::new(engine);
///
/// // Hand the notifier to the execution source
/// let notifier = runner.notifier();
///
/// // Start the event loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct EventRunner<T: Topology> {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
  receiver: mpsc::UnboundedReceiver<ExecutionEvent>,
  engine: Arc<ArtifactEngine<T>>,
}

impl<T: Topology> EventRunner<T> {
  pub fn new(engine: Arc<ArtifactEngine<T>>) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    Self {
      sender,
      receiver,
      engine,
    }
  }

  /// Get a sender handle for delivering events.
  pub fn sender(&self) -> mpsc::UnboundedSender<ExecutionEvent> {
    self.sender.clone()
  }

  pub fn notifier(&self) -> ChannelNotifier {
    ChannelNotifier::new(self.sender())
  }

  /// Queue one event through the channel.
  pub fn run(&self, event: ExecutionEvent) -> Result<(), EngineError> {
    self.sender.send(event).map_err(|mpsc::error::SendError(event)| {
      event.discard();
      EngineError::ChannelClosed
    })
  }

  /// Start the event loop.
  ///
  /// Runs until the cancellation token is triggered or every sender handed
  /// out by this runner has been dropped. On cancellation the channel is
  /// closed and the events already queued are still applied, so no preview
  /// handle or terminal status is lost. Returns the number of events applied.
  pub async fn start(self, cancel: CancellationToken) -> Result<usize, EngineError> {
    let Self {
      sender,
      mut receiver,
      engine,
    } = self;
    // Only external senders keep the loop alive from here on.
    drop(sender);

    info!("starting event runner");
    let mut applied = 0;

    let cancelled = loop {
      tokio::select! {
        _ = cancel.cancelled() => break true,
        event = receiver.recv() => {
          match event {
            Some(event) => {
              engine.handle(event);
              applied += 1;
            }
            None => break false,
          }
        }
      }
    };

    if cancelled {
      receiver.close();
      while let Some(event) = receiver.recv().await {
        engine.handle(event);
        applied += 1;
      }
      info!(applied, "event runner cancelled");
    } else {
      info!(applied, "event runner channel closed");
    }

    Ok(applied)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::ExecutionNotifier;
  use crate::execution::RunStatus;
  use bytes::Bytes;
  use fuschia_artifact::{BlobStore, OutputRecord, ResultFolder};
  use fuschia_config::{CacheConfig, NodeDef, TopologyDef};
  use fuschia_workflow::{ExecutionId, GraphTopology, NodeLocator, RunId};
  use std::time::Duration;

  fn engine() -> Arc<ArtifactEngine<GraphTopology>> {
    let topology = GraphTopology::new(&TopologyDef {
      nodes: vec![NodeDef::leaf("5")],
      subgraphs: vec![],
    })
    .unwrap();
    Arc::new(ArtifactEngine::new(&CacheConfig::default(), topology))
  }

  #[tokio::test]
  async fn test_runner_applies_events_until_senders_drop() {
    let engine = engine();
    let runner = EventRunner::new(engine.clone());
    let notifier = runner.notifier();

    let handle = tokio::spawn(runner.start(CancellationToken::new()));

    notifier.notify(ExecutionEvent::Status {
      run_id: RunId::new("p1"),
      status: RunStatus::Running,
    });
    notifier.notify(ExecutionEvent::Output {
      run_id: RunId::new("p1"),
      execution_id: ExecutionId::new("5"),
      output: OutputRecord::from_filenames(&["a.png"], ResultFolder::Output, false),
      merge: false,
    });
    drop(notifier);

    let applied = handle.await.unwrap().unwrap();
    assert_eq!(applied, 2);
    assert!(
      engine
        .outputs()
        .get(&RunId::new("p1"), &NodeLocator::new("5"))
        .is_some()
    );
  }

  #[tokio::test]
  async fn test_runner_cancellation() {
    let runner = EventRunner::new(engine());
    let _sender = runner.sender();

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let handle = tokio::spawn(runner.start(cancel_clone));

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "runner should stop on cancellation");
  }

  #[tokio::test]
  async fn test_cancel_applies_queued_events() {
    let engine = engine();
    let store = BlobStore::new();
    let runner = EventRunner::new(engine.clone());
    runner
      .run(ExecutionEvent::Status {
        run_id: RunId::new("p1"),
        status: RunStatus::Running,
      })
      .unwrap();
    runner
      .run(ExecutionEvent::Preview {
        run_id: RunId::new("p1"),
        execution_id: ExecutionId::new("5"),
        handles: vec![Box::new(store.create(Bytes::from_static(b"frame"), "image/png"))],
      })
      .unwrap();
    let late = runner.notifier();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let applied = runner.start(cancel).await.unwrap();
    assert_eq!(applied, 2);

    // the runner is gone; a late preview is released instead of queued
    late.notify(ExecutionEvent::Preview {
      run_id: RunId::new("p1"),
      execution_id: ExecutionId::new("5"),
      handles: vec![Box::new(store.create(Bytes::from_static(b"late"), "image/png"))],
    });
    assert_eq!(store.live_count(), 1);

    assert_eq!(engine.teardown(), 1);
    assert_eq!(store.live_count(), 0);
  }

  #[tokio::test]
  async fn test_run_queues_event() {
    let engine = engine();
    let runner = EventRunner::new(engine.clone());
    runner
      .run(ExecutionEvent::Status {
        run_id: RunId::new("p1"),
        status: RunStatus::Running,
      })
      .unwrap();

    let applied = runner.start(CancellationToken::new()).await.unwrap();
    assert_eq!(applied, 1);
    assert_eq!(engine.registry().status(&RunId::new("p1")), Some(RunStatus::Running));
  }
}
