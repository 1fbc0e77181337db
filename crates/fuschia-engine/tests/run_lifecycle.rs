use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fuschia_artifact::{BlobStore, OutputRecord, ResultFolder};
use fuschia_config::{CacheConfig, NodeDef, SubgraphDef, TopologyDef};
use fuschia_engine::{
  ArtifactEngine, EventRunner, ExecutionEvent, ExecutionNotifier, ProgressState, RunStatus,
};
use fuschia_workflow::{ExecutionId, GraphTopology, NodeLocator, RunId};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn topology() -> GraphTopology {
  let def = TopologyDef {
    nodes: vec![NodeDef::leaf("n5"), NodeDef::container("9", "sg-a")],
    subgraphs: vec![SubgraphDef {
      id: "sg-a".to_string(),
      nodes: vec![NodeDef::leaf("1")],
    }],
  };
  GraphTopology::new(&def).unwrap()
}

fn engine() -> ArtifactEngine<GraphTopology> {
  ArtifactEngine::new(&CacheConfig::default(), topology())
}

fn preview(store: &BlobStore, run: &str, id: &str) -> ExecutionEvent {
  ExecutionEvent::Preview {
    run_id: RunId::new(run),
    execution_id: ExecutionId::new(id),
    handles: vec![Box::new(store.create(Bytes::from_static(b"preview"), "image/png"))],
  }
}

fn status(run: &str, status: RunStatus) -> ExecutionEvent {
  ExecutionEvent::Status {
    run_id: RunId::new(run),
    status,
  }
}

#[test]
fn test_merge_append_scenario() {
  let engine = engine();
  engine.handle(status("p1", RunStatus::Running));
  engine.handle(ExecutionEvent::Output {
    run_id: RunId::new("p1"),
    execution_id: ExecutionId::new("n5"),
    output: OutputRecord::from_value(json!({"images": ["a.png"]})).unwrap(),
    merge: false,
  });
  engine.handle(ExecutionEvent::Output {
    run_id: RunId::new("p1"),
    execution_id: ExecutionId::new("n5"),
    output: OutputRecord::from_value(json!({"images": ["b.png"]})).unwrap(),
    merge: true,
  });

  let record = engine
    .outputs()
    .get(&RunId::new("p1"), &NodeLocator::new("n5"))
    .unwrap();
  assert_eq!(record.into_value(), json!({"images": ["a.png", "b.png"]}));
}

#[test]
fn test_superseded_preview_released_on_attach() {
  let engine = engine();
  let store = BlobStore::new();

  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(preview(&store, "p1", "n5"));

  assert_eq!(store.live_count(), 1);
  assert_eq!(engine.resources().live_count(&RunId::new("p1")), 1);
}

#[test]
fn test_completed_run_is_emptied_once() {
  let engine = engine();
  let store = BlobStore::new();
  let p1 = RunId::new("p1");

  engine.handle(status("p1", RunStatus::Running));
  engine.handle(ExecutionEvent::Output {
    run_id: p1.clone(),
    execution_id: ExecutionId::new("9:1"),
    output: OutputRecord::from_filenames(&["a.png"], ResultFolder::Output, false),
    merge: false,
  });
  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(preview(&store, "p1", "9:1"));
  engine.handle(ExecutionEvent::Progress {
    run_id: p1.clone(),
    execution_id: ExecutionId::new("n5"),
    progress: ProgressState::running(2.0, 4.0),
  });
  assert_eq!(store.live_count(), 2);

  engine.handle(status("p1", RunStatus::Completed));
  engine.handle(status("p1", RunStatus::Completed));

  let snapshot = engine.snapshot(&p1);
  assert!(snapshot.outputs.is_empty());
  assert!(snapshot.previews.is_empty());
  assert!(snapshot.progress.is_empty());
  assert_eq!(store.live_count(), 0);
  assert!(engine.registry().is_idle());
}

#[test]
fn test_runs_are_isolated() {
  let engine = engine();
  let store = BlobStore::new();

  engine.handle(status("p1", RunStatus::Running));
  engine.handle(status("p2", RunStatus::Running));
  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(preview(&store, "p2", "n5"));

  engine.handle(status("p1", RunStatus::Interrupted));

  assert_eq!(store.live_count(), 1);
  assert_eq!(engine.resources().live_count(&RunId::new("p2")), 1);
  assert!(!engine.registry().is_idle());
}

#[test]
fn test_dropping_engine_releases_previews() {
  let engine = engine();
  let store = BlobStore::new();
  engine.handle(status("p1", RunStatus::Running));
  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(preview(&store, "p2", "9:1"));
  assert_eq!(store.live_count(), 2);

  drop(engine);
  assert_eq!(store.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_executed_preview_revoked_after_delay() {
  let engine = engine();
  let store = BlobStore::new();
  let p1 = RunId::new("p1");

  engine.handle(status("p1", RunStatus::Running));
  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(ExecutionEvent::Executed {
    run_id: p1.clone(),
    execution_id: ExecutionId::new("n5"),
  });

  tokio::time::sleep(Duration::from_millis(399)).await;
  assert_eq!(store.live_count(), 1);

  tokio::time::sleep(Duration::from_millis(2)).await;
  assert_eq!(store.live_count(), 0);
  assert!(engine.snapshot(&p1).previews.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fresh_preview_cancels_pending_revocation() {
  let engine = engine();
  let store = BlobStore::new();
  let p1 = RunId::new("p1");

  engine.handle(status("p1", RunStatus::Running));
  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(ExecutionEvent::Executed {
    run_id: p1.clone(),
    execution_id: ExecutionId::new("n5"),
  });

  tokio::time::sleep(Duration::from_millis(200)).await;
  engine.handle(preview(&store, "p1", "n5"));

  tokio::time::sleep(Duration::from_millis(1000)).await;
  assert_eq!(store.live_count(), 1);
  assert!(!engine.resources().is_pending(&p1, &NodeLocator::new("n5")));
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_before_timer_fires() {
  let engine = engine();
  let store = BlobStore::new();

  engine.handle(status("p1", RunStatus::Running));
  engine.handle(preview(&store, "p1", "n5"));
  engine.handle(ExecutionEvent::Executed {
    run_id: RunId::new("p1"),
    execution_id: ExecutionId::new("n5"),
  });
  engine.handle(status("p1", RunStatus::Cancelled));
  assert_eq!(store.live_count(), 0);

  tokio::time::sleep(Duration::from_millis(1000)).await;
  assert_eq!(store.live_count(), 0);
}

#[tokio::test]
async fn test_runner_drives_engine() {
  let engine = Arc::new(engine());
  let store = BlobStore::new();
  let runner = EventRunner::new(engine.clone());
  let notifier = runner.notifier();
  let handle = tokio::spawn(runner.start(CancellationToken::new()));

  notifier.notify(status("p1", RunStatus::Running));
  notifier.notify(preview(&store, "p1", "9:1"));
  notifier.notify(status("p1", RunStatus::Completed));
  drop(notifier);

  assert_eq!(handle.await.unwrap().unwrap(), 3);
  assert_eq!(store.live_count(), 0);
}
