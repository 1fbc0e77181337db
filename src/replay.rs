//! Replays a JSON-lines event log against an artifact engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use fuschia_artifact::{BlobStore, BoxedHandle, OutputRecord};
use fuschia_engine::{
  ArtifactEngine, EventRunner, ExecutionEvent, ExecutionNotifier, ProgressState, RunSnapshot,
  RunStatus,
};
use fuschia_workflow::{ExecutionId, RunId, Topology};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One line of an event log.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum LogLine {
  Status {
    run_id: RunId,
    status: RunStatus,
  },
  Output {
    run_id: RunId,
    execution_id: ExecutionId,
    output: Value,
    #[serde(default)]
    merge: bool,
  },
  Preview {
    run_id: RunId,
    execution_id: ExecutionId,
    /// Blob payloads, stored as UTF-8 bytes.
    blobs: Vec<String>,
    #[serde(default = "default_content_type")]
    content_type: String,
  },
  Executed {
    run_id: RunId,
    execution_id: ExecutionId,
  },
  Progress {
    run_id: RunId,
    execution_id: ExecutionId,
    progress: ProgressState,
  },
  Wait {
    ms: u64,
  },
}

fn default_content_type() -> String {
  "image/png".to_string()
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
  pub events_applied: usize,
  pub runs: BTreeMap<RunId, RunSnapshot>,
  pub live_blobs_before_teardown: usize,
  pub released_on_teardown: usize,
  pub live_blobs_after_teardown: usize,
}

/// Feed every line of `log` to `engine`, then tear it down.
pub async fn replay<T>(engine: Arc<ArtifactEngine<T>>, log: &str) -> Result<ReplayReport>
where
  T: Topology + 'static,
{
  let store = BlobStore::new();
  let runner = EventRunner::new(engine.clone());
  let notifier = runner.notifier();
  let handle = tokio::spawn(runner.start(CancellationToken::new()));

  let mut run_ids = BTreeSet::new();
  for (index, line) in log.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let line_no = index + 1;
    let parsed: LogLine =
      serde_json::from_str(line).with_context(|| format!("invalid event on line {line_no}"))?;

    let event = match parsed {
      LogLine::Wait { ms } => {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        continue;
      }
      LogLine::Status { run_id, status } => ExecutionEvent::Status { run_id, status },
      LogLine::Output {
        run_id,
        execution_id,
        output,
        merge,
      } => {
        let output = OutputRecord::from_value(output)
          .ok_or_else(|| anyhow!("output on line {line_no} is not a JSON object"))?;
        ExecutionEvent::Output {
          run_id,
          execution_id,
          output,
          merge,
        }
      }
      LogLine::Preview {
        run_id,
        execution_id,
        blobs,
        content_type,
      } => {
        let handles: Vec<BoxedHandle> = blobs
          .into_iter()
          .map(|blob| Box::new(store.create(Bytes::from(blob), content_type.clone())) as BoxedHandle)
          .collect();
        ExecutionEvent::Preview {
          run_id,
          execution_id,
          handles,
        }
      }
      LogLine::Executed { run_id, execution_id } => ExecutionEvent::Executed { run_id, execution_id },
      LogLine::Progress {
        run_id,
        execution_id,
        progress,
      } => ExecutionEvent::Progress {
        run_id,
        execution_id,
        progress,
      },
    };

    run_ids.insert(event.run_id().clone());
    notifier.notify(event);
  }

  drop(notifier);
  let events_applied = handle.await.context("event runner panicked")??;

  let runs = run_ids
    .into_iter()
    .map(|run_id| {
      let snapshot = engine.snapshot(&run_id);
      (run_id, snapshot)
    })
    .collect();

  let live_blobs_before_teardown = store.live_count();
  let released_on_teardown = engine.teardown();

  Ok(ReplayReport {
    events_applied,
    runs,
    live_blobs_before_teardown,
    released_on_teardown,
    live_blobs_after_teardown: store.live_count(),
  })
}
