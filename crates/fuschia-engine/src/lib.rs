//! Fuschia Engine
//!
//! This crate applies execution events to run-scoped artifact caches and
//! cleans each run up when it finishes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        EventRunner                          │
//! │  - owns mpsc channel (sender + receiver)                    │
//! │  - notifier() hands a ChannelNotifier to the source         │
//! │  - start(cancel) runs the event loop                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ArtifactEngine                         │
//! │  - resolves execution ids to node locators                  │
//! │  - routes outputs, previews, progress and status            │
//! └─────────────────────────────────────────────────────────────┘
//!            │                  │                    │
//!            ▼                  ▼                    ▼
//! ┌───────────────────┐ ┌───────────────┐ ┌────────────────────┐
//! │ ExecutionRegistry │ │  OutputCache  │ │  ResourceManager   │
//! │ status, progress  │ │ per-run output│ │ previews, debounced│
//! │ transitions       │ │ records       │ │ revocation         │
//! └───────────────────┘ └───────────────┘ └────────────────────┘
//!            │ terminal transition  ▲                    ▲
//!            ▼                      │                    │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LifecycleCoordinator                      │
//! │  - removes the run's outputs, then revokes its resources    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fuschia_engine::{ArtifactEngine, EventRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = Arc::new(ArtifactEngine::new(&config, topology));
//! let runner = EventRunner::new(engine.clone());
//! let notifier = runner.notifier();
//!
//! let cancel = CancellationToken::new();
//! runner.start(cancel).await?;
//! ```

mod engine;
mod error;
mod events;
mod execution;
mod lifecycle;
mod runner;

pub use engine::{ArtifactEngine, ImageSource, RunSnapshot};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier};
pub use execution::{
  ExecutionRegistry, NodeExecutionView, NodeState, ProgressState, RunStatus, RunTransition,
  TransitionObserver,
};
pub use lifecycle::LifecycleCoordinator;
pub use runner::EventRunner;
