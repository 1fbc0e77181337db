use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("event runner channel closed")]
  ChannelClosed,
}
