use thiserror::Error;

use blockcast_engine::EngineError;
use blockcast_store::StoreError;
use blockcast_types::TaskCodecError;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Persisted height and current height differ by more than one block.
    /// Fatal: continuing would risk double-delivery or a silently skipped
    /// height. The process must stop.
    #[error(
        "persisted delivery height {persisted} is inconsistent with current height {current}; \
         refusing to continue"
    )]
    HeightInvariant { persisted: u64, current: u64 },

    /// The state slot holds something that is not a task document. Fatal for
    /// the same reason as a height gap: no retry can repair it and guessing
    /// risks double-delivery.
    #[error("persisted delivery state is corrupt: {0}")]
    CorruptState(String),

    #[error("task codec error: {0}")]
    Codec(#[from] TaskCodecError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("delivery worker stopped")]
    WorkerStopped,
}

impl StreamError {
    /// Whether this error must stop the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::HeightInvariant { .. } | StreamError::CorruptState(_)
        )
    }
}
