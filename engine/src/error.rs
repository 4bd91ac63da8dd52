use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sink write failed: {0}")]
    WriteFailed(String),

    #[error("payload type mismatch: sink expected {expected}")]
    PayloadMismatch { expected: &'static str },

    #[error("invalid engine spec: {0}")]
    InvalidSpec(String),

    #[error("coordinator worker is not running")]
    CoordinatorClosed,
}
