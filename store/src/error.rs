use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store protocol error: {0}")]
    Protocol(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}
