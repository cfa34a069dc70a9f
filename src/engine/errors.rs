//! Engine and session error types

use thiserror::Error;

/// Errors raised by the browser engine and its page sessions
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine failed to start: {0}")]
    StartFailure(String),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Session checkout timed out after {0:?}")]
    CheckoutTimeout(std::time::Duration),

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(std::time::Duration),

    #[error("Navigation failed: {0}")]
    NavigationError(String),

    #[error("Extraction failed: {0}")]
    ExtractionError(String),

    #[error("Engine disconnected: {0}")]
    Disconnected(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),
}

impl From<EngineError> for String {
    fn from(err: EngineError) -> String {
        err.to_string()
    }
}

impl EngineError {
    /// True when the underlying engine process is gone or never came up,
    /// so the pool must restart it before any further task can run.
    pub fn is_engine_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::StartFailure(_) | EngineError::Disconnected(_)
        )
    }
}
