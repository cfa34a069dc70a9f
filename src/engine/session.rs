//! Page session trait
//!
//! One isolated browsing context checked out from the engine for the
//! duration of a single task. Sessions are never reused: each task gets a
//! fresh one and releases it on every exit path.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::EngineError;

/// Lifecycle status of a page session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Active,
    Closed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// An isolated browsing context for one task's exclusive use.
///
/// Methods are not deadline-aware on their own beyond the configured
/// navigation bound; the executor wraps every call in the task's remaining
/// budget. `close` and `abort` release the same resources; whichever runs
/// first wins and later calls are no-ops.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Unique session id.
    fn id(&self) -> &str;

    /// Current lifecycle status.
    fn status(&self) -> SessionStatus;

    /// Load the target URL, waiting for the navigation to settle.
    async fn navigate(&mut self, url: &str) -> Result<(), EngineError>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<Value, EngineError>;

    /// Current document title, if the page exposes one.
    async fn title(&mut self) -> Result<Option<String>, EngineError>;

    /// Capture the viewport as a base64-encoded PNG.
    async fn screenshot(&mut self) -> Result<String, EngineError>;

    /// Release the context and mark the session Closed.
    async fn close(&mut self);

    /// Release the context and mark the session Aborted (deadline overrun).
    async fn abort(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Closed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_string(&SessionStatus::Aborted).unwrap();
        assert_eq!(json, r#""aborted""#);
    }
}
