//! Task descriptions and outcomes
//!
//! A Task is the immutable unit of work handed to the session pool: one
//! target URL, one extraction action, one wall-clock budget. The outcome is
//! classified once at the executor boundary and never mutated afterwards.

use std::time::Duration;

use serde_json::Value;

use crate::engine::EngineError;

/// The extraction to run once navigation has settled
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtractSpec {
    /// Serialized rendered DOM (`document.documentElement.outerHTML`).
    Content,
    /// Document title.
    Title,
    /// Viewport capture as base64 PNG.
    Screenshot,
    /// Arbitrary script; the result is whatever JSON it returns.
    Evaluate { script: String },
    /// The Forex Factory high-impact calendar harvest.
    CalendarEvents,
}

/// One unit of browser work, consumed exactly once
#[derive(Debug, Clone)]
pub struct Task {
    pub url: String,
    pub action: ExtractSpec,
    /// Total wall-clock budget, covering queue wait and execution.
    pub deadline: Duration,
    /// Extra cap on how long the task may sit in the slot queue.
    pub queue_timeout: Duration,
}

impl Task {
    pub fn new(url: impl Into<String>, action: ExtractSpec, deadline: Duration) -> Self {
        Self {
            url: url.into(),
            action,
            deadline,
            queue_timeout: deadline,
        }
    }

    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = queue_timeout;
        self
    }

    /// Reject anything a browser could not sensibly be pointed at.
    pub fn validate(&self) -> Result<(), EngineError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| EngineError::InvalidTask(format!("bad url {:?}: {}", self.url, e)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(EngineError::InvalidTask(format!(
                "unsupported scheme {:?}",
                other
            ))),
        }
    }
}

/// Classified result of one task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Value),
    /// The wall-clock budget ran out while executing.
    Timeout,
    /// The slot queue wait ran out before execution began.
    QueueTimeout,
    /// The engine is down or restarting; the task never ran.
    Unavailable(String),
    /// The engine died underneath the task; a restart follows.
    EngineFailure(String),
    /// Bad input, navigation failure or extraction failure.
    TaskError(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    /// Map an engine error observed during execution to its outcome.
    pub fn from_engine_error(err: EngineError) -> Self {
        match err {
            EngineError::NavigationTimeout(_) | EngineError::CheckoutTimeout(_) => {
                TaskOutcome::Timeout
            }
            EngineError::StartFailure(_) | EngineError::Disconnected(_) => {
                TaskOutcome::EngineFailure(err.to_string())
            }
            EngineError::Unavailable(msg) => TaskOutcome::Unavailable(msg),
            EngineError::NavigationError(_)
            | EngineError::ExtractionError(_)
            | EngineError::InvalidTask(_) => TaskOutcome::TaskError(err.to_string()),
        }
    }

    /// Short tag for logs and stats.
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Success(_) => "success",
            TaskOutcome::Timeout => "timeout",
            TaskOutcome::QueueTimeout => "queueTimeout",
            TaskOutcome::Unavailable(_) => "unavailable",
            TaskOutcome::EngineFailure(_) => "engineFailure",
            TaskOutcome::TaskError(_) => "taskError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_http_and_https() {
        let task = Task::new(
            "https://www.forexfactory.com/calendar",
            ExtractSpec::Content,
            Duration::from_secs(300),
        );
        assert!(task.validate().is_ok());

        let task = Task::new("http://example.com", ExtractSpec::Title, Duration::from_secs(5));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let task = Task::new("not a url", ExtractSpec::Content, Duration::from_secs(5));
        assert!(matches!(
            task.validate().unwrap_err(),
            EngineError::InvalidTask(_)
        ));

        let task = Task::new("file:///etc/passwd", ExtractSpec::Content, Duration::from_secs(5));
        assert!(matches!(
            task.validate().unwrap_err(),
            EngineError::InvalidTask(_)
        ));
    }

    #[test]
    fn test_engine_error_classification() {
        assert_eq!(
            TaskOutcome::from_engine_error(EngineError::NavigationTimeout(Duration::from_secs(5))),
            TaskOutcome::Timeout
        );
        assert!(matches!(
            TaskOutcome::from_engine_error(EngineError::Disconnected("ws closed".into())),
            TaskOutcome::EngineFailure(_)
        ));
        assert!(matches!(
            TaskOutcome::from_engine_error(EngineError::NavigationError("dns".into())),
            TaskOutcome::TaskError(_)
        ));
        assert!(matches!(
            TaskOutcome::from_engine_error(EngineError::Unavailable("restarting".into())),
            TaskOutcome::Unavailable(_)
        ));
    }

    #[test]
    fn test_extract_spec_wire_format() {
        let spec: ExtractSpec =
            serde_json::from_str(r#"{"type":"evaluate","script":"1+1"}"#).unwrap();
        assert_eq!(spec, ExtractSpec::Evaluate { script: "1+1".into() });

        let spec: ExtractSpec = serde_json::from_str(r#"{"type":"calendarEvents"}"#).unwrap();
        assert_eq!(spec, ExtractSpec::CalendarEvents);
    }

    #[test]
    fn test_queue_timeout_defaults_to_deadline() {
        let task = Task::new("https://example.com", ExtractSpec::Title, Duration::from_secs(10));
        assert_eq!(task.queue_timeout, Duration::from_secs(10));
        let task = task.with_queue_timeout(Duration::from_secs(2));
        assert_eq!(task.queue_timeout, Duration::from_secs(2));
    }
}
