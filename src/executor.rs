//! Task executor
//!
//! Runs one task end-to-end against the engine under a hard absolute
//! deadline. Every step (checkout, navigate, extract) is bounded by the
//! remaining budget, and the page session is released on every exit path:
//! aborted on deadline overrun, closed otherwise.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::calendar;
use crate::engine::{EngineError, EngineHandle, PageSession};
use crate::task::{ExtractSpec, Task, TaskOutcome};

/// Run `task` to completion against `handle`, finishing by `deadline`.
///
/// Never blocks past the deadline: each stage is wrapped in the time left
/// on the budget. Engine-level failures come back as `EngineFailure`; the
/// caller (the session pool) decides whether to restart.
pub async fn execute(handle: &EngineHandle, task: &Task, deadline: Instant) -> TaskOutcome {
    if let Err(e) = task.validate() {
        return TaskOutcome::from_engine_error(e);
    }

    let remaining = match time_left(deadline) {
        Some(d) => d,
        None => return TaskOutcome::Timeout,
    };

    let mut session = match handle.checkout_session(remaining).await {
        Ok(session) => session,
        Err(e) => return TaskOutcome::from_engine_error(e),
    };
    debug!("Task {} running in session {}", task.url, session.id());

    let outcome = run_in_session(session.as_mut(), task, deadline).await;

    // Sole release point. Timeout paths leave the page in an unknown state,
    // so the session is aborted rather than closed; either way it is
    // terminal and never reused.
    match outcome {
        TaskOutcome::Timeout => session.abort().await,
        _ => session.close().await,
    }

    match &outcome {
        TaskOutcome::Success(_) => {
            info!("Task {} completed ({})", task.url, outcome.label());
        }
        _ => warn!("Task {} finished as {}", task.url, outcome.label()),
    }
    outcome
}

async fn run_in_session(
    session: &mut dyn PageSession,
    task: &Task,
    deadline: Instant,
) -> TaskOutcome {
    let remaining = match time_left(deadline) {
        Some(d) => d,
        None => return TaskOutcome::Timeout,
    };

    match tokio::time::timeout(remaining, session.navigate(&task.url)).await {
        Err(_) => return TaskOutcome::Timeout,
        Ok(Err(e)) => return TaskOutcome::from_engine_error(e),
        Ok(Ok(())) => {}
    }

    let remaining = match time_left(deadline) {
        Some(d) => d,
        None => return TaskOutcome::Timeout,
    };

    match tokio::time::timeout(remaining, extract(session, &task.action)).await {
        Err(_) => TaskOutcome::Timeout,
        Ok(Err(e)) => TaskOutcome::from_engine_error(e),
        Ok(Ok(payload)) => TaskOutcome::Success(payload),
    }
}

async fn extract(session: &mut dyn PageSession, spec: &ExtractSpec) -> Result<Value, EngineError> {
    match spec {
        ExtractSpec::Content => {
            session
                .evaluate("document.documentElement.outerHTML")
                .await
        }
        ExtractSpec::Title => {
            let title = session.title().await?;
            Ok(json!({ "title": title }))
        }
        ExtractSpec::Screenshot => {
            let data = session.screenshot().await?;
            Ok(json!({ "screenshot": data }))
        }
        ExtractSpec::Evaluate { script } => session.evaluate(script).await,
        ExtractSpec::CalendarEvents => {
            let events = calendar::scrape::harvest(session).await?;
            serde_json::to_value(events).map_err(|e| EngineError::ExtractionError(e.to_string()))
        }
    }
}

fn time_left(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}
