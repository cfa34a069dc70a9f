//! Lock-free task statistics using atomic operations
//!
//! One counter per outcome class plus engine restart count, updated by the
//! session pool without mutex contention and snapshotted for the stats
//! endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::task::TaskOutcome;

/// Counters across all tasks served by this process
#[derive(Debug, Default)]
pub struct TaskStats {
    pub submitted: AtomicU64,
    pub success: AtomicU64,
    pub timeouts: AtomicU64,
    pub queue_timeouts: AtomicU64,
    pub unavailable: AtomicU64,
    pub engine_failures: AtomicU64,
    pub task_errors: AtomicU64,
    pub engine_restarts: AtomicU64,
    pub total_latency_ms: AtomicU64,
    pub start_time: AtomicU64,
}

impl TaskStats {
    pub fn new() -> Self {
        Self {
            start_time: AtomicU64::new(unix_now()),
            ..Default::default()
        }
    }

    /// Record one finished task and how long it held the caller.
    pub fn record_outcome(&self, outcome: &TaskOutcome, latency_ms: u64) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let counter = match outcome {
            TaskOutcome::Success(_) => &self.success,
            TaskOutcome::Timeout => &self.timeouts,
            TaskOutcome::QueueTimeout => &self.queue_timeouts,
            TaskOutcome::Unavailable(_) => &self.unavailable,
            TaskOutcome::EngineFailure(_) => &self.engine_failures,
            TaskOutcome::TaskError(_) => &self.task_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed engine restart cycle.
    pub fn record_restart(&self) {
        self.engine_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn restart_count(&self) -> u64 {
        self.engine_restarts.load(Ordering::Relaxed)
    }

    /// Average wall-clock time per task in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        let submitted = self.submitted.load(Ordering::Relaxed);
        if submitted == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / submitted as f64
    }

    /// Success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.submitted.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.success.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        unix_now().saturating_sub(self.start_time.load(Ordering::Relaxed))
    }

    /// Get snapshot for serialization
    pub fn snapshot(&self) -> TaskStatsSnapshot {
        TaskStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            queue_timeouts: self.queue_timeouts.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            engine_failures: self.engine_failures.load(Ordering::Relaxed),
            task_errors: self.task_errors.load(Ordering::Relaxed),
            engine_restarts: self.engine_restarts.load(Ordering::Relaxed),
            average_latency_ms: self.average_latency_ms(),
            success_rate: self.success_rate(),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serializable snapshot of task stats
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatsSnapshot {
    pub submitted: u64,
    pub success: u64,
    pub timeouts: u64,
    pub queue_timeouts: u64,
    pub unavailable: u64,
    pub engine_failures: u64,
    pub task_errors: u64,
    pub engine_restarts: u64,
    pub average_latency_ms: f64,
    pub success_rate: f64,
    pub uptime_seconds: u64,
}
