//! Session pool / serializer
//!
//! Bounds concurrent browser tasks with a fair semaphore (one slot by
//! default, fully serializing requests) and coordinates engine recovery.
//! Failure reports are debounced by engine epoch so a burst of queued tasks
//! observing the same dead engine triggers exactly one restart cycle, which
//! retries forever with capped backoff. While a restart is in flight new
//! tasks fail fast instead of queuing behind it.

pub mod backoff;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineError, EngineHandle};
use crate::executor;
use crate::stats::TaskStats;
use crate::task::{Task, TaskOutcome};

/// Pool-level recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolState {
    Healthy,
    Restarting,
}

/// Pool tunables
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum concurrent browser tasks; floored at 1.
    pub concurrency_limit: usize,
    pub restart_backoff_initial: Duration,
    pub restart_backoff_max: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
            restart_backoff_initial: Duration::from_secs(1),
            restart_backoff_max: Duration::from_secs(30),
        }
    }
}

/// Serializes browser tasks and owns engine recovery.
pub struct SessionPool {
    engine: Arc<EngineHandle>,
    slots: Arc<Semaphore>,
    restarting: AtomicBool,
    stats: Arc<TaskStats>,
    settings: PoolSettings,
}

impl SessionPool {
    pub fn new(engine: Arc<EngineHandle>, stats: Arc<TaskStats>, settings: PoolSettings) -> Arc<Self> {
        let slots = settings.concurrency_limit.max(1);
        Arc::new(Self {
            engine,
            slots: Arc::new(Semaphore::new(slots)),
            restarting: AtomicBool::new(false),
            stats,
            settings,
        })
    }

    pub fn state(&self) -> PoolState {
        if self.restarting.load(Ordering::SeqCst) {
            PoolState::Restarting
        } else {
            PoolState::Healthy
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    /// Start the engine for the first time. A failed start is not fatal:
    /// the restart loop takes over and the pool answers Unavailable until
    /// the engine comes up.
    pub async fn start_engine(self: &Arc<Self>) -> Result<(), EngineError> {
        match self.engine.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Initial engine start failed, entering recovery: {}", e);
                self.report_engine_failure(self.engine.epoch());
                Err(e)
            }
        }
    }

    /// Run one task through the pool: acquire a slot FIFO within the queue
    /// bound, execute under the absolute deadline, release the slot, and
    /// report any engine failure observed. The single entry point for all
    /// browser work.
    pub async fn submit(self: &Arc<Self>, task: Task) -> TaskOutcome {
        let started = Instant::now();
        let deadline = started + task.deadline;
        let outcome = self.submit_inner(&task, deadline).await;
        self.stats
            .record_outcome(&outcome, started.elapsed().as_millis() as u64);
        outcome
    }

    async fn submit_inner(self: &Arc<Self>, task: &Task, deadline: Instant) -> TaskOutcome {
        if self.state() == PoolState::Restarting {
            return TaskOutcome::Unavailable("engine is restarting".into());
        }

        // Queue wait and execution share the deadline; the queue bound is an
        // extra cap so a caller can give up early without burning its budget.
        let wait = task.queue_timeout.min(task.deadline);
        let permit = match tokio::time::timeout(wait, self.slots.clone().acquire_owned()).await {
            Err(_) => {
                debug!("Task {} left the queue after {:?}", task.url, wait);
                return TaskOutcome::QueueTimeout;
            }
            // The semaphore is never closed; keep the error mapped anyway.
            Ok(Err(_)) => return TaskOutcome::Unavailable("pool shut down".into()),
            Ok(Ok(permit)) => permit,
        };

        // The engine may have died while this task sat in the queue.
        if self.state() == PoolState::Restarting {
            return TaskOutcome::Unavailable("engine is restarting".into());
        }

        // Remember which engine this task ran against. A slow task can
        // unwind after a restart has already replaced the engine; its
        // failure report must not take the recovered engine down with it.
        let observed_epoch = self.engine.epoch();
        let outcome = executor::execute(&self.engine, task, deadline).await;
        drop(permit);

        if let TaskOutcome::EngineFailure(msg) = &outcome {
            warn!("Task observed engine failure: {}", msg);
            self.report_engine_failure(observed_epoch);
        }
        outcome
    }

    /// Report that the engine at `observed_epoch` is dead. Debounced: a
    /// report against an epoch the engine has already moved past, or while
    /// a restart is in flight, is dropped.
    pub fn report_engine_failure(self: &Arc<Self>, observed_epoch: u64) {
        if self.engine.epoch() != observed_epoch {
            debug!(
                "Stale failure report for epoch {} (engine at {})",
                observed_epoch,
                self.engine.epoch()
            );
            return;
        }
        if self
            .restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Restart already in flight, dropping failure report");
            return;
        }

        warn!("Engine failure reported at epoch {}, restarting", observed_epoch);
        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_restart_loop().await;
        });
    }

    /// Shut the dead engine down (failing any outstanding sessions), then
    /// retry starts forever with capped backoff. The pool never gives up.
    async fn run_restart_loop(&self) {
        self.engine.shutdown().await;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.engine.start().await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff::calculate_backoff_with_jitter(
                        attempt,
                        self.settings.restart_backoff_initial.as_millis() as u64,
                        self.settings.restart_backoff_max.as_millis() as u64,
                    );
                    error!(
                        "Engine restart attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.stats.record_restart();
        self.restarting.store(false, Ordering::SeqCst);
        info!("Engine recovered after {} attempt(s)", attempt);
    }

    /// Graceful shutdown: stop the engine. In-flight tasks fail with
    /// engine errors; new ones are rejected by the dead engine state.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeDriver;
    use crate::engine::EngineSettings;
    use crate::task::ExtractSpec;

    fn pool_with(driver: Arc<FakeDriver>, limit: usize) -> Arc<SessionPool> {
        let engine = Arc::new(EngineHandle::new(
            driver,
            EngineSettings {
                startup_timeout: Duration::from_millis(500),
                probe_timeout: Duration::from_millis(100),
            },
        ));
        SessionPool::new(
            engine,
            Arc::new(TaskStats::new()),
            PoolSettings {
                concurrency_limit: limit,
                restart_backoff_initial: Duration::from_millis(10),
                restart_backoff_max: Duration::from_millis(50),
            },
        )
    }

    fn task(deadline_ms: u64) -> Task {
        Task::new(
            "https://example.com/",
            ExtractSpec::Title,
            Duration::from_millis(deadline_ms),
        )
    }

    async fn wait_for_healthy(pool: &Arc<SessionPool>) {
        for _ in 0..100 {
            if pool.state() == PoolState::Healthy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool did not recover");
    }

    #[tokio::test]
    async fn test_submit_success_and_stats() {
        let driver = FakeDriver::new();
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        let outcome = pool.submit(task(1_000)).await;
        assert!(outcome.is_success());
        assert_eq!(pool.stats.success_count(), 1);
        assert_eq!(driver.shared.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_limit_one_never_overlaps_sessions() {
        let driver = FakeDriver::new();
        driver
            .shared
            .hang_navigation("https://example.com/", Duration::from_millis(100));
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        let a = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(task(2_000)).await })
        };
        let b = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(task(2_000)).await })
        };

        assert!(a.await.unwrap().is_success());
        assert!(b.await.unwrap().is_success());
        assert_eq!(driver.shared.max_active_sessions(), 1);
        assert_eq!(driver.shared.open_count(), 2);
    }

    #[tokio::test]
    async fn test_queue_timeout_while_slot_held() {
        let driver = FakeDriver::new();
        driver
            .shared
            .hang_navigation("https://example.com/", Duration::from_millis(300));
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        let a = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(task(2_000)).await })
        };
        // Let A take the slot before B queues.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let b_task = task(2_000).with_queue_timeout(Duration::from_millis(50));
        let b = pool.submit(b_task).await;
        assert_eq!(b, TaskOutcome::QueueTimeout);
        // B gave up while A was still running.
        assert!(a.await.unwrap().is_success());
        assert_eq!(driver.shared.open_count(), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_triggers_single_restart() {
        let driver = FakeDriver::new();
        let pool = pool_with(driver.clone(), 2);
        pool.start_engine().await.unwrap();
        let epoch = pool.engine.epoch();

        driver.shared.kill_engine();
        // Concurrent reports from tasks that all saw the same dead engine.
        pool.report_engine_failure(epoch);
        pool.report_engine_failure(epoch);
        pool.report_engine_failure(epoch);

        wait_for_healthy(&pool).await;
        // One initial launch plus exactly one restart.
        assert_eq!(driver.shared.launch_count(), 2);
        assert_eq!(pool.stats.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_failure_report_is_dropped() {
        let driver = FakeDriver::new();
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        // Epoch 0 predates the running engine (epoch 1).
        pool.report_engine_failure(0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.state(), PoolState::Healthy);
        assert_eq!(driver.shared.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_tasks_fail_fast_while_restarting() {
        let driver = FakeDriver::new();
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        // Hold the restart loop down for a few cycles.
        driver.shared.fail_next_launches(3);
        driver.shared.kill_engine();
        pool.report_engine_failure(pool.engine.epoch());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = pool.submit(task(1_000)).await;
        assert!(matches!(outcome, TaskOutcome::Unavailable(_)));

        wait_for_healthy(&pool).await;
        let outcome = pool.submit(task(1_000)).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_mid_task_crash_recovers_for_next_task() {
        let driver = FakeDriver::new();
        driver
            .shared
            .hang_navigation("https://example.com/", Duration::from_millis(100));
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        let running = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(task(2_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        driver.shared.kill_engine();

        let outcome = running.await.unwrap();
        assert!(matches!(outcome, TaskOutcome::EngineFailure(_)));

        wait_for_healthy(&pool).await;
        driver.shared.hang_navigation("https://example.com/", Duration::ZERO);
        let outcome = pool.submit(task(2_000)).await;
        assert!(outcome.is_success());
        assert_eq!(pool.stats.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_late_failure_report_spares_recovered_engine() {
        let driver = FakeDriver::new();
        driver
            .shared
            .hang_navigation("https://example.com/", Duration::from_millis(300));
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();
        let first_epoch = pool.engine.epoch();

        // A hangs in navigation on the first engine.
        let a = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(task(2_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The engine dies and recovery completes while A is still unwinding.
        driver.shared.kill_engine();
        pool.report_engine_failure(first_epoch);
        wait_for_healthy(&pool).await;
        assert_eq!(driver.shared.launch_count(), 2);

        // A comes back with the failure it saw on the old engine; the report
        // is against the old epoch and must not restart the new engine.
        let outcome = a.await.unwrap();
        assert!(matches!(outcome, TaskOutcome::EngineFailure(_)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.state(), PoolState::Healthy);
        assert_eq!(driver.shared.launch_count(), 2);
        assert_eq!(pool.stats.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_start_enters_recovery() {
        let driver = FakeDriver::new();
        driver.shared.fail_next_launches(2);
        let pool = pool_with(driver.clone(), 1);

        assert!(pool.start_engine().await.is_err());
        wait_for_healthy(&pool).await;
        let outcome = pool.submit(task(1_000)).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_submit_returns_within_deadline() {
        let driver = FakeDriver::new();
        driver
            .shared
            .hang_navigation("https://example.com/", Duration::from_secs(10));
        let pool = pool_with(driver.clone(), 1);
        pool.start_engine().await.unwrap();

        let started = Instant::now();
        let outcome = pool.submit(task(200)).await;
        assert_eq!(outcome, TaskOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
