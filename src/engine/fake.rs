//! Programmable in-memory engine for tests
//!
//! Scriptable launch failures/delays, per-URL navigation hangs and a kill
//! switch, plus counters for every session release path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::errors::EngineError;
use super::handle::{EngineDriver, EngineProcess};
use super::session::{PageSession, SessionStatus};

/// Shared scripting knobs and counters, visible to the test after the
/// driver has been handed to the engine handle.
#[derive(Default)]
pub struct FakeShared {
    launch_count: AtomicU64,
    open_count: AtomicU64,
    close_count: AtomicU64,
    abort_count: AtomicU64,
    active_sessions: AtomicI64,
    max_active_sessions: AtomicI64,
    launch_failures_left: AtomicU64,
    probes_fail: AtomicBool,
    launch_delay: Mutex<Duration>,
    checkout_delay: Mutex<Duration>,
    nav_hangs: Mutex<HashMap<String, Duration>>,
    nav_failure: Mutex<Option<String>>,
    eval_result: Mutex<Value>,
    current_alive: Mutex<Option<Arc<AtomicBool>>>,
    released_statuses: Mutex<Vec<SessionStatus>>,
}

impl FakeShared {
    pub fn launch_count(&self) -> u64 {
        self.launch_count.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> u64 {
        self.abort_count.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently open sessions.
    pub fn max_active_sessions(&self) -> i64 {
        self.max_active_sessions.load(Ordering::SeqCst)
    }

    pub fn released_statuses(&self) -> Vec<SessionStatus> {
        self.released_statuses.lock().clone()
    }

    /// Fail the next `n` launch attempts with StartFailure.
    pub fn fail_next_launches(&self, n: u64) {
        self.launch_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock() = delay;
    }

    pub fn set_checkout_delay(&self, delay: Duration) {
        *self.checkout_delay.lock() = delay;
    }

    pub fn fail_probes(&self, fail: bool) {
        self.probes_fail.store(fail, Ordering::SeqCst);
    }

    /// Make navigation to `url` sleep for `delay` before returning.
    pub fn hang_navigation(&self, url: &str, delay: Duration) {
        self.nav_hangs.lock().insert(url.to_string(), delay);
    }

    /// Make every navigation fail with NavigationError(msg).
    pub fn fail_navigation(&self, msg: Option<&str>) {
        *self.nav_failure.lock() = msg.map(|m| m.to_string());
    }

    pub fn set_eval_result(&self, value: Value) {
        *self.eval_result.lock() = value;
    }

    /// Flip the current process's liveness flag, as if Chrome crashed.
    pub fn kill_engine(&self) {
        if let Some(flag) = self.current_alive.lock().as_ref() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    fn take_launch_failure(&self) -> bool {
        let mut left = self.launch_failures_left.load(Ordering::SeqCst);
        while left > 0 {
            match self.launch_failures_left.compare_exchange(
                left,
                left - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => left = actual,
            }
        }
        false
    }
}

pub struct FakeDriver {
    pub shared: Arc<FakeShared>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(FakeShared::default()),
        })
    }
}

#[async_trait]
impl EngineDriver for FakeDriver {
    async fn launch(&self) -> Result<Arc<dyn EngineProcess>, EngineError> {
        let delay = *self.shared.launch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.shared.take_launch_failure() {
            return Err(EngineError::StartFailure("scripted launch failure".into()));
        }
        let alive = Arc::new(AtomicBool::new(true));
        *self.shared.current_alive.lock() = Some(alive.clone());
        self.shared.launch_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeProcess {
            shared: self.shared.clone(),
            alive,
        }))
    }
}

struct FakeProcess {
    shared: Arc<FakeShared>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl EngineProcess for FakeProcess {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn probe(&self) -> Result<(), EngineError> {
        if !self.is_alive() {
            return Err(EngineError::Disconnected("fake engine killed".into()));
        }
        if self.shared.probes_fail.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected("scripted probe failure".into()));
        }
        Ok(())
    }

    async fn open_session(&self) -> Result<Box<dyn PageSession>, EngineError> {
        let delay = *self.shared.checkout_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.is_alive() {
            return Err(EngineError::Disconnected("fake engine killed".into()));
        }
        self.shared.open_count.fetch_add(1, Ordering::SeqCst);
        let active = self.shared.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .max_active_sessions
            .fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Active,
            shared: self.shared.clone(),
            alive: self.alive.clone(),
        }))
    }

    fn profile_id(&self) -> Option<String> {
        None
    }

    async fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct FakeSession {
    id: String,
    status: SessionStatus,
    shared: Arc<FakeShared>,
    alive: Arc<AtomicBool>,
}

impl FakeSession {
    fn release(&mut self, next: SessionStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = next;
        self.shared.active_sessions.fetch_sub(1, Ordering::SeqCst);
        match next {
            SessionStatus::Aborted => {
                self.shared.abort_count.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.shared.close_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.shared.released_statuses.lock().push(next);
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Disconnected("fake engine killed".into()))
        }
    }
}

#[async_trait]
impl PageSession for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        let hang = self.shared.nav_hangs.lock().get(url).copied();
        if let Some(delay) = hang {
            tokio::time::sleep(delay).await;
        }
        self.ensure_alive()?;
        if let Some(msg) = self.shared.nav_failure.lock().clone() {
            return Err(EngineError::NavigationError(msg));
        }
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value, EngineError> {
        self.ensure_alive()?;
        Ok(self.shared.eval_result.lock().clone())
    }

    async fn title(&mut self) -> Result<Option<String>, EngineError> {
        self.ensure_alive()?;
        Ok(Some("fake page".into()))
    }

    async fn screenshot(&mut self) -> Result<String, EngineError> {
        self.ensure_alive()?;
        Ok("ZmFrZQ==".into())
    }

    async fn close(&mut self) {
        self.release(SessionStatus::Closed);
    }

    async fn abort(&mut self) {
        self.release(SessionStatus::Aborted);
    }
}
