//! Engine lifecycle handle
//!
//! Supervises exactly one underlying browser process. The driver is
//! injectable so the executor and pool run unchanged against a fake engine
//! in tests. All restart/shutdown calls come from the session pool; the
//! handle itself never decides to recover.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::errors::EngineError;
use super::session::PageSession;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Starting,
    Ready,
    Degraded,
    Dead,
}

/// Launches engine processes.
#[async_trait]
pub trait EngineDriver: Send + Sync {
    /// Spawn the engine and return once it accepts commands.
    async fn launch(&self) -> Result<Arc<dyn EngineProcess>, EngineError>;
}

/// One live engine process.
#[async_trait]
pub trait EngineProcess: Send + Sync {
    /// Cheap liveness flag; flips false the moment the transport dies.
    fn is_alive(&self) -> bool;

    /// Round-trip probe against the live process.
    async fn probe(&self) -> Result<(), EngineError>;

    /// Allocate a fresh isolated browsing context with one page.
    async fn open_session(&self) -> Result<Box<dyn PageSession>, EngineError>;

    /// Profile directory name of this process, used to spare it from the
    /// zombie sweep. None for engines without an on-disk profile.
    fn profile_id(&self) -> Option<String>;

    /// Terminate the process and release its resources. Idempotent.
    async fn terminate(&self);
}

/// Timeouts governing the handle itself
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Budget for the engine to reach a ready state after launch.
    pub startup_timeout: Duration,
    /// Budget for a single health probe round-trip.
    pub probe_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle owning the lifecycle of one engine process.
pub struct EngineHandle {
    driver: Arc<dyn EngineDriver>,
    process: RwLock<Option<Arc<dyn EngineProcess>>>,
    state: parking_lot::RwLock<EngineState>,
    /// Incremented on every successful start; stale failure reports carry an
    /// older value and are dropped by the pool.
    epoch: AtomicU64,
    settings: EngineSettings,
}

impl EngineHandle {
    pub fn new(driver: Arc<dyn EngineDriver>, settings: EngineSettings) -> Self {
        Self {
            driver,
            process: RwLock::new(None),
            state: parking_lot::RwLock::new(EngineState::Starting),
            epoch: AtomicU64::new(0),
            settings,
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state.write();
        if *state != next {
            debug!("Engine state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Launch the engine and wait for it to become ready, bounded by the
    /// startup timeout. On success the epoch advances and the state is Ready.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.set_state(EngineState::Starting);

        let launched =
            tokio::time::timeout(self.settings.startup_timeout, self.driver.launch()).await;

        match launched {
            Err(_) => {
                self.set_state(EngineState::Dead);
                Err(EngineError::StartFailure(format!(
                    "engine did not become ready within {:?}",
                    self.settings.startup_timeout
                )))
            }
            Ok(Err(e)) => {
                self.set_state(EngineState::Dead);
                Err(e)
            }
            Ok(Ok(process)) => {
                let old = self.process.write().await.replace(process);
                if let Some(old) = old {
                    old.terminate().await;
                }
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                self.set_state(EngineState::Ready);
                info!("Engine ready (epoch {})", epoch);
                Ok(())
            }
        }
    }

    /// Liveness flag plus a bounded round-trip probe. A failure marks the
    /// engine Degraded; a later success restores Ready.
    pub async fn health_check(&self) -> Result<(), EngineError> {
        let process = self.process.read().await.clone();
        let process = match process {
            Some(p) => p,
            None => return Err(EngineError::Unavailable("no engine process".into())),
        };

        if !process.is_alive() {
            self.set_state(EngineState::Degraded);
            return Err(EngineError::Disconnected(
                "engine event stream ended".into(),
            ));
        }

        match tokio::time::timeout(self.settings.probe_timeout, process.probe()).await {
            Err(_) => {
                self.set_state(EngineState::Degraded);
                Err(EngineError::Disconnected(format!(
                    "probe timed out after {:?}",
                    self.settings.probe_timeout
                )))
            }
            Ok(Err(e)) => {
                self.set_state(EngineState::Degraded);
                Err(e)
            }
            Ok(Ok(())) => {
                if self.state() == EngineState::Degraded {
                    info!("Engine probe recovered, back to Ready");
                    self.set_state(EngineState::Ready);
                }
                Ok(())
            }
        }
    }

    /// Allocate a fresh isolated session, bounded by `bound`. Fails fast
    /// when the engine is not Ready.
    pub async fn checkout_session(
        &self,
        bound: Duration,
    ) -> Result<Box<dyn PageSession>, EngineError> {
        let state = self.state();
        if state != EngineState::Ready {
            return Err(EngineError::Unavailable(format!(
                "engine is {:?}",
                state
            )));
        }

        let process = self.process.read().await.clone();
        let process = match process {
            Some(p) => p,
            None => return Err(EngineError::Unavailable("no engine process".into())),
        };

        if !process.is_alive() {
            self.set_state(EngineState::Degraded);
            return Err(EngineError::Disconnected(
                "engine event stream ended".into(),
            ));
        }

        match tokio::time::timeout(bound, process.open_session()).await {
            Err(_) => Err(EngineError::CheckoutTimeout(bound)),
            Ok(Err(e)) => {
                if e.is_engine_fatal() {
                    self.set_state(EngineState::Degraded);
                }
                Err(e)
            }
            Ok(Ok(session)) => Ok(session),
        }
    }

    /// Terminate the current process (if any) and start a fresh one. The
    /// sole recovery path for a wedged or crashed engine; called only by
    /// the session pool.
    pub async fn restart(&self) -> Result<(), EngineError> {
        warn!("Engine restart requested");
        self.shutdown().await;
        self.start().await
    }

    /// Terminate the process and mark the engine Dead. Outstanding sessions
    /// fail on their next operation. Idempotent.
    pub async fn shutdown(&self) {
        let process = self.process.write().await.take();
        self.set_state(EngineState::Dead);
        if let Some(process) = process {
            process.terminate().await;
            info!("Engine terminated");
        }
    }

    /// Profile directory name of the live process, if any.
    pub async fn profile_id(&self) -> Option<String> {
        self.process.read().await.as_ref().and_then(|p| p.profile_id())
    }
}
