//! Engine supervisor that probes the shared browser and reports failures.
//!
//! Runs the full health probe on an interval while the pool is healthy. Two
//! consecutive probe failures escalate to the pool, which owns the actual
//! restart; one flaky probe only marks the engine Degraded and gets a
//! second chance. Every Nth tick also sweeps zombie browser processes left
//! behind by earlier engine generations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::pool::{PoolState, SessionPool};

/// Supervisor configuration
pub struct SupervisorConfig {
    /// How often to probe the engine (default: 60s)
    pub check_interval: Duration,
    /// Delay before the first probe after startup (default: 30s)
    pub initial_delay: Duration,
    /// Consecutive probe failures before reporting to the pool (default: 2)
    pub failure_threshold: u32,
    /// Run the zombie sweep every this many ticks (default: 10)
    pub zombie_sweep_every: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(30),
            failure_threshold: 2,
            zombie_sweep_every: 10,
        }
    }
}

/// Engine supervisor background task
pub struct EngineSupervisor;

impl EngineSupervisor {
    /// Start the supervisor loop. Runs until `is_running` becomes false.
    pub fn start(
        is_running: Arc<AtomicBool>,
        pool: Arc<SessionPool>,
        config: SupervisorConfig,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(config.initial_delay).await;

            if !is_running.load(Ordering::Relaxed) {
                return;
            }

            info!(
                "[Supervisor] Started engine monitoring (probe every {}s)",
                config.check_interval.as_secs()
            );

            let mut tick_counter: u64 = 0;
            let mut consecutive_failures: u32 = 0;

            while is_running.load(Ordering::Relaxed) {
                tokio::time::sleep(config.check_interval).await;

                if !is_running.load(Ordering::Relaxed) {
                    break;
                }

                tick_counter += 1;

                // Leave the engine alone while a restart is in flight.
                if pool.state() == PoolState::Healthy {
                    // Epoch read before the probe: if the engine restarts
                    // between probe and report, the report is stale and
                    // dropped by the pool.
                    let observed_epoch = pool.engine().epoch();
                    match pool.engine().health_check().await {
                        Ok(()) => {
                            consecutive_failures = 0;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(
                                "[Supervisor] Health check failed ({}/{}): {}",
                                consecutive_failures, config.failure_threshold, e
                            );
                            if consecutive_failures >= config.failure_threshold {
                                pool.report_engine_failure(observed_epoch);
                                consecutive_failures = 0;
                            }
                        }
                    }
                }

                if tick_counter % config.zombie_sweep_every == 0 {
                    let live_profile = pool.engine().profile_id().await;
                    let killed = super::zombie::cleanup_zombie_engines(live_profile.as_deref());
                    if killed > 0 {
                        warn!("[Supervisor] Cleaned up {} zombie browser processes", killed);
                    }
                }
            }

            info!("[Supervisor] Stopped monitoring");
        })
    }
}
