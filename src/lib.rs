//! ecocal-server
//!
//! An HTTP service that shares one headless Chromium engine across
//! serialized browser tasks, each under a hard wall-clock budget, and uses
//! it to harvest the Forex Factory economic calendar on a weekly schedule.

pub mod calendar;
pub mod engine;
pub mod executor;
pub mod pool;
pub mod scheduler;
pub mod stats;
pub mod supervisor;
pub mod task;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use calendar::NewsStore;
use engine::{ChromiumDriver, ChromiumSettings, EngineHandle, EngineSettings};
use pool::{PoolSettings, SessionPool};
use scheduler::{ScheduleConfig, Scheduler};
use stats::TaskStats;

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Maximum concurrent browser tasks (1 fully serializes requests)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Wall-clock budget per request, queue wait included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Budget for the engine to reach a ready state after launch
    #[serde(default = "default_engine_startup_timeout")]
    pub engine_startup_timeout_seconds: u64,
    /// Per-navigation bound inside a session
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_seconds: u64,
    /// First restart retry delay
    #[serde(default = "default_restart_backoff_initial")]
    pub restart_backoff_initial_seconds: u64,
    /// Restart retry delay cap
    #[serde(default = "default_restart_backoff_max")]
    pub restart_backoff_max_seconds: u64,
    /// Supervisor probe interval
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,

    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Explicit browser binary path; auto-detected when null
    #[serde(default)]
    pub chrome_executable: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Calendar page to harvest
    #[serde(default = "default_scrape_url")]
    pub scrape_url: String,
    /// Path of the persisted news file
    #[serde(default = "default_news_file")]
    pub news_file: String,

    /// Weekly scrape schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_concurrency_limit() -> usize { 1 }
fn default_request_timeout() -> u64 { 300 }
fn default_engine_startup_timeout() -> u64 { 30 }
fn default_navigation_timeout() -> u64 { 60 }
fn default_restart_backoff_initial() -> u64 { 1 }
fn default_restart_backoff_max() -> u64 { 30 }
fn default_health_check_interval() -> u64 { 60 }
fn default_headless() -> bool { true }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string()
}
fn default_scrape_url() -> String {
    "https://www.forexfactory.com/calendar".to_string()
}
fn default_news_file() -> String {
    "weekly_news.json".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            request_timeout_seconds: default_request_timeout(),
            engine_startup_timeout_seconds: default_engine_startup_timeout(),
            navigation_timeout_seconds: default_navigation_timeout(),
            restart_backoff_initial_seconds: default_restart_backoff_initial(),
            restart_backoff_max_seconds: default_restart_backoff_max(),
            health_check_interval_seconds: default_health_check_interval(),
            headless: default_headless(),
            chrome_executable: None,
            user_agent: default_user_agent(),
            scrape_url: default_scrape_url(),
            news_file: default_news_file(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ecocal-server").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ecocal-server").join("config.json"))
    }

    /// Load config from file, falling back to defaults on any problem.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Application state shared across the service
pub struct AppState {
    /// Session pool owning the engine and all browser work
    pub pool: Arc<SessionPool>,
    /// Persisted calendar events
    pub store: Arc<NewsStore>,
    /// Task statistics
    pub stats: Arc<TaskStats>,
    /// Weekly scrape trigger
    pub scheduler: Arc<Scheduler>,
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,
    /// Gate for the background loops
    pub is_running: Arc<std::sync::atomic::AtomicBool>,
    /// Supervisor task handle (for awaiting on shutdown)
    pub supervisor_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AppState {
    /// Create new application state with loaded config
    pub fn new() -> Self {
        let config = AppConfig::load();
        Self::with_config(config)
    }

    /// Create application state from an explicit config. Engine and pool
    /// sizing (concurrency limit, engine timeouts) are fixed here; config
    /// updates to those fields apply on the next startup.
    pub fn with_config(config: AppConfig) -> Self {
        let driver = ChromiumDriver::new(ChromiumSettings {
            chrome_executable: config.chrome_executable.clone(),
            headless: config.headless,
            user_agent: config.user_agent.clone(),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_seconds),
            ..ChromiumSettings::default()
        });

        let engine = Arc::new(EngineHandle::new(
            Arc::new(driver),
            EngineSettings {
                startup_timeout: Duration::from_secs(config.engine_startup_timeout_seconds),
                ..EngineSettings::default()
            },
        ));

        let stats = Arc::new(TaskStats::new());
        let pool = SessionPool::new(
            engine,
            stats.clone(),
            PoolSettings {
                concurrency_limit: config.concurrency_limit,
                restart_backoff_initial: Duration::from_secs(config.restart_backoff_initial_seconds),
                restart_backoff_max: Duration::from_secs(config.restart_backoff_max_seconds),
            },
        );

        Self {
            pool,
            store: Arc::new(NewsStore::new(&config.news_file)),
            stats,
            scheduler: Arc::new(Scheduler::with_config(config.schedule.clone())),
            config: Arc::new(RwLock::new(config)),
            is_running: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            supervisor_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Apply and persist a new configuration. Live-read fields (request
    /// timeout, scrape URL, schedule) take effect immediately.
    pub async fn configure(&self, config: AppConfig) {
        self.scheduler.set_config(config.schedule.clone()).await;
        config.save();
        *self.config.write().await = config;
        info!("Application configured");
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging: console plus a daily rolling file when the platform
/// config dir is available.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "ecocal-server.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
