//! Schedule runner
//!
//! Fires the weekly calendar scrape. A 60 s poll loop checks whether the
//! configured weekday/time has been reached in the configured UTC offset's
//! local day and fires at most once per local date, so a boot later the
//! same day still catches up on a missed trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Schedule configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Enable the weekly scrape
    pub enabled: bool,
    /// Day of the week to fire (0 = Monday, 6 = Sunday)
    pub day: u8,
    /// Fire time (HH:MM format) in the offset's local clock
    pub time: String,
    /// Local clock offset from UTC in hours (7 = Bangkok)
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            day: 6,
            time: "00:00".to_string(),
            utc_offset_hours: 7,
        }
    }
}

impl ScheduleConfig {
    fn fire_time(&self) -> NaiveTime {
        match NaiveTime::parse_from_str(&self.time, "%H:%M") {
            Ok(t) => t,
            Err(_) => {
                warn!("Invalid schedule time {:?}, using 00:00", self.time);
                NaiveTime::MIN
            }
        }
    }

    fn fire_day(&self) -> u8 {
        if self.day <= 6 {
            self.day
        } else {
            warn!("Invalid schedule day {}, using Sunday", self.day);
            6
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }

    /// The local date the schedule is due for at `now`, if the configured
    /// weekday has arrived and the fire time has passed in the local clock.
    pub fn due_date_at(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        if !self.enabled {
            return None;
        }

        let local = now.with_timezone(&self.offset());
        let today = match local.weekday() {
            Weekday::Mon => 0,
            Weekday::Tue => 1,
            Weekday::Wed => 2,
            Weekday::Thu => 3,
            Weekday::Fri => 4,
            Weekday::Sat => 5,
            Weekday::Sun => 6,
        };
        if today != self.fire_day() {
            return None;
        }
        if local.time() < self.fire_time() {
            return None;
        }
        Some(local.date_naive())
    }
}

/// Weekly trigger for the calendar scrape
pub struct Scheduler {
    config: Arc<RwLock<ScheduleConfig>>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(ScheduleConfig::default())
    }

    pub fn with_config(config: ScheduleConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn set_config(&self, config: ScheduleConfig) {
        *self.config.write().await = config;
    }

    pub async fn get_config(&self) -> ScheduleConfig {
        self.config.read().await.clone()
    }

    /// Start the monitoring loop. `on_fire` runs at most once per due local
    /// date; the loop polls every minute until `stop_monitor`.
    pub async fn start_monitor<F, Fut>(&self, on_fire: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        info!("Starting schedule monitor");
        self.running.store(true, Ordering::Relaxed);

        let config = self.config.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut last_fired: Option<NaiveDate> = None;

            while running.load(Ordering::Relaxed) {
                let due = {
                    let cfg = config.read().await;
                    cfg.due_date_at(Utc::now())
                };

                match due {
                    Some(date) if last_fired != Some(date) => {
                        info!("Schedule due for {} - firing", date);
                        on_fire().await;
                        last_fired = Some(date);
                    }
                    Some(date) => {
                        debug!("Schedule already fired for {}", date);
                    }
                    None => {}
                }

                tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
            }

            info!("Schedule monitor stopped");
        });
    }

    pub fn stop_monitor(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
