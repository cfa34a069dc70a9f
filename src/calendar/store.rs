//! News store
//!
//! The last successful scrape, persisted as pretty JSON on disk and cached
//! in memory behind a short-critical-section lock. The file is the only
//! state the service keeps between restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::scrape::CalendarEvent;

pub struct NewsStore {
    path: PathBuf,
    cache: RwLock<Option<Vec<CalendarEvent>>>,
}

impl NewsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.cache.read().is_some() || self.path.exists()
    }

    /// Cache-through read. None when nothing has ever been scraped.
    pub fn load(&self) -> Option<Vec<CalendarEvent>> {
        if let Some(cached) = self.cache.read().as_ref() {
            return Some(cached.clone());
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read news file {:?}: {}", self.path, e);
                }
                return None;
            }
        };

        match serde_json::from_str::<Vec<CalendarEvent>>(&content) {
            Ok(events) => {
                *self.cache.write() = Some(events.clone());
                Some(events)
            }
            Err(e) => {
                warn!("Failed to parse news file {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Persist a scrape result and refresh the cache.
    pub fn save(&self, events: &[CalendarEvent]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("create news dir: {}", e))?;
            }
        }
        let content = serde_json::to_string_pretty(events)
            .map_err(|e| format!("serialize news: {}", e))?;
        std::fs::write(&self.path, content).map_err(|e| format!("write news file: {}", e))?;

        *self.cache.write() = Some(events.to_vec());
        info!("Saved {} events to {:?}", events.len(), self.path);
        Ok(())
    }

    /// File modification time as UTC, for the API envelope.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<CalendarEvent> {
        vec![CalendarEvent {
            event_time_utc: "2026-08-28T13:30:00+00:00".into(),
            currency: "USD".into(),
            impact: "HIGH".into(),
            event: "Non-Farm Employment Change".into(),
        }]
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("ecocal-server-tests")
            .join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_loads_none() {
        let store = NewsStore::new(temp_path("missing"));
        assert!(!store.exists());
        assert!(store.load().is_none());
        assert!(store.last_updated().is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let path = temp_path("round-trip");
        let store = NewsStore::new(&path);
        store.save(&sample()).unwrap();

        assert!(store.exists());
        assert_eq!(store.load().unwrap(), sample());
        assert!(store.last_updated().is_some());

        // A fresh store over the same file reads it back from disk.
        let reopened = NewsStore::new(&path);
        assert_eq!(reopened.load().unwrap(), sample());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_loads_none() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let store = NewsStore::new(&path);
        assert!(store.load().is_none());

        let _ = std::fs::remove_file(&path);
    }
}
