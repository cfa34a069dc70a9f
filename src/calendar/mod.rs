//! Economic calendar subsystem
//!
//! The concrete business action behind the generic task executor: harvest
//! high-impact events from the Forex Factory weekly calendar, keep the last
//! good result on disk, and refresh it on schedule or on demand.

pub mod scrape;
pub mod store;

pub use scrape::CalendarEvent;
pub use store::NewsStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::EngineState;
use crate::pool::{PoolState, SessionPool};
use crate::task::{ExtractSpec, Task, TaskOutcome};

/// Poll interval while waiting for the engine to come up at boot.
const ENGINE_POLL: Duration = Duration::from_secs(1);

/// Run a full calendar scrape through the pool and persist the result.
///
/// A failed or empty scrape never overwrites a previously stored non-empty
/// result; the last good harvest keeps serving until a better one lands.
/// Returns the number of events saved.
pub async fn refresh_news(
    pool: &Arc<SessionPool>,
    store: &NewsStore,
    url: &str,
    deadline: Duration,
) -> Result<usize, String> {
    info!("Starting calendar scrape of {}", url);
    let task = Task::new(url, ExtractSpec::CalendarEvents, deadline);

    let events: Vec<CalendarEvent> = match pool.submit(task).await {
        TaskOutcome::Success(payload) => serde_json::from_value(payload)
            .map_err(|e| format!("unexpected scrape payload: {}", e))?,
        other => return Err(format!("scrape failed: {:?}", other)),
    };

    if events.is_empty() && store.load().map(|e| !e.is_empty()).unwrap_or(false) {
        warn!("Scrape returned no events; keeping previous result");
        return Ok(0);
    }

    store.save(&events)?;
    Ok(events.len())
}

/// Boot-time scrape: wait for the engine to come up, then run
/// [`refresh_news`], retrying failures until the store holds data or
/// `is_running` clears. A first boot where the initial engine start needs
/// a few recovery cycles still ends up with a populated news file.
pub async fn refresh_news_until_stored(
    pool: &Arc<SessionPool>,
    store: &NewsStore,
    url: &str,
    deadline: Duration,
    retry_delay: Duration,
    is_running: &AtomicBool,
) {
    while is_running.load(Ordering::Relaxed) && !store.exists() {
        if pool.state() != PoolState::Healthy || pool.engine().state() != EngineState::Ready {
            tokio::time::sleep(ENGINE_POLL).await;
            continue;
        }
        match refresh_news(pool, store, url, deadline).await {
            Ok(_) => break,
            Err(e) => {
                warn!("Boot scrape failed, retrying in {:?}: {}", retry_delay, e);
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
