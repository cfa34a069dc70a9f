//! ecocal-server entrypoint
//!
//! Starts the browser engine behind the session pool, the engine
//! supervisor, the weekly scrape schedule, and the HTTP server.
//!
//! Environment variables:
//! - `PORT` - Server port (default: 8000)
//! - `RUST_LOG` - Log filter (default: info)

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use ecocal::supervisor::{EngineSupervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = ecocal::init_logging();

    info!("Starting ecocal-server");
    if let Some(dir) = ecocal::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let state = Arc::new(ecocal::AppState::new());

    // Verify the browser binary before accepting any traffic. A missing
    // browser is a deployment error and fatal; a browser that exists but
    // will not launch is handled by the pool's restart loop instead.
    {
        let config = state.config.read().await;
        let binary = ecocal::engine::verify_browser_binary(config.chrome_executable.as_deref())
            .context("browser binary preflight failed")?;
        info!("Browser binary: {}", binary.display());
    }

    if let Err(e) = state.pool.start_engine().await {
        warn!("Engine not up yet, serving 503 until recovery completes: {}", e);
    }

    let supervisor = {
        let interval = state.config.read().await.health_check_interval_seconds;
        EngineSupervisor::start(
            state.is_running.clone(),
            state.pool.clone(),
            SupervisorConfig {
                check_interval: Duration::from_secs(interval),
                ..SupervisorConfig::default()
            },
        )
    };
    *state.supervisor_handle.lock().await = Some(supervisor);

    {
        let scrape_state = state.clone();
        state
            .scheduler
            .start_monitor(move || {
                let state = scrape_state.clone();
                async move {
                    run_scrape(&state).await;
                }
            })
            .await;
    }

    if !state.store.exists() {
        info!("No existing news file, running initial scrape in the background");
        let scrape_state = state.clone();
        tokio::spawn(async move {
            let (url, deadline) = {
                let config = scrape_state.config.read().await;
                (config.scrape_url.clone(), config.request_timeout())
            };
            // Waits for the engine and retries, so a rough first boot
            // still ends with the news file populated.
            ecocal::calendar::refresh_news_until_stored(
                &scrape_state.pool,
                &scrape_state.store,
                &url,
                deadline,
                Duration::from_secs(30),
                &scrape_state.is_running,
            )
            .await;
        });
    }

    let server = {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = ecocal::web::start_server(state, port).await {
                error!("Web server error: {}", e);
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    state.is_running.store(false, Ordering::Relaxed);
    state.scheduler.stop_monitor();
    state.pool.shutdown().await;
    server.abort();

    info!("ecocal-server stopped");
    Ok(())
}

async fn run_scrape(state: &Arc<ecocal::AppState>) {
    let (url, deadline) = {
        let config = state.config.read().await;
        (config.scrape_url.clone(), config.request_timeout())
    };
    match ecocal::calendar::refresh_news(&state.pool, &state.store, &url, deadline).await {
        Ok(count) => info!("Scrape saved {} events", count),
        Err(e) => warn!("Scrape failed: {}", e),
    }
}
