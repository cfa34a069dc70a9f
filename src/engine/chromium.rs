//! Chromium-backed engine driver
//!
//! Launches one headless Chromium over CDP and hands out one isolated
//! browsing context + page per session. The CDP event handler runs in a
//! background task; when that stream ends, Chrome is gone and the liveness
//! flag flips so in-flight sessions fail with Disconnected.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::EngineError;
use super::handle::{EngineDriver, EngineProcess};
use super::session::{PageSession, SessionStatus};

/// Find a Chrome/Chromium executable on the system
fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Resolve and sanity-check the browser binary. Called once at startup so a
/// missing browser fails the process before it accepts traffic, and again on
/// every launch.
pub fn verify_browser_binary(explicit: Option<&str>) -> Result<PathBuf, EngineError> {
    let path = match explicit {
        Some(p) => PathBuf::from(p),
        None => find_chrome().ok_or_else(|| {
            EngineError::StartFailure(
                "no Chrome/Chromium binary found; install one or set chromeExecutable".into(),
            )
        })?,
    };

    if !path.exists() {
        return Err(EngineError::StartFailure(format!(
            "browser binary not found at {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.permissions().mode() & 0o111 == 0 => {
                warn!("Browser binary {} is not executable", path.display());
            }
            Err(e) => {
                warn!("Could not stat browser binary {}: {}", path.display(), e);
            }
            _ => {}
        }
    }

    Ok(path)
}

/// Launch configuration for the Chromium driver
#[derive(Debug, Clone)]
pub struct ChromiumSettings {
    /// Explicit binary path; auto-detected when None.
    pub chrome_executable: Option<String>,
    pub headless: bool,
    pub user_agent: String,
    /// Per-navigation bound inside a session.
    pub navigation_timeout: Duration,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for ChromiumSettings {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
            navigation_timeout: Duration::from_secs(60),
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// Driver launching real Chromium processes.
pub struct ChromiumDriver {
    settings: ChromiumSettings,
}

impl ChromiumDriver {
    pub fn new(settings: ChromiumSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl EngineDriver for ChromiumDriver {
    async fn launch(&self) -> Result<Arc<dyn EngineProcess>, EngineError> {
        let binary = verify_browser_binary(self.settings.chrome_executable.as_deref())?;

        let profile_id = Uuid::new_v4().to_string();
        let user_data_dir = std::env::temp_dir()
            .join("ecocal-server")
            .join("browser_data")
            .join(&profile_id);
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| EngineError::StartFailure(format!("profile dir: {}", e)))?;

        info!(
            "Launching browser (headless: {}, profile {})",
            self.settings.headless, profile_id
        );

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&binary)
            .user_data_dir(&user_data_dir)
            .window_size(self.settings.window_width, self.settings.window_height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-default-browser-check")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            // Required when running as root (e.g., in Docker or on a VPS)
            .arg("--no-sandbox")
            .arg(format!("--user-agent={}", self.settings.user_agent));

        if self.settings.headless {
            builder = builder.headless_mode(HeadlessMode::New);
        } else {
            builder = builder.with_head();
        }

        let config = builder.build().map_err(EngineError::StartFailure)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::StartFailure(e.to_string()))?;

        // When the handler stream ends, Chrome has disconnected or crashed.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let handler_profile = profile_id.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Engine {} event: {:?}", handler_profile, event);
            }
            warn!(
                "Engine {} disconnected (event handler ended)",
                handler_profile
            );
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Confirm the engine answers before declaring it ready.
        browser
            .version()
            .await
            .map_err(|e| EngineError::StartFailure(format!("engine not responding: {}", e)))?;

        Ok(Arc::new(ChromiumProcess {
            browser: Arc::new(Mutex::new(Some(browser))),
            alive,
            profile_id,
            user_data_dir,
            navigation_timeout: self.settings.navigation_timeout,
        }))
    }
}

/// One live Chromium process.
pub struct ChromiumProcess {
    browser: Arc<Mutex<Option<Browser>>>,
    alive: Arc<AtomicBool>,
    profile_id: String,
    user_data_dir: PathBuf,
    navigation_timeout: Duration,
}

impl ChromiumProcess {
    fn open_err(&self, what: &str, e: CdpError) -> EngineError {
        if !self.alive.load(Ordering::Relaxed) {
            EngineError::Disconnected(format!("{}: {}", what, e))
        } else {
            EngineError::Unavailable(format!("{}: {}", what, e))
        }
    }
}

#[async_trait]
impl EngineProcess for ChromiumProcess {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn probe(&self) -> Result<(), EngineError> {
        if !self.is_alive() {
            return Err(EngineError::Disconnected(
                "engine event stream ended".into(),
            ));
        }
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("engine already terminated".into()))?;
        browser
            .version()
            .await
            .map_err(|e| EngineError::Disconnected(format!("probe: {}", e)))?;
        Ok(())
    }

    async fn open_session(&self) -> Result<Box<dyn PageSession>, EngineError> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("engine already terminated".into()))?;

        // Fresh browsing context per task: cookies/storage never leak
        // between unrelated requests.
        let context_id: BrowserContextId = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| self.open_err("create browsing context", e))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(EngineError::Unavailable)?;

        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(self.open_err("open page", e));
            }
        };
        drop(guard);

        let id = Uuid::new_v4().to_string();
        debug!("Session {} opened", id);

        Ok(Box::new(ChromiumSession {
            id,
            status: SessionStatus::Active,
            page: Some(page),
            context_id: Some(context_id),
            browser: self.browser.clone(),
            alive: self.alive.clone(),
            navigation_timeout: self.navigation_timeout,
            opened_at: Instant::now(),
        }))
    }

    fn profile_id(&self) -> Option<String> {
        Some(self.profile_id.clone())
    }

    async fn terminate(&self) {
        self.alive.store(false, Ordering::Relaxed);

        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            // Graceful close first, then force-kill whatever is left.
            let _ = browser.close().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = browser.kill().await;
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(
                "Could not remove profile dir {}: {}",
                self.user_data_dir.display(),
                e
            );
        }
        info!("Engine process {} terminated", self.profile_id);
    }
}

/// One isolated browsing context + page, exclusively owned by one task.
struct ChromiumSession {
    id: String,
    status: SessionStatus,
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    browser: Arc<Mutex<Option<Browser>>>,
    alive: Arc<AtomicBool>,
    navigation_timeout: Duration,
    opened_at: Instant,
}

impl ChromiumSession {
    fn disconnected(&self) -> bool {
        !self.alive.load(Ordering::Relaxed)
    }

    fn page(&self) -> Result<&Page, EngineError> {
        if self.disconnected() {
            return Err(EngineError::Disconnected(
                "engine event stream ended".into(),
            ));
        }
        self.page
            .as_ref()
            .ok_or_else(|| EngineError::ExtractionError("session already released".into()))
    }

    fn nav_err(&self, e: CdpError) -> EngineError {
        if self.disconnected() {
            EngineError::Disconnected(format!("navigation: {}", e))
        } else {
            EngineError::NavigationError(e.to_string())
        }
    }

    fn extract_err(&self, e: CdpError) -> EngineError {
        if self.disconnected() {
            EngineError::Disconnected(format!("extraction: {}", e))
        } else {
            EngineError::ExtractionError(e.to_string())
        }
    }

    async fn release(&mut self, next: SessionStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = next;

        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(context_id) = self.context_id.take() {
            let guard = self.browser.lock().await;
            if let Some(browser) = guard.as_ref() {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
            }
        }

        debug!(
            "Session {} released as {:?} after {:?}",
            self.id,
            next,
            self.opened_at.elapsed()
        );
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        let page = self.page()?;
        debug!("Session {} navigating to {}", self.id, url);

        let nav = tokio::time::timeout(self.navigation_timeout, async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, CdpError>(())
        })
        .await;

        match nav {
            Err(_) => Err(EngineError::NavigationTimeout(self.navigation_timeout)),
            Ok(Err(e)) => Err(self.nav_err(e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, EngineError> {
        let page = self.page()?;
        let result = page
            .evaluate(script)
            .await
            .map_err(|e| self.extract_err(e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn title(&mut self) -> Result<Option<String>, EngineError> {
        let page = self.page()?;
        page.get_title().await.map_err(|e| self.extract_err(e))
    }

    async fn screenshot(&mut self) -> Result<String, EngineError> {
        let page = self.page()?;
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let resp = page
            .execute(params)
            .await
            .map_err(|e| self.extract_err(e))?;
        let data: &str = resp.result.data.as_ref();
        Ok(data.to_string())
    }

    async fn close(&mut self) {
        self.release(SessionStatus::Closed).await;
    }

    async fn abort(&mut self) {
        self.release(SessionStatus::Aborted).await;
    }
}
