//! Bounded pool of headless browser processes.
//!
//! The pool owns every browser. Callers borrow one page at a time through
//! [`BrowserPool::get_page`] and must hand the lease back with
//! [`BrowserPool::release_page`]; exclusivity is enforced by the idle flag
//! on each pooled browser, mutated only under the pool lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, Page};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::launch_browser;
use crate::config::{EngineSettings, PoolOptions};
use crate::error::{Result, ScrapeError};

/// Fixed user agent applied to every pooled page.
const POOL_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const VIEWPORT_WIDTH: i64 = 1280;
const VIEWPORT_HEIGHT: i64 = 800;

/// First idle-wait poll fires after 1s, later polls every 2s.
const ACQUIRE_FIRST_POLL: Duration = Duration::from_secs(1);
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// A browser owned by the pool.
struct PooledBrowser {
    id: Uuid,
    browser: Arc<Mutex<Browser>>,
    is_idle: bool,
    last_used_at: Instant,
    pages_created: u64,
}

/// Shared pool bookkeeping, guarded by one lock so find-idle-or-create and
/// mark-idle/mark-active stay atomic with respect to each other.
struct PoolState {
    browsers: Vec<PooledBrowser>,
    /// Growth slots reserved by in-flight launches, counted against
    /// `max_pool_size` so concurrent callers cannot overshoot it.
    launching: usize,
    shutting_down: bool,
}

impl PoolState {
    fn claim_idle(&mut self) -> Option<(Uuid, Arc<Mutex<Browser>>)> {
        let entry = self.browsers.iter_mut().find(|b| b.is_idle)?;
        entry.is_idle = false;
        entry.last_used_at = Instant::now();
        Some((entry.id, entry.browser.clone()))
    }
}

/// A page checked out from the pool, tagged with its owning browser.
pub struct PageLease {
    page: Page,
    browser_id: Uuid,
}

impl PageLease {
    pub fn page(&self) -> &Page {
        &self.page
    }
}

/// Read-only snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub pages_created: u64,
}

/// Bounded pool of browser processes with idle eviction.
pub struct BrowserPool {
    settings: EngineSettings,
    state: Arc<Mutex<PoolState>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserPool {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(PoolState {
                browsers: Vec::new(),
                launching: 0,
                shutting_down: false,
            })),
            maintenance: Mutex::new(None),
        }
    }

    /// Launch `min_pool_size` browsers concurrently and start maintenance.
    ///
    /// Any launch failure propagates and leaves the pool unusable.
    pub async fn initialize(&self) -> Result<()> {
        let min = self.settings.pool.min_pool_size;
        let launches = (0..min).map(|_| launch_browser(&self.settings));
        let browsers = futures::future::try_join_all(launches).await?;

        {
            let mut state = self.state.lock().await;
            for browser in browsers {
                state.browsers.push(PooledBrowser {
                    id: Uuid::new_v4(),
                    browser: Arc::new(Mutex::new(browser)),
                    is_idle: true,
                    last_used_at: Instant::now(),
                    pages_created: 0,
                });
            }
        }

        self.spawn_maintenance().await;
        info!("browser pool initialized with {} browsers", min);
        Ok(())
    }

    /// Acquire a browser: idle handle first, then growth up to
    /// `max_pool_size`, then a bounded wait of `retry_limit` polls.
    async fn get_browser(&self) -> Result<(Uuid, Arc<Mutex<Browser>>)> {
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return Err(ScrapeError::PoolShuttingDown);
            }
            if let Some(claimed) = state.claim_idle() {
                return Ok(claimed);
            }
            if state.browsers.len() + state.launching < self.settings.pool.max_pool_size {
                state.launching += 1;
                drop(state);
                return self.launch_and_claim().await;
            }
        }

        let retry_limit = self.settings.pool.retry_limit;
        for attempt in 1..=retry_limit {
            let delay = if attempt == 1 {
                ACQUIRE_FIRST_POLL
            } else {
                ACQUIRE_POLL_INTERVAL
            };
            tokio::time::sleep(delay).await;

            let mut state = self.state.lock().await;
            if state.shutting_down {
                return Err(ScrapeError::PoolShuttingDown);
            }
            if let Some(claimed) = state.claim_idle() {
                debug!("acquired browser after {attempt} idle-wait polls");
                return Ok(claimed);
            }
        }
        Err(ScrapeError::PoolExhausted {
            attempts: retry_limit,
        })
    }

    /// Launch into a reserved growth slot; the slot is freed win or lose.
    async fn launch_and_claim(&self) -> Result<(Uuid, Arc<Mutex<Browser>>)> {
        let launched = launch_browser(&self.settings).await;

        let mut state = self.state.lock().await;
        state.launching -= 1;
        let browser = launched?;
        if state.shutting_down {
            drop(state);
            close_browser(&Arc::new(Mutex::new(browser))).await;
            return Err(ScrapeError::PoolShuttingDown);
        }

        let id = Uuid::new_v4();
        let browser = Arc::new(Mutex::new(browser));
        state.browsers.push(PooledBrowser {
            id,
            browser: browser.clone(),
            is_idle: false,
            last_used_at: Instant::now(),
            pages_created: 0,
        });
        debug!("pool grew to {} browsers", state.browsers.len());
        Ok((id, browser))
    }

    /// Open a configured page on an acquired browser, optionally navigated.
    ///
    /// On any failure the browser goes back to idle before the error is
    /// re-raised, so a broken navigation can never strand a handle.
    pub async fn get_page(&self, url: Option<&str>) -> Result<PageLease> {
        let (browser_id, browser) = self.get_browser().await?;
        match self.open_page(&browser, url).await {
            Ok(page) => {
                let mut state = self.state.lock().await;
                if let Some(entry) = state.browsers.iter_mut().find(|b| b.id == browser_id) {
                    entry.pages_created += 1;
                }
                Ok(PageLease { page, browser_id })
            }
            Err(e) => {
                self.release_browser(browser_id).await;
                Err(e)
            }
        }
    }

    async fn open_page(&self, browser: &Arc<Mutex<Browser>>, url: Option<&str>) -> Result<Page> {
        let page = {
            let guard = browser.lock().await;
            guard.new_page("about:blank").await?
        };
        match self.configure_and_navigate(&page, url).await {
            Ok(()) => Ok(page),
            Err(e) => {
                if let Err(close_err) = page.clone().close().await {
                    warn!("failed to close page after setup error: {close_err}");
                }
                Err(e)
            }
        }
    }

    async fn configure_and_navigate(&self, page: &Page, url: Option<&str>) -> Result<()> {
        page.execute(SetUserAgentOverrideParams::new(POOL_USER_AGENT.to_string()))
            .await?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(VIEWPORT_WIDTH)
            .height(VIEWPORT_HEIGHT)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| ScrapeError::Launch(format!("invalid viewport params: {e}")))?;
        page.execute(metrics).await?;

        if let Some(url) = url {
            self.navigate(page, url).await?;
        }
        Ok(())
    }

    /// Navigate with a hard timeout, then wait for a usable ready state.
    async fn navigate(&self, page: &Page, url: &str) -> Result<()> {
        debug!("navigating to {url}");
        let params = NavigateParams::builder().url(url).build().map_err(|e| {
            ScrapeError::Navigation {
                url: url.to_string(),
                reason: format!("invalid URL: {e}"),
            }
        })?;

        let timeout = self.settings.navigation_timeout();
        tokio::time::timeout(timeout, page.execute(params))
            .await
            .map_err(|_| ScrapeError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            })?
            .map_err(|e| ScrapeError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        wait_for_page_ready(page, self.settings.page_ready_timeout()).await;
        Ok(())
    }

    /// Close the page and return its browser to idle.
    ///
    /// Close errors are logged and swallowed; releasing must never leave
    /// the caller blocked or the browser stranded.
    pub async fn release_page(&self, lease: PageLease) {
        let PageLease { page, browser_id } = lease;
        if let Err(e) = page.close().await {
            warn!("failed to close page: {e}");
        }
        self.release_browser(browser_id).await;
    }

    /// Mark a browser idle without closing anything.
    pub async fn release_browser(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.browsers.iter_mut().find(|b| b.id == id) {
            entry.is_idle = true;
            entry.last_used_at = Instant::now();
        }
    }

    async fn spawn_maintenance(&self) {
        let state = self.state.clone();
        let options = self.settings.pool.clone();
        let handle = tokio::spawn(async move {
            let interval = options.maintenance_interval();
            loop {
                tokio::time::sleep(interval).await;
                run_maintenance(&state, &options).await;
            }
        });
        *self.maintenance.lock().await = Some(handle);
    }

    /// Evict browsers idle past the timeout, shrinking toward
    /// `min_pool_size`. Runs periodically; exposed for tests and tooling.
    pub async fn perform_maintenance(&self) {
        run_maintenance(&self.state, &self.settings.pool).await;
    }

    /// Reject new acquisitions, stop maintenance, close every browser.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.abort();
        }

        let browsers: Vec<_> = {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.browsers.drain(..).map(|b| b.browser).collect()
        };
        let count = browsers.len();
        futures::future::join_all(browsers.iter().map(close_browser)).await;
        info!("browser pool shut down ({count} browsers closed)");
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let idle = state.browsers.iter().filter(|b| b.is_idle).count();
        PoolStats {
            total: state.browsers.len(),
            idle,
            active: state.browsers.len() - idle,
            pages_created: state.browsers.iter().map(|b| b.pages_created).sum(),
        }
    }

    /// Limiter width for job schedulers; must match pool capacity to avoid
    /// starvation deadlock between waiting tasks and held browsers.
    pub fn max_pool_size(&self) -> usize {
        self.settings.pool.max_pool_size
    }
}

/// Wait for the page to reach a usable ready state; never fatal.
async fn wait_for_page_ready(page: &Page, timeout: Duration) {
    match tokio::time::timeout(timeout, page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await {
        Ok(Ok(result)) => {
            let state: String = result
                .into_value()
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("page ready state: {state}");
        }
        Ok(Err(e)) => {
            debug!("could not check ready state (possibly non-HTML page): {e}");
        }
        Err(_) => {
            warn!("timeout waiting for page ready state");
        }
    }
}

async fn close_browser(browser: &Arc<Mutex<Browser>>) {
    let mut guard = browser.lock().await;
    if let Err(e) = guard.close().await {
        warn!("failed to close browser: {e}");
    }
}

async fn run_maintenance(state: &Mutex<PoolState>, options: &PoolOptions) {
    let victims = {
        let mut state = state.lock().await;
        if state.shutting_down {
            return;
        }
        let excess = state.browsers.len().saturating_sub(options.min_pool_size);
        if excess == 0 {
            return;
        }
        let now = Instant::now();
        let idle_ages: Vec<(Uuid, Duration)> = state
            .browsers
            .iter()
            .filter(|b| b.is_idle)
            .map(|b| (b.id, now.duration_since(b.last_used_at)))
            .collect();
        let evict = select_evictions(&idle_ages, options.idle_timeout(), excess);

        let mut removed = Vec::new();
        state.browsers.retain(|b| {
            if evict.contains(&b.id) {
                removed.push(b.browser.clone());
                false
            } else {
                true
            }
        });
        removed
    };

    if victims.is_empty() {
        return;
    }
    debug!("maintenance evicting {} idle browsers", victims.len());
    for browser in &victims {
        close_browser(browser).await;
    }
}

/// Pick up to `excess` browsers to evict among idle ones, oldest idle
/// first; only browsers idle longer than `idle_timeout` are eligible.
fn select_evictions(
    idle_ages: &[(Uuid, Duration)],
    idle_timeout: Duration,
    excess: usize,
) -> Vec<Uuid> {
    let mut eligible: Vec<&(Uuid, Duration)> = idle_ages
        .iter()
        .filter(|(_, age)| *age > idle_timeout)
        .collect();
    eligible.sort_by(|a, b| b.1.cmp(&a.1));
    eligible.into_iter().take(excess).map(|(id, _)| *id).collect()
}
