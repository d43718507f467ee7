//! Headless browser management.
//!
//! Launching goes through chromiumoxide (CDP). The pool owns every browser
//! process; callers only ever hold a page lease.

mod pool;

pub use pool::{BrowserPool, PageLease, PoolStats};

use std::path::PathBuf;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tracing::info;

use crate::config::EngineSettings;
use crate::error::{Result, ScrapeError};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

/// Find a Chrome/Chromium executable.
fn find_chrome(settings: &EngineSettings) -> Result<PathBuf> {
    if let Some(ref explicit) = settings.chrome_executable {
        if explicit.exists() {
            return Ok(explicit.clone());
        }
        return Err(ScrapeError::Launch(format!(
            "configured chrome executable not found: {}",
            explicit.display()
        )));
    }

    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }

    // Check PATH via `which`
    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    Err(ScrapeError::Launch(
        "Chrome/Chromium not found; install it or set chrome_executable in settings".into(),
    ))
}

/// Launch one browser process and spawn its CDP event drain.
pub(crate) async fn launch_browser(settings: &EngineSettings) -> Result<Browser> {
    let chrome_path = find_chrome(settings)?;
    info!("Launching browser (headless={})", settings.headless);

    let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
    if !settings.headless {
        builder = builder.with_head();
    }

    builder = builder
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-software-rasterizer");
    for arg in &settings.chrome_args {
        builder = builder.arg(arg);
    }

    let config = builder
        .build()
        .map_err(|e| ScrapeError::Launch(format!("failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| ScrapeError::Launch(format!("failed to launch browser: {e}")))?;

    // Drain CDP events until the browser goes away.
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    Ok(browser)
}
