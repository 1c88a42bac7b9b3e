//! BrowserManager: owns the Chrome instance whose traffic is captured.
//!
//! Lazily launches (or connects to) a browser and keeps a single active page.
//! The capture engine never touches this directly; tool handlers build a
//! [`CdpLogSource`] and [`CdpBodyFetcher`] from the active page and attach
//! them to the engine.

use crate::capture::{BodyFetcher, LogSource};
use crate::cdp::{CdpBodyFetcher, CdpLogSource};
use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::{Handler, Page};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for the BrowserManager.
#[derive(Debug, Clone)]
pub struct BrowserManagerConfig {
    /// Custom Chrome/Edge binary path.
    pub browser_path: Option<String>,
    /// Connect to an already-running browser via CDP URL.
    pub cdp_url: Option<String>,
    /// Run headless (default: true).
    pub headless: bool,
    /// Browser window size.
    pub window_size: (u32, u32),
}

impl Default for BrowserManagerConfig {
    fn default() -> Self {
        Self {
            browser_path: None,
            cdp_url: None,
            headless: true,
            window_size: (1280, 720),
        }
    }
}

pub struct BrowserManager {
    browser: RwLock<Option<Browser>>,
    page: RwLock<Option<Page>>,
    config: BrowserManagerConfig,
}

impl BrowserManager {
    pub fn new(config: BrowserManagerConfig) -> Self {
        Self {
            browser: RwLock::new(None),
            page: RwLock::new(None),
            config,
        }
    }

    /// Ensure a browser is running, launching or connecting if needed.
    pub async fn ensure_browser(&self) -> Result<()> {
        if self.browser.read().await.is_some() {
            return Ok(());
        }

        let mut browser_guard = self.browser.write().await;
        // Another caller may have won the race for the write lock
        if browser_guard.is_some() {
            return Ok(());
        }

        let (browser, handler) = match self.config.cdp_url {
            Some(ref cdp_url) => Browser::connect(cdp_url)
                .await
                .with_context(|| format!("Failed to connect to browser at {}", cdp_url))?,
            None => Browser::launch(self.launch_config()?)
                .await
                .context("Failed to launch browser")?,
        };
        drive_handler(handler);

        *browser_guard = Some(browser);
        Ok(())
    }

    fn launch_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.config.window_size.0, self.config.window_size.1)
            .arg("--disable-dev-shm-usage")
            .arg("--remote-allow-origins=*");

        if let Some(ref path) = self.config.browser_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder.build().map_err(|e| anyhow::anyhow!("{}", e))
    }

    /// Get or create the active page.
    pub async fn page(&self) -> Result<Page> {
        self.ensure_browser().await?;

        if let Some(ref page) = *self.page.read().await {
            return Ok(page.clone());
        }

        let mut page_guard = self.page.write().await;
        if let Some(ref page) = *page_guard {
            return Ok(page.clone());
        }

        let browser_guard = self.browser.read().await;
        let browser = browser_guard.as_ref().context("Browser not initialized")?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to create new page")?;

        *page_guard = Some(page.clone());
        Ok(page)
    }

    /// Network log source and body fetcher bound to the active page.
    pub async fn capture_binding(&self) -> Result<(Arc<dyn LogSource>, Arc<dyn BodyFetcher>)> {
        let page = self.page().await?;
        let source = CdpLogSource::attach(&page).await?;
        Ok((Arc::new(source), Arc::new(CdpBodyFetcher::new(page))))
    }

    /// Close the browser if one is running.
    pub async fn shutdown(&self) {
        self.page.write().await.take();
        if let Some(mut browser) = self.browser.write().await.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!(error = %e, "Failed to close browser cleanly");
            }
        }
    }
}

/// The CDP handler must be polled for the browser connection to make progress.
fn drive_handler(mut handler: Handler) {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });
}
