//! Chromiumoxide-backed live page access.
//!
//! [`BrowserSession`] launches a local Chrome, opens a page, captures a
//! [`DomSnapshot`] of it, and mirrors the locator's highlight back onto the
//! live page.

use std::env;
use std::path::PathBuf;

use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    handler::viewport::Viewport,
    page::Page,
};
use futures_util::StreamExt;
use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::dom_scripts::{CONTENT_SNAPSHOT_SCRIPT, highlight_expression};
use crate::dom_snapshot::{DomSnapshot, SnapshotError};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser runtime error: {0}")]
    Message(String),
    #[error("no page is open")]
    NoPage,
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            width: 1280,
            height: 900,
            args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    /// Defaults plus `ZSXQ_CHROME_BIN` and `ZSXQ_HEADFUL`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(path) = env::var_os("ZSXQ_CHROME_BIN").filter(|value| !value.is_empty()) {
            options.chrome_executable = Some(PathBuf::from(path));
        }
        if let Ok(value) = env::var("ZSXQ_HEADFUL") {
            options.headless = !matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        options
    }

    fn to_config(&self) -> Result<BrowserConfig, BrowserError> {
        let viewport = Viewport {
            width: self.width,
            height: self.height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: self.width >= self.height,
            has_touch: false,
        };

        let mut builder = BrowserConfig::builder();
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let builder = builder
            .viewport(viewport)
            .window_size(self.width, self.height)
            .args(self.args.clone());
        let builder = if self.headless {
            builder
        } else {
            builder.with_head()
        };

        builder.build().map_err(BrowserError::Message)
    }
}

pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
}

impl BrowserSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, BrowserError> {
        let config = options.to_config()?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(map_chromiumoxide_error)?;
        debug!("launched browser (headless={})", options.headless);

        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            page: None,
        })
    }

    /// Open `url` in a new tab and wait for it to load.
    pub async fn open(&mut self, url: &str) -> Result<(), BrowserError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(map_chromiumoxide_error)?;
        page.wait_for_navigation()
            .await
            .map_err(map_chromiumoxide_error)?;
        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::NoPage)
    }

    pub async fn scroll_to(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.page()?
            .evaluate_expression(format!("window.scrollTo({x}, {y})"))
            .await
            .map_err(map_chromiumoxide_error)?;
        Ok(())
    }

    /// Capture the current page as a [`DomSnapshot`].
    pub async fn snapshot(&self) -> Result<DomSnapshot, BrowserError> {
        let value: Value = self
            .page()?
            .evaluate_expression(CONTENT_SNAPSHOT_SCRIPT)
            .await
            .map_err(map_chromiumoxide_error)?
            .into_value()
            .map_err(map_chromiumoxide_error)?;
        Ok(DomSnapshot::from_value(value)?)
    }

    /// Apply the snapshot's highlight state to the live page.
    pub async fn sync_highlight(&self, snapshot: &DomSnapshot) -> Result<bool, BrowserError> {
        let target = snapshot.highlighted().first().map(|id| id.0);
        let applied: bool = self
            .page()?
            .evaluate_expression(highlight_expression(target))
            .await
            .map_err(map_chromiumoxide_error)?
            .into_value()
            .map_err(map_chromiumoxide_error)?;
        Ok(applied)
    }

    pub async fn close(mut self) -> Result<(), BrowserError> {
        if let Err(err) = self.browser.close().await {
            warn!("browser close failed: {err}");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> BrowserError {
    BrowserError::Message(err.to_string())
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                debug!("chromiumoxide handler error: {err}");
            }
        }
    })
}
