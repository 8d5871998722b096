//! Scroll-cursor fetcher backed by a headless Chromium session.
//!
//! One browser and one tab live for the whole invocation. `begin` only
//! records the channel; the first fetch navigates. Every fetch moves the
//! viewport as the cursor says, waits for the feed to settle, and samples
//! the rendered DOM.
//!
//! | Cursor | Viewport move | Settle |
//! |--------|---------------|--------|
//! | `Forward { offset }` | to the bottom, then to `offset` from the top | full, twice |
//! | `Backward { offset }` | up by `offset` pixels | half |

use super::Fetcher;
use crate::error::FetchError;
use crate::models::{Cursor, Fragment, ScrollDirection, ScrollPosition, Strategy};
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub struct BrowserFetcher {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    base_url: Url,
    channel_url: Option<Url>,
    loaded: bool,
    settle: Duration,
}

fn browser_error(err: CdpError) -> FetchError {
    FetchError::Browser(err.to_string())
}

impl BrowserFetcher {
    /// Launches the browser and opens the tab reused for every channel.
    #[instrument(level = "info", skip_all, fields(%base_url))]
    pub async fn open(base_url: &str, settle: Duration) -> Result<Self, FetchError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let config = BrowserConfig::builder()
            .window_size(1920, 1080)
            .arg("--incognito")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .build()
            .map_err(FetchError::Browser)?;

        let (browser, mut events) = Browser::launch(config).await.map_err(browser_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "Browser event loop stopped");
                    break;
                }
            }
        });
        let page = browser.new_page("about:blank").await.map_err(browser_error)?;
        info!("Browser session opened");

        Ok(Self {
            browser,
            handler,
            page,
            base_url: base,
            channel_url: None,
            loaded: false,
            settle,
        })
    }

    /// Ends the session. Call once, after the last channel.
    pub async fn close(mut self) -> Result<(), FetchError> {
        self.browser.close().await.map_err(browser_error)?;
        if let Err(e) = self.handler.await {
            warn!(error = %e, "Browser event task ended abnormally");
        }
        info!("Browser session closed");
        Ok(())
    }

    async fn run_script(&self, script: String, settle: Duration) -> Result<(), FetchError> {
        self.page.evaluate(script).await.map_err(browser_error)?;
        sleep(settle).await;
        Ok(())
    }

    async fn move_viewport(&self, position: ScrollPosition) -> Result<(), FetchError> {
        match position.direction {
            ScrollDirection::Forward => {
                self.run_script(
                    "window.scrollTo(0, document.body.scrollHeight);".to_string(),
                    self.settle,
                )
                .await?;
                self.run_script(
                    format!("window.scrollTo(0, {});", position.offset),
                    self.settle,
                )
                .await
            }
            ScrollDirection::Backward => {
                self.run_script(
                    format!("window.scrollBy(0, -{});", position.offset),
                    self.settle / 2,
                )
                .await
            }
        }
    }
}

impl Fetcher for BrowserFetcher {
    fn strategy(&self) -> Strategy {
        Strategy::Scroll
    }

    fn begin(&mut self, channel: &str) -> Cursor {
        let encoded = urlencoding::encode(channel.trim_matches('/'));
        self.channel_url = self.base_url.join(&encoded).ok();
        self.loaded = false;
        Cursor::Scroll(ScrollPosition::top())
    }

    #[instrument(level = "info", skip_all, fields(?cursor))]
    async fn fetch(&mut self, cursor: &Cursor) -> Result<Fragment, FetchError> {
        let Cursor::Scroll(position) = cursor else {
            return Err(FetchError::Browser(
                "browser fetcher cannot follow an id cursor".into(),
            ));
        };
        let url = self
            .channel_url
            .clone()
            .ok_or_else(|| FetchError::Browser("fetch called before begin".into()))?;

        // a failed navigation leaves `loaded` unset so a retry navigates again
        if !self.loaded {
            self.page.goto(url.as_str()).await.map_err(browser_error)?;
            sleep(self.settle).await;
            self.loaded = true;
            info!(%url, "Channel page loaded");
        }

        self.move_viewport(*position).await?;
        let html = self.page.content().await.map_err(browser_error)?;
        debug!(bytes = html.len(), "Sampled rendered feed");

        Ok(Fragment::new(html))
    }
}
