//! Id-cursor fetcher over plain HTTP.
//!
//! Channel pages are served at `{base_url}/{channel}` and older history at
//! `{base_url}/{channel}?before={id}`. The response is the widget markup the
//! extractor understands, and it usually carries a `<link rel="prev">` whose
//! `before` parameter is used as the cursor hint.

use super::Fetcher;
use crate::error::FetchError;
use crate::models::{Cursor, Fragment, Strategy};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

static PREV_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel=prev]").expect("static selector is valid"));

#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
    base_url: Url,
    channel_url: Option<Url>,
}

impl PageFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feed_harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        info!(%base_url, "Page fetcher ready");

        Ok(Self {
            client,
            base_url,
            channel_url: None,
        })
    }

    /// URL of the page at `cursor` for the current channel.
    pub fn page_url(&self, cursor: &Cursor) -> Result<Url, FetchError> {
        let mut url = self
            .channel_url
            .clone()
            .ok_or_else(|| FetchError::Transport("fetch called before begin".into()))?;
        match cursor {
            Cursor::BeforeId(None) => {}
            Cursor::BeforeId(Some(id)) => {
                url.query_pairs_mut().append_pair("before", &id.to_string());
            }
            Cursor::Scroll(_) => {
                return Err(FetchError::Transport(
                    "page fetcher cannot follow a scroll cursor".into(),
                ));
            }
        }
        Ok(url)
    }
}

impl Fetcher for PageFetcher {
    fn strategy(&self) -> Strategy {
        Strategy::Pages
    }

    fn begin(&mut self, channel: &str) -> Cursor {
        let encoded = urlencoding::encode(channel.trim_matches('/'));
        self.channel_url = self.base_url.join(&encoded).ok();
        Cursor::BeforeId(None)
    }

    #[instrument(level = "info", skip_all, fields(?cursor))]
    async fn fetch(&mut self, cursor: &Cursor) -> Result<Fragment, FetchError> {
        let url = self.page_url(cursor)?;
        let resp = self.client.get(url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
                url: url.to_string(),
            });
        }

        let html = resp.text().await?;
        let cursor_hint = prev_cursor(&html, &url);
        debug!(%url, bytes = html.len(), ?cursor_hint, "Fetched page");

        Ok(Fragment { html, cursor_hint })
    }
}

/// Reads the `before` parameter of the page's `<link rel="prev">`.
fn prev_cursor(html: &str, page_url: &Url) -> Option<Cursor> {
    let document = Html::parse_document(html);
    let href = document.select(&PREV_LINK).next()?.value().attr("href")?;
    let prev = page_url.join(href).ok()?;
    let before = prev
        .query_pairs()
        .find(|(key, _)| key == "before")
        .and_then(|(_, value)| value.parse().ok())?;
    Some(Cursor::BeforeId(Some(before)))
}
