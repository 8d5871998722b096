//! Feed fetchers: the transport side of a harvest.
//!
//! A [`Fetcher`] turns a [`Cursor`] into a raw [`Fragment`]. One fetcher is
//! constructed per invocation and reused across every channel, with the
//! lifecycle `open → begin(channel) / fetch… → close`.
//!
//! # Strategies
//!
//! | Strategy | Module | Cursor | Notes |
//! |----------|--------|--------|-------|
//! | Pages | [`pages`] | `BeforeId` | Stateless HTTP `?before=<id>` pages |
//! | Scroll | `browser` | `Scroll` | Live headless session, needs the `browser` feature |
//!
//! Fetching the same cursor again after a failure must be safe, so that
//! [`crate::retry::Retrying`] can wrap any implementation.

#[cfg(feature = "browser")]
pub mod browser;
pub mod pages;

use crate::error::FetchError;
use crate::models::{Cursor, Fragment, Strategy};

pub trait Fetcher {
    /// The cursor shape this fetcher understands.
    fn strategy(&self) -> Strategy;

    /// Points the fetcher at `channel` and returns the starting cursor.
    ///
    /// No I/O happens here; the first [`Fetcher::fetch`] does the loading.
    fn begin(&mut self, channel: &str) -> Cursor;

    /// Fetches the fragment at `cursor`.
    async fn fetch(&mut self, cursor: &Cursor) -> Result<Fragment, FetchError>;
}
