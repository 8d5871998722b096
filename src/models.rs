//! Data models shared by the harvesting pipeline.
//!
//! This module defines the values that flow between the collaborators:
//! - [`CandidateRecord`]: one feed item as extracted, before identity resolution
//! - [`Record`]: an accepted, sequenced message ready for checkpointing
//! - [`Cursor`]: the opaque "where to fetch next" token handed to a fetcher
//! - [`Fragment`]: one unit of raw feed content returned by a fetch

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Body sentinel for feed items without a text block.
pub const NO_TEXT: &str = "No Text Available";

/// Timestamp sentinel for feed items without a date anchor.
pub const UNKNOWN_TIMESTAMP: &str = "Unknown Date";

/// One feed item as the extractor saw it.
///
/// Every field the feed may omit is an explicit `Option`; the sentinels above
/// are only applied once, at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateRecord {
    /// Identifier supplied by the feed, verbatim.
    pub native_id: Option<String>,
    /// Message text, empty when the item carried none.
    pub text: String,
    /// Original post time as published by the feed.
    pub timestamp: Option<String>,
    /// View counter text, e.g. `"12.5k"` or `"۴٫۲ هزار"`.
    pub raw_metric_text: Option<String>,
}

/// A harvested message.
///
/// `identifier` is unique within a run and `sequence_number` is strictly
/// increasing and gap-free from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub channel: String,
    pub identifier: String,
    pub sequence_number: u64,
    pub timestamp: String,
    pub body: String,
    pub metric: u64,
}

/// Retrieval strategy a fetcher implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Stateless "before this message id" pages over HTTP.
    Pages,
    /// Stateful viewport against a live rendering session.
    Scroll,
}

/// Which way a scroll cursor moves the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Drive to the end of the document, then settle at `offset` from the top.
    Forward,
    /// Move back by `offset` from wherever the viewport currently is.
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPosition {
    pub offset: u32,
    pub direction: ScrollDirection,
}

impl ScrollPosition {
    /// The forward-then-back-to-top cycle used on every normal iteration.
    pub fn top() -> Self {
        Self {
            offset: 0,
            direction: ScrollDirection::Forward,
        }
    }

    pub fn back(step: u32) -> Self {
        Self {
            offset: step,
            direction: ScrollDirection::Backward,
        }
    }
}

/// Position marker for the next fetch.
///
/// The controller only dispatches on the variant; the fields belong to the
/// fetcher that produced or consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Scroll(ScrollPosition),
    /// `None` means the newest page.
    BeforeId(Option<u64>),
}

/// One unit of raw feed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub html: String,
    /// Where the fetcher believes the next fetch should go, when it knows.
    pub cursor_hint: Option<Cursor>,
}

impl Fragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            cursor_hint: None,
        }
    }
}
