//! Feed fragment extraction.
//!
//! The [`Extractor`] turns one raw fragment into an ordered sequence of
//! per-item results. A malformed item yields an [`ExtractionAnomaly`] in its
//! slot and extraction of the rest of the fragment carries on.
//!
//! [`WidgetExtractor`] understands the channel widget markup:
//!
//! ```text
//! div.etme_widget_message_wrap[id]         one message, id = native id
//! ├── div.etme_widget_message_text         body
//! ├── a.etme_widget_message_date > time    datetime attribute
//! └── span.etme_widget_message_views       view counter ("12.5k")
//! ```

use crate::error::ExtractionAnomaly;
use crate::models::CandidateRecord;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static MESSAGE: Lazy<Selector> = Lazy::new(|| selector("div.etme_widget_message_wrap"));
static MESSAGE_TEXT: Lazy<Selector> = Lazy::new(|| selector("div.etme_widget_message_text"));
static DATE_ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a.etme_widget_message_date"));
static DATE_TIME: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static VIEWS: Lazy<Selector> = Lazy::new(|| selector("span.etme_widget_message_views"));
static DATA_POST: Lazy<Selector> = Lazy::new(|| selector("[data-post]"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Parses a raw fragment into candidates, in document order.
///
/// Must be pure: no side effects, and an empty result means the fragment
/// had no content at all.
pub trait Extractor {
    fn extract(&self, html: &str) -> Vec<Result<CandidateRecord, ExtractionAnomaly>>;
}

/// Extractor for the channel widget markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct WidgetExtractor;

impl Extractor for WidgetExtractor {
    fn extract(&self, html: &str) -> Vec<Result<CandidateRecord, ExtractionAnomaly>> {
        let document = Html::parse_document(html);
        document
            .select(&MESSAGE)
            .enumerate()
            .map(|(index, block)| extract_block(index, block))
            .collect()
    }
}

fn extract_block(index: usize, block: ElementRef<'_>) -> Result<CandidateRecord, ExtractionAnomaly> {
    let native_id = non_blank(block.value().attr("id")).or_else(|| {
        block
            .select(&DATA_POST)
            .next()
            .and_then(|e| non_blank(e.value().attr("data-post")))
    });

    let text = block
        .select(&MESSAGE_TEXT)
        .next()
        .map(collapse_text)
        .unwrap_or_default();

    // a date anchor without a datetime is malformed; no anchor at all is not
    let timestamp = match block.select(&DATE_ANCHOR).next() {
        Some(anchor) => Some(
            anchor
                .select(&DATE_TIME)
                .next()
                .and_then(|t| non_blank(t.value().attr("datetime")))
                .ok_or(ExtractionAnomaly::MissingDatetime { index })?,
        ),
        None => None,
    };

    let raw_metric_text = block.select(&VIEWS).next().map(collapse_text);

    Ok(CandidateRecord {
        native_id,
        text,
        timestamp,
        raw_metric_text,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn collapse_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .join(" ")
}
