//! Ingestion: turning extracted candidates into normalized, identified values.
//!
//! All normalization happens exactly once, here:
//! - native ids become fixed-width `MSG-00042` identifiers
//! - missing ids are synthesized from a content hash plus the item's
//!   occurrence number within its fragment, in the separate `SYN-` namespace
//! - view counters with magnitude suffixes are expanded to integers
//! - absent text and timestamps become the sentinels from [`crate::models`]

use crate::error::ExtractionAnomaly;
use crate::models::{CandidateRecord, NO_TEXT, UNKNOWN_TIMESTAMP};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

static METRIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<num>[0-9]+(?:\.[0-9]+)?)\s*(?P<suffix>[kKmM]|هزار|میلیون)?$")
        .expect("metric pattern is valid")
});

/// A candidate after identity resolution and field normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    /// `MSG-…` for native ids, `SYN-…` for synthesized ones.
    pub identifier: String,
    /// Numeric native id, used to advance id cursors.
    pub native: Option<u64>,
    /// Feed timestamp or [`UNKNOWN_TIMESTAMP`].
    pub timestamp: String,
    /// Message text or [`NO_TEXT`].
    pub body: String,
    /// View count after suffix expansion.
    pub metric: u64,
}

/// Identity resolver for one fragment.
///
/// A synthesized id counts how often the same content already appeared
/// earlier in the fragment. Two identical id-less items in one fragment stay
/// distinct, and sampling an unchanged fragment again yields the same ids, so
/// the ledger recognizes them. Create a fresh minter for every fragment.
#[derive(Debug, Default)]
pub struct IdentityMinter {
    occurrences: HashMap<String, u64>,
}

impl IdentityMinter {
    /// Resolves identity and normalizes every field of `candidate`.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the candidate in its fragment, used for
    ///   anomaly reporting only
    /// * `candidate` - The raw extractor output
    ///
    /// # Returns
    ///
    /// The normalized item, or [`ExtractionAnomaly::InvalidNativeId`] when
    /// the feed supplied an id without a numeric tail.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut minter = IdentityMinter::default();
    /// let item = minter.ingest(0, CandidateRecord {
    ///     native_id: Some("news/42".into()),
    ///     text: "hello".into(),
    ///     ..CandidateRecord::default()
    /// })?;
    /// assert_eq!(item.identifier, "MSG-00042");
    /// assert_eq!(item.timestamp, UNKNOWN_TIMESTAMP);
    /// ```
    pub fn ingest(
        &mut self,
        index: usize,
        candidate: CandidateRecord,
    ) -> Result<Ingested, ExtractionAnomaly> {
        let body = if candidate.text.trim().is_empty() {
            NO_TEXT.to_string()
        } else {
            candidate.text
        };
        let timestamp = candidate
            .timestamp
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string());
        let metric = normalize_metric(candidate.raw_metric_text.as_deref());

        let (identifier, native) = match candidate.native_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let n = parse_native_id(raw).ok_or_else(|| ExtractionAnomaly::InvalidNativeId {
                    index,
                    raw: raw.to_string(),
                })?;
                (native_identifier(n), Some(n))
            }
            _ => {
                let hash = content_hash(&body, &timestamp);
                let occurrence = self.occurrences.entry(hash.clone()).or_insert(0);
                *occurrence += 1;
                (synthesized_identifier(&hash, *occurrence), None)
            }
        };

        Ok(Ingested {
            identifier,
            native,
            timestamp,
            body,
            metric,
        })
    }
}

/// Fixed-width identifier for a numeric native id.
pub fn native_identifier(n: u64) -> String {
    format!("MSG-{n:05}")
}

/// Inverse of [`native_identifier`]; `None` for synthesized identifiers.
pub fn parse_native_identifier(identifier: &str) -> Option<u64> {
    identifier.strip_prefix("MSG-")?.parse().ok()
}

/// Parses a feed-supplied id such as `"1234"` or `"channel/1234"`.
pub fn parse_native_id(raw: &str) -> Option<u64> {
    let tail = raw.rsplit('/').next().unwrap_or(raw);
    let digits = fold_digits(tail.trim());
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// First 12 hex chars of SHA-256 over text and timestamp.
fn content_hash(text: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(timestamp.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(12);
    digest
}

/// `SYN-{occurrence:05}-{hash}` for the `occurrence`-th item with `hash`.
fn synthesized_identifier(hash: &str, occurrence: u64) -> String {
    format!("SYN-{occurrence:05}-{hash}")
}

/// Expands a view counter to an integer.
///
/// Digits are folded to ASCII first. A `k`/`هزار` suffix multiplies by a
/// thousand, `m`/`میلیون` by a million. A decimal without a suffix is not a
/// valid counter.
///
/// # Arguments
///
/// * `raw` - The counter text as extracted, if any
///
/// # Returns
///
/// The rounded count, or 0 when `raw` is absent or unparseable.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_metric(Some("12.5k")), 12_500);
/// assert_eq!(normalize_metric(Some("۱۲٫۵ هزار")), 12_500);
/// assert_eq!(normalize_metric(Some("4821")), 4821);
/// assert_eq!(normalize_metric(Some("many")), 0);
/// ```
pub fn normalize_metric(raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return 0;
    };
    let folded = fold_digits(raw.trim());
    let Some(caps) = METRIC_PATTERN.captures(&folded) else {
        return 0;
    };
    let num = &caps["num"];
    let multiplier = match caps.name("suffix").map(|m| m.as_str()) {
        Some("k" | "K" | "هزار") => 1_000.0,
        Some("m" | "M" | "میلیون") => 1_000_000.0,
        // plain counters are whole numbers
        _ if num.contains('.') => return 0,
        _ => 1.0,
    };
    match num.parse::<f64>() {
        Ok(value) => (value * multiplier).round() as u64,
        Err(_) => 0,
    }
}

/// Folds Persian and Arabic-Indic digits to ASCII, maps the Persian decimal
/// separator to `.`, and drops thousands separators.
fn fold_digits(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            '۰'..='۹' => char::from_digit(c as u32 - '۰' as u32, 10),
            '٠'..='٩' => char::from_digit(c as u32 - '٠' as u32, 10),
            '٫' => Some('.'),
            ',' | '٬' => None,
            other => Some(other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(native_id: Option<&str>, text: &str) -> CandidateRecord {
        CandidateRecord {
            native_id: native_id.map(str::to_string),
            text: text.to_string(),
            timestamp: Some("2025-01-01T00:00:00+00:00".to_string()),
            raw_metric_text: Some("1.2k".to_string()),
        }
    }

    #[test]
    fn test_metric_thousand_suffix() {
        assert_eq!(normalize_metric(Some("12.5k")), 12500);
        assert_eq!(normalize_metric(Some("12.5K")), 12500);
        assert_eq!(normalize_metric(Some("12.5 هزار")), 12500);
        assert_eq!(normalize_metric(Some("۱۲٫۵ هزار")), 12500);
    }

    #[test]
    fn test_metric_plain_and_million() {
        assert_eq!(normalize_metric(Some("4821")), 4821);
        assert_eq!(normalize_metric(Some("۴۸۲۱")), 4821);
        assert_eq!(normalize_metric(Some("1,204")), 1204);
        assert_eq!(normalize_metric(Some("1.3M")), 1_300_000);
        assert_eq!(normalize_metric(Some("2 میلیون")), 2_000_000);
    }

    #[test]
    fn test_metric_unparseable() {
        assert_eq!(normalize_metric(Some("views")), 0);
        assert_eq!(normalize_metric(Some("")), 0);
        assert_eq!(normalize_metric(Some("12.5")), 0);
        assert_eq!(normalize_metric(Some("12x")), 0);
        assert_eq!(normalize_metric(None), 0);
    }

    #[test]
    fn test_native_id_normalization() {
        assert_eq!(parse_native_id("42"), Some(42));
        assert_eq!(parse_native_id("news_channel/1234"), Some(1234));
        assert_eq!(parse_native_id("۴۲"), Some(42));
        assert_eq!(parse_native_id("message-x"), None);
        assert_eq!(native_identifier(42), "MSG-00042");
        assert_eq!(native_identifier(1234567), "MSG-1234567");
        assert_eq!(parse_native_identifier("MSG-00042"), Some(42));
        assert_eq!(parse_native_identifier("SYN-00001-abcdefabcdef"), None);
    }

    #[test]
    fn test_ingest_native_candidate() {
        let mut minter = IdentityMinter::default();
        let ingested = minter.ingest(0, candidate(Some("77"), "hello")).unwrap();
        assert_eq!(ingested.identifier, "MSG-00077");
        assert_eq!(ingested.native, Some(77));
        assert_eq!(ingested.metric, 1200);
        assert_eq!(ingested.body, "hello");
    }

    #[test]
    fn test_ingest_rejects_non_numeric_native_id() {
        let mut minter = IdentityMinter::default();
        let err = minter.ingest(3, candidate(Some("abc"), "hello")).unwrap_err();
        assert_eq!(
            err,
            ExtractionAnomaly::InvalidNativeId {
                index: 3,
                raw: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_identical_items_in_one_fragment_stay_distinct() {
        let mut minter = IdentityMinter::default();
        let a = minter.ingest(0, candidate(None, "same text")).unwrap();
        let b = minter.ingest(1, candidate(None, "same text")).unwrap();
        assert_ne!(a.identifier, b.identifier);
        assert!(a.identifier.starts_with("SYN-00001-"));
        assert!(b.identifier.starts_with("SYN-00002-"));
        // same content hashes the same
        assert_eq!(a.identifier[10..], b.identifier[10..]);
        assert_eq!(a.native, None);
    }

    #[test]
    fn test_resampled_fragment_gets_same_ids() {
        let mint = |texts: &[&str]| -> Vec<String> {
            let mut minter = IdentityMinter::default();
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| minter.ingest(i, candidate(None, t)).unwrap().identifier)
                .collect()
        };
        let first = mint(&["x", "y", "x"]);
        let again = mint(&["x", "y", "x"]);
        assert_eq!(first, again);
        assert_ne!(first[0], first[2]);
        assert_ne!(first[0][10..], first[1][10..]);
    }

    #[test]
    fn test_native_ids_do_not_shift_synthesized_ones() {
        let mut minter = IdentityMinter::default();
        minter.ingest(0, candidate(Some("9"), "x")).unwrap();
        let synthesized = minter.ingest(1, candidate(None, "x")).unwrap();
        assert!(synthesized.identifier.starts_with("SYN-00001-"));
    }

    #[test]
    fn test_sentinels_applied_once() {
        let mut minter = IdentityMinter::default();
        let ingested = minter
            .ingest(
                0,
                CandidateRecord {
                    native_id: Some("5".into()),
                    ..CandidateRecord::default()
                },
            )
            .unwrap();
        assert_eq!(ingested.body, NO_TEXT);
        assert_eq!(ingested.timestamp, UNKNOWN_TIMESTAMP);
        assert_eq!(ingested.metric, 0);
    }
}
