//! Utility functions for naming, string handling, and file system checks.
//!
//! - Run stamps shared by every channel in one invocation
//! - Filesystem-safe channel slugs
//! - Log-friendly truncation of message bodies
//! - Output directory validation

use chrono::Local;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Local-time stamp identifying one invocation, e.g. `20250506_093000`.
pub fn run_stamp() -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    tracing::debug!(%stamp, "Computed run stamp");
    stamp
}

/// Convert a channel identifier to a filename-safe slug.
///
/// Alphanumerics (any script), `_` and `-` are kept; everything else becomes `_`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(channel_slug("news_channel"), "news_channel");
/// assert_eq!(channel_slug("a/b c"), "a_b_c");
/// ```
pub fn channel_slug(channel: &str) -> String {
    channel
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a char boundary at or before `max` bytes and get
/// an ellipsis and byte count appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // sync probe write: simpler error surface
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
