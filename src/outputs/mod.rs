//! Checkpoint sinks: durable, append-only persistence of accepted batches.
//!
//! # Submodules
//!
//! - [`csv`]: spreadsheet-friendly CSV with a header row and UTF-8 BOM
//! - [`jsonl`]: one JSON object per line
//!
//! # Contract
//!
//! An append adds exactly the records passed to that call and never rewrites
//! what earlier calls wrote, including calls from earlier process runs. The
//! first non-empty append creates the destination and its schema. An empty
//! batch is acknowledged without touching the filesystem.
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── news_messages.csv                   # scroll strategy, or --resume
//! └── news_20250506_093000_messages.csv   # pages strategy, one per run
//! ```

pub mod csv;
pub mod jsonl;

use crate::error::WriteError;
use crate::models::{Record, Strategy};
use crate::utils::channel_slug;
use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub use self::csv::CsvSink;
pub use self::jsonl::JsonLinesSink;

/// Acknowledgement of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Records written by the acknowledged call.
    pub written: usize,
}

/// Append-only persistence for accepted records.
pub trait CheckpointSink {
    /// Appends `records` to `destination`.
    ///
    /// # Arguments
    ///
    /// * `records` - The pending batch, in acceptance order
    /// * `destination` - Checkpoint file; created on the first non-empty append
    ///
    /// # Returns
    ///
    /// An [`Ack`] with the number of records written. On error nothing is
    /// acknowledged and the caller keeps the batch.
    async fn append(&mut self, records: &[Record], destination: &Path)
    -> Result<Ack, WriteError>;

    /// Identifiers already persisted at `destination`, in file order.
    ///
    /// A missing destination has none.
    async fn existing_identifiers(&self, destination: &Path) -> Result<Vec<String>, WriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `Channel,Number,Sequence,Date,Message,Views` with a BOM
    Csv,
    /// One serialized record per line
    Jsonl,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
        }
    }
}

/// The configured sink, chosen once per invocation.
#[derive(Debug)]
pub enum OutputSink {
    Csv(CsvSink),
    JsonLines(JsonLinesSink),
}

impl OutputSink {
    /// Picks the sink for `format`.
    pub fn new(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Csv => OutputSink::Csv(CsvSink),
            OutputFormat::Jsonl => OutputSink::JsonLines(JsonLinesSink),
        }
    }
}

impl CheckpointSink for OutputSink {
    async fn append(
        &mut self,
        records: &[Record],
        destination: &Path,
    ) -> Result<Ack, WriteError> {
        match self {
            OutputSink::Csv(sink) => sink.append(records, destination).await,
            OutputSink::JsonLines(sink) => sink.append(records, destination).await,
        }
    }

    async fn existing_identifiers(&self, destination: &Path) -> Result<Vec<String>, WriteError> {
        match self {
            OutputSink::Csv(sink) => sink.existing_identifiers(destination).await,
            OutputSink::JsonLines(sink) => sink.existing_identifiers(destination).await,
        }
    }
}

/// Output file for `channel`.
///
/// The pages strategy stamps the file with the run stamp so repeated runs
/// never silently overwrite earlier exports. Passing `None` as `run_stamp`
/// (resume mode) always yields the stable name.
///
/// # Arguments
///
/// * `output_dir` - Directory holding every checkpoint file
/// * `channel` - Channel name, slugged for the file system
/// * `strategy` - Retrieval strategy of the run
/// * `format` - Decides the extension
/// * `run_stamp` - Invocation stamp from [`crate::utils::run_stamp`], or `None`
///
/// # Examples
///
/// ```ignore
/// let dir = Path::new("out");
/// assert_eq!(
///     destination_for(dir, "news", Strategy::Pages, OutputFormat::Csv, Some("20250506_093000")),
///     dir.join("news_20250506_093000_messages.csv"),
/// );
/// assert_eq!(
///     destination_for(dir, "news", Strategy::Scroll, OutputFormat::Jsonl, Some("20250506_093000")),
///     dir.join("news_messages.jsonl"),
/// );
/// ```
pub fn destination_for(
    output_dir: &Path,
    channel: &str,
    strategy: Strategy,
    format: OutputFormat,
    run_stamp: Option<&str>,
) -> PathBuf {
    let slug = channel_slug(channel);
    let ext = format.extension();
    let name = match (strategy, run_stamp) {
        (Strategy::Pages, Some(stamp)) => format!("{slug}_{stamp}_messages.{ext}"),
        _ => format!("{slug}_messages.{ext}"),
    };
    output_dir.join(name)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_destination_is_stable() {
        let path = destination_for(
            Path::new("/out"),
            "news",
            Strategy::Scroll,
            OutputFormat::Csv,
            Some("20250506_093000"),
        );
        assert_eq!(path, PathBuf::from("/out/news_messages.csv"));
    }

    #[test]
    fn test_pages_destination_is_stamped() {
        let path = destination_for(
            Path::new("/out"),
            "news",
            Strategy::Pages,
            OutputFormat::Jsonl,
            Some("20250506_093000"),
        );
        assert_eq!(path, PathBuf::from("/out/news_20250506_093000_messages.jsonl"));
    }

    #[test]
    fn test_resume_destination_drops_stamp() {
        let path = destination_for(
            Path::new("/out"),
            "news/../x",
            Strategy::Pages,
            OutputFormat::Csv,
            None,
        );
        assert_eq!(path, PathBuf::from("/out/news____x_messages.csv"));
    }

    #[tokio::test]
    async fn test_output_sink_dispatches_by_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news_messages.jsonl");
        let mut sink = OutputSink::new(OutputFormat::Jsonl);

        let ack = sink
            .append(&[testing::record(1, "MSG-00001")], &path)
            .await
            .unwrap();
        assert_eq!(ack.written, 1);
        assert_eq!(
            sink.existing_identifiers(&path).await.unwrap(),
            vec!["MSG-00001".to_string()]
        );
    }
}
