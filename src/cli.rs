//! Command-line interface definitions for the harvester.
//!
//! Every option is optional here so that values from a YAML run file can
//! fill the gaps; see [`crate::config::HarvestSettings::resolve`] for
//! precedence and defaults.

use crate::models::Strategy;
use crate::outputs::OutputFormat;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the harvester.
///
/// # Examples
///
/// ```sh
/// # Page back through two channels over HTTP
/// feed_harvest news_channel sports_channel -o ./exports
///
/// # Scroll a live session (needs the `browser` feature), resuming earlier output
/// feed_harvest news_channel --strategy scroll --resume
///
/// # Everything from a run file
/// feed_harvest --config harvest.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Channels to harvest, processed one after another
    pub channels: Vec<String>,

    /// Optional path to a YAML run file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory the checkpoint files are written to
    #[arg(short, long, env = "HARVEST_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Retrieval strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Feed host, channels live at `{base_url}/{channel}`
    #[arg(long, env = "HARVEST_BASE_URL")]
    pub base_url: Option<String>,

    /// Stop a channel after this many accepted messages
    #[arg(short = 'n', long)]
    pub threshold: Option<usize>,

    /// Append to the checkpoint file every N accepted messages
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// Maximum forward fetches per channel
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Attempts per fetch before the channel fails
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Backoff base in milliseconds; attempt k waits k times this
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Pause between consecutive fetches, in milliseconds
    #[arg(long)]
    pub request_delay_ms: Option<u64>,

    /// Per-request timeout for the page fetcher, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Pixels to scroll back per recovery attempt
    #[arg(long)]
    pub recovery_step: Option<u32>,

    /// Recovery attempts before a stalled scroll counts as the end of history
    #[arg(long)]
    pub recovery_ceiling: Option<u32>,

    /// Wait after each viewport move, in milliseconds
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Checkpoint file format
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Continue the existing checkpoint file instead of starting a new one.
    ///
    /// Already persisted messages are skipped. With the pages strategy the
    /// run first collects messages posted since the earlier run, then jumps
    /// below the oldest persisted message.
    #[arg(long)]
    pub resume: bool,
}
