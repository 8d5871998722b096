//! # Feed Harvest
//!
//! An incremental harvester for public channel feeds. Each channel is walked
//! from its newest message back through its history, every message is
//! normalized into a [`models::Record`], duplicates are filtered through a
//! per-channel ledger, and accepted records are appended to a checkpoint file
//! in batches so a crash never loses more than one batch.
//!
//! ## Usage
//!
//! ```sh
//! feed_harvest news_channel sports_channel -o ./exports
//! feed_harvest --config harvest.yaml --resume
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: a [`fetchers::Fetcher`] returns one fragment per cursor,
//!    wrapped in [`retry::Retrying`] for linear backoff
//! 2. **Extraction**: [`extract::WidgetExtractor`] turns markup into candidates
//! 3. **Filtering**: [`ingest`] assigns identifiers, the ledger drops repeats
//! 4. **Checkpointing**: an [`outputs::OutputSink`] appends batches to disk
//!
//! [`controller::ProgressController`] drives these stages per channel.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod controller;
mod error;
mod extract;
mod fetchers;
mod ingest;
mod ledger;
mod models;
mod outputs;
mod retry;
mod utils;

use cli::Cli;
use config::{ConfigFile, HarvestSettings, load_config_file};
use controller::{ChannelOutcome, ProgressController, Terminal};
use extract::WidgetExtractor;
use fetchers::Fetcher;
use fetchers::pages::PageFetcher;
use ledger::DedupLedger;
use models::Strategy;
use outputs::{CheckpointSink, OutputSink, destination_for};
use retry::Retrying;
use utils::{ensure_writable_dir, run_stamp};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("feed_harvest starting up");

    let args = Cli::parse();
    debug!(?args.config, channels = args.channels.len(), "Parsed CLI arguments");

    let file = match &args.config {
        Some(path) => load_config_file(path).await?,
        None => ConfigFile::default(),
    };
    let settings = HarvestSettings::resolve(&args, file)?;
    info!(
        channels = settings.channels.len(),
        strategy = ?settings.strategy,
        format = ?settings.format,
        resume = settings.resume,
        "Resolved settings"
    );

    // Early check: fail before any network traffic if the output dir is unusable
    if let Err(e) = ensure_writable_dir(&settings.output_dir).await {
        error!(
            path = %settings.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let stamp = run_stamp();
    let mut sink = OutputSink::new(settings.format);

    let outcomes = match settings.strategy {
        Strategy::Pages => {
            let pages = PageFetcher::new(&settings.base_url, settings.request_timeout)?;
            let mut fetcher = Retrying::new(pages, settings.retry);
            harvest_channels(&mut fetcher, &mut sink, &settings, &stamp).await
        }
        #[cfg(feature = "browser")]
        Strategy::Scroll => {
            let session =
                fetchers::browser::BrowserFetcher::open(&settings.base_url, settings.settle)
                    .await?;
            let mut fetcher = Retrying::new(session, settings.retry);
            let outcomes = harvest_channels(&mut fetcher, &mut sink, &settings, &stamp).await;
            if let Err(e) = fetcher.into_inner().close().await {
                warn!(error = %e, "Browser session did not close cleanly");
            }
            outcomes
        }
        #[cfg(not(feature = "browser"))]
        Strategy::Scroll => {
            error!("The scroll strategy needs a build with the `browser` feature");
            return Err("scroll strategy unavailable: rebuild with --features browser".into());
        }
    };

    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let accepted: u64 = outcomes.iter().map(|o| o.accepted).sum();

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        channels = outcomes.len(),
        failed,
        accepted,
        "Execution complete"
    );

    if failed > 0 {
        return Err(format!("{failed} of {} channels failed", outcomes.len()).into());
    }
    Ok(())
}

/// Harvests every configured channel in order with one fetcher.
///
/// A failed channel is logged and the run moves on to the next one.
async fn harvest_channels<F: Fetcher>(
    fetcher: &mut F,
    sink: &mut OutputSink,
    settings: &HarvestSettings,
    stamp: &str,
) -> Vec<ChannelOutcome> {
    let extractor = WidgetExtractor;
    let mut outcomes = Vec::with_capacity(settings.channels.len());

    for channel in &settings.channels {
        let run_stamp = (!settings.resume).then_some(stamp);
        let destination = destination_for(
            &settings.output_dir,
            channel,
            settings.strategy,
            settings.format,
            run_stamp,
        );

        let ledger = if settings.resume {
            resume_ledger(sink, &destination).await
        } else {
            DedupLedger::with_capacity(settings.limits.post_threshold)
        };

        let outcome = ProgressController::new(&mut *fetcher, &extractor, &mut *sink, &settings.limits)
            .run(channel, &destination, ledger)
            .await;
        log_outcome(&outcome);
        outcomes.push(outcome);
    }
    outcomes
}

async fn resume_ledger(sink: &OutputSink, destination: &Path) -> DedupLedger {
    match sink.existing_identifiers(destination).await {
        Ok(ids) => {
            let ledger = DedupLedger::seeded(ids);
            if !ledger.is_empty() {
                info!(
                    path = %destination.display(),
                    seeded = ledger.len(),
                    "Seeded ledger from existing checkpoint"
                );
            }
            ledger
        }
        Err(e) => {
            warn!(
                path = %destination.display(),
                error = %e,
                "Could not read existing checkpoint; starting with an empty ledger"
            );
            DedupLedger::default()
        }
    }
}

fn log_outcome(outcome: &ChannelOutcome) {
    match &outcome.terminal {
        Terminal::Done(reason) => info!(
            channel = %outcome.channel,
            path = %outcome.destination.display(),
            ?reason,
            accepted = outcome.accepted,
            flushed = outcome.flushed,
            unflushed = outcome.unflushed,
            anomalies = outcome.anomalies,
            iterations = outcome.iterations,
            "Channel finished"
        ),
        Terminal::Failed(e) => error!(
            channel = %outcome.channel,
            path = %outcome.destination.display(),
            error = %e,
            accepted = outcome.accepted,
            flushed = outcome.flushed,
            unflushed = outcome.unflushed,
            iterations = outcome.iterations,
            "Channel failed"
        ),
    }
}
