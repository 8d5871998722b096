//! The progress controller: one channel's harvest as an explicit state machine.
//!
//! ```text
//! FETCHING → EXTRACTING → FILTERING ─┬─ new > 0 ──→ ADVANCING → FETCHING
//!     │            │                 └─ new == 0 ─→ STAGNANT
//!     │            └─ no candidates ─→ DONE             │
//!     └─ retries exhausted ─→ FAILED                    ├─ pages  → DONE
//!                                                       └─ scroll → RECOVERING ─┬→ FETCHING
//!                                                                               └→ DONE (ceiling)
//! ```
//!
//! Reaching the record threshold or the iteration cap is also DONE. Every
//! terminal transition performs exactly one unconditional flush.
//!
//! The ledger and batch belong to one channel run and are dropped with it.

use crate::error::{ExtractionAnomaly, FetchError};
use crate::extract::Extractor;
use crate::fetchers::Fetcher;
use crate::ingest::{IdentityMinter, native_identifier, parse_native_id, parse_native_identifier};
use crate::ledger::DedupLedger;
use crate::models::{CandidateRecord, Cursor, Fragment, Record, ScrollPosition, Strategy};
use crate::outputs::CheckpointSink;
use crate::utils::truncate_for_log;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Run-level limits, shared by every channel of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestLimits {
    /// Stop once this many records were accepted in the run.
    pub post_threshold: usize,
    /// Flush whenever the pending batch length is a multiple of this.
    pub checkpoint_interval: usize,
    /// Upper bound on forward fetches per channel.
    pub max_iterations: usize,
    /// Pixels to move back per recovery attempt (scroll only).
    pub recovery_step: u32,
    /// Recovery attempts before stagnation counts as exhaustion.
    pub recovery_ceiling: u32,
    /// Pause between consecutive forward fetches.
    pub request_delay: Duration,
}

impl Default for HarvestLimits {
    fn default() -> Self {
        Self {
            post_threshold: 3000,
            checkpoint_interval: 500,
            max_iterations: 1000,
            recovery_step: 1000,
            recovery_ceiling: 30,
            request_delay: Duration::from_secs(1),
        }
    }
}

/// Why a channel ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No content at the cursor, or a paginated feed stopped yielding new ids.
    Exhausted,
    /// Scroll recovery hit its ceiling without seeing a new id.
    RecoveryExhausted,
    /// The run accepted `post_threshold` records.
    Threshold,
    /// The run used up `max_iterations` forward fetches.
    IterationCap,
}

/// How a channel run ended.
#[derive(Debug)]
pub enum Terminal {
    Done(StopReason),
    /// Retries were exhausted; the channel is abandoned after its final flush.
    Failed(FetchError),
}

/// Summary of one channel run.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: String,
    /// Checkpoint file the run appended to.
    pub destination: PathBuf,
    pub terminal: Terminal,
    /// Records that passed the ledger, equal to the last sequence number.
    pub accepted: u64,
    /// Records acknowledged by the sink.
    pub flushed: usize,
    /// Accepted records the final flush could not persist.
    pub unflushed: usize,
    /// Candidates skipped as malformed.
    pub anomalies: usize,
    /// Forward fetches performed; recovery steps are not counted.
    pub iterations: usize,
}

impl ChannelOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.terminal, Terminal::Failed(_))
    }
}

enum State {
    Fetching,
    Extracting(Fragment),
    Filtering {
        candidates: Vec<Result<CandidateRecord, ExtractionAnomaly>>,
        hint: Option<Cursor>,
    },
    Advancing {
        hint: Option<Cursor>,
        lowest_native: Option<u64>,
    },
    Stagnant,
    Recovering,
    Done(StopReason),
    Failed(FetchError),
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Fetching => "FETCHING",
            State::Extracting(_) => "EXTRACTING",
            State::Filtering { .. } => "FILTERING",
            State::Advancing { .. } => "ADVANCING",
            State::Stagnant => "STAGNANT",
            State::Recovering => "RECOVERING",
            State::Done(_) => "DONE",
            State::Failed(_) => "FAILED",
        };
        f.write_str(name)
    }
}

/// Mutable state of one channel run.
struct ChannelRun {
    channel: String,
    destination: PathBuf,
    ledger: DedupLedger,
    batch: Vec<Record>,
    cursor: Cursor,
    /// Oldest persisted native id of a resumed id-cursor run, consumed by the
    /// jump over history that is already on disk.
    resume_below: Option<u64>,
    accepted: u64,
    flushed: usize,
    anomalies: usize,
    iterations: usize,
}

struct Filtered {
    new_records: usize,
    lowest_native: Option<u64>,
    threshold_reached: bool,
}

/// Drives one channel at a time through fetch, extract, filter and flush.
///
/// The controller borrows its collaborators, so one fetcher session and one
/// sink can serve every channel of an invocation in turn.
pub struct ProgressController<'a, F, E, S> {
    fetcher: &'a mut F,
    extractor: &'a E,
    sink: &'a mut S,
    limits: &'a HarvestLimits,
}

impl<'a, F, E, S> ProgressController<'a, F, E, S>
where
    F: Fetcher,
    E: Extractor,
    S: CheckpointSink,
{
    /// Creates a controller over borrowed collaborators.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Source of fragments, usually wrapped in [`crate::retry::Retrying`]
    /// * `extractor` - Pure fragment parser
    /// * `sink` - Append-only checkpoint writer
    /// * `limits` - Threshold, checkpoint interval and loop bounds
    pub fn new(
        fetcher: &'a mut F,
        extractor: &'a E,
        sink: &'a mut S,
        limits: &'a HarvestLimits,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            sink,
            limits,
        }
    }

    /// Harvests `channel` into `destination` until a terminal state.
    ///
    /// A resumed id-cursor run first walks newest-first to pick up messages
    /// posted since the earlier run. At the first page holding nothing new it
    /// jumps below the oldest persisted identifier and continues into older
    /// history from there.
    ///
    /// # Arguments
    ///
    /// * `channel` - Channel name handed to [`Fetcher::begin`]
    /// * `destination` - Checkpoint file every flush appends to
    /// * `ledger` - Empty for a fresh run, or seeded from `destination` when
    ///   resuming
    ///
    /// # Returns
    ///
    /// The channel's [`ChannelOutcome`]. Fetch failures end up in
    /// [`Terminal::Failed`] rather than an `Err`; the final flush has been
    /// attempted in every case.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut controller = ProgressController::new(&mut fetcher, &WidgetExtractor, &mut sink, &limits);
    /// let outcome = controller
    ///     .run("news", Path::new("out/news_messages.csv"), DedupLedger::default())
    ///     .await;
    /// if outcome.is_failed() {
    ///     eprintln!("{} failed after {} iterations", outcome.channel, outcome.iterations);
    /// }
    /// ```
    #[instrument(level = "info", skip_all, fields(%channel))]
    pub async fn run(
        &mut self,
        channel: &str,
        destination: &Path,
        ledger: DedupLedger,
    ) -> ChannelOutcome {
        let cursor = self.fetcher.begin(channel);
        let resume_below = match cursor {
            Cursor::BeforeId(None) => ledger.iter().filter_map(parse_native_identifier).min(),
            _ => None,
        };
        if let Some(lowest) = resume_below {
            info!(lowest, seeded = ledger.len(), "Resuming; checking for newer messages first");
        }

        let mut run = ChannelRun {
            channel: channel.to_string(),
            destination: destination.to_path_buf(),
            ledger,
            batch: Vec::with_capacity(self.limits.checkpoint_interval),
            cursor,
            resume_below,
            accepted: 0,
            flushed: 0,
            anomalies: 0,
            iterations: 0,
        };

        let mut state = State::Fetching;
        loop {
            debug!(%state, iteration = run.iterations, "Transition");
            state = match state {
                State::Fetching => self.fetch_next(&mut run).await,
                State::Extracting(fragment) => {
                    let candidates = self.extractor.extract(&fragment.html);
                    if candidates.is_empty() {
                        info!(cursor = ?run.cursor, "No more messages at cursor");
                        State::Done(StopReason::Exhausted)
                    } else {
                        State::Filtering {
                            candidates,
                            hint: fragment.cursor_hint,
                        }
                    }
                }
                State::Filtering { candidates, hint } => {
                    let seen = candidates.len();
                    let filtered = self.filter(&mut run, candidates).await;
                    info!(
                        candidates = seen,
                        new = filtered.new_records,
                        total = run.accepted,
                        "Filtered fragment"
                    );
                    if filtered.threshold_reached {
                        State::Done(StopReason::Threshold)
                    } else if filtered.new_records > 0 {
                        State::Advancing {
                            hint,
                            lowest_native: filtered.lowest_native,
                        }
                    } else {
                        State::Stagnant
                    }
                }
                State::Advancing {
                    hint,
                    lowest_native,
                } => match self.next_cursor(hint, lowest_native) {
                    Some(next) => {
                        run.cursor = next;
                        State::Fetching
                    }
                    None => match Self::skip_persisted(&mut run) {
                        Some(next) => next,
                        None => {
                            warn!("Fragment gave no position to continue from");
                            State::Done(StopReason::Exhausted)
                        }
                    },
                },
                State::Stagnant => match self.fetcher.strategy() {
                    // a stateless paginated feed only stagnates at its true end
                    // or at history a resumed run already persisted
                    Strategy::Pages => Self::skip_persisted(&mut run)
                        .unwrap_or(State::Done(StopReason::Exhausted)),
                    Strategy::Scroll => State::Recovering,
                },
                State::Recovering => self.recover(&mut run).await,
                State::Done(reason) => return self.finish(run, Terminal::Done(reason)).await,
                State::Failed(err) => return self.finish(run, Terminal::Failed(err)).await,
            };
        }
    }

    /// Jumps a resumed run below its persisted range, once.
    fn skip_persisted(run: &mut ChannelRun) -> Option<State> {
        let lowest = run.resume_below.take()?;
        info!(lowest, "Reached persisted history; continuing below it");
        run.cursor = Cursor::BeforeId(Some(lowest));
        Some(State::Fetching)
    }

    async fn fetch_next(&mut self, run: &mut ChannelRun) -> State {
        if run.iterations >= self.limits.max_iterations {
            return State::Done(StopReason::IterationCap);
        }
        if run.iterations > 0 && !self.limits.request_delay.is_zero() {
            sleep(self.limits.request_delay).await;
        }
        run.iterations += 1;

        match self.fetcher.fetch(&run.cursor).await {
            Ok(fragment) => State::Extracting(fragment),
            Err(e) => State::Failed(e),
        }
    }

    async fn filter(
        &mut self,
        run: &mut ChannelRun,
        candidates: Vec<Result<CandidateRecord, ExtractionAnomaly>>,
    ) -> Filtered {
        let mut filtered = Filtered {
            new_records: 0,
            lowest_native: None,
            threshold_reached: false,
        };
        // synthesized ids are only stable within one fragment
        let mut minter = IdentityMinter::default();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let ingested = match candidate.and_then(|c| minter.ingest(index, c)) {
                Ok(ingested) => ingested,
                Err(anomaly) => {
                    run.anomalies += 1;
                    warn!(%anomaly, "Skipping malformed candidate");
                    continue;
                }
            };

            if let Some(n) = ingested.native {
                filtered.lowest_native = Some(filtered.lowest_native.map_or(n, |low| low.min(n)));
            }
            if run.ledger.contains(&ingested.identifier) {
                continue;
            }
            run.ledger.add(ingested.identifier.clone());

            run.accepted += 1;
            filtered.new_records += 1;
            debug!(
                id = %ingested.identifier,
                seq = run.accepted,
                body = %truncate_for_log(&ingested.body, 80),
                "Accepted message"
            );
            run.batch.push(Record {
                channel: run.channel.clone(),
                identifier: ingested.identifier,
                sequence_number: run.accepted,
                timestamp: ingested.timestamp,
                body: ingested.body,
                metric: ingested.metric,
            });

            if run.batch.len() % self.limits.checkpoint_interval == 0 {
                self.flush(run).await;
            }
            if run.accepted as usize >= self.limits.post_threshold {
                info!(threshold = self.limits.post_threshold, "Record threshold reached");
                filtered.threshold_reached = true;
                break;
            }
        }
        filtered
    }

    fn next_cursor(&self, hint: Option<Cursor>, lowest_native: Option<u64>) -> Option<Cursor> {
        if hint.is_some() {
            return hint;
        }
        match self.fetcher.strategy() {
            Strategy::Pages => lowest_native.map(|n| Cursor::BeforeId(Some(n))),
            Strategy::Scroll => Some(Cursor::Scroll(ScrollPosition::top())),
        }
    }

    /// Steps the viewport back until an unseen native id shows up.
    async fn recover(&mut self, run: &mut ChannelRun) -> State {
        let step = self.limits.recovery_step;
        let ceiling = self.limits.recovery_ceiling;

        for attempt in 1..=ceiling {
            info!(attempt, ceiling, step, "No new messages; scrolling back");
            let fragment = match self.fetcher.fetch(&Cursor::Scroll(ScrollPosition::back(step))).await {
                Ok(fragment) => fragment,
                Err(e) => return State::Failed(e),
            };

            // synthesized ids are novel by construction, so only native ids count
            let novel = self
                .extractor
                .extract(&fragment.html)
                .into_iter()
                .filter_map(Result::ok)
                .filter_map(|c| c.native_id)
                .filter_map(|raw| parse_native_id(&raw))
                .any(|n| !run.ledger.contains(&native_identifier(n)));

            if novel {
                info!(attempt, "Unseen messages visible again");
                run.cursor = Cursor::Scroll(ScrollPosition::top());
                return State::Fetching;
            }
        }

        info!(ceiling, "Recovery ceiling reached; treating as end of history");
        State::Done(StopReason::RecoveryExhausted)
    }

    async fn flush(&mut self, run: &mut ChannelRun) {
        match self.sink.append(&run.batch, &run.destination).await {
            Ok(ack) => {
                run.flushed += ack.written;
                run.batch.clear();
            }
            Err(e) => {
                warn!(
                    error = %e,
                    pending = run.batch.len(),
                    path = %run.destination.display(),
                    "Checkpoint append failed; batch kept for the next flush"
                );
            }
        }
    }

    async fn finish(&mut self, mut run: ChannelRun, terminal: Terminal) -> ChannelOutcome {
        self.flush(&mut run).await;

        let outcome = ChannelOutcome {
            channel: run.channel,
            destination: run.destination,
            terminal,
            accepted: run.accepted,
            flushed: run.flushed,
            unflushed: run.batch.len(),
            anomalies: run.anomalies,
            iterations: run.iterations,
        };
        match &outcome.terminal {
            Terminal::Done(reason) => info!(
                ?reason,
                accepted = outcome.accepted,
                flushed = outcome.flushed,
                unflushed = outcome.unflushed,
                anomalies = outcome.anomalies,
                iterations = outcome.iterations,
                "Channel done"
            ),
            Terminal::Failed(e) => error!(
                error = %e,
                accepted = outcome.accepted,
                flushed = outcome.flushed,
                unflushed = outcome.unflushed,
                iterations = outcome.iterations,
                "Channel failed"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteError;
    use crate::extract::WidgetExtractor;
    use crate::extract::fixtures::{empty_page, message, page};
    use crate::outputs::Ack;
    use crate::retry::{RetryPolicy, Retrying};
    use std::collections::VecDeque;

    /// Serves scripted responses in order, then `fallback` forever.
    struct ScriptedFetcher {
        strategy: Strategy,
        script: VecDeque<Result<String, String>>,
        fallback: String,
        cursors: Vec<Cursor>,
    }

    impl ScriptedFetcher {
        fn new(strategy: Strategy, script: Vec<Result<String, String>>) -> Self {
            Self {
                strategy,
                script: script.into(),
                fallback: empty_page(),
                cursors: Vec::new(),
            }
        }

        fn pages(pages: Vec<String>) -> Self {
            Self::new(Strategy::Pages, pages.into_iter().map(Ok).collect())
        }
    }

    impl Fetcher for ScriptedFetcher {
        fn strategy(&self) -> Strategy {
            self.strategy
        }

        fn begin(&mut self, _channel: &str) -> Cursor {
            match self.strategy {
                Strategy::Pages => Cursor::BeforeId(None),
                Strategy::Scroll => Cursor::Scroll(ScrollPosition::top()),
            }
        }

        async fn fetch(&mut self, cursor: &Cursor) -> Result<Fragment, FetchError> {
            self.cursors.push(cursor.clone());
            match self.script.pop_front() {
                Some(Ok(html)) => Ok(Fragment::new(html)),
                Some(Err(reason)) => Err(FetchError::Transport(reason)),
                None => Ok(Fragment::new(self.fallback.clone())),
            }
        }
    }

    /// Keeps every successful append; fails the first `failures` calls.
    #[derive(Default)]
    struct MemorySink {
        appends: Vec<Vec<Record>>,
        failures: usize,
    }

    impl MemorySink {
        fn records(&self) -> Vec<Record> {
            self.appends.iter().flatten().cloned().collect()
        }
    }

    impl CheckpointSink for MemorySink {
        async fn append(
            &mut self,
            records: &[Record],
            _destination: &Path,
        ) -> Result<Ack, WriteError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(WriteError::Io(std::io::Error::other("disk full")));
            }
            self.appends.push(records.to_vec());
            Ok(Ack {
                written: records.len(),
            })
        }

        async fn existing_identifiers(&self, _destination: &Path) -> Result<Vec<String>, WriteError> {
            Ok(self.records().into_iter().map(|r| r.identifier).collect())
        }
    }

    fn limits() -> HarvestLimits {
        HarvestLimits {
            post_threshold: 3000,
            checkpoint_interval: 500,
            max_iterations: 100,
            recovery_step: 1000,
            recovery_ceiling: 3,
            request_delay: Duration::ZERO,
        }
    }

    async fn harvest<F: Fetcher>(
        fetcher: &mut F,
        sink: &mut MemorySink,
        limits: &HarvestLimits,
        ledger: DedupLedger,
    ) -> ChannelOutcome {
        let mut controller = ProgressController::new(fetcher, &WidgetExtractor, sink, limits);
        controller.run("news", Path::new("news_messages.csv"), ledger).await
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.identifier.as_str()).collect()
    }

    /// Unique identifiers and a gap-free sequence from 1.
    fn assert_well_formed(records: &[Record]) {
        let mut unique = std::collections::HashSet::new();
        for (i, record) in records.iter().enumerate() {
            assert!(unique.insert(&record.identifier), "duplicate {}", record.identifier);
            assert_eq!(record.sequence_number, i as u64 + 1);
        }
    }

    fn back() -> Cursor {
        Cursor::Scroll(ScrollPosition::back(1000))
    }

    fn top() -> Cursor {
        Cursor::Scroll(ScrollPosition::top())
    }

    #[tokio::test]
    async fn pages_walk_back_until_empty() {
        let mut fetcher =
            ScriptedFetcher::pages(vec![page(&[30, 29, 28]), page(&[27, 26]), empty_page()]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(outcome.accepted, 5);
        assert_eq!(outcome.flushed, 5);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(
            fetcher.cursors,
            vec![
                Cursor::BeforeId(None),
                Cursor::BeforeId(Some(28)),
                Cursor::BeforeId(Some(26)),
            ]
        );

        let records = sink.records();
        assert_well_formed(&records);
        assert_eq!(
            ids(&records),
            vec!["MSG-00030", "MSG-00029", "MSG-00028", "MSG-00027", "MSG-00026"]
        );
        assert_eq!(records[0].channel, "news");
        assert_eq!(records[0].metric, 1500);
        // one final flush, the interval was never reached
        assert_eq!(sink.appends.len(), 1);
    }

    #[test]
    fn cursor_hint_wins_over_derived_cursor() {
        let mut fetcher = ScriptedFetcher::pages(vec![]);
        let mut sink = MemorySink::default();
        let controller_limits = limits();
        let controller =
            ProgressController::new(&mut fetcher, &WidgetExtractor, &mut sink, &controller_limits);

        assert_eq!(
            controller.next_cursor(Some(Cursor::BeforeId(Some(7))), Some(20)),
            Some(Cursor::BeforeId(Some(7)))
        );
        assert_eq!(
            controller.next_cursor(None, Some(20)),
            Some(Cursor::BeforeId(Some(20)))
        );
        assert_eq!(controller.next_cursor(None, None), None);
    }

    #[tokio::test]
    async fn same_candidate_twice_is_accepted_once() {
        let mut fetcher =
            ScriptedFetcher::pages(vec![page(&[5, 4, 3]), page(&[4, 3, 2]), empty_page()]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        let records = sink.records();
        assert_well_formed(&records);
        assert_eq!(ids(&records), vec!["MSG-00005", "MSG-00004", "MSG-00003", "MSG-00002"]);
        assert_eq!(outcome.accepted, 4);
    }

    #[tokio::test]
    async fn empty_first_fragment_is_done_in_one_iteration() {
        let mut fetcher = ScriptedFetcher::pages(vec![empty_page()]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(outcome.iterations, 1);
        // the unconditional final flush still happens
        assert_eq!(sink.appends, vec![Vec::<Record>::new()]);
    }

    #[tokio::test]
    async fn exhaustion_flushes_records_accepted_before_it() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[2, 1])]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(outcome.iterations, 2);
        assert_eq!(sink.appends.len(), 1);
        assert_eq!(ids(&sink.appends[0]), vec!["MSG-00002", "MSG-00001"]);
    }

    #[tokio::test]
    async fn pages_stagnation_is_exhaustion() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[3, 2]), page(&[3, 2])]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(fetcher.cursors.len(), 2);
        assert_eq!(outcome.accepted, 2);
    }

    #[tokio::test]
    async fn scroll_recovery_ceiling_ends_done() {
        let mut fetcher = ScriptedFetcher::new(Strategy::Scroll, vec![]);
        fetcher.fallback = page(&[3, 2]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(
            outcome.terminal,
            Terminal::Done(StopReason::RecoveryExhausted)
        ));
        assert_eq!(fetcher.cursors, vec![top(), top(), back(), back(), back()]);
        assert_eq!(sink.appends.len(), 1);
        assert_eq!(ids(&sink.appends[0]), vec!["MSG-00003", "MSG-00002"]);
    }

    #[tokio::test]
    async fn scroll_recovery_resumes_when_unseen_ids_appear() {
        let mut fetcher = ScriptedFetcher::new(
            Strategy::Scroll,
            vec![
                Ok(page(&[3, 2])),
                Ok(page(&[3, 2])),
                Ok(page(&[3, 2])),
                Ok(page(&[4, 3])),
                Ok(page(&[4, 3, 1])),
            ],
        );
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(
            fetcher.cursors,
            vec![top(), top(), back(), back(), top(), top()]
        );
        let records = sink.records();
        assert_well_formed(&records);
        assert_eq!(ids(&records), vec!["MSG-00003", "MSG-00002", "MSG-00004", "MSG-00001"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_fails_channel_with_final_flush() {
        let inner = ScriptedFetcher::new(
            Strategy::Pages,
            vec![
                Ok(page(&[9, 8])),
                Err("timeout".into()),
                Err("timeout".into()),
                Err("timeout".into()),
            ],
        );
        let mut fetcher = Retrying::new(inner, RetryPolicy::new(3, Duration::from_secs(1)));
        let mut sink = MemorySink::default();

        let t0 = tokio::time::Instant::now();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        match &outcome.terminal {
            Terminal::Failed(FetchError::Exhausted { attempts, .. }) => assert_eq!(*attempts, 3),
            other => panic!("unexpected terminal state: {other:?}"),
        }
        assert!(outcome.is_failed());
        assert_eq!(t0.elapsed(), Duration::from_secs(3));
        assert_eq!(fetcher.into_inner().cursors.len(), 4);
        assert_eq!(sink.appends.len(), 1);
        assert_eq!(ids(&sink.appends[0]), vec!["MSG-00009", "MSG-00008"]);
    }

    #[tokio::test]
    async fn threshold_stops_acceptance_exactly() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[10, 9, 8, 7, 6])]);
        let mut sink = MemorySink::default();
        let limits = HarvestLimits {
            post_threshold: 3,
            ..limits()
        };
        let outcome = harvest(&mut fetcher, &mut sink, &limits, DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Threshold)));
        assert_eq!(outcome.accepted, 3);
        assert_eq!(fetcher.cursors.len(), 1);
        assert_eq!(ids(&sink.records()), vec!["MSG-00010", "MSG-00009", "MSG-00008"]);
    }

    #[tokio::test]
    async fn checkpoints_every_interval() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[5, 4, 3, 2, 1])]);
        let mut sink = MemorySink::default();
        let limits = HarvestLimits {
            checkpoint_interval: 2,
            ..limits()
        };
        harvest(&mut fetcher, &mut sink, &limits, DedupLedger::default()).await;

        let sizes: Vec<usize> = sink.appends.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_well_formed(&sink.records());
    }

    #[tokio::test]
    async fn failed_flush_keeps_batch_for_next_flush() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[4, 3, 2, 1])]);
        let mut sink = MemorySink {
            failures: 1,
            ..MemorySink::default()
        };
        let limits = HarvestLimits {
            checkpoint_interval: 2,
            ..limits()
        };
        let outcome = harvest(&mut fetcher, &mut sink, &limits, DedupLedger::default()).await;

        let sizes: Vec<usize> = sink.appends.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 0]);
        assert_eq!(outcome.flushed, 4);
        assert_eq!(outcome.unflushed, 0);
        assert_well_formed(&sink.records());
    }

    #[tokio::test]
    async fn failed_final_flush_is_reported() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[2, 1])]);
        let mut sink = MemorySink {
            failures: 1,
            ..MemorySink::default()
        };
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(outcome.flushed, 0);
        assert_eq!(outcome.unflushed, 2);
    }

    #[tokio::test]
    async fn malformed_candidates_are_skipped() {
        let broken = r#"<div class="etme_widget_message_wrap" id="7">
            <a class="etme_widget_message_date" href="/post">no time</a>
        </div>"#;
        let not_numeric = r#"<div class="etme_widget_message_wrap" id="abc"></div>"#;
        let html = format!(
            "{}{}{}{}",
            message(Some(8), "a"),
            broken,
            not_numeric,
            message(Some(6), "b")
        );
        let mut fetcher = ScriptedFetcher::pages(vec![html]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        assert_eq!(outcome.anomalies, 2);
        assert_eq!(ids(&sink.records()), vec!["MSG-00008", "MSG-00006"]);
    }

    #[tokio::test]
    async fn iteration_cap_is_a_normal_stop() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[10]), page(&[9]), page(&[8])]);
        let mut sink = MemorySink::default();
        let limits = HarvestLimits {
            max_iterations: 2,
            ..limits()
        };
        let outcome = harvest(&mut fetcher, &mut sink, &limits, DedupLedger::default()).await;

        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::IterationCap)));
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.accepted, 2);
    }

    #[tokio::test]
    async fn items_without_ids_are_never_merged() {
        let html = format!("{}{}", message(None, "same"), message(None, "same"));
        let mut fetcher = ScriptedFetcher::pages(vec![html]);
        let mut sink = MemorySink::default();
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), DedupLedger::default()).await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_well_formed(&records);
        assert!(records.iter().all(|r| r.identifier.starts_with("SYN-")));
        // nothing to page back from
        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
        assert_eq!(fetcher.cursors.len(), 1);
    }

    #[tokio::test]
    async fn resume_fetches_newer_messages_then_skips_persisted_range() {
        let mut fetcher = ScriptedFetcher::pages(vec![
            page(&[52, 51, 50]),
            page(&[45, 40]),
            page(&[39, 38]),
            empty_page(),
        ]);
        let mut sink = MemorySink::default();
        let ledger = DedupLedger::seeded(
            ["MSG-00050", "MSG-00045", "MSG-00040"].map(String::from),
        );
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), ledger).await;

        assert_eq!(
            fetcher.cursors,
            vec![
                Cursor::BeforeId(None),
                Cursor::BeforeId(Some(50)),
                Cursor::BeforeId(Some(40)),
                Cursor::BeforeId(Some(38)),
            ]
        );
        let records = sink.records();
        assert_well_formed(&records);
        assert_eq!(ids(&records), vec!["MSG-00052", "MSG-00051", "MSG-00039", "MSG-00038"]);
        assert!(matches!(outcome.terminal, Terminal::Done(StopReason::Exhausted)));
    }

    #[tokio::test]
    async fn resume_with_nothing_new_jumps_below_oldest_identifier() {
        let mut fetcher = ScriptedFetcher::pages(vec![page(&[50, 40]), page(&[39]), empty_page()]);
        let mut sink = MemorySink::default();
        let ledger = DedupLedger::seeded(["MSG-00050", "MSG-00040"].map(String::from));
        let outcome = harvest(&mut fetcher, &mut sink, &limits(), ledger).await;

        assert_eq!(fetcher.cursors[1], Cursor::BeforeId(Some(40)));
        // sequence still starts at 1 for the run
        let records = sink.records();
        assert_eq!(ids(&records), vec!["MSG-00039"]);
        assert_eq!(records[0].sequence_number, 1);
        assert_eq!(outcome.accepted, 1);
    }

    #[tokio::test]
    async fn unchanged_scroll_page_accepts_idless_item_once() {
        let mut fetcher = ScriptedFetcher::new(Strategy::Scroll, vec![]);
        fetcher.fallback = format!(
            "<html><body>{}{}</body></html>",
            message(Some(5), "a"),
            message(None, "no id")
        );
        let mut sink = MemorySink::default();
        let limits = HarvestLimits {
            max_iterations: 10,
            ..limits()
        };
        let outcome = harvest(&mut fetcher, &mut sink, &limits, DedupLedger::default()).await;

        // stagnates on the second sample, then recovery runs to its ceiling
        assert!(matches!(
            outcome.terminal,
            Terminal::Done(StopReason::RecoveryExhausted)
        ));
        assert_eq!(outcome.iterations, 2);
        assert_eq!(fetcher.cursors, vec![top(), top(), back(), back(), back()]);

        let records = sink.records();
        assert_well_formed(&records);
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.body == "no id").count(), 1);
    }
}
