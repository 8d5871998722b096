//! Bounded linear backoff around fetcher calls.
//!
//! [`Retrying`] is a decorator: it wraps any [`Fetcher`] and is itself a
//! `Fetcher`, so the controller never sees a transient failure.
//!
//! # Backoff Strategy
//!
//! After failed attempt `k` the delay before attempt `k + 1` is
//! `base_delay * k`. Once `max_attempts` attempts have failed the last error is
//! surfaced as [`FetchError::Exhausted`], which is channel-fatal.

use crate::error::FetchError;
use crate::fetchers::Fetcher;
use crate::models::{Cursor, Fragment, Strategy};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, instrument, warn};

/// How often and how patiently a fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    max_attempts: u32,
    /// Delay after the first failure; later delays are multiples of it.
    base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Total attempts per fetch, clamped to at least one
    /// * `base_delay` - Delay after the first failed attempt
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let policy = RetryPolicy::new(3, Duration::from_secs(1));
    /// assert_eq!(policy.delay_after(1), Duration::from_secs(1));
    /// assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    /// assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    /// ```
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

/// Wrapper that adds linear backoff retry logic to any [`Fetcher`].
///
/// # Examples
///
/// ```ignore
/// let pages = PageFetcher::new("https://eitaa.com", Duration::from_secs(30))?;
/// let mut fetcher = Retrying::new(pages, RetryPolicy::default());
/// let cursor = fetcher.begin("news_channel");
/// let fragment = fetcher.fetch(&cursor).await?;
/// ```
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Gives the wrapped fetcher back, e.g. to close its session.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F> fmt::Debug for Retrying<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<F: Fetcher> Fetcher for Retrying<F> {
    fn strategy(&self) -> Strategy {
        self.inner.strategy()
    }

    fn begin(&mut self, channel: &str) -> Cursor {
        self.inner.begin(channel)
    }

    #[instrument(level = "debug", skip_all, fields(?cursor))]
    async fn fetch(&mut self, cursor: &Cursor) -> Result<Fragment, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            match self.inner.fetch(cursor).await {
                Ok(fragment) => {
                    debug!(
                        attempt,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        bytes = fragment.html.len(),
                        "fetch succeeded"
                    );
                    return Ok(fragment);
                }
                Err(e) => {
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;
                    if attempt >= self.policy.max_attempts {
                        error!(
                            attempt,
                            max = self.policy.max_attempts,
                            elapsed_ms_total,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }

                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
