//! Fixed-interval polling and bounded retry
//!
//! Every component that waits on external convergence (fleet size, probe
//! responses, reconfiguration commands, stale-member removal) goes through
//! [`PollPolicy`], so intervals and attempt limits live in one place and can
//! be shortened in tests.

use std::{fmt::Display, future::Future, time::Duration};
use tracing::{debug, info, warn};

/// Interval and attempt limit for a polling or retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two consecutive attempts
    pub interval: Duration,
    /// Maximum number of attempts. None means keep going until success.
    pub max_attempts: Option<u32>,
}

/// Returned by [`PollPolicy::retry`] once every attempt has failed
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl PollPolicy {
    pub const fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// One pause with nothing to check, such as letting a started server settle
    pub async fn settle(label: &str, delay: Duration) {
        info!("{}: waiting {:?}", label, delay);
        tokio::time::sleep(delay).await;
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    fn allows_after(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Run `op` until it returns `Ok`, sleeping `interval` between failures.
    ///
    /// The closure receives the 1-based attempt number. There is no sleep
    /// after the final failed attempt.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{}: succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if self.allows_after(attempt) => {
                    warn!(
                        "{}: attempt {} failed, retrying in {:?}: {}",
                        label, attempt, self.interval, err
                    );
                    tokio::time::sleep(self.interval).await;
                }
                Err(err) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }
    }

    /// Run `op` until it yields `Some`, sleeping `interval` between rounds.
    ///
    /// Errors from `op` end the loop immediately. Returns `Ok(None)` when the
    /// attempt limit is reached without the condition holding.
    pub async fn poll_until<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(value) = op(attempt).await? {
                return Ok(Some(value));
            }
            if !self.allows_after(attempt) {
                debug!("{}: gave up after {} attempts", label, attempt);
                return Ok(None);
            }
            debug!(
                "{}: not ready after attempt {}, waiting {:?}",
                label, attempt, self.interval
            );
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_retry_stops_at_first_success() {
        let calls = Cell::new(0);
        let policy = PollPolicy::bounded(3, Duration::ZERO);

        let result: Result<u32, Exhausted<String>> = policy
            .retry("test", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 2 {
                        Err(format!("attempt {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_full_delay() {
        let start = tokio::time::Instant::now();
        PollPolicy::settle("settle", Duration::from_secs(30)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_exhausts_with_last_error() {
        let calls = Cell::new(0);
        let policy = PollPolicy::bounded(3, Duration::ZERO);

        let result: Result<(), Exhausted<String>> = policy
            .retry("test", |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("failure {attempt}")) }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "failure 3");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts_only() {
        let policy = PollPolicy::bounded(3, Duration::from_secs(3));
        let start = tokio::time::Instant::now();

        let _: Result<(), Exhausted<&str>> = policy.retry("test", |_| async { Err("no") }).await;

        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_poll_until_gives_up() {
        let policy = PollPolicy::bounded(4, Duration::ZERO);
        let calls = Cell::new(0);

        let result: Result<Option<()>, String> = policy
            .poll_until("test", |_| {
                calls.set(calls.get() + 1);
                async { Ok(None) }
            })
            .await;

        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn test_poll_until_unbounded_waits_for_condition() {
        let policy = PollPolicy::unbounded(Duration::ZERO);

        let result: Result<Option<u32>, String> = policy
            .poll_until("test", |attempt| async move {
                Ok((attempt == 10).then_some(attempt))
            })
            .await;

        assert_eq!(result.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_poll_until_propagates_error() {
        let policy = PollPolicy::unbounded(Duration::ZERO);

        let result: Result<Option<()>, String> = policy
            .poll_until("test", |_| async { Err("boom".to_string()) })
            .await;

        assert_eq!(result.unwrap_err(), "boom");
    }
}
