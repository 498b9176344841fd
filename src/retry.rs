//! Retry utilities with exponential backoff
//!
//! This module provides the backoff-aware loop that wraps every remote
//! provider call. Transient failures are retried under an exponential policy
//! with jitter; two error sentinels steer the loop from the outside:
//!
//! - [`Error::permanent`] marks the wrapped error as terminal and stops the
//!   loop immediately.
//! - [`Error::retry_after`] requests an exact delay before the next attempt
//!   and resets the backoff policy.
//!
//! Cancellation is observed through a [`CancellationToken`]: a cancelled
//! token aborts the sleep between attempts and surfaces as
//! [`Error::Cancelled`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use agent_core::retry::{retry_with_backoff, RetryConfig};
//! use tokio_util::sync::CancellationToken;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_secs(1));
//!
//! let cancel = CancellationToken::new();
//! let result = retry_with_backoff(&cancel, config, || async {
//!     // Your async operation here
//!     Ok::<_, agent_core::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Default initial backoff interval.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
/// Default multiplier applied to the interval after each attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Default cap on a single backoff interval.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
/// Default randomization factor for jitter.
pub const DEFAULT_RANDOMIZATION: f64 = 0.5;
/// Default ceiling on total elapsed retry time.
pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(15 * 60);

/// Callback invoked after each failed attempt with the error and the delay
/// that will be slept before the next one.
pub type NotifyFn = Arc<dyn Fn(&Error, Duration) + Send + Sync>;

/// Exponential backoff policy with jitter.
///
/// Each call to [`next_backoff`](ExponentialBackoff::next_backoff) returns a
/// jittered delay drawn uniformly from
/// `[current * (1 - r), current * (1 + r)]`, then grows the current interval
/// by the multiplier up to the cap. `None` means the policy is exhausted:
/// sleeping the next interval would push total elapsed time past the
/// configured maximum.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    current_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    randomization: f64,
    max_elapsed: Option<Duration>,
    started_at: Instant,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_INITIAL_INTERVAL,
            DEFAULT_MULTIPLIER,
            DEFAULT_MAX_INTERVAL,
            DEFAULT_RANDOMIZATION,
            Some(DEFAULT_MAX_ELAPSED),
        )
    }
}

impl ExponentialBackoff {
    /// Create a policy with explicit parameters. `max_elapsed: None` removes
    /// the elapsed-time ceiling entirely.
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        randomization: f64,
        max_elapsed: Option<Duration>,
    ) -> Self {
        Self {
            initial_interval,
            current_interval: initial_interval,
            multiplier,
            max_interval,
            randomization: randomization.clamp(0.0, 1.0),
            max_elapsed,
            started_at: Instant::now(),
        }
    }

    /// Restore the current interval to the initial interval.
    ///
    /// The elapsed-time clock is not restarted; a reset only affects the
    /// interval progression.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
    }

    /// Time since the policy was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Next jittered delay, or `None` if the policy is exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let next = self.jittered(self.current_interval);

        if let Some(max_elapsed) = self.max_elapsed {
            if self.elapsed() + next > max_elapsed {
                return None;
            }
        }

        // Grow the interval for the following attempt, capped.
        let grown = self.current_interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(grown.min(self.max_interval.as_secs_f64()));

        Some(next)
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if self.randomization == 0.0 {
            return interval;
        }
        let base = interval.as_secs_f64();
        let delta = base * self.randomization;
        // Uniform in [base - delta, base + delta].
        let jittered = base - delta + rand::random::<f64>() * (2.0 * delta);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Configuration for retry behavior
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; 0 means unlimited (bounded only by
    /// elapsed time).
    pub max_attempts: u32,

    /// Initial delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (e.g. 1.5 grows by half each time)
    pub backoff_multiplier: f64,

    /// Random jitter factor to prevent thundering herd (0.0 to 1.0)
    pub jitter_factor: f64,

    /// Ceiling on total elapsed retry time
    pub max_elapsed: Duration,

    /// Optional callback observing each failed attempt
    pub notify: Option<NotifyFn>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field("max_elapsed", &self.max_elapsed)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: DEFAULT_INITIAL_INTERVAL,
            max_delay: DEFAULT_MAX_INTERVAL,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: DEFAULT_RANDOMIZATION,
            max_elapsed: DEFAULT_MAX_ELAPSED,
            notify: None,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of attempts (0 = unlimited)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the ceiling on total elapsed retry time
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Set a callback observing each failed attempt
    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&Error, Duration) + Send + Sync + 'static,
    {
        self.notify = Some(Arc::new(notify));
        self
    }

    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_delay,
            self.backoff_multiplier,
            self.max_delay,
            self.jitter_factor,
            Some(self.max_elapsed),
        )
    }
}

/// Retry an async operation with exponential backoff.
///
/// The operation is invoked at least once. Failures are classified in order:
///
/// 1. An error wrapped with [`Error::permanent`] is unwrapped and returned
///    immediately.
/// 2. A cancelled token returns [`Error::Cancelled`].
/// 3. An error wrapped with [`Error::retry_after`] sleeps exactly the
///    requested delay and resets the backoff policy.
/// 4. Exhausted attempt or elapsed-time budgets return the last error.
/// 5. Otherwise the loop sleeps the next jittered delay and tries again.
///
/// The inner error is never transformed; sentinels are stripped before an
/// error is handed back to the caller.
pub async fn retry_with_backoff<F, Fut, T>(
    cancel: &CancellationToken,
    config: RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut policy = config.policy();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("retry aborted"));
        }

        attempts += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let err = match err {
            Error::Permanent(inner) => return Err(*inner),
            other => other,
        };

        if cancel.is_cancelled() {
            return Err(Error::cancelled("retry aborted"));
        }

        // An explicit retry-after delay overrides the policy and resets it.
        let (delay, err) = match err {
            Error::RetryAfter { delay, source } => {
                policy.reset();
                (Some(delay), *source)
            }
            other => (None, other),
        };

        if config.max_attempts != 0 && attempts >= config.max_attempts {
            return Err(err);
        }

        let delay = match delay.or_else(|| policy.next_backoff()) {
            Some(delay) => delay,
            None => return Err(err),
        };

        if let Some(notify) = &config.notify {
            notify(&err, delay);
        }
        log::debug!(
            "retrying after {:?} (attempt {}): {}",
            delay,
            attempts,
            err
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled("retry aborted")),
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.2);
    }

    #[tokio::test]
    async fn test_backoff_growth_without_jitter() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(60),
            0.0,
            None,
        );

        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(4)));

        policy.reset();
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_backoff_interval_is_capped() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_secs(8),
            10.0,
            Duration::from_secs(10),
            0.0,
            None,
        );

        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(8)));
        // 8 * 10 = 80, capped to 10.
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_backoff_jitter_bounds() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_secs(10),
            1.0,
            Duration::from_secs(60),
            0.5,
            None,
        );

        for _ in 0..100 {
            let delay = policy.next_backoff().unwrap();
            assert!(delay >= Duration::from_secs(5), "delay {:?} below bound", delay);
            assert!(delay <= Duration::from_secs(15), "delay {:?} above bound", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhausts_on_max_elapsed() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_secs(30),
            1.0,
            Duration::from_secs(60),
            0.0,
            Some(Duration::from_secs(60)),
        );

        assert!(policy.next_backoff().is_some());
        tokio::time::advance(Duration::from_secs(45)).await;
        // 45s elapsed + 30s next > 60s ceiling.
        assert!(policy.next_backoff().is_none());
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new().with_max_attempts(3);

        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(&cancel, config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<i32, Error>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));

        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(&cancel, config, move || {
            let count = count_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(Error::timeout())
                } else {
                    Ok::<i32, Error>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(10));

        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(&cancel, config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::timeout()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_permanent_short_circuits() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new().with_max_attempts(5);

        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(&cancel, config, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::permanent(Error::unauthorized("bad key"))) }
        })
        .await;

        // The inner error comes back unwrapped, after exactly one attempt.
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_sleeps_requested_delay() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new().with_max_attempts(3);

        let start = Instant::now();
        let call_count = Arc::new(AtomicUsize::new(0));
        let count_clone = call_count.clone();
        let result = retry_with_backoff(&cancel, config, move || {
            let count = count_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count == 1 {
                    Err(Error::retry_after(
                        Duration::from_secs(1),
                        Error::rate_limited("slow down"),
                    ))
                } else {
                    Ok::<i32, Error>(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retry_cancellation_during_sleep() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new()
            .with_max_attempts(0)
            .with_initial_delay(Duration::from_secs(30));

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });

        let result = retry_with_backoff(&cancel, config, || async {
            Err::<i32, Error>(Error::timeout())
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_retry_notify_observes_failures() {
        let cancel = CancellationToken::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_notify(move |_err, _delay| {
                notified_clone.fetch_add(1, Ordering::SeqCst);
            });

        let _ = retry_with_backoff(&cancel, config, || async {
            Err::<i32, Error>(Error::timeout())
        })
        .await;

        // Two sleeps happen for three attempts.
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }
}
